//! Backup lifecycle state machine
//!
//! Drives `idle → running → success/error → idle` for one run at a time across
//! every enabled destination. Runs are tagged with a [`RunId`] so events that
//! belong to a cancelled or superseded run are dropped instead of being
//! mistaken for the current one.

use chrono::{DateTime, Duration, Utc};
use jsync_common::{
    Destination, DestinationId, DestinationRegistry, SelectionState, SelectionTree, SessionInfo,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupPhase {
    #[default]
    Idle,
    Running,
    Success,
    Error,
}

impl BackupPhase {
    pub fn as_str(&self) -> &str {
        match self {
            BackupPhase::Idle => "idle",
            BackupPhase::Running => "running",
            BackupPhase::Success => "success",
            BackupPhase::Error => "error",
        }
    }

    /// Success and error dwell before returning to idle
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackupPhase::Success | BackupPhase::Error)
    }
}

impl fmt::Display for BackupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the backup button does in the current phase
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupAction {
    Start,
    Cancel,
    /// Showing a finished run; nothing to do until the dwell ends
    Wait,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Latest progress reported for one destination
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DestinationProgress {
    /// 0 to 100
    pub percent: f64,
    pub current_file: String,
    /// Pre-formatted transfer rate
    pub rate: String,
    pub files_done: u32,
    pub files_total: u32,
}

/// Outcome of a run for one destination
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionReport {
    pub destination_id: DestinationId,
    pub success: bool,
    pub files_copied: u32,
    pub size_transferred: String,
    pub error: Option<String>,
}

impl CompletionReport {
    pub fn succeeded(destination_id: DestinationId, files_copied: u32) -> Self {
        Self {
            destination_id,
            success: true,
            files_copied,
            size_transferred: String::new(),
            error: None,
        }
    }

    pub fn failed(destination_id: DestinationId, error: impl Into<String>) -> Self {
        Self {
            destination_id,
            success: false,
            files_copied: 0,
            size_transferred: "0".to_string(),
            error: Some(error.into()),
        }
    }
}

/// Event emitted by the backup engine
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Progress {
        run_id: RunId,
        destination_id: DestinationId,
        progress: DestinationProgress,
    },
    Complete {
        run_id: RunId,
        report: CompletionReport,
    },
}

impl EngineEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            EngineEvent::Progress { run_id, .. } | EngineEvent::Complete { run_id, .. } => *run_id,
        }
    }
}

/// Everything the engine needs to perform a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub run_id: RunId,
    pub session_path: String,
    pub session_name: String,
    /// Enabled destinations only, in display order
    pub destinations: Vec<Destination>,
    /// Canonical selection filtered against the current session items
    pub selected_paths: Vec<String>,
}

/// Reasons a run is not started; none of them change state
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StartRefused {
    #[error("A backup is already {0}")]
    Busy(BackupPhase),

    #[error("No active session")]
    NoSession,

    #[error("No destinations enabled")]
    NoEnabledDestinations,
}

/// Effect of an engine event on the lifecycle
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Event belongs to another run or arrived in a phase that drops it
    Ignored,
    Progressed,
    Succeeded {
        destination_id: DestinationId,
        /// Destinations of this run that have succeeded so far
        backed_up: usize,
        /// Destinations the run was started with
        total: usize,
    },
    Failed {
        destination_id: Option<DestinationId>,
        error: Option<String>,
    },
}

#[derive(Debug)]
pub struct BackupLifecycle {
    phase: BackupPhase,
    dwell: Duration,
    dwell_deadline: Option<DateTime<Utc>>,
    next_run_id: u64,
    active_run: Option<RunId>,
    run_destinations: Vec<DestinationId>,
    /// Destinations of the active run that sent their completion
    run_reported: BTreeSet<DestinationId>,
    run_succeeded: BTreeSet<DestinationId>,
    progress: BTreeMap<DestinationId, DestinationProgress>,
    global_percent: f64,
    recently_backed_up: BTreeSet<DestinationId>,
    last_synced: Option<DateTime<Utc>>,
}

impl BackupLifecycle {
    pub fn new(dwell: Duration) -> Self {
        Self {
            phase: BackupPhase::Idle,
            dwell,
            dwell_deadline: None,
            next_run_id: 0,
            active_run: None,
            run_destinations: Vec::new(),
            run_reported: BTreeSet::new(),
            run_succeeded: BTreeSet::new(),
            progress: BTreeMap::new(),
            global_percent: 0.0,
            recently_backed_up: BTreeSet::new(),
            last_synced: None,
        }
    }

    pub fn phase(&self) -> BackupPhase {
        self.phase
    }

    pub fn active_run(&self) -> Option<RunId> {
        self.active_run
    }

    /// Most recently reported percent, 100 after a success
    pub fn global_percent(&self) -> f64 {
        self.global_percent
    }

    /// Mean of the per-destination percentages of the current run
    pub fn average_percent(&self) -> f64 {
        if self.progress.is_empty() {
            return self.global_percent;
        }
        self.progress.values().map(|p| p.percent).sum::<f64>() / self.progress.len() as f64
    }

    pub fn progress(&self) -> &BTreeMap<DestinationId, DestinationProgress> {
        &self.progress
    }

    #[allow(dead_code)]
    pub fn recently_backed_up(&self) -> &BTreeSet<DestinationId> {
        &self.recently_backed_up
    }

    pub fn is_recently_backed_up(&self, id: DestinationId) -> bool {
        self.recently_backed_up.contains(&id)
    }

    pub fn last_synced(&self) -> Option<DateTime<Utc>> {
        self.last_synced
    }

    pub fn set_last_synced(&mut self, at: Option<DateTime<Utc>>) {
        self.last_synced = at;
    }

    #[allow(dead_code)]
    pub fn dwell_deadline(&self) -> Option<DateTime<Utc>> {
        self.dwell_deadline
    }

    /// Whether the engine still owes completions for the active run
    pub fn has_outstanding(&self) -> bool {
        self.active_run.is_some()
            && self
                .run_destinations
                .iter()
                .any(|id| !self.run_reported.contains(id))
    }

    /// Every destination of the active run reported and at least one succeeded
    pub fn finished_with_success(&self) -> bool {
        self.active_run.is_some() && !self.has_outstanding() && !self.run_succeeded.is_empty()
    }

    pub fn action(&self) -> BackupAction {
        match self.phase {
            BackupPhase::Idle => BackupAction::Start,
            BackupPhase::Running => BackupAction::Cancel,
            BackupPhase::Success | BackupPhase::Error => BackupAction::Wait,
        }
    }

    /// Move `idle → running` and build the request for the engine
    ///
    /// Refusals leave every piece of state untouched.
    pub fn begin(
        &mut self,
        session: Option<(&SessionInfo, &SelectionTree)>,
        registry: &DestinationRegistry,
        selection: &SelectionState,
    ) -> Result<RunRequest, StartRefused> {
        if self.phase != BackupPhase::Idle {
            return Err(StartRefused::Busy(self.phase));
        }

        let (info, tree) = session.ok_or(StartRefused::NoSession)?;

        let destinations: Vec<Destination> = registry.enabled().cloned().collect();
        if destinations.is_empty() {
            return Err(StartRefused::NoEnabledDestinations);
        }

        self.next_run_id += 1;
        let run_id = RunId(self.next_run_id);

        self.phase = BackupPhase::Running;
        self.active_run = Some(run_id);
        self.dwell_deadline = None;
        self.progress.clear();
        self.global_percent = 0.0;
        self.run_destinations = destinations.iter().map(|d| d.id).collect();
        self.run_reported.clear();
        self.run_succeeded.clear();

        log::info!(
            "Starting {} for session {} to {} destination(s)",
            run_id,
            info.name,
            destinations.len()
        );

        Ok(RunRequest {
            run_id,
            session_path: info.root_path.clone(),
            session_name: info.name.clone(),
            destinations,
            selected_paths: selection.selected_paths(tree),
        })
    }

    /// Move to idle without waiting for the engine
    ///
    /// Applies while running, and during the dwell while destinations of the
    /// run are still being copied. Returns the cancelled run so the caller can
    /// signal the engine.
    pub fn cancel(&mut self) -> Option<RunId> {
        if self.phase != BackupPhase::Running && !self.has_outstanding() {
            return None;
        }

        let run_id = self.active_run.take();
        self.return_to_idle();
        if let Some(run_id) = run_id {
            log::info!("Cancelled {run_id}");
        }
        run_id
    }

    /// The engine refused the run outright
    pub fn abort_start(&mut self, run_id: RunId, error: String, now: DateTime<Utc>) -> Transition {
        if self.active_run != Some(run_id) || self.phase != BackupPhase::Running {
            return Transition::Ignored;
        }

        log::error!("Engine could not start {run_id}: {error}");
        // Nothing was copied, so nothing is left to report
        self.run_reported.extend(self.run_destinations.iter().copied());
        self.enter_terminal(BackupPhase::Error, now);
        Transition::Failed {
            destination_id: None,
            error: Some(error),
        }
    }

    /// Apply an engine event
    ///
    /// Only events of the active run are applied. Progress counts while
    /// running; completions apply in any phase until every destination of the
    /// run has reported, so the last event of a run decides its outcome.
    pub fn handle(&mut self, event: EngineEvent, now: DateTime<Utc>) -> Transition {
        if self.active_run != Some(event.run_id()) {
            log::debug!(
                "Dropping event for {} (active: {:?})",
                event.run_id(),
                self.active_run
            );
            return Transition::Ignored;
        }

        match event {
            EngineEvent::Progress {
                destination_id,
                progress,
                ..
            } => {
                if self.phase != BackupPhase::Running {
                    return Transition::Ignored;
                }
                self.global_percent = progress.percent.clamp(0.0, 100.0);
                self.progress.insert(destination_id, progress);
                Transition::Progressed
            }
            EngineEvent::Complete { report, .. } if report.success => {
                let destination_id = report.destination_id;
                self.run_reported.insert(destination_id);
                self.recently_backed_up.insert(destination_id);
                self.run_succeeded.insert(destination_id);
                if let Some(progress) = self.progress.get_mut(&destination_id) {
                    progress.percent = 100.0;
                }
                self.global_percent = 100.0;
                self.last_synced = Some(now);
                self.enter_terminal(BackupPhase::Success, now);

                log::info!("Backup to destination {destination_id} completed");
                Transition::Succeeded {
                    destination_id,
                    backed_up: self.run_succeeded.len(),
                    total: self.run_destinations.len(),
                }
            }
            EngineEvent::Complete { report, .. } => {
                self.run_reported.insert(report.destination_id);
                log::warn!(
                    "Backup to destination {} failed: {}",
                    report.destination_id,
                    report.error.as_deref().unwrap_or("unknown error")
                );
                self.enter_terminal(BackupPhase::Error, now);
                Transition::Failed {
                    destination_id: Some(report.destination_id),
                    error: report.error,
                }
            }
        }
    }

    /// End the dwell after success/error once it has passed
    pub fn poll_dwell(&mut self, now: DateTime<Utc>) -> bool {
        match self.dwell_deadline {
            Some(deadline) if now >= deadline => {
                self.finish_dwell();
                true
            }
            _ => false,
        }
    }

    /// End the success/error dwell immediately
    ///
    /// Goes back to running while the engine still owes completions for the
    /// run, to idle otherwise.
    pub fn finish_dwell(&mut self) {
        if !self.phase.is_terminal() {
            return;
        }

        if self.has_outstanding() {
            self.phase = BackupPhase::Running;
            self.dwell_deadline = None;
            if let Some(run_id) = self.active_run {
                log::debug!("{run_id} still copying to remaining destinations");
            }
        } else {
            self.active_run = None;
            self.return_to_idle();
        }
    }

    /// Drop a removed destination from transient tracking
    pub fn forget_destination(&mut self, id: DestinationId) {
        self.recently_backed_up.remove(&id);
        self.progress.remove(&id);
    }

    /// Forget everything tied to the current session
    ///
    /// The caller cancels a running run with the engine first.
    pub fn reset(&mut self) {
        self.active_run = None;
        self.recently_backed_up.clear();
        self.last_synced = None;
        self.return_to_idle();
    }

    fn enter_terminal(&mut self, phase: BackupPhase, now: DateTime<Utc>) {
        self.phase = phase;
        self.dwell_deadline = Some(now + self.dwell);
    }

    fn return_to_idle(&mut self) {
        self.phase = BackupPhase::Idle;
        self.dwell_deadline = None;
        self.progress.clear();
        self.global_percent = 0.0;
        self.run_destinations.clear();
        self.run_reported.clear();
        self.run_succeeded.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsync_common::{DestinationDescriptor, DestinationKind};

    fn session() -> (SessionInfo, SelectionTree) {
        let info = SessionInfo {
            name: "Smith".to_string(),
            root_path: "/shoots/Smith".to_string(),
            size_label: "1.00 GiB".to_string(),
            item_count: 12,
        };
        let tree = SelectionTree::from_ids(
            "/shoots/Smith",
            ["/shoots/Smith/Capture", "/shoots/Smith/Selects"],
        );
        (info, tree)
    }

    fn registry(enabled: &[bool]) -> DestinationRegistry {
        let mut registry = DestinationRegistry::new();
        for (i, on) in enabled.iter().enumerate() {
            let id = registry
                .add(DestinationDescriptor {
                    path: format!("/backups/{i}"),
                    label: format!("Backup {i}"),
                    kind: DestinationKind::Local,
                    has_existing_backup: false,
                })
                .id;
            registry.set_enabled(id, *on).unwrap();
        }
        registry
    }

    fn progress(percent: f64) -> DestinationProgress {
        DestinationProgress {
            percent,
            ..DestinationProgress::default()
        }
    }

    #[test]
    fn test_begin_requires_enabled_destination() {
        let (info, tree) = session();
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let selection = SelectionState::everything("/shoots/Smith");

        let result = lifecycle.begin(Some((&info, &tree)), &registry(&[false, false]), &selection);
        assert_eq!(result.unwrap_err(), StartRefused::NoEnabledDestinations);
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
        assert!(lifecycle.active_run().is_none());

        let result = lifecycle.begin(None, &registry(&[true]), &selection);
        assert_eq!(result.unwrap_err(), StartRefused::NoSession);
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
    }

    #[test]
    fn test_begin_builds_request() {
        let (info, tree) = session();
        let registry = registry(&[true, false]);
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let selection = SelectionState::from_paths(["/shoots/Smith/Selects"]);

        let request = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap();

        assert_eq!(lifecycle.phase(), BackupPhase::Running);
        assert_eq!(lifecycle.action(), BackupAction::Cancel);
        assert_eq!(request.destinations.len(), 1);
        assert_eq!(request.destinations[0].id, registry.as_slice()[0].id);
        assert_eq!(request.selected_paths, vec!["/shoots/Smith/Selects".to_string()]);
        assert_eq!(request.session_name, "Smith");
    }

    #[test]
    fn test_refuses_reentry() {
        let (info, tree) = session();
        let registry = registry(&[true]);
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));

        let first = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap();
        let second = lifecycle.begin(Some((&info, &tree)), &registry, &selection);

        assert_eq!(second.unwrap_err(), StartRefused::Busy(BackupPhase::Running));
        assert_eq!(lifecycle.active_run(), Some(first.run_id));
    }

    #[test]
    fn test_success_then_dwell() {
        let (info, tree) = session();
        let registry = registry(&[true]);
        let dest = registry.as_slice()[0].id;
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let now = Utc::now();

        let run = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;

        let step = lifecycle.handle(
            EngineEvent::Progress {
                run_id: run,
                destination_id: dest,
                progress: progress(42.5),
            },
            now,
        );
        assert_eq!(step, Transition::Progressed);
        assert_eq!(lifecycle.global_percent(), 42.5);

        let step = lifecycle.handle(
            EngineEvent::Complete {
                run_id: run,
                report: CompletionReport::succeeded(dest, 10),
            },
            now,
        );
        assert_eq!(
            step,
            Transition::Succeeded {
                destination_id: dest,
                backed_up: 1,
                total: 1
            }
        );
        assert_eq!(lifecycle.phase(), BackupPhase::Success);
        assert_eq!(lifecycle.global_percent(), 100.0);
        assert!(lifecycle.is_recently_backed_up(dest));
        assert_eq!(lifecycle.last_synced(), Some(now));
        assert_eq!(lifecycle.action(), BackupAction::Wait);

        assert!(!lifecycle.poll_dwell(now + Duration::seconds(2)));
        assert_eq!(lifecycle.phase(), BackupPhase::Success);

        assert!(lifecycle.poll_dwell(now + Duration::seconds(3)));
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
        assert!(lifecycle.progress().is_empty());
        assert_eq!(lifecycle.global_percent(), 0.0);
        // Recently backed-up survives the dwell
        assert!(lifecycle.is_recently_backed_up(dest));
    }

    #[test]
    fn test_error_records_nothing() {
        let (info, tree) = session();
        let registry = registry(&[true]);
        let dest = registry.as_slice()[0].id;
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let now = Utc::now();

        let run = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;
        let step = lifecycle.handle(
            EngineEvent::Complete {
                run_id: run,
                report: CompletionReport::failed(dest, "Destination not accessible"),
            },
            now,
        );

        assert_eq!(
            step,
            Transition::Failed {
                destination_id: Some(dest),
                error: Some("Destination not accessible".to_string())
            }
        );
        assert_eq!(lifecycle.phase(), BackupPhase::Error);
        assert!(lifecycle.recently_backed_up().is_empty());
        assert!(lifecycle.last_synced().is_none());

        lifecycle.finish_dwell();
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
    }

    #[test]
    fn test_cancel_ignores_late_events() {
        let (info, tree) = session();
        let registry = registry(&[true]);
        let dest = registry.as_slice()[0].id;
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let now = Utc::now();

        let cancelled = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;
        lifecycle.handle(
            EngineEvent::Progress {
                run_id: cancelled,
                destination_id: dest,
                progress: progress(10.0),
            },
            now,
        );

        assert_eq!(lifecycle.cancel(), Some(cancelled));
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
        assert!(lifecycle.progress().is_empty());
        assert_eq!(lifecycle.cancel(), None);

        let next = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;
        assert_ne!(next, cancelled);

        // The cancelled run finishing late must not end the new run
        let late = lifecycle.handle(
            EngineEvent::Complete {
                run_id: cancelled,
                report: CompletionReport::succeeded(dest, 3),
            },
            now,
        );
        assert_eq!(late, Transition::Ignored);
        assert_eq!(lifecycle.phase(), BackupPhase::Running);
        assert!(!lifecycle.is_recently_backed_up(dest));
    }

    #[test]
    fn test_multi_destination_last_event_wins() {
        let (info, tree) = session();
        let registry = registry(&[true, true]);
        let a = registry.as_slice()[0].id;
        let b = registry.as_slice()[1].id;
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let now = Utc::now();

        let run = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;

        let first = lifecycle.handle(
            EngineEvent::Complete {
                run_id: run,
                report: CompletionReport::succeeded(a, 1),
            },
            now,
        );
        assert!(matches!(first, Transition::Succeeded { backed_up: 1, total: 2, .. }));

        // Progress during the dwell is dropped
        let late_progress = lifecycle.handle(
            EngineEvent::Progress {
                run_id: run,
                destination_id: b,
                progress: progress(50.0),
            },
            now,
        );
        assert_eq!(late_progress, Transition::Ignored);
        assert_eq!(lifecycle.global_percent(), 100.0);

        let second = lifecycle.handle(
            EngineEvent::Complete {
                run_id: run,
                report: CompletionReport::failed(b, "disk full"),
            },
            now + Duration::seconds(1),
        );
        assert!(matches!(second, Transition::Failed { .. }));
        assert_eq!(lifecycle.phase(), BackupPhase::Error);
        assert!(lifecycle.is_recently_backed_up(a));
        assert!(!lifecycle.is_recently_backed_up(b));
        assert_eq!(
            lifecycle.dwell_deadline(),
            Some(now + Duration::seconds(4))
        );
    }

    #[test]
    fn test_dwell_waits_for_outstanding_destinations() {
        let (info, tree) = session();
        let registry = registry(&[true, true]);
        let a = registry.as_slice()[0].id;
        let b = registry.as_slice()[1].id;
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let now = Utc::now();

        let run = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;
        lifecycle.handle(
            EngineEvent::Complete {
                run_id: run,
                report: CompletionReport::succeeded(a, 1),
            },
            now,
        );
        assert!(lifecycle.has_outstanding());
        assert!(!lifecycle.finished_with_success());

        // The dwell ends while b is still being copied
        assert!(lifecycle.poll_dwell(now + Duration::seconds(3)));
        assert_eq!(lifecycle.phase(), BackupPhase::Running);
        assert_eq!(lifecycle.active_run(), Some(run));
        assert_eq!(lifecycle.action(), BackupAction::Cancel);
        assert_eq!(
            lifecycle
                .begin(Some((&info, &tree)), &registry, &selection)
                .unwrap_err(),
            StartRefused::Busy(BackupPhase::Running)
        );

        let step = lifecycle.handle(
            EngineEvent::Progress {
                run_id: run,
                destination_id: b,
                progress: progress(70.0),
            },
            now + Duration::seconds(4),
        );
        assert_eq!(step, Transition::Progressed);

        let later = now + Duration::seconds(10);
        let step = lifecycle.handle(
            EngineEvent::Complete {
                run_id: run,
                report: CompletionReport::succeeded(b, 1),
            },
            later,
        );
        assert!(matches!(step, Transition::Succeeded { backed_up: 2, total: 2, .. }));
        assert!(lifecycle.is_recently_backed_up(b));
        assert_eq!(lifecycle.last_synced(), Some(later));
        assert!(lifecycle.finished_with_success());

        assert!(lifecycle.poll_dwell(later + Duration::seconds(3)));
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
        assert!(lifecycle.active_run().is_none());
    }

    #[test]
    fn test_cancel_during_dwell_with_outstanding() {
        let (info, tree) = session();
        let registry = registry(&[true, true]);
        let a = registry.as_slice()[0].id;
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let now = Utc::now();

        let run = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;
        lifecycle.handle(
            EngineEvent::Complete {
                run_id: run,
                report: CompletionReport::failed(a, "disk full"),
            },
            now,
        );
        assert_eq!(lifecycle.phase(), BackupPhase::Error);

        assert_eq!(lifecycle.cancel(), Some(run));
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
        assert!(!lifecycle.has_outstanding());
    }

    #[test]
    fn test_abort_start() {
        let (info, tree) = session();
        let registry = registry(&[true]);
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));

        let run = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;
        let step = lifecycle.abort_start(run, "rclone missing".to_string(), Utc::now());

        assert!(matches!(step, Transition::Failed { destination_id: None, .. }));
        assert_eq!(lifecycle.phase(), BackupPhase::Error);
        assert!(!lifecycle.has_outstanding());

        lifecycle.finish_dwell();
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
    }

    #[test]
    fn test_forget_and_reset() {
        let (info, tree) = session();
        let registry = registry(&[true]);
        let dest = registry.as_slice()[0].id;
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let now = Utc::now();

        let run = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;
        lifecycle.handle(
            EngineEvent::Complete {
                run_id: run,
                report: CompletionReport::succeeded(dest, 1),
            },
            now,
        );

        lifecycle.forget_destination(dest);
        assert!(!lifecycle.is_recently_backed_up(dest));

        lifecycle.reset();
        assert_eq!(lifecycle.phase(), BackupPhase::Idle);
        assert!(lifecycle.last_synced().is_none());
        assert!(lifecycle.active_run().is_none());
    }

    #[test]
    fn test_average_percent() {
        let (info, tree) = session();
        let registry = registry(&[true, true]);
        let a = registry.as_slice()[0].id;
        let b = registry.as_slice()[1].id;
        let selection = SelectionState::everything("/shoots/Smith");
        let mut lifecycle = BackupLifecycle::new(Duration::seconds(3));
        let now = Utc::now();

        let run = lifecycle
            .begin(Some((&info, &tree)), &registry, &selection)
            .unwrap()
            .run_id;
        for (dest, percent) in [(a, 20.0), (b, 60.0)] {
            lifecycle.handle(
                EngineEvent::Progress {
                    run_id: run,
                    destination_id: dest,
                    progress: progress(percent),
                },
                now,
            );
        }

        // Global mirrors the latest report; the average is derived
        assert_eq!(lifecycle.global_percent(), 60.0);
        assert_eq!(lifecycle.average_percent(), 40.0);
    }
}
