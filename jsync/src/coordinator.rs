//! Backup coordinator
//!
//! Owns the open session, its selection and destination registry, the global
//! preferences, the backup lifecycle, the scheduler and the session
//! refresher. Every user action, timer and engine event is funnelled through
//! here on a single logical thread; external effects go through the
//! [`Collaborators`].

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use jsync_common::{
    Destination, DestinationId, DestinationRegistry, FolderStatus, JsyncConfig, Preferences,
    RegistryError, SESSION_CONFIG_VERSION, SelectionState, SelectionTree, SessionConfig,
    SessionInfo, SessionItem, format_last_synced, validate_session_name,
};
use serde::Serialize;

use crate::collaborators::{
    self, BackupDeleter, BackupEngine, DestinationParser, FolderChooser, Notifier,
    PersistenceStore, SessionProvider,
};
use crate::lifecycle::{
    BackupAction, BackupLifecycle, BackupPhase, DestinationProgress, EngineEvent, RunId,
    StartRefused, Transition,
};
use crate::notifications::Notification;
use crate::refresh::{RefreshReason, SessionRefresher};
use crate::scheduler::Scheduler;

pub struct Collaborators {
    pub sessions: Box<dyn SessionProvider>,
    pub engine: Box<dyn BackupEngine>,
    pub chooser: Box<dyn FolderChooser>,
    pub parser: Box<dyn DestinationParser>,
    pub deleter: Box<dyn BackupDeleter>,
    pub store: Box<dyn PersistenceStore>,
    pub notifier: Box<dyn Notifier>,
}

struct ActiveSession {
    info: SessionInfo,
    items: Vec<SessionItem>,
    tree: SelectionTree,
    /// False while the item list could not be read; the selection is not
    /// pruned against an unknown tree
    items_loaded: bool,
}

/// What a session refresh did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionChange {
    Unchanged,
    Updated,
    Switched,
    Cleared,
}

/// Result of pressing the backup button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonOutcome {
    Started(RunId),
    Cancelled(RunId),
}

#[derive(Debug, Serialize)]
pub struct DestinationStatus {
    #[serde(flatten)]
    pub destination: Destination,
    pub is_default: bool,
    pub recently_backed_up: bool,
    pub progress: Option<DestinationProgress>,
}

#[derive(Debug, Serialize)]
pub struct SelectionEntry {
    pub id: String,
    pub label: String,
    pub selected: bool,
}

#[derive(Debug, Serialize)]
pub struct ScheduleStatus {
    pub enabled: bool,
    pub interval_minutes: u32,
    pub custom_interval: bool,
    pub next_check: Option<DateTime<Utc>>,
}

/// Snapshot of everything the UI shows
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub session: Option<SessionInfo>,
    pub last_sync: String,
    pub phase: BackupPhase,
    pub action: BackupAction,
    pub progress_percent: f64,
    /// Mean over the destinations of the current run
    pub average_percent: f64,
    pub root_status: Option<FolderStatus>,
    pub selection: Vec<SelectionEntry>,
    pub destinations: Vec<DestinationStatus>,
    /// Defaults that no longer exist in this session's registry
    pub stale_defaults: Vec<DestinationId>,
    pub schedule: ScheduleStatus,
    pub notifications_enabled: bool,
}

pub struct Coordinator {
    collaborators: Collaborators,
    session: Option<ActiveSession>,
    selection: SelectionState,
    registry: DestinationRegistry,
    preferences: Preferences,
    lifecycle: BackupLifecycle,
    scheduler: Scheduler,
    refresher: SessionRefresher,
}

impl Coordinator {
    /// Load preferences and arm the scheduler; no session is open yet
    pub fn new(collaborators: Collaborators, config: &JsyncConfig, now: DateTime<Utc>) -> Self {
        let preferences = match collaborators::load::<Preferences>(
            collaborators.store.as_ref(),
            Preferences::STORE_KEY,
        ) {
            Ok(Some(prefs)) => match prefs.validate() {
                Ok(()) => prefs,
                Err(e) => {
                    log::warn!("Ignoring stored preferences: {e}");
                    Preferences::default()
                }
            },
            Ok(None) => Preferences::default(),
            Err(e) => {
                log::warn!("Failed to load preferences, using defaults: {e:#}");
                Preferences::default()
            }
        };

        let mut scheduler = Scheduler::new(config.scheduler_tick());
        if let Err(e) = scheduler.configure(
            preferences.scheduled_backup,
            preferences.interval_minutes,
            now,
        ) {
            log::warn!("Scheduler left disabled: {e}");
        }

        Self {
            collaborators,
            session: None,
            selection: SelectionState::empty(),
            registry: DestinationRegistry::new(),
            preferences,
            lifecycle: BackupLifecycle::new(config.dwell()),
            scheduler,
            refresher: SessionRefresher::new(config.session_poll(), config.refresh_debounce(), now),
        }
    }

    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref().map(|s| &s.info)
    }

    pub fn items(&self) -> &[SessionItem] {
        match &self.session {
            Some(session) => &session.items,
            None => &[],
        }
    }

    #[allow(dead_code)]
    pub fn selection(&self) -> &SelectionState {
        &self.selection
    }

    pub fn registry(&self) -> &DestinationRegistry {
        &self.registry
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn lifecycle(&self) -> &BackupLifecycle {
        &self.lifecycle
    }

    #[allow(dead_code)]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| self.selection.is_selected(&s.tree, id))
    }

    pub fn folder_status(&self, id: &str) -> FolderStatus {
        match &self.session {
            Some(session) => self.selection.folder_status(&session.tree, id),
            None => FolderStatus::None,
        }
    }

    // ---- timers and refresh -------------------------------------------------

    /// Queue a session refresh; bursts are coalesced
    pub fn request_refresh(&mut self, reason: RefreshReason, now: DateTime<Utc>) {
        self.refresher.request(reason, now);
    }

    /// Advance every timer to `now`
    pub fn poll(&mut self, now: DateTime<Utc>) {
        if let Some(reason) = self.refresher.due(now) {
            log::debug!("Refreshing session ({reason:?})");
            self.refresh_session();
        }

        if self.lifecycle.poll_dwell(now) {
            log::debug!("Backup state now {}", self.lifecycle.phase());
        }

        if self.scheduler.poll(now) {
            self.start_scheduled(now);
        }
    }

    /// Ask the provider for the current session and reconcile with it
    pub fn refresh_session(&mut self) -> SessionChange {
        let current = match self.collaborators.sessions.current_session() {
            Ok(current) => current,
            Err(e) => {
                log::warn!("Failed to query current session: {e:#}");
                None
            }
        };

        let open_root = self.session.as_ref().map(|s| s.info.root_path.clone());
        match (current, open_root) {
            (None, None) => SessionChange::Unchanged,
            (None, Some(_)) => {
                self.leave_session();
                SessionChange::Cleared
            }
            (Some(info), Some(root)) if info.root_path == root => self.update_session(info),
            (Some(info), open_root) => {
                if open_root.is_some() {
                    self.leave_session();
                }
                self.enter_session(info);
                SessionChange::Switched
            }
        }
    }

    fn enter_session(&mut self, info: SessionInfo) {
        let key = SessionConfig::store_key(&info.root_path);
        let (stored, mut dirty) =
            match collaborators::load::<SessionConfig>(self.collaborators.store.as_ref(), &key) {
                Ok(Some(config)) => match config.validate() {
                    Ok(()) => (Some(config), false),
                    Err(e) => {
                        log::warn!("Ignoring stored configuration for {}: {e}", info.name);
                        (None, false)
                    }
                },
                Ok(None) => (None, true),
                Err(e) => {
                    log::warn!("Failed to load configuration for {}: {e:#}", info.name);
                    (None, false)
                }
            };

        let config = stored.unwrap_or_else(|| {
            SessionConfig::for_new_session(&info.root_path, &self.preferences.default_destinations)
        });

        let registry = match DestinationRegistry::from_destinations(config.destinations) {
            Ok(registry) => registry,
            Err(e) => {
                log::warn!("Stored destinations for {} are invalid: {e}", info.name);
                dirty = true;
                self.preferences.default_destinations.seed_registry()
            }
        };

        let (items, items_loaded) = match self.collaborators.sessions.session_items(&info.root_path)
        {
            Ok(items) => (items, true),
            Err(e) => {
                log::warn!("Failed to list items of {}: {e:#}", info.name);
                (Vec::new(), false)
            }
        };
        let tree = SelectionTree::new(info.root_path.clone(), &items);

        let mut selection = config.selected_paths;
        if items_loaded && selection.canonicalize(&tree) {
            dirty = true;
        }

        self.lifecycle.set_last_synced(config.last_synced);
        self.scheduler.set_last_completed(config.last_synced);

        log::info!(
            "Opened session {} ({} item(s), {} destination(s))",
            info.name,
            items.len(),
            registry.len()
        );

        self.session = Some(ActiveSession {
            info,
            items,
            tree,
            items_loaded,
        });
        self.selection = selection;
        self.registry = registry;

        if dirty {
            self.persist_session();
        }
    }

    fn update_session(&mut self, info: SessionInfo) -> SessionChange {
        let Some(session) = self.session.as_mut() else {
            return SessionChange::Unchanged;
        };

        let mut changed = session.info != info;
        session.info = info;

        let mut selection_changed = false;
        match self
            .collaborators
            .sessions
            .session_items(&session.info.root_path)
        {
            Ok(items) => {
                if !session.items_loaded || items != session.items {
                    session.tree = SelectionTree::new(session.info.root_path.clone(), &items);
                    session.items = items;
                    session.items_loaded = true;
                    changed = true;
                }
                selection_changed = self.selection.canonicalize(&session.tree);
            }
            Err(e) => log::warn!("Failed to list items of {}: {e:#}", session.info.name),
        }

        if selection_changed {
            log::info!("Selection adjusted to the current session items");
            self.persist_session();
        }

        if changed || selection_changed {
            SessionChange::Updated
        } else {
            SessionChange::Unchanged
        }
    }

    fn leave_session(&mut self) {
        self.persist_session();

        if let Some(run_id) = self.lifecycle.active_run() {
            self.cancel_engine_run(run_id);
        }
        self.lifecycle.reset();
        self.scheduler.set_last_completed(None);

        if let Some(session) = self.session.take() {
            log::info!("Closed session {}", session.info.name);
        }
        self.selection = SelectionState::empty();
        self.registry = DestinationRegistry::new();
    }

    // ---- backup lifecycle ---------------------------------------------------

    /// Start a run with the enabled destinations and the current selection
    pub fn start_backup(&mut self, now: DateTime<Utc>) -> Result<RunId, StartRefused> {
        let session = self.session.as_ref().map(|s| (&s.info, &s.tree));
        let request = match self.lifecycle.begin(session, &self.registry, &self.selection) {
            Ok(request) => request,
            Err(refused) => {
                log::debug!("Backup not started: {refused}");
                return Err(refused);
            }
        };

        if let Err(e) = self.collaborators.engine.start_run(&request) {
            let transition =
                self.lifecycle
                    .abort_start(request.run_id, format!("Failed to start backup: {e:#}"), now);
            self.apply_transition(&transition, now);
        }

        Ok(request.run_id)
    }

    /// The backup button: starts when idle, cancels while running
    pub fn toggle_backup(&mut self, now: DateTime<Utc>) -> Result<ButtonOutcome, StartRefused> {
        if let Some(run_id) = self.cancel_backup() {
            return Ok(ButtonOutcome::Cancelled(run_id));
        }
        self.start_backup(now).map(ButtonOutcome::Started)
    }

    /// Cancel the running run, if any
    pub fn cancel_backup(&mut self) -> Option<RunId> {
        let run_id = self.lifecycle.cancel()?;
        self.cancel_engine_run(run_id);
        Some(run_id)
    }

    fn start_scheduled(&mut self, now: DateTime<Utc>) {
        match self.start_backup(now) {
            Ok(run_id) => log::info!("Scheduled backup started ({run_id})"),
            Err(StartRefused::Busy(phase)) => {
                log::debug!("Scheduled backup skipped, backup is {phase}")
            }
            Err(refused) => log::info!("Scheduled backup skipped: {refused}"),
        }
    }

    fn cancel_engine_run(&mut self, run_id: RunId) {
        if let Err(e) = self.collaborators.engine.cancel_run(run_id) {
            log::warn!("Failed to cancel {run_id}: {e:#}");
        }
    }

    pub fn handle_engine_event(&mut self, event: EngineEvent, now: DateTime<Utc>) -> Transition {
        let transition = self.lifecycle.handle(event, now);
        self.apply_transition(&transition, now);
        transition
    }

    fn apply_transition(&mut self, transition: &Transition, now: DateTime<Utc>) {
        if matches!(
            transition,
            Transition::Succeeded { .. } | Transition::Failed { .. }
        ) && self.lifecycle.finished_with_success()
        {
            self.scheduler.record_completion(now);
        }

        match transition {
            Transition::Succeeded { backed_up, .. } => {
                self.persist_session();

                let notification = self.session.as_ref().map(|s| {
                    Notification::backup_completed(&s.info.name, &s.info.size_label, *backed_up)
                });
                if let Some(notification) = notification {
                    self.send_notification(&notification);
                }
            }
            Transition::Failed {
                error: Some(error), ..
            } => {
                self.send_notification(&Notification::backup_failed(error));
            }
            Transition::Failed { error: None, .. }
            | Transition::Progressed
            | Transition::Ignored => {}
        }
    }

    fn send_notification(&mut self, notification: &Notification) {
        if !self.preferences.notifications_enabled {
            return;
        }
        if !self.collaborators.notifier.permission_granted() {
            log::debug!("Notification permission not granted");
            return;
        }
        self.collaborators.notifier.notify(notification);
    }

    // ---- selection ----------------------------------------------------------

    /// Flip an item of the selection tree; unknown ids are ignored
    pub fn toggle_path(&mut self, id: &str) -> Result<()> {
        let session = self.session.as_ref().ok_or_else(|| anyhow!("No active session"))?;
        if !session.tree.is_root(id) && !session.tree.is_child(id) {
            log::debug!("Ignoring toggle of unknown item {id}");
            return Ok(());
        }

        self.selection.toggle(&session.tree, id);
        self.save_session()
    }

    // ---- destinations -------------------------------------------------------

    /// Ask the folder chooser for a destination and add it
    pub fn add_destination(&mut self) -> Result<Option<DestinationId>> {
        self.require_session()?;
        match self.collaborators.chooser.pick_folder() {
            Some(path) => self.add_destination_path(&path).map(Some),
            None => {
                log::debug!("No folder chosen");
                Ok(None)
            }
        }
    }

    pub fn add_destination_path(&mut self, path: &str) -> Result<DestinationId> {
        let session = self.require_session()?;
        let descriptor = self
            .collaborators
            .parser
            .parse_destination(path, Some(&session.info));

        let id = self.registry.add(descriptor).id;
        log::info!("Added destination {id} ({path})");
        self.save_session()?;
        Ok(id)
    }

    /// Remove from this session; the default set keeps its snapshot
    pub fn remove_destination(&mut self, id: DestinationId) -> Result<Destination> {
        self.require_session()?;
        let removed = self
            .registry
            .remove(id)
            .ok_or(RegistryError::UnknownDestination(id))?;
        self.lifecycle.forget_destination(id);

        log::info!("Removed destination {id} ({})", removed.path);
        self.save_session()?;
        Ok(removed)
    }

    pub fn set_destination_enabled(&mut self, id: DestinationId, enabled: bool) -> Result<()> {
        self.require_session()?;
        self.registry.set_enabled(id, enabled)?;
        self.save_session()
    }

    pub fn toggle_destination(&mut self, id: DestinationId) -> Result<bool> {
        self.require_session()?;
        let enabled = self.registry.toggle_enabled(id)?;
        self.save_session()?;
        Ok(enabled)
    }

    /// Mark or unmark a destination as default for new sessions
    pub fn toggle_default(&mut self, id: DestinationId) -> Result<bool> {
        let is_default = self
            .preferences
            .default_destinations
            .toggle(&self.registry, id)?;
        self.save_preferences()?;
        Ok(is_default)
    }

    /// Delete the copy of the open session stored at a destination
    pub fn delete_existing_backup(&mut self, id: DestinationId) -> Result<()> {
        if self.lifecycle.phase() == BackupPhase::Running || self.lifecycle.has_outstanding() {
            bail!("Cannot delete a backup while a backup is running");
        }

        let session = self.require_session()?;
        let session_name = session.info.name.clone();
        validate_session_name(&session_name).map_err(|e| anyhow!(e))?;

        let path = self
            .registry
            .get(id)
            .ok_or(RegistryError::UnknownDestination(id))?
            .path
            .clone();

        self.collaborators
            .deleter
            .delete_backup_at(&path, &session_name)
            .with_context(|| format!("Failed to delete backup of {session_name} at {path}"))?;
        self.registry.mark_backup_absent(id)?;

        log::info!("Deleted backup of {session_name} at {path}");
        self.save_session()
    }

    // ---- preferences --------------------------------------------------------

    pub fn set_schedule(
        &mut self,
        enabled: bool,
        interval_minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.scheduler
            .configure(enabled, interval_minutes, now)
            .map_err(|e| anyhow!(e))?;

        self.preferences.scheduled_backup = enabled;
        self.preferences.interval_minutes = interval_minutes;
        self.save_preferences()
    }

    pub fn set_notifications_enabled(&mut self, enabled: bool) -> Result<()> {
        self.preferences.notifications_enabled = enabled;
        self.save_preferences()
    }

    // ---- persistence --------------------------------------------------------

    fn save_session(&mut self) -> Result<()> {
        let Some(session) = &self.session else {
            return Ok(());
        };

        let config = SessionConfig {
            version: SESSION_CONFIG_VERSION,
            last_synced: self.lifecycle.last_synced(),
            selected_paths: self.selection.clone(),
            destinations: self.registry.as_slice().to_vec(),
        };
        let key = SessionConfig::store_key(&session.info.root_path);
        collaborators::save(self.collaborators.store.as_mut(), &key, &config)
            .context("Failed to save session configuration")
    }

    fn persist_session(&mut self) {
        if let Err(e) = self.save_session() {
            log::warn!("{e:#}");
        }
    }

    fn save_preferences(&mut self) -> Result<()> {
        collaborators::save(
            self.collaborators.store.as_mut(),
            Preferences::STORE_KEY,
            &self.preferences,
        )
        .context("Failed to save preferences")
    }

    /// Persist session state before exit
    pub fn shutdown(&mut self) {
        self.persist_session();
    }

    fn require_session(&self) -> Result<&ActiveSession> {
        self.session.as_ref().ok_or_else(|| anyhow!("No active session"))
    }

    // ---- presentation -------------------------------------------------------

    pub fn status(&self, now: DateTime<Utc>) -> StatusReport {
        let root_status = self
            .session()
            .map(|session| self.folder_status(&session.root_path));
        let selection = self
            .items()
            .iter()
            .map(|item| SelectionEntry {
                id: item.id.clone(),
                label: item.label.clone(),
                selected: self.is_selected(&item.id),
            })
            .collect();

        let destinations = self
            .registry
            .iter()
            .map(|destination| DestinationStatus {
                destination: destination.clone(),
                is_default: self.preferences.default_destinations.contains(destination.id),
                recently_backed_up: self.lifecycle.is_recently_backed_up(destination.id),
                progress: self.lifecycle.progress().get(&destination.id).cloned(),
            })
            .collect();

        StatusReport {
            session: self.session().cloned(),
            last_sync: format_last_synced(self.lifecycle.last_synced(), now),
            phase: self.lifecycle.phase(),
            action: self.lifecycle.action(),
            progress_percent: self.lifecycle.global_percent(),
            average_percent: self.lifecycle.average_percent(),
            root_status,
            selection,
            destinations,
            stale_defaults: self
                .preferences
                .default_destinations
                .stale_ids(&self.registry),
            schedule: ScheduleStatus {
                enabled: self.scheduler.is_enabled(),
                interval_minutes: self.scheduler.interval_minutes(),
                custom_interval: self.preferences.is_custom_interval(),
                next_check: self.scheduler.next_tick(),
            },
            notifications_enabled: self.preferences.notifications_enabled,
        }
    }
}
