//! Event loops driving the coordinator
//!
//! Timers, engine events and signals are multiplexed onto the caller's
//! thread, so the coordinator sees one input at a time.

use anyhow::{Context, Result, bail};
use async_channel::Receiver;
use chrono::Utc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use crate::coordinator::Coordinator;
use crate::lifecycle::{BackupPhase, EngineEvent};
use crate::refresh::RefreshReason;

/// How often timers are checked; the scheduler and refresher keep their own
/// deadlines
const HOUSEKEEPING_PERIOD: Duration = Duration::from_secs(1);

/// Signals that ask for a session refresh
///
/// The host application sends SIGHUP when the session may have changed and
/// SIGUSR1 when its window regains focus.
#[cfg(unix)]
struct RefreshSignals {
    hangup: tokio::signal::unix::Signal,
    focus: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl RefreshSignals {
    fn new() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            hangup: signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?,
            focus: signal(SignalKind::user_defined1())
                .context("Failed to listen for SIGUSR1")?,
        })
    }

    async fn recv(&mut self) -> RefreshReason {
        tokio::select! {
            Some(()) = self.hangup.recv() => RefreshReason::HostSignal,
            Some(()) = self.focus.recv() => RefreshReason::FocusRegained,
            else => std::future::pending().await,
        }
    }
}

#[cfg(not(unix))]
struct RefreshSignals;

#[cfg(not(unix))]
impl RefreshSignals {
    fn new() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> RefreshReason {
        std::future::pending().await
    }
}

/// Run until Ctrl-C: scheduled backups, session refresh, engine events
pub async fn watch(coordinator: &mut Coordinator, events: &Receiver<EngineEvent>) -> Result<()> {
    log::info!("Watching for session changes and scheduled backups");

    let mut housekeeping = tokio::time::interval(HOUSEKEEPING_PERIOD);
    housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut signals = RefreshSignals::new()?;
    coordinator.request_refresh(RefreshReason::Startup, Utc::now());

    loop {
        tokio::select! {
            _ = housekeeping.tick() => coordinator.poll(Utc::now()),
            event = events.recv() => match event {
                Ok(event) => {
                    coordinator.handle_engine_event(event, Utc::now());
                }
                Err(_) => {
                    log::warn!("Engine event channel closed");
                    break;
                }
            },
            reason = signals.recv() => {
                log::debug!("Refresh requested ({reason:?})");
                coordinator.request_refresh(reason, Utc::now());
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Shutting down");
                if let Some(run_id) = coordinator.cancel_backup() {
                    log::info!("Cancelled {run_id} on shutdown");
                }
                break;
            }
        }
    }

    Ok(())
}

/// Start one backup and wait until every destination has reported
pub async fn run_once(coordinator: &mut Coordinator, events: &Receiver<EngineEvent>) -> Result<()> {
    let destination_count = coordinator.registry().enabled_count();
    let run_id = coordinator.start_backup(Utc::now())?;

    if coordinator.lifecycle().phase() == BackupPhase::Error {
        bail!("Backup could not be started");
    }

    let mut remaining = destination_count;
    let mut failures = 0;

    while remaining > 0 {
        tokio::select! {
            event = events.recv() => {
                let event = event.context("Engine event channel closed")?;
                if event.run_id() != run_id {
                    continue;
                }

                match &event {
                    EngineEvent::Progress { destination_id, progress, .. } => {
                        log::debug!(
                            "Destination {}: {:.1}% ({})",
                            destination_id, progress.percent, progress.rate
                        );
                    }
                    EngineEvent::Complete { report, .. } => {
                        remaining -= 1;
                        let label = coordinator
                            .registry()
                            .get(report.destination_id)
                            .map(|d| d.label.clone())
                            .unwrap_or_else(|| report.destination_id.to_string());

                        if report.success {
                            println!("✓ {label}: {} file(s)", report.files_copied);
                        } else {
                            failures += 1;
                            println!(
                                "✗ {label}: {}",
                                report.error.as_deref().unwrap_or("unknown error")
                            );
                        }
                    }
                }

                coordinator.handle_engine_event(event, Utc::now());
            }
            _ = tokio::signal::ctrl_c() => {
                coordinator.cancel_backup();
                bail!("Backup cancelled");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} of {destination_count} destination(s) failed");
    }
    println!("Backup complete");
    Ok(())
}
