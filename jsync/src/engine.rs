//! Backup engine running `rclone sync` per destination
//!
//! Each run is a tokio task working through its destinations one at a time.
//! Progress comes from rclone's JSON stats on stderr and is forwarded to the
//! coordinator as [`EngineEvent`]s tagged with the run id.

use anyhow::{Result, anyhow};
use async_channel::Sender;
use jsync_common::{Destination, DestinationId, JsyncConfig, format_rate, validate_session_name};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::collaborators::BackupEngine;
use crate::lifecycle::{CompletionReport, DestinationProgress, EngineEvent, RunId, RunRequest};

#[derive(Debug, Default, Deserialize)]
struct RcloneTransfer {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RcloneStats {
    bytes: u64,
    #[serde(rename = "totalBytes")]
    total_bytes: u64,
    transfers: u32,
    #[serde(rename = "totalTransfers")]
    total_transfers: u32,
    checks: u32,
    #[serde(rename = "totalChecks")]
    total_checks: u32,
    speed: f64,
    transferring: Vec<RcloneTransfer>,
}

impl RcloneStats {
    /// Bytes when known, then checks, then transfers
    fn percent(&self) -> f64 {
        if self.total_bytes > 0 {
            self.bytes as f64 / self.total_bytes as f64 * 100.0
        } else if self.total_checks > 0 {
            self.checks as f64 / self.total_checks as f64 * 100.0
        } else if self.total_transfers > 0 {
            self.transfers as f64 / self.total_transfers as f64 * 100.0
        } else {
            100.0
        }
    }
}

#[derive(Debug, Deserialize)]
struct RcloneJsonLog {
    stats: Option<RcloneStats>,
    msg: Option<String>,
}

/// Turns rclone log lines into progress updates
#[derive(Debug, Default)]
struct StatsTracker {
    last_percent: f64,
    files_total: u32,
}

impl StatsTracker {
    /// Progress worth reporting, if the line carries any
    fn observe(&mut self, line: &str) -> Option<DestinationProgress> {
        let Ok(entry) = serde_json::from_str::<RcloneJsonLog>(line) else {
            let trimmed = line.trim();
            if !trimmed.is_empty() {
                log::info!("rclone raw: {trimmed}");
            }
            return None;
        };

        let Some(stats) = entry.stats else {
            if let Some(msg) = entry.msg {
                let trimmed = msg.trim();
                if !trimmed.is_empty() {
                    log::info!("rclone: {trimmed}");
                }
            }
            return None;
        };

        let percent = stats.percent().clamp(0.0, 100.0);
        self.files_total = stats.total_transfers + stats.total_checks;

        if (percent - self.last_percent).abs() < 0.1 && percent < 100.0 {
            return None;
        }
        self.last_percent = percent;

        Some(DestinationProgress {
            percent,
            current_file: stats
                .transferring
                .first()
                .map(|t| t.name.clone())
                .unwrap_or_default(),
            rate: format_rate(stats.speed),
            files_done: stats.transfers + stats.checks,
            files_total: self.files_total,
        })
    }
}

/// Escape rclone glob metacharacters in a literal path segment
fn escape_glob(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// rclone filter arguments restricting a sync to the selected children
///
/// Empty when the whole session is selected.
fn selection_filters(session_path: &str, selected_paths: &[String]) -> Vec<String> {
    let root = session_path.trim_end_matches('/');
    if selected_paths
        .iter()
        .any(|path| path.trim_end_matches('/') == root)
    {
        return Vec::new();
    }

    let mut filters = Vec::new();
    for path in selected_paths {
        let relative = path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .map(|rest| rest.trim_end_matches('/'));

        match relative {
            Some(relative) if !relative.is_empty() => {
                let relative = escape_glob(relative);
                filters.push("--filter".to_string());
                filters.push(format!("+ /{relative}/**"));
                filters.push("--filter".to_string());
                filters.push(format!("+ /{relative}"));
            }
            _ => log::warn!("Skipping selection outside the session: {path}"),
        }
    }

    filters.push("--filter".to_string());
    filters.push("- **".to_string());
    filters
}

#[derive(Debug, Error)]
enum SyncError {
    #[error("Backup cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

struct RcloneJob {
    rclone: PathBuf,
    transfers: u32,
    checkers: u32,
    run_id: RunId,
    session_path: String,
    session_name: String,
    destinations: Vec<Destination>,
    filters: Vec<String>,
    events: Sender<EngineEvent>,
}

impl RcloneJob {
    async fn run(self, mut cancel: watch::Receiver<bool>) {
        let total = self.destinations.len();

        for (index, dest) in self.destinations.iter().enumerate() {
            if *cancel.borrow() {
                log::info!("{} cancelled before destination {}", self.run_id, dest.id);
                return;
            }

            log::info!(
                "Processing destination {}/{} ({})",
                index + 1,
                total,
                dest.path
            );

            if !Path::new(&dest.path).exists() {
                let message = format!("Destination not accessible: {}", dest.path);
                log::error!("{message}");
                self.emit(EngineEvent::Complete {
                    run_id: self.run_id,
                    report: CompletionReport::failed(dest.id, message),
                })
                .await;
                continue;
            }

            let target = Path::new(&dest.path).join(&self.session_name);
            match self.sync_destination(dest.id, &target, &mut cancel).await {
                Ok(files_copied) => {
                    log::info!("Backup completed successfully for {}", dest.path);
                    self.emit(EngineEvent::Complete {
                        run_id: self.run_id,
                        report: CompletionReport::succeeded(dest.id, files_copied),
                    })
                    .await;
                }
                Err(SyncError::Cancelled) => {
                    log::info!("{} cancelled", self.run_id);
                    return;
                }
                Err(SyncError::Failed(message)) => {
                    log::error!("Backup failed for {}: {}", dest.path, message);
                    self.emit(EngineEvent::Complete {
                        run_id: self.run_id,
                        report: CompletionReport::failed(dest.id, message),
                    })
                    .await;
                }
            }
        }
    }

    async fn sync_destination(
        &self,
        destination_id: DestinationId,
        target: &Path,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<u32, SyncError> {
        tokio::fs::create_dir_all(target)
            .await
            .map_err(|e| SyncError::Failed(format!("Failed to create destination: {e}")))?;

        // Trailing slashes make rclone sync directory contents
        let src = format!("{}/", self.session_path.trim_end_matches('/'));
        let dst = format!("{}/", target.to_string_lossy().trim_end_matches('/'));
        log::info!("Starting rclone sync: {src} -> {dst}");

        let mut child = Command::new(&self.rclone)
            .arg("sync")
            .arg(&src)
            .arg(&dst)
            .args([
                "--check-first",
                "--use-json-log",
                "--stats",
                "500ms",
                "--stats-log-level",
                "NOTICE",
            ])
            .arg("--transfers")
            .arg(self.transfers.to_string())
            .arg("--checkers")
            .arg(self.checkers.to_string())
            .args(&self.filters)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SyncError::Failed(format!("Failed to spawn rclone: {e}")))?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SyncError::Failed("rclone stderr unavailable".to_string()))?;
        let mut lines = BufReader::new(stderr).lines();
        let mut tracker = StatsTracker::default();

        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        log::info!("Cancellation requested, stopping rclone");
                        let _ = child.kill().await;
                        return Err(SyncError::Cancelled);
                    }
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(progress) = tracker.observe(&line) {
                            self.emit(EngineEvent::Progress {
                                run_id: self.run_id,
                                destination_id,
                                progress,
                            })
                            .await;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("Failed to read rclone output: {e}");
                        break;
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| SyncError::Failed(format!("rclone wait error: {e}")))?;
        if !status.success() {
            return Err(SyncError::Failed(format!(
                "rclone failed with status: {status}"
            )));
        }

        Ok(tracker.files_total)
    }

    async fn emit(&self, event: EngineEvent) {
        if self.events.send(event).await.is_err() {
            log::debug!("Event receiver closed, dropping event for {}", self.run_id);
        }
    }
}

/// [`BackupEngine`] spawning rclone on a tokio runtime
pub struct RcloneEngine {
    rclone: PathBuf,
    transfers: u32,
    checkers: u32,
    runtime: Handle,
    events: Sender<EngineEvent>,
    active: Option<(RunId, watch::Sender<bool>)>,
}

impl RcloneEngine {
    pub fn new(config: &JsyncConfig, runtime: Handle, events: Sender<EngineEvent>) -> Self {
        Self {
            rclone: config.rclone_path.clone(),
            transfers: config.engine_transfers,
            checkers: config.engine_checkers,
            runtime,
            events,
            active: None,
        }
    }
}

impl BackupEngine for RcloneEngine {
    fn start_run(&mut self, request: &RunRequest) -> Result<()> {
        validate_session_name(&request.session_name).map_err(|e| anyhow!(e))?;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        if let Some((previous, stale)) = self.active.replace((request.run_id, cancel_tx)) {
            log::debug!("Stopping {previous} before starting {}", request.run_id);
            let _ = stale.send(true);
        }

        let job = RcloneJob {
            rclone: self.rclone.clone(),
            transfers: self.transfers,
            checkers: self.checkers,
            run_id: request.run_id,
            session_path: request.session_path.clone(),
            session_name: request.session_name.clone(),
            destinations: request.destinations.clone(),
            filters: selection_filters(&request.session_path, &request.selected_paths),
            events: self.events.clone(),
        };

        self.runtime.spawn(job.run(cancel_rx));
        Ok(())
    }

    fn cancel_run(&mut self, run_id: RunId) -> Result<()> {
        match self.active.take() {
            Some((active, cancel)) if active == run_id => {
                let _ = cancel.send(true);
            }
            other => self.active = other,
        }
        Ok(())
    }
}
