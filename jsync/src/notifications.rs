use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::collaborators::Notifier;

/// Priority levels for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
pub enum NotificationPriority {
    Low,
    Normal,
    High,
}

impl NotificationPriority {
    fn as_urgency(self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
}

impl Notification {
    /// Summary for a destination that finished successfully
    pub fn backup_completed(session_name: &str, session_size: &str, destination_count: usize) -> Self {
        let destinations = if destination_count == 1 {
            "1 destination".to_string()
        } else {
            format!("{destination_count} destinations")
        };

        Self {
            title: "Backup Complete".to_string(),
            body: format!("Backed up {session_name} ({session_size}) to {destinations}"),
            priority: NotificationPriority::Normal,
        }
    }

    pub fn backup_failed(error: &str) -> Self {
        Self {
            title: "Backup Failed".to_string(),
            body: error.to_string(),
            priority: NotificationPriority::High,
        }
    }
}

/// Desktop notifications through `notify-send`
///
/// Permission is granted when `notify-send` can be found on `PATH`; the lookup
/// happens once. Without it notifications go to the log.
pub struct DesktopNotifier {
    program: Option<Option<PathBuf>>,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self { program: None }
    }

    #[cfg(test)]
    fn with_program(program: PathBuf) -> Self {
        Self {
            program: Some(Some(program)),
        }
    }

    fn program(&mut self) -> Option<&PathBuf> {
        self.program
            .get_or_insert_with(|| {
                let found = find_in_path("notify-send");
                if found.is_none() {
                    log::info!("notify-send not found, notifications will be logged only");
                }
                found
            })
            .as_ref()
    }
}

impl Notifier for DesktopNotifier {
    fn permission_granted(&mut self) -> bool {
        self.program().is_some()
    }

    fn notify(&mut self, notification: &Notification) {
        log::info!("{}: {}", notification.title, notification.body);

        let Some(program) = self.program().cloned() else {
            return;
        };

        let result = Command::new(program)
            .arg("--app-name=JSync")
            .arg(format!("--urgency={}", notification.priority.as_urgency()))
            .arg(&notification.title)
            .arg(&notification.body)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match result {
            Ok(status) if !status.success() => {
                log::warn!("notify-send exited with {status}");
            }
            Ok(_) => {}
            Err(e) => log::warn!("Failed to send notification: {e}"),
        }
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}
