//! Seams between the coordinator and the outside world
//!
//! Every external effect the coordinator has goes through one of these traits,
//! so the coordinator itself stays synchronous and testable with fakes.

use anyhow::{Context, Result};
use jsync_common::{DestinationDescriptor, SessionInfo, SessionItem};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::lifecycle::{RunId, RunRequest};
use crate::notifications::Notification;

/// Source of the session currently open in the host application
pub trait SessionProvider {
    /// `Ok(None)` when no session is open
    fn current_session(&mut self) -> Result<Option<SessionInfo>>;

    /// Entries directly beneath the session root
    fn session_items(&mut self, root_path: &str) -> Result<Vec<SessionItem>>;
}

/// Performs the copy work of a run and reports back through engine events
pub trait BackupEngine {
    /// Begin copying; events for `request.run_id` arrive asynchronously
    fn start_run(&mut self, request: &RunRequest) -> Result<()>;

    /// Stop a run; events it emits afterwards are ignored by the coordinator
    fn cancel_run(&mut self, run_id: RunId) -> Result<()>;
}

/// Lets the user pick a folder to add as a destination
pub trait FolderChooser {
    /// `None` when the user dismissed the chooser
    fn pick_folder(&mut self) -> Option<String>;
}

/// Turns a chosen folder into a destination descriptor
pub trait DestinationParser {
    fn parse_destination(&self, path: &str, session: Option<&SessionInfo>)
    -> DestinationDescriptor;
}

/// Removes a session copy from a destination
pub trait BackupDeleter {
    fn delete_backup_at(&mut self, path: &str, session_name: &str) -> Result<()>;
}

/// Key/value document store for preferences and per-session configuration
pub trait PersistenceStore {
    fn load_value(&self, key: &str) -> Result<Option<Value>>;

    fn save_value(&mut self, key: &str, value: Value) -> Result<()>;
}

pub trait Notifier {
    /// Checked before every notification; may prompt once, then remembers
    fn permission_granted(&mut self) -> bool;

    fn notify(&mut self, notification: &Notification);
}

/// Load and decode a stored document
pub fn load<T: DeserializeOwned>(store: &dyn PersistenceStore, key: &str) -> Result<Option<T>> {
    match store.load_value(key)? {
        Some(value) => {
            let parsed = serde_json::from_value(value)
                .with_context(|| format!("Failed to parse stored value for {key}"))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Encode and store a document
pub fn save<T: Serialize>(store: &mut dyn PersistenceStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)
        .with_context(|| format!("Failed to serialize value for {key}"))?;
    store.save_value(key, value)
}
