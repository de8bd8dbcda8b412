// Shared types and utilities for JSync

pub mod classify;
pub mod config;
pub mod destinations;
pub mod format;
pub mod selection;
pub mod session_config;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use classify::classify_destination;
pub use config::JsyncConfig;
pub use destinations::{
    DefaultDestinationSet, DestinationDescriptor, DestinationRegistry, RegistryError,
};
pub use format::{format_bytes, format_elapsed_time, format_last_synced, format_rate};
pub use selection::{FolderStatus, SelectionState, SelectionTree};
pub use session_config::{
    INTERVAL_PRESETS, Preferences, SESSION_CONFIG_VERSION, SessionConfig, validate_interval,
};

/// Identifier of a backup destination, unique within a registry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct DestinationId(pub u64);

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What kind of storage a destination lives on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    External,
    Cloud,
    Local,
    Network,
}

impl DestinationKind {
    pub fn as_str(&self) -> &str {
        match self {
            DestinationKind::External => "external",
            DestinationKind::Cloud => "cloud",
            DestinationKind::Local => "local",
            DestinationKind::Network => "network",
        }
    }
}

/// A configured copy target for session backups
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    pub id: DestinationId,

    /// Folder the session is copied into
    pub path: String,

    /// Human-readable label
    pub label: String,

    #[serde(rename = "destination_type")]
    pub kind: DestinationKind,

    /// Whether the next run copies to this destination
    pub enabled: bool,

    /// A copy of the current session already exists at this destination
    #[serde(default)]
    pub has_existing_backup: bool,
}

/// Snapshot of the session currently open in the host application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionInfo {
    pub name: String,

    /// Session folder; also the root key of the selection tree
    #[serde(rename = "path")]
    pub root_path: String,

    /// Pre-formatted session size (e.g. "1.50 GiB")
    #[serde(rename = "size")]
    pub size_label: String,

    #[serde(rename = "image_count")]
    pub item_count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Folder,
    File,
}

/// One entry directly beneath the session root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionItem {
    pub id: String,
    pub label: String,
    #[serde(rename = "item_type")]
    pub kind: ItemKind,
}

/// Validate a session name before it is used as a folder name on a destination
///
/// # Validation Rules
/// - Name must not be empty and must be ≤ 255 characters
/// - Cannot contain `/`, `\`, null bytes, or `..`
/// - Cannot start with `-` or `.`
pub fn validate_session_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("Session name cannot be empty".to_string());
    }

    if name.len() > 255 {
        return Err("Session name too long (max 255 characters)".to_string());
    }

    if name.contains('/') || name.contains('\\') {
        return Err("Session name cannot contain path separators".to_string());
    }

    if name.contains('\0') {
        return Err("Session name cannot contain null bytes".to_string());
    }

    if name.contains("..") {
        return Err("Session name cannot contain '..'".to_string());
    }

    if name.starts_with('-') {
        return Err("Session name cannot start with '-'".to_string());
    }

    if name.starts_with('.') {
        return Err("Session name cannot start with '.'".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_session_name() {
        assert!(validate_session_name("Wedding 2024").is_ok());
        assert!(validate_session_name("").is_err());
        assert!(validate_session_name("../etc").is_err());
        assert!(validate_session_name("a/b").is_err());
        assert!(validate_session_name(".hidden").is_err());
        assert!(validate_session_name("-rf").is_err());
        assert!(validate_session_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_destination_wire_names() {
        let dest = Destination {
            id: DestinationId(7),
            path: "/Volumes/Shuttle".to_string(),
            label: "Shuttle".to_string(),
            kind: DestinationKind::External,
            enabled: true,
            has_existing_backup: false,
        };

        let json = serde_json::to_value(&dest).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["destination_type"], "external");

        // Older documents have no has_existing_backup field
        let legacy = r#"{"id":3,"path":"/tmp","label":"tmp","destination_type":"local","enabled":false}"#;
        let parsed: Destination = serde_json::from_str(legacy).unwrap();
        assert!(!parsed.has_existing_backup);
        assert_eq!(parsed.kind, DestinationKind::Local);
    }
}
