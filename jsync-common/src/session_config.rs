//! Stored per-session configuration and global preferences

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{DefaultDestinationSet, Destination, SelectionState};

/// Current layout of [`SessionConfig`]
pub const SESSION_CONFIG_VERSION: u32 = 1;

/// Interval choices offered besides a custom value
pub const INTERVAL_PRESETS: [u32; 3] = [5, 15, 30];

/// Everything remembered about one session, keyed by its root path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// When a run last completed successfully
    #[serde(default)]
    pub last_synced: Option<DateTime<Utc>>,

    #[serde(default)]
    pub selected_paths: SelectionState,

    #[serde(default)]
    pub destinations: Vec<Destination>,
}

fn default_version() -> u32 {
    SESSION_CONFIG_VERSION
}

impl SessionConfig {
    /// Configuration for a session seen for the first time
    ///
    /// Everything is selected and the registry is seeded from the defaults.
    pub fn for_new_session(root_path: &str, defaults: &DefaultDestinationSet) -> Self {
        Self {
            version: SESSION_CONFIG_VERSION,
            last_synced: None,
            selected_paths: SelectionState::everything(root_path),
            destinations: defaults.seed_registry().as_slice().to_vec(),
        }
    }

    /// Store key for a session root
    pub fn store_key(root_path: &str) -> String {
        format!("session:{root_path}")
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.version > SESSION_CONFIG_VERSION {
            return Err(format!(
                "Session config version {} is newer than supported version {}",
                self.version, SESSION_CONFIG_VERSION
            ));
        }
        Ok(())
    }
}

/// Application-wide preferences
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preferences {
    #[serde(default = "default_true")]
    pub scheduled_backup: bool,

    #[serde(default = "default_interval")]
    pub interval_minutes: u32,

    #[serde(default = "default_true")]
    pub notifications_enabled: bool,

    #[serde(default)]
    pub default_destinations: DefaultDestinationSet,
}

fn default_true() -> bool {
    true
}

fn default_interval() -> u32 {
    15
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            scheduled_backup: true,
            interval_minutes: default_interval(),
            notifications_enabled: true,
            default_destinations: DefaultDestinationSet::default(),
        }
    }
}

impl Preferences {
    pub const STORE_KEY: &'static str = "preferences";

    pub fn validate(&self) -> Result<(), String> {
        validate_interval(self.interval_minutes)
    }

    /// Whether the interval is one of the presets
    pub fn is_custom_interval(&self) -> bool {
        !INTERVAL_PRESETS.contains(&self.interval_minutes)
    }
}

/// Validate a schedule interval in minutes
pub fn validate_interval(minutes: u32) -> Result<(), String> {
    if minutes < 1 {
        return Err(format!("Invalid interval {minutes}. Must be at least 1 minute"));
    }
    Ok(())
}
