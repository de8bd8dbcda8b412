// Centralized configuration for JSync

use std::path::PathBuf;

/// JSync configuration with support for environment variable overrides
#[derive(Debug, Clone)]
pub struct JsyncConfig {
    /// Settings store (default: <data dir>/jsync/jsync-settings.json)
    pub store_file: PathBuf,

    /// Session folder watched by the directory session provider
    pub session_dir: Option<PathBuf>,

    /// rclone executable used by the reference engine
    pub rclone_path: PathBuf,

    /// Parallel file transfers per destination
    pub engine_transfers: u32,

    /// Parallel checkers per destination
    pub engine_checkers: u32,

    /// Seconds a finished run stays in success/error before returning to idle
    pub dwell_secs: u64,

    /// Scheduler tick in seconds
    pub scheduler_tick_secs: u64,

    /// Interval between session polls in seconds
    pub session_poll_secs: u64,

    /// Quiet period before a burst of refresh requests is acted on
    pub refresh_debounce_ms: u64,
}

impl Default for JsyncConfig {
    fn default() -> Self {
        let store_file = dirs::data_dir()
            .map(|dir| dir.join("jsync").join("jsync-settings.json"))
            .unwrap_or_else(|| PathBuf::from("/tmp/jsync-settings.json"));

        Self {
            store_file,
            session_dir: None,
            rclone_path: PathBuf::from("rclone"),
            engine_transfers: 4,
            engine_checkers: 8,
            dwell_secs: 3,
            scheduler_tick_secs: 60,
            session_poll_secs: 30,
            refresh_debounce_ms: 500,
        }
    }
}

impl JsyncConfig {
    /// Create a new configuration with environment variable overrides
    ///
    /// Supported environment variables:
    /// - JSYNC_STORE_FILE: Override settings store path
    /// - JSYNC_SESSION_DIR: Session folder for the directory session provider
    /// - JSYNC_RCLONE: Override rclone executable
    /// - JSYNC_TRANSFERS / JSYNC_CHECKERS: rclone parallelism
    /// - JSYNC_DWELL_SECS: Override success/error dwell time
    /// - JSYNC_TICK_SECS: Override scheduler tick
    /// - JSYNC_POLL_SECS: Override session poll interval
    /// - JSYNC_REFRESH_DEBOUNCE_MS: Override refresh debounce window
    pub fn new() -> Self {
        let mut config = Self::default();

        if let Ok(file) = std::env::var("JSYNC_STORE_FILE") {
            config.store_file = PathBuf::from(file);
        }

        if let Ok(dir) = std::env::var("JSYNC_SESSION_DIR") {
            config.session_dir = Some(PathBuf::from(dir));
        }

        if let Ok(path) = std::env::var("JSYNC_RCLONE") {
            config.rclone_path = PathBuf::from(path);
        }

        override_number("JSYNC_TRANSFERS", &mut config.engine_transfers);
        override_number("JSYNC_CHECKERS", &mut config.engine_checkers);
        override_number("JSYNC_DWELL_SECS", &mut config.dwell_secs);
        override_number("JSYNC_TICK_SECS", &mut config.scheduler_tick_secs);
        override_number("JSYNC_POLL_SECS", &mut config.session_poll_secs);
        override_number("JSYNC_REFRESH_DEBOUNCE_MS", &mut config.refresh_debounce_ms);

        config
    }

    pub fn dwell(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.dwell_secs as i64)
    }

    pub fn scheduler_tick(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.scheduler_tick_secs.max(1) as i64)
    }

    pub fn session_poll(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_poll_secs.max(1) as i64)
    }

    pub fn refresh_debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.refresh_debounce_ms as i64)
    }
}

fn override_number<T: std::str::FromStr>(var: &str, target: &mut T) {
    if let Ok(value) = std::env::var(var) {
        if let Ok(parsed) = value.parse::<T>() {
            *target = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = JsyncConfig::default();
        assert!(config.store_file.ends_with("jsync-settings.json"));
        assert_eq!(config.dwell_secs, 3);
        assert_eq!(config.scheduler_tick(), chrono::Duration::minutes(1));
        assert_eq!(config.session_poll(), chrono::Duration::seconds(30));
        assert_eq!(config.engine_transfers, 4);
        assert_eq!(config.engine_checkers, 8);
        assert!(config.session_dir.is_none());
    }
}
