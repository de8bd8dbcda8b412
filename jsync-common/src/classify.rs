//! Destination classification from a folder path

use std::path::Path;

use crate::DestinationKind;

const CLOUD_PROVIDERS: &[(&str, &str)] = &[
    ("dropbox", "Dropbox"),
    ("google drive", "Google Drive"),
    ("googledrive", "Google Drive"),
    ("onedrive", "OneDrive"),
    ("icloud", "iCloud"),
];

/// Guess a label and kind for a destination folder
///
/// Cloud-synced folders are recognised by provider name. Volumes under
/// `/Volumes`, `/media/<user>` or `/run/media/<user>` count as external drives,
/// and `/net`, `smb://` and `afp://` paths count as network shares. Everything
/// else is local.
pub fn classify_destination(path: &str) -> (String, DestinationKind) {
    let lower = path.to_lowercase();

    for (needle, label) in CLOUD_PROVIDERS {
        if lower.contains(needle) {
            return (label.to_string(), DestinationKind::Cloud);
        }
    }

    let mounted = [("/Volumes/", 0), ("/run/media/", 1), ("/media/", 1)]
        .into_iter()
        .find_map(|(prefix, skip)| path.strip_prefix(prefix).map(|rest| (rest, skip)));
    if let Some((rest, skip)) = mounted {
        let volume = rest
            .split('/')
            .nth(skip)
            .filter(|name| !name.is_empty())
            .unwrap_or("External Drive");
        return (volume.to_string(), DestinationKind::External);
    }

    if path.starts_with("/net/") || path.starts_with("smb://") || path.starts_with("afp://") {
        return (last_segment(path, "Network"), DestinationKind::Network);
    }

    (last_segment(path, "Local"), DestinationKind::Local)
}

fn last_segment(path: &str, fallback: &str) -> String {
    Path::new(path.trim_end_matches('/'))
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linux_mounts() {
        assert_eq!(
            classify_destination("/run/media/anna/CARD01/backup"),
            ("CARD01".to_string(), DestinationKind::External)
        );
        assert_eq!(
            classify_destination("/media/anna/Shuttle"),
            ("Shuttle".to_string(), DestinationKind::External)
        );
        assert_eq!(
            classify_destination("/media/anna"),
            ("External Drive".to_string(), DestinationKind::External)
        );
    }

    #[test]
    fn test_cloud_providers() {
        assert_eq!(
            classify_destination("/Users/me/Dropbox/Sessions"),
            ("Dropbox".to_string(), DestinationKind::Cloud)
        );
        assert_eq!(
            classify_destination("/Users/me/Library/CloudStorage/GoogleDrive-me/Shoots"),
            ("Google Drive".to_string(), DestinationKind::Cloud)
        );
        assert_eq!(
            classify_destination("/Users/me/Library/Mobile Documents/com~apple~CloudDocs/iCloud Drive"),
            ("iCloud".to_string(), DestinationKind::Cloud)
        );
    }

    #[test]
    fn test_external_volume() {
        assert_eq!(
            classify_destination("/Volumes/Shuttle SSD/Backups"),
            ("Shuttle SSD".to_string(), DestinationKind::External)
        );
        assert_eq!(
            classify_destination("/Volumes/"),
            ("External Drive".to_string(), DestinationKind::External)
        );
    }

    #[test]
    fn test_network_and_local() {
        assert_eq!(
            classify_destination("smb://nas/photo"),
            ("photo".to_string(), DestinationKind::Network)
        );
        assert_eq!(
            classify_destination("/net/archive/jobs/"),
            ("jobs".to_string(), DestinationKind::Network)
        );
        assert_eq!(
            classify_destination("/home/me/Backups"),
            ("Backups".to_string(), DestinationKind::Local)
        );
        assert_eq!(
            classify_destination("/"),
            ("Local".to_string(), DestinationKind::Local)
        );
    }
}
