//! Formatting utilities for sizes, transfer rates and sync times

use chrono::{DateTime, Utc};

/// Binary-unit size, as shown next to a session name
///
/// ```
/// use jsync_common::format_bytes;
/// assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 / 2), "1.50 GiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut size = bytes as f64;
    let mut unit = UNITS[0];

    for &next in &UNITS[1..] {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }

    format!("{size:.2} {unit}")
}

/// Format a transfer rate the way the engine reports it
///
/// # Examples
/// ```
/// use jsync_common::format_rate;
/// assert_eq!(format_rate(512.0), "512 B/s");
/// assert_eq!(format_rate(2.5 * 1024.0 * 1024.0), "2.50 MB/s");
/// ```
pub fn format_rate(bytes_per_sec: f64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;

    if bytes_per_sec >= GB {
        format!("{:.2} GB/s", bytes_per_sec / GB)
    } else if bytes_per_sec >= MB {
        format!("{:.2} MB/s", bytes_per_sec / MB)
    } else if bytes_per_sec >= KB {
        format!("{:.2} KB/s", bytes_per_sec / KB)
    } else {
        format!("{bytes_per_sec:.0} B/s")
    }
}

/// Compact elapsed time using the two largest units, e.g. `1h 1m`
pub fn format_elapsed_time(seconds: i64) -> String {
    let (major, minor) = match seconds {
        s if s < 60 => return format!("{s}s"),
        s if s < 3600 => ((s / 60, 'm'), (s % 60, 's')),
        s if s < 86400 => ((s / 3600, 'h'), (s % 3600 / 60, 'm')),
        s => ((s / 86400, 'd'), (s % 86400 / 3600, 'h')),
    };

    match minor {
        (0, _) => format!("{}{}", major.0, major.1),
        (count, unit) => format!("{}{} {count}{unit}", major.0, major.1),
    }
}

/// Status line for the last completed sync of a session
pub fn format_last_synced(last_synced: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match last_synced {
        None => "Never synced".to_string(),
        Some(at) => {
            let elapsed = (now - at).num_seconds();
            if elapsed < 60 {
                "Last sync just now".to_string()
            } else {
                // Whole minutes are enough for a status line
                format!("Last sync {} ago", format_elapsed_time(elapsed - elapsed % 60))
            }
        }
    }
}
