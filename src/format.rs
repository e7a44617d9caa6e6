//! Human-readable formatting for sizes, intervals and timestamps.

use chrono::{DateTime, Local, Utc};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Binary-multiple size string with one decimal, e.g. `"1.2 GiB"`.
pub fn file_size_to_string(size: u64) -> String {
    if size >= GIB {
        format!("{:.1} GiB", size as f64 / GIB as f64)
    } else if size >= MIB {
        format!("{:.1} MiB", size as f64 / MIB as f64)
    } else if size >= KIB {
        format!("{:.1} KiB", size as f64 / KIB as f64)
    } else {
        format!("{size} B")
    }
}

/// Compact elapsed/remaining time string, e.g. `"1 h 02 min"`.
pub fn seconds_to_interval_string(seconds: u32) -> String {
    if seconds < 60 {
        format!("{seconds} s")
    } else if seconds < 3600 {
        format!("{} min {:02} s", seconds / 60, seconds % 60)
    } else if seconds < 86_400 {
        format!("{} h {:02} min", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{} d {} h", seconds / 86_400, (seconds % 86_400) / 3600)
    }
}

/// Modification timestamp in local time, `dd.MM.yyyy HH:mm`.
pub fn modification_date_string(timestamp: DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%d.%m.%Y %H:%M")
        .to_string()
}
