//! Timestamp formatting for artifact names and records.

use chrono::{DateTime, Local, SecondsFormat, Utc};

/// Builds `<prefix><YYYYMMDD_HHMMSS><suffix>` from the local time.
///
/// Two calls within the same second yield the same name.
pub fn timestamped_filename(prefix: &str, suffix: &str) -> String {
    filename_at(Local::now(), prefix, suffix)
}

fn filename_at(at: DateTime<Local>, prefix: &str, suffix: &str) -> String {
    format!("{prefix}{}{suffix}", at.format("%Y%m%d_%H%M%S"))
}

/// Current UTC time as ISO-8601 with millisecond precision.
pub fn utc_timestamp() -> String {
    format_utc(Utc::now())
}

fn format_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, false)
}
