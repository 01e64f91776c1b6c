//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}

/// Encode a timestamp as microseconds since the epoch.
///
/// Stored timestamps use this integer form so that range comparisons in SQL
/// are exact and independent of text formatting.
pub fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

/// Decode microseconds since the epoch, `None` if out of range
pub fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_micros(micros).single()
}
