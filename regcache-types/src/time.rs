//! Millisecond timestamp helpers.
//!
//! Every timestamp is persisted as UTC milliseconds since the epoch, so values
//! that enter the store are truncated to millisecond precision first.

use chrono::{DateTime, Utc};

/// Converts a timestamp to epoch milliseconds.
pub fn to_millis(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Converts epoch milliseconds back to a timestamp. Out-of-range values map to the epoch.
pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Drops sub-millisecond precision so a value survives a storage round trip unchanged.
pub fn truncate_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    from_millis(to_millis(&ts))
}

/// Current time at millisecond precision.
pub fn now() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}
