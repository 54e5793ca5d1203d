//! Helpers shared by the record types.

use chrono::{DateTime, Duration, Utc};

/// Epoch milliseconds, the unit every stored timestamp uses.
pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn now_millis() -> i64 {
    millis(Utc::now())
}

/// `now - age` in epoch milliseconds.
pub(crate) fn millis_ago(age: std::time::Duration) -> i64 {
    let age = Duration::from_std(age).unwrap_or(Duration::MAX);
    Utc::now()
        .checked_sub_signed(age)
        .map(millis)
        .unwrap_or(i64::MIN)
}

/// `now + ttl` in epoch milliseconds.
pub(crate) fn millis_from_now(ttl: std::time::Duration) -> i64 {
    let ttl = Duration::from_std(ttl).unwrap_or(Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .map(millis)
        .unwrap_or(i64::MAX)
}

/// True for a transaction that lost a read/write race with another writer.
///
/// Conflicting claims surface this way under the optimistic engines; every
/// other error (decode, connection) is real and must reach the caller.
pub(crate) fn is_write_conflict(err: &surrealdb::Error) -> bool {
    is_conflict_message(&err.to_string())
}

fn is_conflict_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("write conflict") || message.contains("can be retried")
}
