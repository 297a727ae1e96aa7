//! Epoch-millisecond time source and expiry comparison.
//!
//! Everything time-related in cache entries and retry decisions is an
//! `i64` epoch-millisecond value so entries round-trip through JSON without
//! a timezone story.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// An entry with `expires_at` strictly in the past is expired. A missing
/// `expires_at` never expires; `expires_at == now` is still valid.
pub fn expired(expires_at: Option<i64>, now: i64) -> bool {
    matches!(expires_at, Some(t) if t < now)
}
