//! Timestamp type used by the protocol's soft timers.
//!
//! Timestamps are Unix epoch milliseconds (UTC). Every throttle and timeout
//! in the protocol takes the current time as a parameter so the logic can be
//! exercised with a synthetic clock in tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A Unix timestamp in milliseconds since epoch (UTC).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimestampMs(u64);

impl TimestampMs {
    /// The epoch (time zero).
    pub const EPOCH: Self = Self(0);

    pub fn new(ms: u64) -> Self {
        Self(ms)
    }

    /// Get the current system time as a `TimestampMs`.
    pub fn now() -> Self {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before Unix epoch")
            .as_millis() as u64;
        Self(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed since this timestamp (relative to `now`).
    pub fn elapsed_since(&self, now: TimestampMs) -> u64 {
        now.0.saturating_sub(self.0)
    }

    /// Whether more than `duration_ms` has passed relative to `now`.
    ///
    /// Strict: exactly `duration_ms` elapsed is not yet expired, matching
    /// the peer-timeout comparison on the wire protocol.
    pub fn has_expired(&self, duration_ms: u64, now: TimestampMs) -> bool {
        now.0 > self.0.saturating_add(duration_ms)
    }
}

impl fmt::Display for TimestampMs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
