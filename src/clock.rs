// src/clock.rs

use chrono::Utc;
use std::fmt::Debug;

/// Source of the current time for engines and the in-memory store.
///
/// Every timestamp in a quota record is epoch milliseconds, so the clock
/// reports exactly that.
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> i64;
}

/// Wall clock backed by chrono
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Whole seconds as milliseconds, saturating instead of overflowing
pub fn secs_to_millis(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}
