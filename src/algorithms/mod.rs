// src/algorithms/mod.rs

pub mod fixed_window;
pub mod sliding_window;
pub mod token_bucket;

#[cfg(test)]
mod tests;

pub use fixed_window::FixedWindow;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use super::config::Strategy;
use super::error::{RateLimiterError, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;
use tracing::warn;

/// Outcome of a single rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Whether the request was allowed
    pub allowed: bool,

    /// Quota left after this request
    pub remaining: u64,

    /// Total capacity of the rate limiter
    pub limit: u64,

    /// When the quota resets, epoch milliseconds
    pub reset_at: i64,

    /// Seconds to wait before retrying, 0 when allowed
    pub retry_after: u64,
}

impl Decision {
    /// Full quota, used whenever the store cannot be consulted
    pub fn permissive(limit: u64, reset_at: i64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            limit,
            reset_at,
            retry_after: 0,
        }
    }

    /// Reset time in unix seconds, rounded up
    pub fn reset_at_secs(&self) -> i64 {
        (self.reset_at + 999).div_euclid(1000)
    }
}

/// Contract shared by every engine
#[async_trait]
pub trait RateLimitAlgorithm: Send + Sync + Debug {
    /// The options this engine accepts per call
    type Options: Send + Sync;

    fn strategy(&self) -> Strategy;

    /// Decide one request for `identifier` and record it when admitted.
    ///
    /// Only invalid options produce an error; store failures yield a
    /// permissive decision.
    async fn check(&self, identifier: &str, options: &Self::Options) -> Result<Decision>;
}

/// Fail-open policy applied at the engine boundary.
///
/// Store failures are logged and replaced by `fallback`; every other error
/// (bad configuration, internal bugs) is passed to the caller.
pub fn fail_open<T>(outcome: Result<T>, key: &str, fallback: impl FnOnce() -> T) -> Result<T> {
    match outcome {
        Ok(value) => Ok(value),
        Err(RateLimiterError::Storage(err)) => {
            warn!(
                key,
                error = %err,
                connectivity = err.is_connectivity(),
                "Shared store unavailable, failing open"
            );
            Ok(fallback())
        }
        Err(other) => Err(other),
    }
}

/// Store key of the quota record for `identifier`
pub fn record_key(prefix: &str, identifier: &str) -> String {
    format!("{}:{}", prefix, identifier)
}
