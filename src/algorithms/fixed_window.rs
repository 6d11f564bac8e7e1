// src/algorithms/fixed_window.rs

use crate::algorithms::{fail_open, record_key, Decision, RateLimitAlgorithm};
use crate::clock::{Clock, SystemClock};
use crate::config::{RateLimitOptions, Strategy};
use crate::error::Result;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Fixed Window rate limiting algorithm
///
/// One counter per identifier, created with a TTL of one window by the first
/// request and left to expire. Cheap, but a burst of up to twice the limit
/// can pass when it straddles the moment the counter expires.
#[derive(Debug, Clone)]
pub struct FixedWindow<S>
where
    S: StorageBackend,
{
    /// Storage backend holding the window counters
    storage: S,

    clock: Arc<dyn Clock>,
}

impl<S> FixedWindow<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    async fn evaluate(&self, key: &str, options: &RateLimitOptions, now: i64) -> Result<Decision> {
        let window = Duration::from_secs(options.window_sec);

        let count = self.storage.increment(key, 1).await?;
        if count == 1 {
            self.storage.expire(key, window).await?;
        }

        let mut ttl = self.storage.ttl(key).await?;
        if ttl < 0 {
            // a counter without expiry would never reset
            self.storage.expire(key, window).await?;
            ttl = options.window_sec as i64;
        }

        let count = count.max(0) as u64;
        let allowed = count <= options.limit;

        Ok(Decision {
            allowed,
            remaining: options.limit.saturating_sub(count),
            limit: options.limit,
            reset_at: now.saturating_add(ttl.saturating_mul(1000)),
            // the store rounds ttl to whole seconds, a denial still waits at least one
            retry_after: if allowed { 0 } else { ttl.max(1) as u64 },
        })
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for FixedWindow<S>
where
    S: StorageBackend,
{
    type Options = RateLimitOptions;

    fn strategy(&self) -> Strategy {
        Strategy::Fixed
    }

    async fn check(&self, identifier: &str, options: &RateLimitOptions) -> Result<Decision> {
        options.validate()?;

        let key = record_key(options.prefix_for(Strategy::Fixed), identifier);
        let now = self.clock.now_millis();

        let outcome = self.evaluate(&key, options, now).await;
        let decision = fail_open(outcome, &key, || {
            Decision::permissive(options.limit, now.saturating_add(options.window_millis()))
        })?;

        crate::rate_limit_event!(Strategy::Fixed, key.as_str(), decision);
        Ok(decision)
    }
}
