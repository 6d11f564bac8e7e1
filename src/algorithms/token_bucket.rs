// src/algorithms/token_bucket.rs

use crate::algorithms::{fail_open, record_key, Decision, RateLimitAlgorithm};
use crate::clock::{secs_to_millis, Clock, SystemClock};
use crate::config::{Strategy, TokenBucketOptions};
use crate::error::Result;
use crate::storage::{StorageBackend, TokenBucketTransaction};
use async_trait::async_trait;
use std::sync::Arc;

/// Token Bucket rate limiting algorithm
///
/// The token bucket algorithm works by maintaining a "bucket" of tokens that are
/// replenished at a constant rate. Each request consumes tokens, and if there
/// are not enough available, the request is rejected.
///
/// Refill is computed lazily from the time of the previous access inside the
/// store transaction; nothing runs in the background.
#[derive(Debug, Clone)]
pub struct TokenBucket<S>
where
    S: StorageBackend,
{
    /// Storage backend for persisting bucket state
    storage: S,

    clock: Arc<dyn Clock>,
}

impl<S> TokenBucket<S>
where
    S: StorageBackend,
{
    pub fn new(storage: S) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    pub fn with_clock(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self { storage, clock }
    }

    async fn evaluate(
        &self,
        key: &str,
        options: &TokenBucketOptions,
        now: i64,
    ) -> Result<Decision> {
        let tx = TokenBucketTransaction {
            now_ms: now,
            capacity: options.capacity,
            refill_rate: options.refill_rate,
            tokens_per_request: options.tokens_per_request,
            ttl_secs: options.idle_ttl_secs(),
        };

        let outcome = self.storage.run_token_bucket(key, &tx).await?;
        let remaining = outcome.remaining.min(options.capacity);

        let retry_after = if outcome.allowed {
            0
        } else {
            ((options.tokens_per_request - remaining as f64) / options.refill_rate)
                .ceil()
                .max(0.0) as u64
        };

        Ok(Decision {
            allowed: outcome.allowed,
            remaining,
            limit: options.capacity,
            reset_at: now.saturating_add(secs_to_millis(retry_after)),
            retry_after,
        })
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for TokenBucket<S>
where
    S: StorageBackend,
{
    type Options = TokenBucketOptions;

    fn strategy(&self) -> Strategy {
        Strategy::TokenBucket
    }

    async fn check(&self, identifier: &str, options: &TokenBucketOptions) -> Result<Decision> {
        options.validate()?;

        let key = record_key(options.prefix(), identifier);
        let now = self.clock.now_millis();

        let outcome = self.evaluate(&key, options, now).await;
        let decision = fail_open(outcome, &key, || Decision::permissive(options.capacity, now))?;

        crate::rate_limit_event!(Strategy::TokenBucket, key.as_str(), decision);
        Ok(decision)
    }
}
