// src/status.rs

use serde::Serialize;
use tracing::{error, info};

use crate::algorithms::{fail_open, record_key};
use crate::config::{RateLimitOptions, Strategy, TokenBucketOptions};
use crate::error::Result;
use crate::limiter::RateLimiter;
use crate::storage::{
    refilled_tokens, ScoreBound, StorageBackend, BUCKET_LAST_REFILL_FIELD, BUCKET_TOKENS_FIELD,
};

/// Read-only view of an identifier's quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    /// Requests (or spent tokens) counted in the current window
    pub count: u64,
    pub remaining: u64,
    /// Epoch milliseconds
    pub reset_at: i64,
}

impl<S> RateLimiter<S>
where
    S: StorageBackend + Clone,
{
    /// Inspect the quota of `identifier` without consuming any of it.
    ///
    /// Store failures report a fresh quota.
    pub async fn status(
        &self,
        identifier: &str,
        options: &RateLimitOptions,
        strategy: Strategy,
    ) -> Result<QuotaStatus> {
        options.validate()?;

        let key = record_key(options.prefix_for(strategy), identifier);
        let now = self.clock.now_millis();

        let outcome = match strategy {
            Strategy::Fixed => self.counter_status(&key, options, now).await,
            Strategy::Sliding => self.log_status(&key, options, now).await,
            Strategy::TokenBucket => {
                self.bucket_status(&key, &options.as_token_bucket(), now)
                    .await
            }
        };

        fail_open(outcome, &key, || QuotaStatus {
            count: 0,
            remaining: options.limit,
            reset_at: now.saturating_add(options.window_millis()),
        })
    }

    /// Inspect a token bucket checked with explicit `TokenBucketOptions`.
    ///
    /// Store failures report a full bucket.
    pub async fn token_bucket_status(
        &self,
        identifier: &str,
        options: &TokenBucketOptions,
    ) -> Result<QuotaStatus> {
        options.validate()?;

        let key = record_key(options.prefix(), identifier);
        let now = self.clock.now_millis();

        let outcome = self.bucket_status(&key, options, now).await;
        fail_open(outcome, &key, || QuotaStatus {
            count: 0,
            remaining: options.capacity,
            reset_at: now,
        })
    }

    /// Forget the quota record of `identifier` under `prefix` (`rl:sliding` when omitted).
    ///
    /// Never fails; store errors are logged.
    pub async fn reset(&self, identifier: &str, prefix: Option<&str>) {
        let key = record_key(
            prefix.unwrap_or_else(|| Strategy::Sliding.default_prefix()),
            identifier,
        );

        match self.storage.delete(&key).await {
            Ok(existed) => info!(key = %key, existed, "Rate limit reset"),
            Err(e) => error!(key = %key, error = %e, "Failed to reset rate limit"),
        }
    }

    async fn counter_status(
        &self,
        key: &str,
        options: &RateLimitOptions,
        now: i64,
    ) -> Result<QuotaStatus> {
        let count = self.storage.get_counter(key).await?.unwrap_or(0).max(0) as u64;
        let ttl = self.storage.ttl(key).await?;

        Ok(QuotaStatus {
            count,
            remaining: options.limit.saturating_sub(count),
            reset_at: reset_from_ttl(ttl, options, now),
        })
    }

    async fn log_status(
        &self,
        key: &str,
        options: &RateLimitOptions,
        now: i64,
    ) -> Result<QuotaStatus> {
        let window_start = now - options.window_millis();
        self.storage
            .remove_range_by_score(key, ScoreBound::NegInf, ScoreBound::Inclusive(window_start))
            .await?;
        let count = self.storage.cardinality(key).await?;
        let ttl = self.storage.ttl(key).await?;

        Ok(QuotaStatus {
            count,
            remaining: options.limit.saturating_sub(count),
            reset_at: reset_from_ttl(ttl, options, now),
        })
    }

    async fn bucket_status(
        &self,
        key: &str,
        bucket: &TokenBucketOptions,
        now: i64,
    ) -> Result<QuotaStatus> {
        let fields = self
            .storage
            .hash_get(key, &[BUCKET_TOKENS_FIELD, BUCKET_LAST_REFILL_FIELD])
            .await?;

        let field = |index: usize| fields.get(index).and_then(|value| value.as_deref());
        let tokens = field(0)
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(bucket.capacity as f64);
        let last_refill = field(1)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(now);

        let available = refilled_tokens(
            tokens,
            last_refill,
            now,
            bucket.capacity,
            bucket.refill_rate,
        );
        let remaining = (available.floor().max(0.0) as u64).min(bucket.capacity);
        let missing = bucket.capacity as f64 - available;
        let until_full_ms = (missing.max(0.0) / bucket.refill_rate * 1000.0).ceil() as i64;

        Ok(QuotaStatus {
            count: bucket.capacity - remaining,
            remaining,
            reset_at: now.saturating_add(until_full_ms),
        })
    }
}

fn reset_from_ttl(ttl: i64, options: &RateLimitOptions, now: i64) -> i64 {
    if ttl > 0 {
        now.saturating_add(ttl.saturating_mul(1000))
    } else {
        now.saturating_add(options.window_millis())
    }
}
