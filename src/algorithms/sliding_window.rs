// src/algorithms/sliding_window.rs

use crate::algorithms::{fail_open, record_key, Decision, RateLimitAlgorithm};
use crate::clock::{Clock, SystemClock};
use crate::config::{RateLimitOptions, Strategy};
use crate::error::Result;
use crate::storage::{ScoreBound, SlidingLogTransaction, StorageBackend};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

/// Sliding Window Log rate limiting algorithm
///
/// Keeps the timestamp of every admitted request in a sorted set and counts
/// the entries of the trailing window. Pruning, counting and inserting run
/// as one store transaction, so concurrent requests for the same identifier
/// can never both observe room for one more request.
#[derive(Debug, Clone)]
pub struct SlidingWindow<S>
where
    S: StorageBackend,
{
    /// Storage backend holding the request logs
    storage: S,

    clock: Arc<dyn Clock>,
}

impl<S> SlidingWindow<S>
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
        let window_ms = options.window_millis();
        let tx = SlidingLogTransaction {
            now_ms: now,
            window_start_ms: now.saturating_sub(window_ms),
            limit: options.limit,
            window_sec: options.window_sec,
            // same-millisecond requests must stay distinct entries
            member: format!("{}-{}", now, Uuid::new_v4().simple()),
        };

        let outcome = self.storage.run_sliding_log(key, &tx).await?;

        // the window frees a slot once its oldest entry ages out
        let oldest = self
            .storage
            .range_by_score(key, ScoreBound::NegInf, ScoreBound::PosInf, Some(1))
            .await?
            .first()
            .copied()
            .unwrap_or(now);
        let reset_at = oldest.saturating_add(window_ms);

        let retry_after = if outcome.allowed {
            0
        } else {
            ((reset_at - now).max(0) as u64).div_ceil(1000)
        };

        Ok(Decision {
            allowed: outcome.allowed,
            remaining: outcome.remaining.min(options.limit),
            limit: options.limit,
            reset_at,
            retry_after,
        })
    }
}

#[async_trait]
impl<S> RateLimitAlgorithm for SlidingWindow<S>
where
    S: StorageBackend,
{
    type Options = RateLimitOptions;

    fn strategy(&self) -> Strategy {
        Strategy::Sliding
    }

    async fn check(&self, identifier: &str, options: &RateLimitOptions) -> Result<Decision> {
        options.validate()?;

        let key = record_key(options.prefix_for(Strategy::Sliding), identifier);
        let now = self.clock.now_millis();

        let outcome = self.evaluate(&key, options, now).await;
        let decision = fail_open(outcome, &key, || {
            Decision::permissive(options.limit, now.saturating_add(options.window_millis()))
        })?;

        crate::rate_limit_event!(Strategy::Sliding, key.as_str(), decision);
        Ok(decision)
    }
}
