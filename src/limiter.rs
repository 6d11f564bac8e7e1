// src/limiter.rs

use std::sync::Arc;

use crate::algorithms::{Decision, FixedWindow, RateLimitAlgorithm, SlidingWindow, TokenBucket};
use crate::clock::{Clock, SystemClock};
use crate::config::{RateLimitOptions, Strategy, TokenBucketOptions};
use crate::error::Result;
use crate::storage::StorageBackend;

/// Entry point bundling the three engines over one shared store
///
/// Cloning is cheap when the store is (both provided stores share their
/// state between clones), so a limiter can be handed to every request task.
#[derive(Debug, Clone)]
pub struct RateLimiter<S>
where
    S: StorageBackend + Clone,
{
    pub(crate) storage: S,
    pub(crate) clock: Arc<dyn Clock>,
    fixed: FixedWindow<S>,
    sliding: SlidingWindow<S>,
    bucket: TokenBucket<S>,
}

impl<S> RateLimiter<S>
where
    S: StorageBackend + Clone,
{
    pub fn new(storage: S) -> Self {
        Self::with_clock(storage, Arc::new(SystemClock))
    }

    /// Limiter whose engines read time from `clock`
    pub fn with_clock(storage: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            fixed: FixedWindow::with_clock(storage.clone(), Arc::clone(&clock)),
            sliding: SlidingWindow::with_clock(storage.clone(), Arc::clone(&clock)),
            bucket: TokenBucket::with_clock(storage.clone(), Arc::clone(&clock)),
            storage,
            clock,
        }
    }

    pub async fn fixed_window_check(
        &self,
        identifier: &str,
        options: &RateLimitOptions,
    ) -> Result<Decision> {
        self.fixed.check(identifier, options).await
    }

    pub async fn sliding_window_check(
        &self,
        identifier: &str,
        options: &RateLimitOptions,
    ) -> Result<Decision> {
        self.sliding.check(identifier, options).await
    }

    pub async fn token_bucket_check(
        &self,
        identifier: &str,
        options: &TokenBucketOptions,
    ) -> Result<Decision> {
        self.bucket.check(identifier, options).await
    }

    /// Dispatch on `strategy`; token buckets get a burst of `limit` refilled over one window
    pub async fn check(
        &self,
        strategy: Strategy,
        identifier: &str,
        options: &RateLimitOptions,
    ) -> Result<Decision> {
        match strategy {
            Strategy::Fixed => self.fixed_window_check(identifier, options).await,
            Strategy::Sliding => self.sliding_window_check(identifier, options).await,
            Strategy::TokenBucket => {
                options.validate()?;
                self.token_bucket_check(identifier, &options.as_token_bucket())
                    .await
            }
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }
}
