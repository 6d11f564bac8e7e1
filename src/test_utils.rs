// src/test_utils.rs

use super::clock::Clock;
use super::config::InMemoryConfig;
use super::error::{Result, StorageError};
use super::limiter::RateLimiter;
use super::storage::{
    MemoryStorage, ScoreBound, SlidingLogOutcome, SlidingLogTransaction, StorageBackend,
    TokenBucketOutcome, TokenBucketTransaction,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Start of every manual clock, an arbitrary fixed instant
pub const TEST_EPOCH_MS: i64 = 1_700_000_000_000;

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Self::starting_at(TEST_EPOCH_MS)
    }

    pub fn starting_at(millis: i64) -> Arc<Self> {
        Arc::new(Self {
            now: AtomicI64::new(millis),
        })
    }

    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Memory store without a background sweeper, driven by `clock`
pub fn memory_storage(clock: Arc<ManualClock>) -> MemoryStorage {
    let config = InMemoryConfig {
        use_background_task: false,
        ..InMemoryConfig::default()
    };
    MemoryStorage::with_clock(config, clock)
}

/// Limiter over a fresh memory store, plus the clock that drives both
pub fn create_test_rate_limiter() -> (RateLimiter<MemoryStorage>, Arc<ManualClock>) {
    let clock = ManualClock::new();
    let limiter = RateLimiter::with_clock(memory_storage(Arc::clone(&clock)), clock.clone());
    (limiter, clock)
}

/// Store whose every operation fails, like an unreachable Redis
///
/// `ping` starts answering after `restore`, so health checks can observe a recovery.
#[derive(Debug, Clone, Default)]
pub struct FailingStorage {
    calls: Arc<AtomicUsize>,
    pingable: Arc<AtomicBool>,
}

impl FailingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(&self) {
        self.pingable.store(true, Ordering::SeqCst);
    }

    pub fn break_down(&self) {
        self.pingable.store(false, Ordering::SeqCst);
    }

    /// Operations attempted so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn fail<T>(&self) -> Result<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Connection("connection refused".to_string()).into())
    }
}

#[async_trait]
impl StorageBackend for FailingStorage {
    async fn increment(&self, _key: &str, _amount: i64) -> Result<i64> {
        self.fail()
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<bool> {
        self.fail()
    }

    async fn ttl(&self, _key: &str) -> Result<i64> {
        self.fail()
    }

    async fn get_counter(&self, _key: &str) -> Result<Option<i64>> {
        self.fail()
    }

    async fn delete(&self, _key: &str) -> Result<bool> {
        self.fail()
    }

    async fn add_scored(&self, _key: &str, _member: &str, _score: i64) -> Result<bool> {
        self.fail()
    }

    async fn range_by_score(
        &self,
        _key: &str,
        _min: ScoreBound,
        _max: ScoreBound,
        _limit: Option<usize>,
    ) -> Result<Vec<i64>> {
        self.fail()
    }

    async fn remove_range_by_score(
        &self,
        _key: &str,
        _min: ScoreBound,
        _max: ScoreBound,
    ) -> Result<u64> {
        self.fail()
    }

    async fn cardinality(&self, _key: &str) -> Result<u64> {
        self.fail()
    }

    async fn hash_get(&self, _key: &str, _fields: &[&str]) -> Result<Vec<Option<String>>> {
        self.fail()
    }

    async fn ping(&self) -> Result<()> {
        if self.pingable.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.fail()
    }

    async fn run_sliding_log(
        &self,
        _key: &str,
        _tx: &SlidingLogTransaction,
    ) -> Result<SlidingLogOutcome> {
        self.fail()
    }

    async fn run_token_bucket(
        &self,
        _key: &str,
        _tx: &TokenBucketTransaction,
    ) -> Result<TokenBucketOutcome> {
        self.fail()
    }
}

/// Wraps a store and counts the writes that reach it
#[derive(Debug, Clone)]
pub struct CountingStorage<S> {
    inner: S,
    writes: Arc<AtomicUsize>,
}

impl<S> CountingStorage<S>
where
    S: StorageBackend,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Mutating operations and transactions seen so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl<S> StorageBackend for CountingStorage<S>
where
    S: StorageBackend,
{
    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        self.record_write();
        self.inner.increment(key, amount).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.record_write();
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        self.inner.ttl(key).await
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        self.inner.get_counter(key).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.record_write();
        self.inner.delete(key).await
    }

    async fn add_scored(&self, key: &str, member: &str, score: i64) -> Result<bool> {
        self.record_write();
        self.inner.add_scored(key, member, score).await
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<usize>,
    ) -> Result<Vec<i64>> {
        self.inner.range_by_score(key, min, max, limit).await
    }

    // pruning expired entries does not change what a later check sees
    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64> {
        self.inner.remove_range_by_score(key, min, max).await
    }

    async fn cardinality(&self, key: &str) -> Result<u64> {
        self.inner.cardinality(key).await
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        self.inner.hash_get(key, fields).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn run_sliding_log(
        &self,
        key: &str,
        tx: &SlidingLogTransaction,
    ) -> Result<SlidingLogOutcome> {
        self.record_write();
        self.inner.run_sliding_log(key, tx).await
    }

    async fn run_token_bucket(
        &self,
        key: &str,
        tx: &TokenBucketTransaction,
    ) -> Result<TokenBucketOutcome> {
        self.record_write();
        self.inner.run_token_bucket(key, tx).await
    }
}
