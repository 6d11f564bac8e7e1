// src/storage/mod.rs

pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use memory::MemoryStorage;
pub use redis::RedisStorage;

use super::error::Result;
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::time::Duration;

/// Bound of a sorted-set score range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    NegInf,
    PosInf,
    Inclusive(i64),
    Exclusive(i64),
}

impl ScoreBound {
    /// Whether `score` lies on the permitted side of this bound used as a minimum
    pub fn admits_from_below(self, score: i64) -> bool {
        match self {
            ScoreBound::NegInf => true,
            ScoreBound::PosInf => false,
            ScoreBound::Inclusive(min) => score >= min,
            ScoreBound::Exclusive(min) => score > min,
        }
    }

    /// Whether `score` lies on the permitted side of this bound used as a maximum
    pub fn admits_from_above(self, score: i64) -> bool {
        match self {
            ScoreBound::NegInf => false,
            ScoreBound::PosInf => true,
            ScoreBound::Inclusive(max) => score <= max,
            ScoreBound::Exclusive(max) => score < max,
        }
    }
}

// Redis range syntax: -inf, +inf, 42, (42
impl fmt::Display for ScoreBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScoreBound::NegInf => f.write_str("-inf"),
            ScoreBound::PosInf => f.write_str("+inf"),
            ScoreBound::Inclusive(score) => write!(f, "{}", score),
            ScoreBound::Exclusive(score) => write!(f, "({}", score),
        }
    }
}

/// Input of the atomic sliding-log admission
#[derive(Debug, Clone)]
pub struct SlidingLogTransaction {
    /// Score (and timestamp) of the request being decided
    pub now_ms: i64,
    /// Entries scored at or below this are pruned before counting
    pub window_start_ms: i64,
    pub limit: u64,
    pub window_sec: u64,
    /// Unique member stored for an admitted request
    pub member: String,
}

/// Result of the atomic sliding-log admission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingLogOutcome {
    pub allowed: bool,
    /// Quota left after this request, 0 when denied
    pub remaining: u64,
    /// Entries in the window after this request
    pub count: u64,
}

/// Input of the atomic token-bucket take
#[derive(Debug, Clone)]
pub struct TokenBucketTransaction {
    pub now_ms: i64,
    pub capacity: u64,
    pub refill_rate: f64,
    pub tokens_per_request: f64,
    pub ttl_secs: u64,
}

/// Result of the atomic token-bucket take
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketOutcome {
    pub allowed: bool,
    /// Tokens left after the decision, floored
    pub remaining: u64,
}

/// Hash fields of a persisted token bucket
pub const BUCKET_TOKENS_FIELD: &str = "tokens";
pub const BUCKET_LAST_REFILL_FIELD: &str = "last_refill";

/// Core trait that every shared store must implement
///
/// Single-key primitives are atomic on their own; the two `run_*`
/// transactions execute their whole read-modify-write sequence as one
/// indivisible operation against the store.
#[async_trait]
pub trait StorageBackend: Send + Sync + Debug {
    // Atomically increments a counter, creating it at `amount`
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;

    // Sets expiration time for a key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    // Remaining time to live in seconds: -2 when missing, -1 when persistent
    async fn ttl(&self, key: &str) -> Result<i64>;

    // Reads a counter without modifying it
    async fn get_counter(&self, key: &str) -> Result<Option<i64>>;

    // Deletes a key
    async fn delete(&self, key: &str) -> Result<bool>;

    // Adds a member to a sorted set
    async fn add_scored(&self, key: &str, member: &str, score: i64) -> Result<bool>;

    // Scores of members within [min, max], lowest first
    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<usize>,
    ) -> Result<Vec<i64>>;

    // Removes members within [min, max], returns how many were removed
    async fn remove_range_by_score(&self, key: &str, min: ScoreBound, max: ScoreBound)
        -> Result<u64>;

    // Number of members in a sorted set
    async fn cardinality(&self, key: &str) -> Result<u64>;

    // Reads hash fields, `None` for absent ones
    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>>;

    // Round trip used by health checks
    async fn ping(&self) -> Result<()>;

    // Prune, count and conditionally insert as one transaction
    async fn run_sliding_log(
        &self,
        key: &str,
        tx: &SlidingLogTransaction,
    ) -> Result<SlidingLogOutcome>;

    // Refill, take and persist as one transaction
    async fn run_token_bucket(
        &self,
        key: &str,
        tx: &TokenBucketTransaction,
    ) -> Result<TokenBucketOutcome>;
}

/// Refill arithmetic shared by the stores that evaluate buckets client side
pub fn refilled_tokens(
    tokens: f64,
    last_refill_ms: i64,
    now_ms: i64,
    capacity: u64,
    refill_rate: f64,
) -> f64 {
    let elapsed = (now_ms - last_refill_ms).max(0) as f64 / 1000.0;
    (tokens + elapsed * refill_rate).min(capacity as f64)
}
