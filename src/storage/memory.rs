// src/storage/memory.rs

// In-memory storage (for testing and lightweight usage)
// Implements the shared-store contract inside a single process. Every
// operation, including the two transactions, runs under one mutex section,
// which gives the same atomicity the Redis scripts provide.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time;
use tracing::debug;

use crate::clock::{secs_to_millis, Clock, SystemClock};
use crate::config::InMemoryConfig;
use crate::error::{Result, StorageError};
use crate::storage::{
    refilled_tokens, ScoreBound, SlidingLogOutcome, SlidingLogTransaction, StorageBackend,
    TokenBucketOutcome, TokenBucketTransaction, BUCKET_LAST_REFILL_FIELD, BUCKET_TOKENS_FIELD,
};

#[derive(Debug, Clone)]
enum Value {
    Counter(i64),
    /// (member, score), kept sorted by score
    Log(Vec<(String, i64)>),
    Hash(HashMap<String, String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Counter(_) => "counter",
            Value::Log(_) => "sorted set",
            Value::Hash(_) => "hash",
        }
    }
}

/// Entry in the in-memory storage
#[derive(Debug)]
struct MemoryEntry {
    value: Value,
    /// Epoch milliseconds according to the store's clock
    expires_at: Option<i64>,
}

impl MemoryEntry {
    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

type Entries = HashMap<String, MemoryEntry>;

/// In-memory storage backend implementation
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    data: Arc<Mutex<Entries>>,
    config: InMemoryConfig,
    clock: Arc<dyn Clock>,
}

impl MemoryStorage {
    /// Creates a new in-memory storage with the given configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a store whose expiry follows the supplied clock
    pub fn with_clock(config: InMemoryConfig, clock: Arc<dyn Clock>) -> Self {
        let data = Arc::new(Mutex::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        if config.use_background_task {
            // the sweeper only holds a weak reference, so it stops with the store
            if let Ok(handle) = Handle::try_current() {
                let weak = Arc::downgrade(&data);
                let clock = Arc::clone(&clock);
                handle.spawn(Self::sweep(weak, clock, config.cleanup_interval));
            } else {
                debug!("No tokio runtime available, background expiry disabled");
            }
        }

        Self {
            data,
            config,
            clock,
        }
    }

    async fn sweep(data: Weak<Mutex<Entries>>, clock: Arc<dyn Clock>, every: Duration) {
        let mut interval = time::interval(every);
        loop {
            interval.tick().await;
            let Some(shared) = data.upgrade() else {
                debug!("Memory store dropped, stopping expiry sweeper");
                break;
            };
            let now = clock.now_millis();
            let mut entries = lock(&shared);
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            let removed = before - entries.len();
            if removed > 0 {
                debug!(removed, "Swept expired entries");
            }
        }
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        lock(&self.data)
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Locks the map and reads the clock once for the whole operation
    fn live(&self) -> (MutexGuard<'_, Entries>, i64) {
        let now = self.clock.now_millis();
        (lock(&self.data), now)
    }

    fn ensure_capacity(&self, entries: &Entries, key: &str) -> Result<()> {
        if entries.len() >= self.config.max_entries && !entries.contains_key(key) {
            return Err(StorageError::CapacityExceeded(self.config.max_entries).into());
        }
        Ok(())
    }
}

fn lock(data: &Mutex<Entries>) -> MutexGuard<'_, Entries> {
    data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn purge_if_expired(entries: &mut Entries, key: &str, now: i64) {
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.remove(key);
    }
}

fn wrong_type(key: &str, value: &Value) -> StorageError {
    StorageError::Command(format!(
        "WRONGTYPE key {} holds a {}",
        key,
        value.type_name()
    ))
}

fn log_mut<'a>(entries: &'a mut Entries, key: &str) -> Result<Option<&'a mut Vec<(String, i64)>>> {
    match entries.get_mut(key) {
        None => Ok(None),
        Some(MemoryEntry {
            value: Value::Log(log),
            ..
        }) => Ok(Some(log)),
        Some(entry) => Err(wrong_type(key, &entry.value).into()),
    }
}

fn insert_sorted(log: &mut Vec<(String, i64)>, member: &str, score: i64) -> bool {
    let existed = match log.iter().position(|(m, _)| m == member) {
        Some(index) => {
            log.remove(index);
            true
        }
        None => false,
    };
    let at = log.partition_point(|(_, s)| *s <= score);
    log.insert(at, (member.to_string(), score));
    !existed
}

fn remove_range(log: &mut Vec<(String, i64)>, min: ScoreBound, max: ScoreBound) -> u64 {
    let before = log.len();
    log.retain(|(_, score)| !(min.admits_from_below(*score) && max.admits_from_above(*score)));
    (before - log.len()) as u64
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);
        self.ensure_capacity(&entries, key)?;

        let entry = entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: Value::Counter(0),
            expires_at: None,
        });
        match &mut entry.value {
            Value::Counter(count) => {
                *count += amount;
                Ok(*count)
            }
            other => Err(wrong_type(key, other).into()),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);

        if let Some(entry) = entries.get_mut(key) {
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            entry.expires_at = Some(now.saturating_add(ttl_ms));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);

        Ok(match entries.get(key) {
            None => -2,
            Some(MemoryEntry {
                expires_at: None, ..
            }) => -1,
            // rounded to the nearest second, as Redis reports it
            Some(MemoryEntry {
                expires_at: Some(at),
                ..
            }) => (at - now).saturating_add(500) / 1000,
        })
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);

        match entries.get(key) {
            None => Ok(None),
            Some(MemoryEntry {
                value: Value::Counter(count),
                ..
            }) => Ok(Some(*count)),
            Some(entry) => Err(wrong_type(key, &entry.value).into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);
        Ok(entries.remove(key).is_some())
    }

    async fn add_scored(&self, key: &str, member: &str, score: i64) -> Result<bool> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);
        self.ensure_capacity(&entries, key)?;

        if !entries.contains_key(key) {
            entries.insert(
                key.to_string(),
                MemoryEntry {
                    value: Value::Log(Vec::new()),
                    expires_at: None,
                },
            );
        }
        match log_mut(&mut entries, key)? {
            Some(log) => Ok(insert_sorted(log, member, score)),
            None => Ok(false),
        }
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<usize>,
    ) -> Result<Vec<i64>> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);

        let Some(log) = log_mut(&mut entries, key)? else {
            return Ok(Vec::new());
        };
        let scores = log
            .iter()
            .map(|(_, score)| *score)
            .filter(|score| min.admits_from_below(*score) && max.admits_from_above(*score))
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        Ok(scores)
    }

    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);

        let removed = match log_mut(&mut entries, key)? {
            Some(log) => remove_range(log, min, max),
            None => 0,
        };
        // an emptied sorted set no longer exists, as in Redis
        if log_mut(&mut entries, key)?.is_some_and(|log| log.is_empty()) {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn cardinality(&self, key: &str) -> Result<u64> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);

        Ok(log_mut(&mut entries, key)?.map_or(0, |log| log.len() as u64))
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);

        match entries.get(key) {
            None => Ok(vec![None; fields.len()]),
            Some(MemoryEntry {
                value: Value::Hash(hash),
                ..
            }) => Ok(fields.iter().map(|field| hash.get(*field).cloned()).collect()),
            Some(entry) => Err(wrong_type(key, &entry.value).into()),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn run_sliding_log(
        &self,
        key: &str,
        tx: &SlidingLogTransaction,
    ) -> Result<SlidingLogOutcome> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);

        let count = match log_mut(&mut entries, key)? {
            Some(log) => {
                remove_range(log, ScoreBound::NegInf, ScoreBound::Inclusive(tx.window_start_ms));
                log.len() as u64
            }
            None => 0,
        };

        if count >= tx.limit {
            return Ok(SlidingLogOutcome {
                allowed: false,
                remaining: 0,
                count,
            });
        }

        self.ensure_capacity(&entries, key)?;
        let entry = entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: Value::Log(Vec::new()),
            expires_at: None,
        });
        if let Value::Log(log) = &mut entry.value {
            insert_sorted(log, &tx.member, tx.now_ms);
        }
        entry.expires_at = Some(now.saturating_add(secs_to_millis(tx.window_sec)));

        Ok(SlidingLogOutcome {
            allowed: true,
            remaining: tx.limit - count - 1,
            count: count + 1,
        })
    }

    async fn run_token_bucket(
        &self,
        key: &str,
        tx: &TokenBucketTransaction,
    ) -> Result<TokenBucketOutcome> {
        let (mut entries, now) = self.live();
        purge_if_expired(&mut entries, key, now);
        self.ensure_capacity(&entries, key)?;

        let entry = entries.entry(key.to_string()).or_insert(MemoryEntry {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        let hash = match &mut entry.value {
            Value::Hash(hash) => hash,
            other => return Err(wrong_type(key, other).into()),
        };

        let tokens = hash
            .get(BUCKET_TOKENS_FIELD)
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(tx.capacity as f64);
        let last_refill = hash
            .get(BUCKET_LAST_REFILL_FIELD)
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(tx.now_ms);

        let mut available =
            refilled_tokens(tokens, last_refill, tx.now_ms, tx.capacity, tx.refill_rate);
        let allowed = available >= tx.tokens_per_request;
        if allowed {
            available -= tx.tokens_per_request;
        }

        hash.insert(BUCKET_TOKENS_FIELD.to_string(), available.to_string());
        hash.insert(BUCKET_LAST_REFILL_FIELD.to_string(), tx.now_ms.to_string());
        entry.expires_at = Some(now.saturating_add(secs_to_millis(tx.ttl_secs)));

        Ok(TokenBucketOutcome {
            allowed,
            remaining: available.floor().max(0.0) as u64,
        })
    }
}
