// src/storage/redis.rs

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisResult, Script};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{error, info};

use crate::config::RedisConfig;
use crate::error::{RateLimiterError, Result, StorageError};
use crate::resilience::{retry, RetryConfig};
use crate::storage::{
    ScoreBound, SlidingLogOutcome, SlidingLogTransaction, StorageBackend, TokenBucketOutcome,
    TokenBucketTransaction,
};

// KEYS[1] log key
// ARGV: now_ms, window_start_ms, limit, window_sec, member
// returns {allowed, remaining, count}
const SLIDING_LOG_SCRIPT: &str = r#"
local key = KEYS[1]
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', ARGV[2])
local count = redis.call('ZCARD', key)

if count < limit then
    redis.call('ZADD', key, ARGV[1], ARGV[5])
    redis.call('EXPIRE', key, ARGV[4])
    return {1, limit - count - 1, count + 1}
end
return {0, 0, count}
"#;

// KEYS[1] bucket key
// ARGV: now_ms, capacity, refill_rate, tokens_per_request, ttl_secs
// returns {allowed, floor(tokens)}
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local refill_rate = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1]) or capacity
local last_refill = tonumber(bucket[2]) or now

local elapsed = math.max(0, now - last_refill) / 1000
tokens = math.min(capacity, tokens + elapsed * refill_rate)

local allowed = 0
if tokens >= cost then
    tokens = tokens - cost
    allowed = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'last_refill', ARGV[1])
redis.call('EXPIRE', key, ARGV[5])
return {allowed, math.floor(tokens)}
"#;

/// Shared Redis store.
///
/// Cloning is cheap: clones share one multiplexed connection and the
/// compiled scripts, so a single instance is built at startup and handed to
/// every engine.
#[derive(Clone)]
pub struct RedisStorage {
    connection: ConnectionManager,
    config: RedisConfig,
    sliding_log: Arc<Script>,
    token_bucket: Arc<Script>,
}

// Manually implement Debug
impl fmt::Debug for RedisStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStorage")
            .field("command_timeout", &self.config.command_timeout)
            .field("max_retries", &self.config.max_retries)
            .finish()
    }
}

impl RedisStorage {
    /// Connects to Redis, retrying with a growing delay before giving up
    pub async fn new(config: RedisConfig) -> Result<Self> {
        // Open the client - this doesn't actually connect to Redis yet
        let client = Client::open(config.url.as_str())
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let connect_timeout = config.connection_timeout;
        let policy = RetryConfig::linear(config.max_retries, config.retry_delay);

        let connection = retry(&policy, "Redis connection", || {
            let client = client.clone();
            async move {
                match time::timeout(connect_timeout, ConnectionManager::new(client)).await {
                    Ok(result) => result.map_err(RateLimiterError::from),
                    Err(_) => Err(StorageError::Timeout(format!(
                        "connecting to Redis took longer than {:?}",
                        connect_timeout
                    ))
                    .into()),
                }
            }
        })
        .await
        .inspect_err(|e| error!(error = %e, "Giving up on Redis connection"))?;

        info!("Connected to Redis");

        Ok(Self {
            connection,
            config,
            sliding_log: Arc::new(Script::new(SLIDING_LOG_SCRIPT)),
            token_bucket: Arc::new(Script::new(TOKEN_BUCKET_SCRIPT)),
        })
    }

    /// Bounds a command by the configured timeout and records it
    async fn timed<T, F>(&self, operation: &'static str, key: &str, command: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let started = Instant::now();
        let timeout = self.config.command_timeout;
        let result = match time::timeout(timeout, command).await {
            Ok(reply) => reply.map_err(RateLimiterError::from),
            Err(_) => Err(StorageError::Timeout(format!(
                "{} on {} exceeded {:?}",
                operation, key, timeout
            ))
            .into()),
        };
        crate::storage_op!(operation, key, result, started.elapsed().as_millis() as u64);
        result
    }
}

fn sliding_log_outcome(reply: &[i64]) -> Result<SlidingLogOutcome> {
    match reply {
        [allowed, remaining, count] => Ok(SlidingLogOutcome {
            allowed: *allowed == 1,
            remaining: (*remaining).max(0) as u64,
            count: (*count).max(0) as u64,
        }),
        other => Err(StorageError::Script(format!(
            "sliding log script returned {} values, expected 3",
            other.len()
        ))
        .into()),
    }
}

fn token_bucket_outcome(reply: &[i64]) -> Result<TokenBucketOutcome> {
    match reply {
        [allowed, remaining] => Ok(TokenBucketOutcome {
            allowed: *allowed == 1,
            remaining: (*remaining).max(0) as u64,
        }),
        other => Err(StorageError::Script(format!(
            "token bucket script returned {} values, expected 2",
            other.len()
        ))
        .into()),
    }
}

#[async_trait]
impl StorageBackend for RedisStorage {
    async fn increment(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.connection.clone();
        self.timed("INCRBY", key, conn.incr(key, amount)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection.clone();
        let secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        self.timed("EXPIRE", key, conn.expire(key, secs)).await
    }

    async fn ttl(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection.clone();
        self.timed("TTL", key, conn.ttl(key)).await
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection.clone();
        self.timed("GET", key, conn.get(key)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let removed: i64 = self.timed("DEL", key, conn.del(key)).await?;
        Ok(removed > 0)
    }

    async fn add_scored(&self, key: &str, member: &str, score: i64) -> Result<bool> {
        let mut conn = self.connection.clone();
        let added: i64 = self
            .timed("ZADD", key, conn.zadd(key, member, score))
            .await?;
        Ok(added > 0)
    }

    async fn range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
        limit: Option<usize>,
    ) -> Result<Vec<i64>> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("ZRANGEBYSCORE");
        cmd.arg(key)
            .arg(min.to_string())
            .arg(max.to_string())
            .arg("WITHSCORES");
        if let Some(count) = limit {
            cmd.arg("LIMIT").arg(0).arg(count);
        }

        let members: Vec<(String, f64)> = self
            .timed("ZRANGEBYSCORE", key, cmd.query_async(&mut conn))
            .await?;
        Ok(members.into_iter().map(|(_, score)| score as i64).collect())
    }

    async fn remove_range_by_score(
        &self,
        key: &str,
        min: ScoreBound,
        max: ScoreBound,
    ) -> Result<u64> {
        let mut conn = self.connection.clone();
        self.timed(
            "ZREMRANGEBYSCORE",
            key,
            conn.zrembyscore(key, min.to_string(), max.to_string()),
        )
        .await
    }

    async fn cardinality(&self, key: &str) -> Result<u64> {
        let mut conn = self.connection.clone();
        self.timed("ZCARD", key, conn.zcard(key)).await
    }

    async fn hash_get(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(*field);
        }
        self.timed("HMGET", key, cmd.query_async(&mut conn)).await
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let cmd = redis::cmd("PING");
        let reply: String = self.timed("PING", "", cmd.query_async(&mut conn)).await?;

        if reply == "PONG" {
            Ok(())
        } else {
            Err(StorageError::Command(format!(
                "Unexpected response from Redis PING: {}",
                reply
            ))
            .into())
        }
    }

    async fn run_sliding_log(
        &self,
        key: &str,
        tx: &SlidingLogTransaction,
    ) -> Result<SlidingLogOutcome> {
        let mut conn = self.connection.clone();
        let mut invocation = self.sliding_log.key(key);
        invocation
            .arg(tx.now_ms)
            .arg(tx.window_start_ms)
            .arg(tx.limit)
            .arg(tx.window_sec)
            .arg(tx.member.as_str());

        let reply: Vec<i64> = self
            .timed("EVALSHA sliding_log", key, invocation.invoke_async(&mut conn))
            .await?;
        sliding_log_outcome(&reply)
    }

    async fn run_token_bucket(
        &self,
        key: &str,
        tx: &TokenBucketTransaction,
    ) -> Result<TokenBucketOutcome> {
        let mut conn = self.connection.clone();
        let mut invocation = self.token_bucket.key(key);
        invocation
            .arg(tx.now_ms)
            .arg(tx.capacity)
            .arg(tx.refill_rate)
            .arg(tx.tokens_per_request)
            .arg(tx.ttl_secs);

        let reply: Vec<i64> = self
            .timed("EVALSHA token_bucket", key, invocation.invoke_async(&mut conn))
            .await?;
        token_bucket_outcome(&reply)
    }
}
