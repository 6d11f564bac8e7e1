// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::clock::secs_to_millis;
use crate::error::{RateLimiterError, Result};

/// Which engine decides a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Fixed,
    #[default]
    Sliding,
    TokenBucket,
}

impl Strategy {
    /// Key namespace used when the options carry no explicit prefix
    pub fn default_prefix(self) -> &'static str {
        match self {
            Strategy::Fixed => "rl:fixed",
            Strategy::Sliding => "rl:sliding",
            Strategy::TokenBucket => "rl:bucket",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Fixed => "fixed",
            Strategy::Sliding => "sliding",
            Strategy::TokenBucket => "token-bucket",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RateLimiterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" | "fixed-window" | "fixed_window" => Ok(Strategy::Fixed),
            "sliding" | "sliding-window" | "sliding_window" => Ok(Strategy::Sliding),
            "token-bucket" | "token_bucket" | "bucket" => Ok(Strategy::TokenBucket),
            other => Err(RateLimiterError::Config(format!(
                "unknown rate limit strategy: {}",
                other
            ))),
        }
    }
}

/// Longest window, or bucket refill horizon, accepted by `validate` (one year)
pub const MAX_WINDOW_SEC: u64 = 365 * 24 * 60 * 60;

/// Limit and window for the counting strategies (fixed and sliding window)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitOptions {
    /// Maximum number of requests allowed in the window
    pub limit: u64,

    /// Window length in seconds
    pub window_sec: u64,

    /// Key namespace, defaults to `rl:<strategy>`
    #[serde(default)]
    pub prefix: Option<String>,
}

impl RateLimitOptions {
    pub fn new(limit: u64, window_sec: u64) -> Self {
        Self {
            limit,
            window_sec,
            prefix: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(RateLimiterError::Config(
                "limit must be greater than zero".to_string(),
            ));
        }
        if self.window_sec == 0 {
            return Err(RateLimiterError::Config(
                "window_sec must be greater than zero".to_string(),
            ));
        }
        if self.window_sec > MAX_WINDOW_SEC {
            return Err(RateLimiterError::Config(format!(
                "window_sec must be at most {}, got {}",
                MAX_WINDOW_SEC, self.window_sec
            )));
        }
        Ok(())
    }

    /// The prefix in effect for the given strategy
    pub fn prefix_for(&self, strategy: Strategy) -> &str {
        self.prefix
            .as_deref()
            .unwrap_or_else(|| strategy.default_prefix())
    }

    pub fn window_millis(&self) -> i64 {
        secs_to_millis(self.window_sec)
    }

    /// Token bucket equivalent: burst of `limit`, refilled over one window
    pub fn as_token_bucket(&self) -> TokenBucketOptions {
        TokenBucketOptions {
            capacity: self.limit,
            refill_rate: self.limit as f64 / self.window_sec as f64,
            tokens_per_request: default_tokens_per_request(),
            prefix: self.prefix.clone(),
        }
    }
}

/// Configuration for token bucket algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketOptions {
    /// Burst ceiling
    pub capacity: u64,

    /// Rate at which tokens are refilled (tokens per second)
    pub refill_rate: f64,

    /// Tokens consumed by one request
    #[serde(default = "default_tokens_per_request")]
    pub tokens_per_request: f64,

    #[serde(default)]
    pub prefix: Option<String>,
}

fn default_tokens_per_request() -> f64 {
    1.0
}

impl TokenBucketOptions {
    pub fn new(capacity: u64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens_per_request: default_tokens_per_request(),
            prefix: None,
        }
    }

    pub fn with_tokens_per_request(mut self, tokens: f64) -> Self {
        self.tokens_per_request = tokens;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(RateLimiterError::Config(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if !self.refill_rate.is_finite() || self.refill_rate <= 0.0 {
            return Err(RateLimiterError::Config(format!(
                "refill_rate must be a positive number, got {}",
                self.refill_rate
            )));
        }
        if !self.tokens_per_request.is_finite() || self.tokens_per_request <= 0.0 {
            return Err(RateLimiterError::Config(format!(
                "tokens_per_request must be a positive number, got {}",
                self.tokens_per_request
            )));
        }
        // such a request could never be admitted
        if self.tokens_per_request > self.capacity as f64 {
            return Err(RateLimiterError::Config(format!(
                "tokens_per_request ({}) exceeds capacity ({})",
                self.tokens_per_request, self.capacity
            )));
        }
        // rounded so a bucket derived from a one-year window still passes
        let horizon = self.capacity as f64 / self.refill_rate;
        if horizon.round() > MAX_WINDOW_SEC as f64 {
            return Err(RateLimiterError::Config(format!(
                "refill_rate {} is too slow: refilling {} tokens takes longer than {} seconds",
                self.refill_rate, self.capacity, MAX_WINDOW_SEC
            )));
        }
        Ok(())
    }

    pub fn prefix(&self) -> &str {
        self.prefix
            .as_deref()
            .unwrap_or_else(|| Strategy::TokenBucket.default_prefix())
    }

    /// Seconds after which an untouched bucket would be full again
    pub fn idle_ttl_secs(&self) -> u64 {
        ((self.capacity as f64 / self.refill_rate).ceil() as u64).saturating_add(1)
    }
}

/// Configuration for Redis storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Connection attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Base delay between connection attempts, multiplied by the attempt number
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Connection timeout
    #[serde(default = "default_conn_timeout", with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Upper bound for a single command or script round trip
    #[serde(default = "default_command_timeout", with = "duration_serde")]
    pub command_timeout: Duration,
}

fn default_redis_url() -> String {
    "redis://redis:6379".to_string()
}

fn default_max_retries() -> usize {
    5
}

fn default_retry_delay() -> Duration {
    Duration::from_millis(2000)
}

fn default_conn_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(1)
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            connection_timeout: default_conn_timeout(),
            command_timeout: default_command_timeout(),
        }
    }
}

/// Configuration for in-memory storage backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

/// Settings of the demo service binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub redis: RedisConfig,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(default)]
    pub strategy: Strategy,

    pub limits: RateLimitOptions,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl ServiceConfig {
    /// Build the configuration from the process environment (and `.env`, if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let redis = RedisConfig {
            url: env::var("REDIS_URL").unwrap_or_else(|_| default_redis_url()),
            max_retries: env_parse("REDIS_MAX_RETRIES", default_max_retries())?,
            retry_delay: env_millis("REDIS_RETRY_DELAY_MS", default_retry_delay())?,
            connection_timeout: env_millis("REDIS_CONNECT_TIMEOUT_MS", default_conn_timeout())?,
            command_timeout: env_millis("REDIS_COMMAND_TIMEOUT_MS", default_command_timeout())?,
        };

        let strategy = match env::var("RATE_LIMIT_STRATEGY") {
            Ok(raw) => raw.parse()?,
            Err(_) => Strategy::default(),
        };

        let limits = RateLimitOptions {
            limit: env_parse("RATE_LIMIT_LIMIT", 100)?,
            window_sec: env_parse("RATE_LIMIT_WINDOW_SEC", 60)?,
            prefix: env::var("RATE_LIMIT_PREFIX").ok(),
        };
        limits.validate()?;

        Ok(Self {
            redis,
            listen_addr: env::var("LISTEN_ADDR").unwrap_or_else(|_| default_listen_addr()),
            strategy,
            limits,
        })
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| RateLimiterError::Config(format!("invalid {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

fn env_millis(name: &str, default: Duration) -> Result<Duration> {
    env_parse(name, default.as_millis() as u64).map(Duration::from_millis)
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
