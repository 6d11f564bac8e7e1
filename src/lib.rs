// library entry
pub mod algorithms;
pub mod clock;
pub mod config;
pub mod error;
pub mod limiter;
pub mod logging;
pub mod middleware;
pub mod resilience;
pub mod status;
pub mod storage;

#[cfg(test)]
mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use algorithms::{Decision, RateLimitAlgorithm};
pub use config::{RateLimitOptions, Strategy, TokenBucketOptions};
pub use error::{RateLimiterError, Result};
pub use limiter::RateLimiter;
pub use logging::init as init_logging;
pub use middleware::{MiddlewareOptions, RateLimitMiddleware};
pub use status::QuotaStatus;
pub use storage::{MemoryStorage, RedisStorage, StorageBackend};
