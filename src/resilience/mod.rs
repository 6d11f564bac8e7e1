// src/resilience/mod.rs
//! Connection resilience for the shared store.
//!
//! 1. **Retry with backoff** - bounded reconnection attempts when the store
//!    client is constructed
//! 2. **Health checks** - periodic pings that log when the store becomes
//!    unreachable (and limits silently fail open) or recovers

mod health_checker;
mod retry;

#[cfg(test)]
mod tests;

pub use health_checker::{HealthCheckConfig, HealthChecker};
pub use retry::{retry, Backoff, Growth, RetryConfig};
