use std::future::Future;
use std::time::Duration;
use tokio::time;
use tracing::warn;

use crate::error::Result;

/// How the delay grows between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Growth {
    /// `initial_backoff * attempt`
    Linear,
    /// `initial_backoff * multiplier^(attempt - 1)`
    Exponential { multiplier: f64 },
}

/// Configuration for retry strategy
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: usize,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    pub growth: Growth,
    /// Whether to add jitter to backoff
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            growth: Growth::Exponential { multiplier: 2.0 },
            use_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Store connection policy: `delay * attempt`, no jitter, bounded attempts
    pub fn linear(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_backoff: delay,
            max_backoff: delay.saturating_mul(max_attempts.max(1) as u32),
            growth: Growth::Linear,
            use_jitter: false,
        }
    }
}

/// Backoff schedule for retries
#[derive(Debug)]
pub struct Backoff {
    /// Current attempt number
    current_attempt: usize,
    config: RetryConfig,
}

impl Backoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            current_attempt: 0,
            config,
        }
    }

    /// Get the next backoff duration, or None if max attempts reached
    pub fn next_backoff(&mut self) -> Option<Duration> {
        self.current_attempt += 1;

        if self.current_attempt > self.config.max_attempts {
            return None;
        }

        let base_ms = self.config.initial_backoff.as_millis() as f64;
        let backoff_ms = match self.config.growth {
            Growth::Linear => base_ms * self.current_attempt as f64,
            Growth::Exponential { multiplier } => {
                base_ms * multiplier.powf(self.current_attempt as f64 - 1.0)
            }
        };
        let max_ms = self.config.max_backoff.as_millis() as f64;
        let capped_ms = backoff_ms.min(max_ms);

        let jittered_ms = if self.config.use_jitter {
            // random value between 50% and 100% of the calculated backoff
            let jitter = rand::random::<f64>() * 0.5 + 0.5;
            (capped_ms * jitter) as u64
        } else {
            capped_ms as u64
        };

        Some(Duration::from_millis(jittered_ms))
    }

    pub fn attempts(&self) -> usize {
        self.current_attempt
    }

    /// Reset the backoff to start from the beginning
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Runs `operation` until it succeeds or the schedule is exhausted.
///
/// The last error is returned when every attempt failed.
pub async fn retry<T, F, Fut>(config: &RetryConfig, what: &str, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = Backoff::new(config.clone());
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "{} failed, retrying",
                        what
                    );
                    time::sleep(delay).await;
                }
                None => return Err(err),
            },
        }
    }
}
