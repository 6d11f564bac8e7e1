use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::storage::StorageBackend;

/// Configuration for health checks
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// How often to ping the store
    pub check_interval: Duration,
    /// Timeout for health check operations
    pub check_timeout: Duration,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            check_timeout: Duration::from_secs(1),
        }
    }
}

/// Periodically pings the shared store and logs availability transitions.
///
/// The checker never changes how decisions are made; engines fail open on
/// their own. It exists so operators see when limits stop being enforced.
#[derive(Debug)]
pub struct HealthChecker<S: StorageBackend> {
    /// Flag indicating if the store answered the last ping
    is_healthy: Arc<AtomicBool>,
    storage: S,
    config: HealthCheckConfig,
    shutdown: Arc<Notify>,
}

impl<S> HealthChecker<S>
where
    S: StorageBackend + Clone + 'static,
{
    pub fn new(storage: S, config: HealthCheckConfig) -> Self {
        Self {
            is_healthy: Arc::new(AtomicBool::new(true)), // Assume healthy initially
            storage,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Runs a single probe and updates the health flag
    pub async fn check_once(&self) -> bool {
        probe(
            &self.storage,
            &self.is_healthy,
            self.config.check_timeout,
        )
        .await
    }

    /// Start the health checker background task
    pub fn start(&self) -> task::JoinHandle<()> {
        let storage = self.storage.clone();
        let is_healthy = Arc::clone(&self.is_healthy);
        let interval = self.config.check_interval;
        let timeout = self.config.check_timeout;
        let shutdown = Arc::clone(&self.shutdown);

        task::spawn(async move {
            let mut interval_timer = time::interval(interval);

            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = interval_timer.tick() => {
                        probe(&storage, &is_healthy, timeout).await;
                    }
                }
            }

            debug!("Health checker task stopped");
        })
    }

    /// Stop the health checker
    pub fn stop(&self) {
        self.shutdown.notify_one();
    }

    /// Whether the store answered the last ping
    pub fn is_healthy(&self) -> bool {
        self.is_healthy.load(Ordering::SeqCst)
    }
}

async fn probe<S: StorageBackend>(storage: &S, is_healthy: &AtomicBool, timeout: Duration) -> bool {
    let healthy = match time::timeout(timeout, storage.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            error!("Store health check failed: {}", e);
            false
        }
        Err(_) => {
            error!("Store health check timed out after {:?}", timeout);
            false
        }
    };

    let previous = is_healthy.swap(healthy, Ordering::SeqCst);
    if previous != healthy {
        if healthy {
            info!("Shared store is reachable again, limits are enforced");
        } else {
            warn!("Shared store is unreachable, rate limits fail open");
        }
    }
    healthy
}
