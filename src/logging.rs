use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system with sensible defaults.
///
/// Log level can be set using the RUST_LOG environment variable.
/// Example: RUST_LOG=debug,quota_limiter=trace
/// Set LOG_FORMAT=json for one JSON object per line.
pub fn init() {
    INIT.call_once(|| {
        // Default to 'info' level if not specified
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format == "json");

        let registry = tracing_subscriber::registry().with(filter);
        if json {
            registry
                .with(fmt::layer().json().with_current_span(false))
                .init();
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_target(true) // Include module path in logs
                        .with_thread_ids(true) // Useful for debugging concurrency issues
                        .with_line_number(true),
                )
                .init();
        }

        tracing::info!("Logging initialized");
    });
}

/// Macro for logging rate limiting decisions
#[macro_export]
macro_rules! rate_limit_event {
    ($strategy:expr, $key:expr, $decision:expr) => {
        tracing::debug!(
            strategy = %$strategy,
            key = $key,
            allowed = $decision.allowed,
            remaining = $decision.remaining,
            limit = $decision.limit,
            retry_after = $decision.retry_after,
            "Rate limit check"
        )
    };
}

/// Macro for logging storage operations with timing
#[macro_export]
macro_rules! storage_op {
    ($operation:expr, $key:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::trace!(
            operation = $operation,
            key = $key,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Storage operation"
        )
    };
}
