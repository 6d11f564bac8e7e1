use std::net::SocketAddr;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{info, warn};

use quota_limiter::config::ServiceConfig;
use quota_limiter::resilience::{HealthCheckConfig, HealthChecker};
use quota_limiter::{init_logging, MiddlewareOptions, RateLimitMiddleware, RateLimiter, RedisStorage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServiceConfig::from_env()?;
    init_logging();
    info!(
        strategy = %config.strategy,
        limit = config.limits.limit,
        window_sec = config.limits.window_sec,
        "Quota limiter starting up"
    );

    let storage = RedisStorage::new(config.redis.clone()).await?;

    let health = HealthChecker::new(storage.clone(), HealthCheckConfig::default());
    if !health.check_once().await {
        warn!("Redis did not answer the first ping, limits will fail open until it does");
    }
    let _health_task = health.start();

    let mut options = MiddlewareOptions::new(config.limits.limit, config.limits.window_sec)
        .strategy(config.strategy)
        .skip(|request| request.uri().path() == "/health");
    if let Some(prefix) = &config.limits.prefix {
        options = options.prefix(prefix.clone());
    }

    let routes = Router::new()
        .route("/", get(|| async { Json(json!({ "message": "Hello, world!" })) }))
        .route("/health", get(|| async { "ok" }));
    let app = RateLimitMiddleware::new(RateLimiter::new(storage), options)?.apply(routes);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    health.stop();
    Ok(())
}
