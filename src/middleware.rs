// src/middleware.rs

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::json;
use tracing::error;

use crate::algorithms::Decision;
use crate::config::{RateLimitOptions, Strategy, TokenBucketOptions};
use crate::error::Result;
use crate::limiter::RateLimiter;
use crate::storage::StorageBackend;

/// Derives the identifier a request is counted against
pub type KeyGenerator = Arc<dyn Fn(&Request) -> String + Send + Sync>;

/// Requests matching this bypass rate limiting entirely
pub type SkipPredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

const DEFAULT_MESSAGE: &str = "Too many requests. Please try again later.";

/// Behaviour of the request-pipeline stage
#[derive(Clone)]
pub struct MiddlewareOptions {
    pub strategy: Strategy,
    pub limit: u64,
    pub window_sec: u64,
    pub prefix: Option<String>,
    /// Explicit bucket, otherwise derived from `limit` and `window_sec`
    pub token_bucket: Option<TokenBucketOptions>,
    /// Defaults to the client IP
    pub key_generator: Option<KeyGenerator>,
    /// Body message of the 429 response
    pub message: String,
    pub skip: Option<SkipPredicate>,
}

impl MiddlewareOptions {
    pub fn new(limit: u64, window_sec: u64) -> Self {
        Self {
            strategy: Strategy::default(),
            limit,
            window_sec,
            prefix: None,
            token_bucket: None,
            key_generator: None,
            message: DEFAULT_MESSAGE.to_string(),
            skip: None,
        }
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn token_bucket(mut self, options: TokenBucketOptions) -> Self {
        self.token_bucket = Some(options);
        self
    }

    pub fn key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    fn limits(&self) -> RateLimitOptions {
        RateLimitOptions {
            limit: self.limit,
            window_sec: self.window_sec,
            prefix: self.prefix.clone(),
        }
    }

    fn bucket(&self) -> TokenBucketOptions {
        self.token_bucket
            .clone()
            .unwrap_or_else(|| self.limits().as_token_bucket())
    }
}

// closures have no Debug
impl fmt::Debug for MiddlewareOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareOptions")
            .field("strategy", &self.strategy)
            .field("limit", &self.limit)
            .field("window_sec", &self.window_sec)
            .field("prefix", &self.prefix)
            .field("token_bucket", &self.token_bucket)
            .field("key_generator", &self.key_generator.is_some())
            .field("message", &self.message)
            .field("skip", &self.skip.is_some())
            .finish()
    }
}

/// State of the rate limiting stage: one limiter and its options
#[derive(Debug, Clone)]
pub struct RateLimitMiddleware<S>
where
    S: StorageBackend + Clone,
{
    limiter: RateLimiter<S>,
    options: Arc<MiddlewareOptions>,
}

impl<S> RateLimitMiddleware<S>
where
    S: StorageBackend + Clone + 'static,
{
    /// Validates the options up front so misconfiguration never reaches a request
    pub fn new(limiter: RateLimiter<S>, options: MiddlewareOptions) -> Result<Self> {
        match options.strategy {
            Strategy::TokenBucket => options.bucket().validate()?,
            Strategy::Fixed | Strategy::Sliding => options.limits().validate()?,
        }

        Ok(Self {
            limiter,
            options: Arc::new(options),
        })
    }

    /// Wrap every route of `router` with this stage
    pub fn apply<T>(self, router: Router<T>) -> Router<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        router.layer(middleware::from_fn_with_state(self, rate_limit::<S>))
    }

    async fn decide(&self, identifier: &str) -> Result<Decision> {
        let options = &self.options;
        match options.strategy {
            Strategy::Fixed => {
                self.limiter
                    .fixed_window_check(identifier, &options.limits())
                    .await
            }
            Strategy::Sliding => {
                self.limiter
                    .sliding_window_check(identifier, &options.limits())
                    .await
            }
            Strategy::TokenBucket => {
                self.limiter
                    .token_bucket_check(identifier, &options.bucket())
                    .await
            }
        }
    }
}

/// axum stage for `middleware::from_fn_with_state`
pub async fn rate_limit<S>(
    State(layer): State<RateLimitMiddleware<S>>,
    request: Request,
    next: Next,
) -> Response
where
    S: StorageBackend + Clone + 'static,
{
    let options = Arc::clone(&layer.options);

    if options.skip.as_ref().is_some_and(|skip| skip(&request)) {
        return next.run(request).await;
    }

    let identifier = match &options.key_generator {
        Some(generate) => generate(&request),
        None => client_ip(&request),
    };

    let decision = match layer.decide(&identifier).await {
        Ok(decision) => decision,
        Err(e) => {
            error!(identifier = %identifier, error = %e, "Rate limit check failed, forwarding request");
            return next.run(request).await;
        }
    };

    if !decision.allowed {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Too Many Requests",
                "message": options.message,
                "retryAfter": decision.retry_after,
            })),
        )
            .into_response();
        let headers = response.headers_mut();
        quota_headers(headers, &decision);
        headers.insert(header::RETRY_AFTER, HeaderValue::from(decision.retry_after));
        return response;
    }

    let mut response = next.run(request).await;
    quota_headers(response.headers_mut(), &decision);
    response
}

fn quota_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset_at_secs()));
}

fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
