// src/bin/quota_limiter_cli.rs

use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use prettytable::{row, Table};
use structopt::StructOpt;
use tokio::time;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use quota_limiter::config::{InMemoryConfig, RedisConfig};
use quota_limiter::storage::{MemoryStorage, RedisStorage, StorageBackend};
use quota_limiter::{Decision, RateLimitOptions, RateLimiter, Strategy, TokenBucketOptions};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "quota_limiter_cli",
    about = "Check, inspect and reset quotas in the shared rate limit store"
)]
struct Opt {
    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
struct Quota {
    /// fixed, sliding or token-bucket
    #[structopt(long, default_value = "sliding")]
    strategy: Strategy,

    /// Identifier to rate limit
    #[structopt(short, long, default_value = "default_user")]
    key: String,

    /// Maximum number of requests allowed in the window
    #[structopt(short, long, default_value = "10")]
    limit: u64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Key prefix, defaults to the strategy's own
    #[structopt(long)]
    prefix: Option<String>,
}

impl Quota {
    fn options(&self) -> RateLimitOptions {
        RateLimitOptions {
            limit: self.limit,
            window_sec: self.window_seconds,
            prefix: self.prefix.clone(),
        }
    }
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Send requests through a rate limit and print each decision
    Check {
        #[structopt(flatten)]
        quota: Quota,

        /// Refill rate for token bucket (tokens per second), defaults to limit / window
        #[structopt(long)]
        refill_rate: Option<f64>,

        /// Tokens consumed per request (token bucket only)
        #[structopt(long, default_value = "1")]
        tokens_per_request: f64,

        /// Number of requests to send
        #[structopt(short = "n", long, default_value = "1")]
        num_requests: usize,

        /// Time between requests in milliseconds
        #[structopt(short = "t", long, default_value = "0")]
        request_interval_ms: u64,

        /// Print decisions as JSON lines instead of a table
        #[structopt(long)]
        json: bool,
    },

    /// Show the quota of an identifier without consuming it
    Status {
        #[structopt(flatten)]
        quota: Quota,
    },

    /// Delete the quota record of an identifier
    Reset {
        /// Identifier to reset
        #[structopt(short, long)]
        key: String,

        /// Key prefix (rl:fixed, rl:sliding, rl:bucket, or a custom one)
        #[structopt(long)]
        prefix: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "quota_limiter_cli={},quota_limiter={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match opt.storage.as_str() {
        "redis" => {
            let config = RedisConfig {
                url: opt.redis_url.clone(),
                max_retries: 1,
                ..RedisConfig::default()
            };
            let storage = RedisStorage::new(config).await?;
            run(RateLimiter::new(storage), opt.command).await
        }
        _ => {
            let storage = MemoryStorage::new(InMemoryConfig::default());
            run(RateLimiter::new(storage), opt.command).await
        }
    }
}

async fn run<S>(limiter: RateLimiter<S>, command: Command) -> Result<(), Box<dyn std::error::Error>>
where
    S: StorageBackend + Clone,
{
    match command {
        Command::Check {
            quota,
            refill_rate,
            tokens_per_request,
            num_requests,
            request_interval_ms,
            json,
        } => {
            let options = quota.options();
            options.validate()?;
            let bucket = TokenBucketOptions {
                refill_rate: refill_rate.unwrap_or(quota.limit as f64 / quota.window_seconds as f64),
                tokens_per_request,
                ..options.as_token_bucket()
            };

            info!(
                strategy = %quota.strategy,
                key = %quota.key,
                requests = num_requests,
                "Sending requests"
            );

            let interval = Duration::from_millis(request_interval_ms);
            let started = Instant::now();
            let mut decisions = Vec::with_capacity(num_requests);

            for i in 0..num_requests {
                let decision = match quota.strategy {
                    Strategy::TokenBucket => limiter.token_bucket_check(&quota.key, &bucket).await?,
                    strategy => limiter.check(strategy, &quota.key, &options).await?,
                };
                if !decision.allowed {
                    warn!(request = i + 1, retry_after = decision.retry_after, "Request denied");
                }
                if json {
                    println!("{}", serde_json::to_string(&decision)?);
                }
                decisions.push(decision);

                if i + 1 < num_requests && !interval.is_zero() {
                    time::sleep(interval).await;
                }
            }

            if !json {
                print_decisions(&decisions);
                let allowed = decisions.iter().filter(|d| d.allowed).count();
                println!(
                    "Allowed: {}  Denied: {}  Time elapsed: {:?}",
                    allowed,
                    decisions.len() - allowed,
                    started.elapsed()
                );
            }
        }
        Command::Status { quota } => {
            let status = limiter
                .status(&quota.key, &quota.options(), quota.strategy)
                .await?;

            let mut table = Table::new();
            table.add_row(row!["Key", "Strategy", "Count", "Remaining", "Resets at"]);
            table.add_row(row![
                quota.key,
                quota.strategy,
                status.count,
                status.remaining,
                format_millis(status.reset_at)
            ]);
            table.printstd();
        }
        Command::Reset { key, prefix } => {
            limiter.reset(&key, prefix.as_deref()).await;
            println!(
                "Reset {}:{}",
                prefix.as_deref().unwrap_or(Strategy::Sliding.default_prefix()),
                key
            );
        }
    }

    Ok(())
}

fn print_decisions(decisions: &[Decision]) {
    let mut table = Table::new();
    table.add_row(row!["#", "Allowed", "Remaining", "Limit", "Resets at", "Retry after (s)"]);
    for (i, decision) in decisions.iter().enumerate() {
        table.add_row(row![
            i + 1,
            if decision.allowed { "yes" } else { "NO" },
            decision.remaining,
            decision.limit,
            format_millis(decision.reset_at),
            decision.retry_after
        ]);
    }
    table.printstd();
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|at| at.format("%H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}
