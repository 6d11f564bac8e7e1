// src/bin/quota_limiter_bench.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use quota_limiter::config::{InMemoryConfig, RedisConfig};
use quota_limiter::storage::{MemoryStorage, RedisStorage, StorageBackend};
use quota_limiter::{RateLimitOptions, RateLimiter, Strategy};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "quota_limiter_bench",
    about = "A benchmarking tool for the rate limiting engines"
)]
struct Opt {
    /// Strategy to benchmark: fixed, sliding, token-bucket or all
    #[structopt(short, long, default_value = "all")]
    algorithm: String,

    /// Storage backend to use
    #[structopt(short, long, possible_values = &["memory", "redis"], default_value = "memory")]
    storage: String,

    /// Redis URL (when using Redis storage)
    #[structopt(long, default_value = "redis://localhost:6379")]
    redis_url: String,

    /// Maximum number of requests allowed per user
    #[structopt(short, long, default_value = "1000")]
    max_requests: u64,

    /// Window duration in seconds
    #[structopt(short, long, default_value = "60")]
    window_seconds: u64,

    /// Number of concurrent users to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_users: usize,

    /// Number of requests per user
    #[structopt(short = "r", long, default_value = "100")]
    requests_per_user: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,
}

/// Outcome of one benchmark run
struct Summary {
    name: String,
    allowed: u64,
    denied: u64,
    duration: Duration,
    /// Users admitted beyond their limit in some iteration
    violations: usize,
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
            "quota_limiter_bench={},quota_limiter={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // Ctrl-C finishes the current iteration and prints what was measured so far
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_flag.store(true, Ordering::SeqCst);
    })?;

    let strategies = if opt.algorithm == "all" {
        vec![Strategy::Fixed, Strategy::Sliding, Strategy::TokenBucket]
    } else {
        vec![opt.algorithm.parse()?]
    };

    let mut summaries = Vec::with_capacity(strategies.len());
    match opt.storage.as_str() {
        "redis" => {
            let config = RedisConfig {
                url: opt.redis_url.clone(),
                max_retries: 2,
                retry_delay: Duration::from_millis(500),
                ..RedisConfig::default()
            };
            let storage = RedisStorage::new(config).await.inspect_err(|e| {
                error!("Failed to connect to Redis: {}", e);
            })?;
            let limiter = RateLimiter::new(storage);
            for strategy in strategies {
                summaries.push(run_benchmark(&limiter, strategy, "Redis", &opt, &stop).await?);
            }
        }
        _ => {
            let storage = MemoryStorage::new(InMemoryConfig {
                max_entries: 100_000, // Large capacity for benchmarking
                ..InMemoryConfig::default()
            });
            let limiter = RateLimiter::new(storage);
            for strategy in strategies {
                summaries.push(run_benchmark(&limiter, strategy, "Memory", &opt, &stop).await?);
            }
        }
    }

    print_summaries(&summaries);

    if summaries.iter().any(|summary| summary.violations > 0) {
        return Err("some users were admitted beyond their limit".into());
    }
    Ok(())
}

async fn run_benchmark<S>(
    limiter: &RateLimiter<S>,
    strategy: Strategy,
    backend: &str,
    opt: &Opt,
    stop: &AtomicBool,
) -> Result<Summary, Box<dyn std::error::Error>>
where
    S: StorageBackend + Clone + 'static,
{
    let name = format!("{} ({})", strategy, backend);
    let options = RateLimitOptions::new(opt.max_requests, opt.window_seconds)
        .with_prefix(format!("bench:{}", strategy));
    options.validate()?;

    info!(
        "Benchmarking {}: max_requests={}, window={}s",
        name, opt.max_requests, opt.window_seconds
    );

    let total = (opt.iterations * opt.num_users * opt.requests_per_user) as u64;
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::with_template("{msg:>24} [{bar:40}] {pos}/{len} ({per_sec})")?
            .progress_chars("=> "),
    );
    progress.set_message(name.clone());

    let mut summary = Summary {
        name,
        allowed: 0,
        denied: 0,
        duration: Duration::ZERO,
        violations: 0,
    };
    let options = Arc::new(options);

    for iteration in 0..opt.iterations {
        if stop.load(Ordering::SeqCst) {
            warn!("Interrupted, skipping remaining iterations");
            break;
        }

        // every iteration starts from a full quota
        for user_id in 0..opt.num_users {
            limiter
                .reset(&format!("user_{}", user_id), options.prefix.as_deref())
                .await;
        }

        let started = Instant::now();
        let barrier = Arc::new(Barrier::new(opt.num_users));
        let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));

        let handles = (0..opt.num_users).map(|user_id| {
            let limiter = limiter.clone();
            let options = Arc::clone(&options);
            let barrier = Arc::clone(&barrier);
            let semaphore = Arc::clone(&semaphore);
            let progress = progress.clone();
            let key = format!("user_{}", user_id);
            let requests = opt.requests_per_user;

            tokio::spawn(async move {
                barrier.wait().await;

                let mut allowed = 0u64;
                let mut denied = 0u64;
                for _ in 0..requests {
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };
                    match limiter.check(strategy, &key, &options).await {
                        Ok(decision) if decision.allowed => allowed += 1,
                        Ok(_) => denied += 1,
                        Err(e) => warn!("Error in rate limiting: {}", e),
                    }
                    progress.inc(1);
                }
                (allowed, denied)
            })
        });

        let results = futures::future::join_all(handles).await;
        let elapsed = started.elapsed();

        let ceiling = admission_ceiling(strategy, &options, elapsed);
        let mut iteration_allowed = 0;
        let mut iteration_denied = 0;
        for (allowed, denied) in results.into_iter().flatten() {
            if allowed > ceiling {
                error!(allowed, ceiling, "User admitted beyond the limit");
                summary.violations += 1;
            }
            iteration_allowed += allowed;
            iteration_denied += denied;
        }

        summary.allowed += iteration_allowed;
        summary.denied += iteration_denied;
        summary.duration += elapsed;

        info!(
            "Iteration {}: {:?}, {} allowed, {} denied",
            iteration + 1,
            elapsed,
            iteration_allowed,
            iteration_denied
        );
    }

    progress.finish();
    Ok(summary)
}

/// Most requests one user may get through within `elapsed`
fn admission_ceiling(strategy: Strategy, options: &RateLimitOptions, elapsed: Duration) -> u64 {
    match strategy {
        Strategy::Fixed | Strategy::Sliding if elapsed.as_secs() < options.window_sec => {
            options.limit
        }
        // windows rolled over or tokens refilled during the run
        _ => {
            let windows = elapsed.as_secs_f64() / options.window_sec as f64;
            options.limit + (options.limit as f64 * windows).ceil() as u64
        }
    }
}

fn print_summaries(summaries: &[Summary]) {
    let mut table = Table::new();
    table.add_row(row![
        "Benchmark",
        "Requests",
        "Allowed",
        "Denied",
        "Duration",
        "Throughput (req/s)",
        "Over limit"
    ]);

    for summary in summaries {
        let requests = summary.allowed + summary.denied;
        let throughput = if summary.duration.is_zero() {
            0.0
        } else {
            requests as f64 / summary.duration.as_secs_f64()
        };
        table.add_row(row![
            summary.name,
            requests,
            summary.allowed,
            summary.denied,
            format!("{:?}", summary.duration),
            format!("{:.2}", throughput),
            summary.violations
        ]);
    }

    table.printstd();
}
