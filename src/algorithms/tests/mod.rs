// src/algorithms/tests/mod.rs



/// Tests for Token Bucket algorithm
mod token_bucket_tests;

/// Behaviour shared by all engines
#[cfg(test)]
mod common_tests {
    use crate::{
        algorithms::{
            fail_open, Decision, FixedWindow, RateLimitAlgorithm, SlidingWindow, TokenBucket,
        },
        config::{RateLimitOptions, Strategy, TokenBucketOptions},
        error::{RateLimiterError, StorageError},
        test_utils::{FailingStorage, ManualClock, TEST_EPOCH_MS},
    };

    /// An unreachable store never blocks a request
    #[tokio::test]
    async fn test_every_engine_fails_open() {
        let clock = ManualClock::new();
        let storage = FailingStorage::new();
        let options = RateLimitOptions::new(3, 60);

        let fixed = FixedWindow::with_clock(storage.clone(), clock.clone());
        let sliding = SlidingWindow::with_clock(storage.clone(), clock.clone());

        for (name, decision) in [
            ("fixed", fixed.check("ip:1.2.3.4", &options).await.unwrap()),
            ("sliding", sliding.check("ip:1.2.3.4", &options).await.unwrap()),
        ] {
            assert_eq!(
                decision,
                Decision {
                    allowed: true,
                    remaining: 3,
                    limit: 3,
                    reset_at: TEST_EPOCH_MS + 60_000,
                    retry_after: 0,
                },
                "{}: store failure should produce a full quota",
                name
            );
        }

        let bucket = TokenBucket::with_clock(storage.clone(), clock.clone());
        let decision = bucket
            .check("u:1", &TokenBucketOptions::new(5, 1.0))
            .await
            .unwrap();
        assert_eq!(
            decision,
            Decision {
                allowed: true,
                remaining: 5,
                limit: 5,
                reset_at: TEST_EPOCH_MS,
                retry_after: 0,
            }
        );

        assert!(storage.calls() >= 3, "Every engine should have tried the store");
    }

    /// Invalid options are reported before the store is touched
    #[tokio::test]
    async fn test_invalid_options_fail_fast() {
        let storage = FailingStorage::new();
        let fixed = FixedWindow::new(storage.clone());
        let sliding = SlidingWindow::new(storage.clone());
        let bucket = TokenBucket::new(storage.clone());

        let zero_limit = RateLimitOptions::new(0, 60);
        let zero_window = RateLimitOptions::new(3, 0);

        assert!(matches!(
            fixed.check("a", &zero_limit).await,
            Err(RateLimiterError::Config(_))
        ));
        assert!(matches!(
            sliding.check("a", &zero_window).await,
            Err(RateLimiterError::Config(_))
        ));
        assert!(matches!(
            bucket.check("a", &TokenBucketOptions::new(5, 0.0)).await,
            Err(RateLimiterError::Config(_))
        ));
        assert!(matches!(
            bucket.check("a", &TokenBucketOptions::new(0, 1.0)).await,
            Err(RateLimiterError::Config(_))
        ));

        assert_eq!(storage.calls(), 0, "Store should not be consulted");
    }

    /// Windows and refill horizons too long to express in milliseconds are rejected
    #[tokio::test]
    async fn test_oversized_horizons_fail_fast() {
        let storage = FailingStorage::new();
        let fixed = FixedWindow::new(storage.clone());
        let sliding = SlidingWindow::new(storage.clone());
        let bucket = TokenBucket::new(storage.clone());

        let huge_window = RateLimitOptions::new(3, 1 << 62);
        assert!(matches!(
            fixed.check("u", &huge_window).await,
            Err(RateLimiterError::Config(_))
        ));
        assert!(matches!(
            sliding.check("u", &RateLimitOptions::new(3, u64::MAX)).await,
            Err(RateLimiterError::Config(_))
        ));
        assert!(matches!(
            bucket.check("u", &TokenBucketOptions::new(5, 1e-20)).await,
            Err(RateLimiterError::Config(_))
        ));

        assert_eq!(storage.calls(), 0, "Store should not be consulted");
    }

    #[test]
    fn test_fail_open_only_swallows_storage_errors() {
        let fallback = fail_open::<u64>(
            Err(StorageError::Script("NOSCRIPT".to_string()).into()),
            "k",
            || 7,
        );
        assert_eq!(fallback.unwrap(), 7);

        let passed = fail_open::<u64>(Err(RateLimiterError::Config("bad".to_string())), "k", || 7);
        assert!(matches!(passed, Err(RateLimiterError::Config(_))));

        assert_eq!(fail_open::<u64>(Ok(1), "k", || 7).unwrap(), 1);
    }

    #[test]
    fn test_engines_report_their_strategy() {
        let storage = FailingStorage::new();
        let clock = ManualClock::new();
        assert_eq!(
            FixedWindow::with_clock(storage.clone(), clock.clone()).strategy(),
            Strategy::Fixed
        );
        assert_eq!(
            SlidingWindow::with_clock(storage.clone(), clock.clone()).strategy(),
            Strategy::Sliding
        );
        assert_eq!(
            TokenBucket::with_clock(storage, clock).strategy(),
            Strategy::TokenBucket
        );
    }

    #[test]
    fn test_reset_at_secs_rounds_up() {
        let mut decision = Decision::permissive(1, 1_700_000_000_001);
        assert_eq!(decision.reset_at_secs(), 1_700_000_001);
        decision.reset_at = 1_700_000_000_000;
        assert_eq!(decision.reset_at_secs(), 1_700_000_000);
    }
}
