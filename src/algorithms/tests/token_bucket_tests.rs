#[cfg(test)]
mod tests {
    use futures::future::join_all;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    use crate::{
        algorithms::{RateLimitAlgorithm, TokenBucket},
        config::TokenBucketOptions,
        storage::{StorageBackend, BUCKET_LAST_REFILL_FIELD, BUCKET_TOKENS_FIELD},
        test_utils::{memory_storage, ManualClock, TEST_EPOCH_MS},
    };

    /// `u:1` with capacity 5 refilled at one token per second
    #[tokio::test]
    async fn test_token_consumption_and_depletion() {
        let clock = ManualClock::new();
        let algorithm = TokenBucket::with_clock(memory_storage(clock.clone()), clock.clone());
        let options = TokenBucketOptions::new(5, 1.0);

        for i in 0..5u64 {
            let result = algorithm.check("u:1", &options).await.unwrap();
            assert!(result.allowed, "Request {} should be allowed", i);
            assert_eq!(result.remaining, 4 - i, "Tokens left after request {}", i);
            assert_eq!(result.reset_at, TEST_EPOCH_MS);
        }

        let result = algorithm.check("u:1", &options).await.unwrap();
        assert!(!result.allowed, "Request when tokens depleted should be denied");
        assert_eq!(result.remaining, 0);
        assert_eq!(result.limit, 5);
        assert_eq!(result.retry_after, 1);
        assert_eq!(result.reset_at, TEST_EPOCH_MS + 1000);

        clock.advance(Duration::from_secs(1));
        let result = algorithm.check("u:1", &options).await.unwrap();
        assert!(result.allowed, "One token should have been refilled");
        assert_eq!(result.remaining, 0);

        assert!(!algorithm.check("u:1", &options).await.unwrap().allowed);
    }

    /// Refill never exceeds capacity
    #[tokio::test]
    async fn test_refill_is_capped() {
        let clock = ManualClock::new();
        let algorithm = TokenBucket::with_clock(memory_storage(clock.clone()), clock.clone());
        let options = TokenBucketOptions::new(3, 10.0);

        for _ in 0..3 {
            assert!(algorithm.check("cap", &options).await.unwrap().allowed);
        }

        clock.advance(Duration::from_secs(3600));
        let mut admitted = 0;
        for _ in 0..10 {
            if algorithm.check("cap", &options).await.unwrap().allowed {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 3, "A long idle period refills only up to capacity");
    }

    /// Fractional refill accumulates across requests
    #[tokio::test]
    async fn test_fractional_refill() {
        let clock = ManualClock::new();
        let algorithm = TokenBucket::with_clock(memory_storage(clock.clone()), clock.clone());
        let options = TokenBucketOptions::new(1, 2.0);

        assert!(algorithm.check("frac", &options).await.unwrap().allowed);

        clock.advance(Duration::from_millis(250));
        let result = algorithm.check("frac", &options).await.unwrap();
        assert!(!result.allowed, "Half a token is not enough");
        assert_eq!(result.retry_after, 1);

        clock.advance(Duration::from_millis(250));
        assert!(
            algorithm.check("frac", &options).await.unwrap().allowed,
            "The two halves should add up to a token"
        );
    }

    /// Heavier requests consume several tokens
    #[tokio::test]
    async fn test_tokens_per_request() {
        let clock = ManualClock::new();
        let algorithm = TokenBucket::with_clock(memory_storage(clock.clone()), clock.clone());
        let options = TokenBucketOptions::new(10, 1.0).with_tokens_per_request(4.0);

        let result = algorithm.check("heavy", &options).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 6);

        assert!(algorithm.check("heavy", &options).await.unwrap().allowed);

        let result = algorithm.check("heavy", &options).await.unwrap();
        assert!(!result.allowed);
        assert_eq!(result.remaining, 2);
        assert_eq!(result.retry_after, 2);
    }

    /// A clock that steps backwards does not drain the bucket
    #[tokio::test]
    async fn test_clock_skew_is_ignored() {
        let clock = ManualClock::new();
        let storage = memory_storage(clock.clone());
        let algorithm = TokenBucket::with_clock(storage.clone(), clock.clone());
        let options = TokenBucketOptions::new(5, 1.0);

        assert!(algorithm.check("skew", &options).await.unwrap().allowed);

        clock.set(TEST_EPOCH_MS - 10_000);
        let result = algorithm.check("skew", &options).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 3);

        let fields = storage
            .hash_get("rl:bucket:skew", &[BUCKET_TOKENS_FIELD, BUCKET_LAST_REFILL_FIELD])
            .await
            .unwrap();
        let tokens: f64 = fields[0].as_deref().unwrap().parse().unwrap();
        assert!((tokens - 3.0).abs() < 1e-9);
        assert_eq!(
            fields[1].as_deref(),
            Some((TEST_EPOCH_MS - 10_000).to_string().as_str())
        );
    }

    /// The bucket expires once it would be full again
    #[tokio::test]
    async fn test_idle_bucket_expires() {
        let clock = ManualClock::new();
        let storage = memory_storage(clock.clone());
        let algorithm = TokenBucket::with_clock(storage.clone(), clock.clone());
        let options = TokenBucketOptions::new(4, 2.0).with_prefix("api");

        algorithm.check("idle", &options).await.unwrap();
        assert_eq!(storage.ttl("api:idle").await.unwrap(), 3);

        clock.advance(Duration::from_secs(3));
        assert_eq!(storage.ttl("api:idle").await.unwrap(), -2);
    }

    /// Concurrent requests never take more tokens than the bucket holds
    #[tokio::test]
    async fn test_concurrent_requests() {
        let clock = ManualClock::new();
        let algorithm = Arc::new(TokenBucket::with_clock(
            memory_storage(clock.clone()),
            clock.clone(),
        ));
        let options = Arc::new(TokenBucketOptions::new(5, 0.01));
        let barrier = Arc::new(Barrier::new(20));

        let handles = (0..20).map(|_| {
            let algorithm = Arc::clone(&algorithm);
            let options = Arc::clone(&options);
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                algorithm.check("tb_concurrent", &options).await.unwrap()
            })
        });

        let admitted = join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .filter(|decision| decision.allowed)
            .count();
        assert_eq!(admitted, 5);
    }
}
