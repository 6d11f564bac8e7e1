// src/storage/tests/mod.rs


// Contract checks every backend must pass
pub(crate) mod common {
    use std::time::Duration;

    use crate::error::Result;
    use crate::storage::{
        ScoreBound, SlidingLogTransaction, StorageBackend, TokenBucketTransaction,
        BUCKET_LAST_REFILL_FIELD, BUCKET_TOKENS_FIELD,
    };

    // Counters, expiry bookkeeping and deletion
    pub async fn test_counter_operations<S: StorageBackend>(storage: &S, key: &str) -> Result<()> {
        storage.delete(key).await?;

        assert_eq!(storage.get_counter(key).await?, None);
        assert_eq!(storage.ttl(key).await?, -2);

        assert_eq!(storage.increment(key, 1).await?, 1);
        assert_eq!(storage.increment(key, 3).await?, 4);
        assert_eq!(storage.get_counter(key).await?, Some(4));
        assert_eq!(storage.ttl(key).await?, -1);

        assert!(storage.expire(key, Duration::from_secs(30)).await?);
        let ttl = storage.ttl(key).await?;
        assert!((29..=30).contains(&ttl), "unexpected ttl {}", ttl);

        assert!(storage.delete(key).await?);
        assert!(!storage.delete(key).await?);
        assert!(!storage.expire(key, Duration::from_secs(30)).await?);

        Ok(())
    }

    // Sorted-set primitives
    pub async fn test_sorted_set_operations<S: StorageBackend>(
        storage: &S,
        key: &str,
    ) -> Result<()> {
        storage.delete(key).await?;

        assert!(storage.add_scored(key, "b", 200).await?);
        assert!(storage.add_scored(key, "a", 100).await?);
        assert!(storage.add_scored(key, "c", 300).await?);
        assert!(!storage.add_scored(key, "c", 300).await?, "duplicate member");
        assert_eq!(storage.cardinality(key).await?, 3);

        let all = storage
            .range_by_score(key, ScoreBound::NegInf, ScoreBound::PosInf, None)
            .await?;
        assert_eq!(all, vec![100, 200, 300]);

        let oldest = storage
            .range_by_score(key, ScoreBound::NegInf, ScoreBound::PosInf, Some(1))
            .await?;
        assert_eq!(oldest, vec![100]);

        let open = storage
            .range_by_score(key, ScoreBound::Exclusive(100), ScoreBound::Inclusive(300), None)
            .await?;
        assert_eq!(open, vec![200, 300]);

        let removed = storage
            .remove_range_by_score(key, ScoreBound::NegInf, ScoreBound::Inclusive(200))
            .await?;
        assert_eq!(removed, 2);
        assert_eq!(storage.cardinality(key).await?, 1);

        storage
            .remove_range_by_score(key, ScoreBound::NegInf, ScoreBound::PosInf)
            .await?;
        assert_eq!(storage.cardinality(key).await?, 0);
        assert_eq!(storage.ttl(key).await?, -2, "an empty sorted set is gone");

        Ok(())
    }

    // Atomic admission against a log
    pub async fn test_sliding_log_transaction<S: StorageBackend>(
        storage: &S,
        key: &str,
        now: i64,
    ) -> Result<()> {
        storage.delete(key).await?;

        let tx = |offset: i64, member: &str| SlidingLogTransaction {
            now_ms: now + offset,
            window_start_ms: now + offset - 10_000,
            limit: 2,
            window_sec: 10,
            member: member.to_string(),
        };

        let first = storage.run_sliding_log(key, &tx(0, "m1")).await?;
        assert!(first.allowed);
        assert_eq!((first.remaining, first.count), (1, 1));

        let second = storage.run_sliding_log(key, &tx(1, "m2")).await?;
        assert!(second.allowed);
        assert_eq!((second.remaining, second.count), (0, 2));

        let third = storage.run_sliding_log(key, &tx(2, "m3")).await?;
        assert!(!third.allowed);
        assert_eq!((third.remaining, third.count), (0, 2));
        assert_eq!(storage.cardinality(key).await?, 2);

        let ttl = storage.ttl(key).await?;
        assert!((9..=10).contains(&ttl), "unexpected ttl {}", ttl);

        // the entry scored exactly at the window start is pruned
        let later = storage.run_sliding_log(key, &tx(10_000, "m4")).await?;
        assert!(later.allowed);
        assert_eq!(later.count, 2);

        storage.delete(key).await?;
        Ok(())
    }

    // Atomic take from a bucket
    pub async fn test_token_bucket_transaction<S: StorageBackend>(
        storage: &S,
        key: &str,
        now: i64,
    ) -> Result<()> {
        storage.delete(key).await?;

        let tx = |offset: i64| TokenBucketTransaction {
            now_ms: now + offset,
            capacity: 2,
            refill_rate: 1.0,
            tokens_per_request: 1.0,
            ttl_secs: 3,
        };

        assert!(storage.run_token_bucket(key, &tx(0)).await?.allowed);
        let taken = storage.run_token_bucket(key, &tx(0)).await?;
        assert!(taken.allowed);
        assert_eq!(taken.remaining, 0);

        let empty = storage.run_token_bucket(key, &tx(500)).await?;
        assert!(!empty.allowed);
        assert_eq!(empty.remaining, 0);

        let fields = storage
            .hash_get(key, &[BUCKET_TOKENS_FIELD, BUCKET_LAST_REFILL_FIELD, "missing"])
            .await?;
        assert_eq!(fields.len(), 3);
        let tokens: f64 = fields[0].as_deref().unwrap_or("nan").parse().unwrap_or(f64::NAN);
        assert!((tokens - 0.5).abs() < 1e-9, "unexpected tokens {}", tokens);
        assert_eq!(fields[1].as_deref(), Some((now + 500).to_string().as_str()));
        assert_eq!(fields[2], None);

        let refilled = storage.run_token_bucket(key, &tx(1000)).await?;
        assert!(refilled.allowed);

        let ttl = storage.ttl(key).await?;
        assert!((2..=3).contains(&ttl), "unexpected ttl {}", ttl);

        storage.delete(key).await?;
        Ok(())
    }
}
