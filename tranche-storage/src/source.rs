//! Authoritative bucket source contract and its in-memory implementation.
//!
//! The source is the slow tier behind the cache - typically a database
//! aggregation - and is read-only from the engine's perspective. Results
//! are sparse: slots with no data are simply absent, and densifying them is
//! the engine's job, not the source's.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use tranche_core::{TimeBucket, TimestampMs, TrancheResult};

/// Read-only view of the authoritative store behind the cache.
#[async_trait]
pub trait BucketSource<B: TimeBucket>: Send + Sync {
    /// Timestamp of the entity's earliest bucket, or `None` if the entity
    /// was never ingested.
    async fn earliest_start(&self, entity: &str) -> TrancheResult<Option<TimestampMs>>;

    /// Buckets with starts in `[start, end)`, ascending.
    async fn buckets_in_range(
        &self,
        entity: &str,
        start: TimestampMs,
        end: TimestampMs,
    ) -> TrancheResult<Vec<B>>;

    /// The nearest bucket starting at or before `ts`, if any.
    async fn nearest_at_or_before(
        &self,
        entity: &str,
        ts: TimestampMs,
    ) -> TrancheResult<Option<B>>;
}

/// Per-method query counters, for asserting how often the engine actually
/// reached the source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceQueryCounts {
    pub earliest: u64,
    pub range: u64,
    pub nearest: u64,
}

impl SourceQueryCounts {
    pub fn total(&self) -> u64 {
        self.earliest + self.range + self.nearest
    }
}

/// In-memory bucket source for tests.
#[derive(Debug)]
pub struct InMemoryBucketSource<B> {
    rows: RwLock<HashMap<String, BTreeMap<TimestampMs, B>>>,
    earliest_queries: AtomicU64,
    range_queries: AtomicU64,
    nearest_queries: AtomicU64,
}

impl<B> Default for InMemoryBucketSource<B> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            earliest_queries: AtomicU64::new(0),
            range_queries: AtomicU64::new(0),
            nearest_queries: AtomicU64::new(0),
        }
    }
}

impl<B: TimeBucket> InMemoryBucketSource<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert (or overwrite) one bucket row.
    pub async fn insert(&self, entity: &str, bucket: B) {
        self.rows
            .write()
            .await
            .entry(entity.to_string())
            .or_default()
            .insert(bucket.bucket_start(), bucket);
    }

    /// Snapshot of how many queries each method has served.
    pub fn query_counts(&self) -> SourceQueryCounts {
        SourceQueryCounts {
            earliest: self.earliest_queries.load(Ordering::Relaxed),
            range: self.range_queries.load(Ordering::Relaxed),
            nearest: self.nearest_queries.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl<B: TimeBucket> BucketSource<B> for InMemoryBucketSource<B> {
    async fn earliest_start(&self, entity: &str) -> TrancheResult<Option<TimestampMs>> {
        self.earliest_queries.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .rows
            .read()
            .await
            .get(entity)
            .and_then(|rows| rows.keys().next().copied()))
    }

    async fn buckets_in_range(
        &self,
        entity: &str,
        start: TimestampMs,
        end: TimestampMs,
    ) -> TrancheResult<Vec<B>> {
        self.range_queries.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .rows
            .read()
            .await
            .get(entity)
            .map(|rows| rows.range(start..end).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default())
    }

    async fn nearest_at_or_before(
        &self,
        entity: &str,
        ts: TimestampMs,
    ) -> TrancheResult<Option<B>> {
        self.nearest_queries.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .rows
            .read()
            .await
            .get(entity)
            .and_then(|rows| rows.range(..=ts).next_back().map(|(_, b)| b.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tranche_test_utils::{gauge, GaugeBucket};

    const HOUR: i64 = 3_600_000;

    async fn seeded() -> InMemoryBucketSource<GaugeBucket> {
        let source = InMemoryBucketSource::new();
        source.insert("cpu01", gauge(HOUR, 1.0)).await;
        source.insert("cpu01", gauge(3 * HOUR, 3.0)).await;
        source.insert("cpu01", gauge(4 * HOUR, 4.0)).await;
        source
    }

    #[tokio::test]
    async fn test_earliest_start() {
        let source = seeded().await;
        assert_eq!(
            source
                .earliest_start("cpu01")
                .await
                .expect("query should succeed"),
            Some(HOUR)
        );
        assert_eq!(
            source
                .earliest_start("absent")
                .await
                .expect("query should succeed"),
            None
        );
    }

    #[tokio::test]
    async fn test_buckets_in_range_is_end_exclusive() {
        let source = seeded().await;
        let rows = source
            .buckets_in_range("cpu01", HOUR, 4 * HOUR)
            .await
            .expect("query should succeed");
        let starts: Vec<_> = rows.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![HOUR, 3 * HOUR]);
    }

    #[tokio::test]
    async fn test_nearest_at_or_before() {
        let source = seeded().await;
        let at_gap = source
            .nearest_at_or_before("cpu01", 2 * HOUR)
            .await
            .expect("query should succeed");
        assert_eq!(at_gap.map(|b| b.start), Some(HOUR));

        let exact = source
            .nearest_at_or_before("cpu01", 3 * HOUR)
            .await
            .expect("query should succeed");
        assert_eq!(exact.map(|b| b.start), Some(3 * HOUR));

        let too_early = source
            .nearest_at_or_before("cpu01", HOUR - 1)
            .await
            .expect("query should succeed");
        assert_eq!(too_early.map(|b| b.start), None);
    }

    #[tokio::test]
    async fn test_query_counters() {
        let source = seeded().await;
        let _ = source.earliest_start("cpu01").await;
        let _ = source.buckets_in_range("cpu01", 0, HOUR).await;
        let _ = source.buckets_in_range("cpu01", 0, 2 * HOUR).await;
        let _ = source.nearest_at_or_before("cpu01", HOUR).await;

        let counts = source.query_counts();
        assert_eq!(counts.earliest, 1);
        assert_eq!(counts.range, 2);
        assert_eq!(counts.nearest, 1);
        assert_eq!(counts.total(), 4);
    }
}
