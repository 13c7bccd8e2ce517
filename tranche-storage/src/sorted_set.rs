//! Sorted-set cache store contract and its in-memory implementation.
//!
//! The store is the fast tier of the cache: an ordered-by-score collection
//! per key for closed buckets, plus a scalar keyspace used by the
//! memoization layer. Transport, persistence, and eviction policy belong to
//! the implementation; this module only fixes the semantics the engine
//! depends on.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use tranche_core::TrancheResult;

/// One member of a scored set: the score is a bucket start timestamp and
/// the value is the serialized bucket payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScoredMember {
    pub score: i64,
    pub value: String,
}

/// Sorted-set cache store.
///
/// # Contract
///
/// - `range_query` bounds are inclusive and results ascend by
///   `(score, value)`.
/// - `atomic_replace_range` MUST be transactional: readers never observe a
///   half-updated range, and stale members that share a score with a new
///   bucket but differ by identity cannot survive alongside it. This is the
///   only mutation the engine performs on the hot path.
/// - `remove_range` exists for maintenance and eviction only.
#[async_trait]
pub trait SortedSetStore: Send + Sync {
    /// Read a scalar value, optionally rejecting entries older than
    /// `max_staleness`.
    async fn get(&self, key: &str, max_staleness: Option<Duration>)
        -> TrancheResult<Option<String>>;

    /// Write a scalar value with a time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> TrancheResult<()>;

    /// All members scored within `[min_score, max_score]`, ascending.
    async fn range_query(
        &self,
        key: &str,
        min_score: i64,
        max_score: i64,
    ) -> TrancheResult<Vec<ScoredMember>>;

    /// Atomically remove every member scored within `[min_score, max_score]`
    /// and insert `members` in their place. Returns the inserted count.
    async fn atomic_replace_range(
        &self,
        key: &str,
        min_score: i64,
        max_score: i64,
        members: Vec<ScoredMember>,
    ) -> TrancheResult<usize>;

    /// Remove members scored within `[min_score, max_score]`, returning how
    /// many were dropped.
    async fn remove_range(&self, key: &str, min_score: i64, max_score: i64)
        -> TrancheResult<u64>;
}

/// In-memory store for tests and single-process deployments.
///
/// Scalars expire by TTL measured on the tokio clock, so paused-time tests
/// can drive expiry deterministically. Sets keep duplicate values per score
/// the way a real sorted-set store would - the engine's corruption checks
/// need to be able to observe that state.
#[derive(Debug, Default)]
pub struct InMemorySortedSetStore {
    scalars: RwLock<HashMap<String, ScalarEntry>>,
    sets: RwLock<HashMap<String, BTreeSet<(i64, String)>>>,
}

#[derive(Debug, Clone)]
struct ScalarEntry {
    value: String,
    stored_at: Instant,
    ttl: Duration,
}

impl InMemorySortedSetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SortedSetStore for InMemorySortedSetStore {
    async fn get(
        &self,
        key: &str,
        max_staleness: Option<Duration>,
    ) -> TrancheResult<Option<String>> {
        let scalars = self.scalars.read().await;
        let Some(entry) = scalars.get(key) else {
            return Ok(None);
        };
        let age = entry.stored_at.elapsed();
        if age > entry.ttl {
            return Ok(None);
        }
        if let Some(max) = max_staleness {
            if age > max {
                return Ok(None);
            }
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> TrancheResult<()> {
        self.scalars.write().await.insert(
            key.to_string(),
            ScalarEntry {
                value: value.to_string(),
                stored_at: Instant::now(),
                ttl,
            },
        );
        Ok(())
    }

    async fn range_query(
        &self,
        key: &str,
        min_score: i64,
        max_score: i64,
    ) -> TrancheResult<Vec<ScoredMember>> {
        let sets = self.sets.read().await;
        Ok(sets
            .get(key)
            .map(|set| {
                set.iter()
                    .filter(|(score, _)| (min_score..=max_score).contains(score))
                    .map(|(score, value)| ScoredMember {
                        score: *score,
                        value: value.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn atomic_replace_range(
        &self,
        key: &str,
        min_score: i64,
        max_score: i64,
        members: Vec<ScoredMember>,
    ) -> TrancheResult<usize> {
        // The single write lock over remove + insert is the transaction.
        let mut sets = self.sets.write().await;
        let set = sets.entry(key.to_string()).or_default();
        set.retain(|(score, _)| !(min_score..=max_score).contains(score));
        let before = set.len();
        set.extend(members.into_iter().map(|m| (m.score, m.value)));
        Ok(set.len() - before)
    }

    async fn remove_range(
        &self,
        key: &str,
        min_score: i64,
        max_score: i64,
    ) -> TrancheResult<u64> {
        let mut sets = self.sets.write().await;
        let Some(set) = sets.get_mut(key) else {
            return Ok(0);
        };
        let before = set.len();
        set.retain(|(score, _)| !(min_score..=max_score).contains(score));
        Ok((before - set.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(score: i64, value: &str) -> ScoredMember {
        ScoredMember {
            score,
            value: value.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scalar_expires_by_ttl() {
        let store = InMemorySortedSetStore::new();
        store
            .set("k", "v", Duration::from_secs(60))
            .await
            .expect("set should succeed");

        assert_eq!(
            store.get("k", None).await.expect("get should succeed"),
            Some("v".to_string())
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k", None).await.expect("get should succeed"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scalar_max_staleness_tolerance() {
        let store = InMemorySortedSetStore::new();
        store
            .set("k", "v", Duration::from_secs(300))
            .await
            .expect("set should succeed");

        tokio::time::advance(Duration::from_secs(30)).await;

        // Within TTL but beyond the caller's tolerance.
        assert_eq!(
            store
                .get("k", Some(Duration::from_secs(10)))
                .await
                .expect("get should succeed"),
            None
        );
        assert_eq!(
            store
                .get("k", Some(Duration::from_secs(60)))
                .await
                .expect("get should succeed"),
            Some("v".to_string())
        );
    }

    #[tokio::test]
    async fn test_range_query_bounds_inclusive_and_ascending() {
        let store = InMemorySortedSetStore::new();
        store
            .atomic_replace_range(
                "z",
                0,
                40,
                vec![member(30, "c"), member(10, "a"), member(20, "b"), member(40, "d")],
            )
            .await
            .expect("replace should succeed");

        let hits = store
            .range_query("z", 10, 30)
            .await
            .expect("query should succeed");
        assert_eq!(hits, vec![member(10, "a"), member(20, "b"), member(30, "c")]);
    }

    #[tokio::test]
    async fn test_duplicate_scores_with_distinct_values_coexist() {
        let store = InMemorySortedSetStore::new();
        store
            .atomic_replace_range("z", 0, 10, vec![member(10, "a"), member(10, "b")])
            .await
            .expect("replace should succeed");

        let hits = store
            .range_query("z", 0, 10)
            .await
            .expect("query should succeed");
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn test_replace_drops_stale_members_by_identity() {
        let store = InMemorySortedSetStore::new();
        store
            .atomic_replace_range("z", 0, 20, vec![member(10, "old"), member(20, "keep-out")])
            .await
            .expect("replace should succeed");

        // Same score, different payload: the old member must not survive.
        let inserted = store
            .atomic_replace_range("z", 0, 10, vec![member(10, "new")])
            .await
            .expect("replace should succeed");
        assert_eq!(inserted, 1);

        let hits = store
            .range_query("z", 0, 20)
            .await
            .expect("query should succeed");
        assert_eq!(hits, vec![member(10, "new"), member(20, "keep-out")]);
    }

    #[tokio::test]
    async fn test_replace_preserves_members_outside_range() {
        let store = InMemorySortedSetStore::new();
        store
            .atomic_replace_range("z", 0, 30, vec![member(10, "a"), member(30, "c")])
            .await
            .expect("replace should succeed");

        store
            .atomic_replace_range("z", 0, 10, vec![member(10, "a2")])
            .await
            .expect("replace should succeed");

        let hits = store
            .range_query("z", 0, 30)
            .await
            .expect("query should succeed");
        assert_eq!(hits, vec![member(10, "a2"), member(30, "c")]);
    }

    #[tokio::test]
    async fn test_remove_range_counts_dropped_members() {
        let store = InMemorySortedSetStore::new();
        store
            .atomic_replace_range(
                "z",
                0,
                30,
                vec![member(10, "a"), member(20, "b"), member(30, "c")],
            )
            .await
            .expect("replace should succeed");

        let removed = store
            .remove_range("z", 0, 20)
            .await
            .expect("remove should succeed");
        assert_eq!(removed, 2);

        let hits = store
            .range_query("z", 0, 30)
            .await
            .expect("query should succeed");
        assert_eq!(hits, vec![member(30, "c")]);
    }

    #[tokio::test]
    async fn test_remove_range_on_missing_key() {
        let store = InMemorySortedSetStore::new();
        assert_eq!(
            store
                .remove_range("nope", 0, 100)
                .await
                .expect("remove should succeed"),
            0
        );
    }
}
