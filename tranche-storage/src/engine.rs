//! The range cache engine: the end-to-end `get_buckets` operation.
//!
//! Composes bucket alignment, the sorted-set store, the authoritative
//! source, gap filling, and coalesced memoization into one read path:
//!
//! 1. resolve the serviceable closed-bucket span against `now` and the
//!    entity's earliest data (memoized minutes-scale),
//! 2. serve the span from the sorted set when it is provably complete,
//! 3. otherwise rebuild it from the source (coalesced seconds-scale),
//!    gap-fill it dense, and write it back atomically without blocking the
//!    caller,
//! 4. independently fetch the still-open bucket fresh when the window
//!    reaches into it.
//!
//! Closed buckets are immutable and cacheable; the open bucket is never
//! cached. `NoData` and `BeforeEarliest` are typed outcomes, not errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use tranche_core::{
    BucketWidth, FillRule, IntegrityError, RangeReadout, RangeResolution, SearchRange, TimeBucket,
    TimeRange, TimestampMs, TrancheResult,
};

use crate::align::{self, SeedStrategy};
use crate::coalesce::CoalescingCache;
use crate::fill::fill_gaps;
use crate::keys;
use crate::sorted_set::{ScoredMember, SortedSetStore};
use crate::source::BucketSource;

/// Tunables for a [`RangeCacheEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Namespace segment embedded in every cache key. One per bucket-width
    /// deployment, e.g. `"gauges-1h"`.
    pub cache_namespace: String,
    /// Fixed bucket width for this namespace.
    pub width: BucketWidth,
    /// TTL for the earliest-timestamp memo. The earliest data point rarely
    /// moves, so this is minutes-scale.
    pub earliest_ttl: Duration,
    /// Max staleness tolerated when reading the earliest-timestamp memo.
    pub earliest_max_age: Option<Duration>,
    /// TTL for the source-query memo. It exists purely to absorb duplicate
    /// concurrent callers, not as a correctness cache, so seconds-scale.
    pub source_memo_ttl: Duration,
    /// Max staleness tolerated when reading the source-query memo.
    pub source_memo_max_age: Option<Duration>,
}

impl EngineConfig {
    /// Create a config with default TTLs.
    pub fn new(cache_namespace: impl Into<String>, width: BucketWidth) -> Self {
        Self {
            cache_namespace: cache_namespace.into(),
            width,
            earliest_ttl: Duration::from_secs(600),
            earliest_max_age: None,
            source_memo_ttl: Duration::from_secs(20),
            source_memo_max_age: None,
        }
    }

    /// Set the earliest-timestamp memo TTL.
    pub fn with_earliest_ttl(mut self, ttl: Duration) -> Self {
        self.earliest_ttl = ttl;
        self
    }

    /// Set the max staleness tolerated on earliest-timestamp reads.
    pub fn with_earliest_max_age(mut self, max_age: Duration) -> Self {
        self.earliest_max_age = Some(max_age);
        self
    }

    /// Set the source-query memo TTL.
    pub fn with_source_memo_ttl(mut self, ttl: Duration) -> Self {
        self.source_memo_ttl = ttl;
        self
    }

    /// Set the max staleness tolerated on source-query memo reads.
    pub fn with_source_memo_max_age(mut self, max_age: Duration) -> Self {
        self.source_memo_max_age = Some(max_age);
        self
    }
}

/// Snapshot of cache effectiveness counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Range reads served entirely from the sorted set.
    pub range_hits: u64,
    /// Range reads that had to rebuild from the source.
    pub range_misses: u64,
}

impl EngineStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.range_hits + self.range_misses;
        if total == 0 {
            0.0
        } else {
            self.range_hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    range_hits: AtomicU64,
    range_misses: AtomicU64,
}

/// Two-tier range cache over fixed-width time buckets.
///
/// The engine owns no transport: the store and source are trait
/// collaborators, and the in-flight registries live on the two embedded
/// [`CoalescingCache`]s - explicit fields, never globals. Clones share all
/// state, including the registries and counters.
pub struct RangeCacheEngine<B, S>
where
    B: TimeBucket,
    S: SortedSetStore + 'static,
{
    store: Arc<S>,
    source: Arc<dyn BucketSource<B>>,
    fill: Arc<dyn FillRule<B>>,
    config: EngineConfig,
    earliest_memo: CoalescingCache<Option<TimestampMs>, S>,
    source_memo: CoalescingCache<Vec<B>, S>,
    stats: Arc<StatCounters>,
}

impl<B, S> Clone for RangeCacheEngine<B, S>
where
    B: TimeBucket,
    S: SortedSetStore + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            source: Arc::clone(&self.source),
            fill: Arc::clone(&self.fill),
            config: self.config.clone(),
            earliest_memo: self.earliest_memo.clone(),
            source_memo: self.source_memo.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<B, S> RangeCacheEngine<B, S>
where
    B: TimeBucket,
    S: SortedSetStore + 'static,
{
    /// Create a new engine over the given store, source, and fill rule.
    pub fn new(
        store: Arc<S>,
        source: Arc<dyn BucketSource<B>>,
        fill: Arc<dyn FillRule<B>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            earliest_memo: CoalescingCache::new(Arc::clone(&store)),
            source_memo: CoalescingCache::new(Arc::clone(&store)),
            store,
            source,
            fill,
            config,
            stats: Arc::new(StatCounters::default()),
        }
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get a reference to the store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Snapshot the hit/miss counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            range_hits: self.stats.range_hits.load(Ordering::Relaxed),
            range_misses: self.stats.range_misses.load(Ordering::Relaxed),
        }
    }

    /// Serve `[range.start, range.end)` as a dense bucket sequence, reading
    /// the wall clock for "now".
    pub async fn get_buckets(
        &self,
        entity: &str,
        range: TimeRange,
    ) -> TrancheResult<RangeReadout<B>> {
        self.get_buckets_at(entity, range, Utc::now().timestamp_millis())
            .await
    }

    /// Deterministic variant of [`get_buckets`](Self::get_buckets) with an
    /// explicit clock reading.
    pub async fn get_buckets_at(
        &self,
        entity: &str,
        range: TimeRange,
        now: TimestampMs,
    ) -> TrancheResult<RangeReadout<B>> {
        if range.is_empty() {
            return Ok(RangeReadout::Buckets(Vec::new()));
        }

        let width = self.config.width;
        let Some(earliest) = self.cached_earliest(entity).await? else {
            return Ok(RangeReadout::NoData);
        };

        let search = match align::resolve_search_range(range, now, width, Some(earliest)) {
            RangeResolution::NoData => return Ok(RangeReadout::NoData),
            RangeResolution::BeforeEarliest => return Ok(RangeReadout::BeforeEarliest),
            RangeResolution::Serviceable(search) => search,
        };

        let mut buckets = match self.read_cached_span(entity, search).await? {
            Some(cached) => {
                self.stats.range_hits.fetch_add(1, Ordering::Relaxed);
                cached
            }
            None => {
                self.stats.range_misses.fetch_add(1, Ordering::Relaxed);
                self.rebuild_span(entity, search, earliest).await?
            }
        };

        if align::needs_open_bucket(now, range.end, search.last_closed_bucket_end, width) {
            if let Some(last_closed) = buckets.last() {
                let open = self.open_bucket(entity, search, last_closed).await?;
                buckets.push(open);
            }
        }

        Ok(RangeReadout::Buckets(buckets))
    }

    /// Drop closed buckets older than `before` from the cache. Maintenance
    /// only; the read path never calls this.
    pub async fn evict_closed_before(
        &self,
        entity: &str,
        before: TimestampMs,
    ) -> TrancheResult<u64> {
        let key = keys::bucket_range_key(&self.config.cache_namespace, entity, self.config.width);
        let cutoff = align::align_floor(before, self.config.width);
        self.store.remove_range(&key, i64::MIN, cutoff - 1).await
    }

    /// The entity's earliest available bucket start, memoized minutes-scale:
    /// it only moves when retention or ingestion changes the oldest data.
    /// `Ok(None)` ("never ingested") is itself a cacheable answer.
    async fn cached_earliest(&self, entity: &str) -> TrancheResult<Option<TimestampMs>> {
        let key = keys::earliest_key(&self.config.cache_namespace, entity, self.config.width);
        let source = Arc::clone(&self.source);
        let entity = entity.to_string();
        self.earliest_memo
            .wrap(
                &key,
                self.config.earliest_ttl,
                self.config.earliest_max_age,
                move || async move { source.earliest_start(&entity).await },
            )
            .await
    }

    /// Read the closed-bucket span from the sorted set, returning it only
    /// when provably complete: exactly the expected count, strictly
    /// ascending, and bounded by exactly the requested first/last starts (a
    /// differently-bounded prior population must not pass). Corruption
    /// signals are logged; every failure mode is just a miss.
    async fn read_cached_span(
        &self,
        entity: &str,
        search: SearchRange,
    ) -> TrancheResult<Option<Vec<B>>> {
        let key = keys::bucket_range_key(&self.config.cache_namespace, entity, self.config.width);
        let members = self
            .store
            .range_query(&key, search.first_bucket_start, search.last_closed_bucket_start)
            .await?;

        let expected = align::expected_bucket_count(
            search.first_bucket_start,
            search.last_closed_bucket_start,
            self.config.width,
        );
        if members.len() != expected {
            return Ok(None);
        }

        let mut buckets = Vec::with_capacity(members.len());
        for member in &members {
            match serde_json::from_str::<B>(&member.value) {
                Ok(bucket) => buckets.push(bucket),
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        score = member.score,
                        error = %e,
                        "undecodable cached bucket, rebuilding span"
                    );
                    return Ok(None);
                }
            }
        }

        for pair in buckets.windows(2) {
            if pair[0].bucket_start() >= pair[1].bucket_start() {
                tracing::warn!(
                    key = %key,
                    prev = pair[0].bucket_start(),
                    next = pair[1].bucket_start(),
                    "cached bucket span out of order, rebuilding"
                );
                return Ok(None);
            }
        }

        let bounds_match = buckets.first().map(|b| b.bucket_start())
            == Some(search.first_bucket_start)
            && buckets.last().map(|b| b.bucket_start()) == Some(search.last_closed_bucket_start);
        if !bounds_match {
            return Ok(None);
        }

        Ok(Some(buckets))
    }

    /// Rebuild the span from the source, gap-fill it dense, and kick off the
    /// atomic write-back. Coalesced, so concurrent misses for the same span
    /// run the query once per process and share the finished sequence.
    async fn rebuild_span(
        &self,
        entity: &str,
        search: SearchRange,
        earliest: TimestampMs,
    ) -> TrancheResult<Vec<B>> {
        let width = self.config.width;
        let memo_key = keys::source_query_key(
            &self.config.cache_namespace,
            entity,
            width,
            search.first_bucket_start,
            search.last_closed_bucket_end,
        );
        let range_key =
            keys::bucket_range_key(&self.config.cache_namespace, entity, width);
        let source = Arc::clone(&self.source);
        let fill = Arc::clone(&self.fill);
        let store = Arc::clone(&self.store);
        let entity = entity.to_string();

        self.source_memo
            .wrap(
                &memo_key,
                self.config.source_memo_ttl,
                self.config.source_memo_max_age,
                move || async move {
                    let rows = source
                        .buckets_in_range(
                            &entity,
                            search.first_bucket_start,
                            search.last_closed_bucket_end,
                        )
                        .await?;
                    ensure_ascending(&rows, &entity)?;

                    let first_row_start = rows.first().map(|b| b.bucket_start());
                    let seed = match (
                        align::seed_strategy(first_row_start, search.first_bucket_start),
                        rows.first(),
                    ) {
                        (SeedStrategy::UseFirstResult, Some(first)) => first.clone(),
                        _ => source
                            .nearest_at_or_before(&entity, search.first_bucket_start)
                            .await?
                            .ok_or(IntegrityError::SeedMissing {
                                entity: entity.clone(),
                                at: search.first_bucket_start,
                                earliest,
                            })?,
                    };

                    let dense = fill_gaps(
                        rows,
                        seed,
                        search.first_bucket_start,
                        search.last_closed_bucket_start,
                        width,
                        fill.as_ref(),
                    )?;

                    spawn_write_back(store, range_key, search, &dense);
                    Ok(dense)
                },
            )
            .await
    }

    /// Fetch the still-accumulating bucket, always fresh from the source and
    /// never persisted. When the source has no row for it yet, synthesize
    /// one from the last closed bucket with the fill rule.
    async fn open_bucket(
        &self,
        entity: &str,
        search: SearchRange,
        last_closed: &B,
    ) -> TrancheResult<B> {
        let open_start = search.last_closed_bucket_end;
        let rows = self
            .source
            .buckets_in_range(entity, open_start, open_start + self.config.width.millis())
            .await?;
        Ok(match rows.into_iter().next() {
            Some(open) => open,
            None => self.fill.synthesize(last_closed, open_start),
        })
    }
}

/// Replace the cached span off the caller's response path. Failures are
/// logged and swallowed: a broken write-back must never fail or delay the
/// read that produced the data.
fn spawn_write_back<B, S>(store: Arc<S>, key: String, search: SearchRange, dense: &[B])
where
    B: TimeBucket,
    S: SortedSetStore + 'static,
{
    let mut members = Vec::with_capacity(dense.len());
    for bucket in dense {
        match serde_json::to_string(bucket) {
            Ok(value) => members.push(ScoredMember {
                score: bucket.bucket_start(),
                value,
            }),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "bucket not serializable, skipping write-back");
                return;
            }
        }
    }
    tokio::spawn(async move {
        match store
            .atomic_replace_range(
                &key,
                search.first_bucket_start,
                search.last_closed_bucket_start,
                members,
            )
            .await
        {
            Ok(inserted) => {
                tracing::debug!(key = %key, inserted, "cached bucket span replaced");
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "bucket span write-back failed");
            }
        }
    });
}

fn ensure_ascending<B: TimeBucket>(rows: &[B], entity: &str) -> Result<(), IntegrityError> {
    for pair in rows.windows(2) {
        if pair[0].bucket_start() >= pair[1].bucket_start() {
            return Err(IntegrityError::UnsortedSource {
                entity: entity.to_string(),
                prev_start: pair[0].bucket_start(),
                next_start: pair[1].bucket_start(),
            });
        }
    }
    Ok(())
}
