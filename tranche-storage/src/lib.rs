//! Tranche Storage - Store Traits, In-Memory Implementations, and the Engine
//!
//! The two-tier range cache: a sorted-set store fronting an authoritative
//! bucket source. This crate defines both storage contracts, ships in-memory
//! implementations of them, and provides the engine that composes alignment,
//! gap filling, coalesced memoization, and atomic write-back into the
//! end-to-end [`RangeCacheEngine::get_buckets`] operation.
//!
//! # Design
//!
//! Closed buckets are immutable and cacheable; the single still-open bucket
//! is always read fresh and never cached. Cache completeness is proven on
//! every read, never assumed: an incomplete, mis-bounded, or out-of-order
//! span is rebuilt from the source, gap-filled dense, and written back as
//! one atomic range replacement that never blocks the caller.

pub mod align;
pub mod coalesce;
pub mod engine;
pub mod fill;
pub mod keys;
pub mod sorted_set;
pub mod source;

pub use align::{
    align_ceil, align_floor, expected_bucket_count, needs_open_bucket, resolve_search_range,
    seed_strategy, SeedStrategy,
};
pub use coalesce::CoalescingCache;
pub use engine::{EngineConfig, EngineStats, RangeCacheEngine};
pub use fill::fill_gaps;
pub use sorted_set::{InMemorySortedSetStore, ScoredMember, SortedSetStore};
pub use source::{BucketSource, InMemoryBucketSource, SourceQueryCounts};
