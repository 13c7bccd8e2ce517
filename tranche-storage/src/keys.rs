//! Cache key layout.
//!
//! Keys must stay stable and collision-free. The bucket range set, the
//! earliest-timestamp memo, and the source-query memo each live in a
//! distinct leading namespace so the scalar memos can never collide with
//! the sorted set; the source-query memo additionally encodes its bounds so
//! only identical queries share an entry.

use tranche_core::{BucketWidth, TimestampMs};

const BUCKET_RANGE_NS: &str = "tranche-buckets";
const EARLIEST_NS: &str = "tranche-earliest";
const SOURCE_QUERY_NS: &str = "tranche-srcq";

/// Key of the sorted set holding one entity's closed buckets.
pub fn bucket_range_key(cache_ns: &str, entity: &str, width: BucketWidth) -> String {
    format!(
        "{BUCKET_RANGE_NS}:ns-{cache_ns}:entity-{entity}:bucketWidth-{}",
        width.millis()
    )
}

/// Key memoizing one entity's earliest available timestamp.
pub fn earliest_key(cache_ns: &str, entity: &str, width: BucketWidth) -> String {
    format!(
        "{EARLIEST_NS}:ns-{cache_ns}:entity-{entity}:bucketWidth-{}",
        width.millis()
    )
}

/// Key memoizing one exact source query.
pub fn source_query_key(
    cache_ns: &str,
    entity: &str,
    width: BucketWidth,
    start: TimestampMs,
    end: TimestampMs,
) -> String {
    format!(
        "{SOURCE_QUERY_NS}:ns-{cache_ns}:entity-{entity}:bucketWidth-{}:range-{start}-{end}",
        width.millis()
    )
}
