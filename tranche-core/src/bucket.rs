//! Bucket trait, fill rules, and bucket-width arithmetic.

use serde::{de::DeserializeOwned, Serialize};

/// Epoch timestamp in milliseconds.
pub type TimestampMs = i64;

/// One fixed-width time slice of data, identified by its start timestamp.
///
/// Bucket contents are opaque to the engine: the only thing it ever reads
/// is [`bucket_start`](TimeBucket::bucket_start), which must equal the start
/// of the bucket's time slice, aligned to the [`BucketWidth`] in use.
///
/// # Implementation Requirements
///
/// - `bucket_start()` must be aligned to the configured bucket width
/// - Implementations must be `Clone`, `Serialize`, and `DeserializeOwned`
///   for cache storage
/// - Implementations must be `Send + Sync + 'static` for async compatibility
pub trait TimeBucket: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Start of this bucket's time slice, in epoch milliseconds.
    fn bucket_start(&self) -> TimestampMs;
}

/// Rule for synthesizing a missing bucket from its predecessor.
///
/// Gap filling walks the bucket grid and calls `synthesize` wherever the
/// source had no row. `previous` is the nearest bucket before the hole
/// (real, or itself synthesized) and `bucket_start` is the slot being
/// filled. The returned bucket must report `bucket_start` as its own start.
///
/// Blanket-implemented for closures, so call sites can pass
/// `|prev, start| ...` directly.
pub trait FillRule<B>: Send + Sync {
    /// Build the bucket for `bucket_start` by carrying `previous` forward.
    fn synthesize(&self, previous: &B, bucket_start: TimestampMs) -> B;
}

impl<B, F> FillRule<B> for F
where
    F: Fn(&B, TimestampMs) -> B + Send + Sync,
{
    fn synthesize(&self, previous: &B, bucket_start: TimestampMs) -> B {
        self(previous, bucket_start)
    }
}

/// Fixed bucket width in milliseconds.
///
/// Guaranteed positive by construction. All alignment is integer arithmetic
/// modulo this value, fixed per cache-key namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketWidth(i64);

impl BucketWidth {
    /// One minute.
    pub const MINUTE: BucketWidth = BucketWidth(60_000);
    /// Five minutes.
    pub const FIVE_MINUTES: BucketWidth = BucketWidth(300_000);
    /// One hour.
    pub const HOUR: BucketWidth = BucketWidth(3_600_000);
    /// One day.
    pub const DAY: BucketWidth = BucketWidth(86_400_000);

    /// Create a width from milliseconds. Returns `None` unless positive.
    pub fn from_millis(millis: i64) -> Option<Self> {
        (millis > 0).then_some(Self(millis))
    }

    /// Width in milliseconds.
    pub const fn millis(self) -> i64 {
        self.0
    }
}
