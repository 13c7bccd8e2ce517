//! Gap filling: densify a sparse bucket list over an aligned grid.

use std::collections::HashMap;

use tranche_core::{BucketWidth, FillRule, IntegrityError, TimeBucket, TimestampMs};

use crate::align::expected_bucket_count;

/// Densify `sparse` into exactly one bucket per grid slot over
/// `[desired_oldest_start, desired_newest_start]`, both inclusive.
///
/// The seed carries a value into the window: stepping starts at the seed's
/// own (possibly earlier) timestamp, and anything emitted before
/// `desired_oldest_start` is dropped from the output. At each slot the real
/// bucket is emitted when present; otherwise `rule` synthesizes one from the
/// previous slot's bucket, and that synthetic bucket becomes the new
/// "previous".
///
/// Preconditions are fatal [`IntegrityError`]s, never silently corrected:
///
/// - `seed.bucket_start() <= desired_oldest_start`
/// - both desired bounds aligned to `width`, with the seed on the same grid
/// - `desired_oldest_start <= desired_newest_start`
pub fn fill_gaps<B, R>(
    sparse: Vec<B>,
    seed: B,
    desired_oldest_start: TimestampMs,
    desired_newest_start: TimestampMs,
    width: BucketWidth,
    rule: &R,
) -> Result<Vec<B>, IntegrityError>
where
    B: TimeBucket,
    R: FillRule<B> + ?Sized,
{
    let w = width.millis();
    if desired_oldest_start > desired_newest_start {
        return Err(IntegrityError::InvertedBounds {
            oldest_start: desired_oldest_start,
            newest_start: desired_newest_start,
        });
    }
    for bound in [desired_oldest_start, desired_newest_start] {
        if bound.rem_euclid(w) != 0 {
            return Err(IntegrityError::MisalignedBound { bound, width: w });
        }
    }
    let seed_start = seed.bucket_start();
    if seed_start > desired_oldest_start {
        return Err(IntegrityError::SeedAfterOldest {
            seed_start,
            oldest_start: desired_oldest_start,
        });
    }
    if seed_start.rem_euclid(w) != 0 {
        return Err(IntegrityError::SeedOffGrid {
            seed_start,
            width: w,
        });
    }

    let mut by_start: HashMap<TimestampMs, B> = sparse
        .into_iter()
        .map(|bucket| (bucket.bucket_start(), bucket))
        .collect();

    let expected = expected_bucket_count(desired_oldest_start, desired_newest_start, width);
    let mut dense = Vec::with_capacity(expected);
    let mut previous = seed;
    let mut cursor = previous.bucket_start();
    while cursor <= desired_newest_start {
        let bucket = match by_start.remove(&cursor) {
            Some(real) => real,
            None => rule.synthesize(&previous, cursor),
        };
        previous = bucket.clone();
        if cursor >= desired_oldest_start {
            dense.push(bucket);
        }
        cursor += w;
    }

    if dense.len() != expected {
        return Err(IntegrityError::FillShape {
            expected,
            actual: dense.len(),
        });
    }
    Ok(dense)
}
