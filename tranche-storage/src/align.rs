//! Bucket-boundary arithmetic and effective-search-range resolution.
//!
//! Everything here is pure integer arithmetic over epoch-millisecond
//! timestamps. The engine composes these functions with I/O elsewhere;
//! nothing in this module suspends or fails.

use tranche_core::{BucketWidth, RangeResolution, SearchRange, TimeRange, TimestampMs};

/// Floor `ts` to the nearest bucket boundary at or below it.
///
/// Euclidean division keeps pre-epoch timestamps on the same grid.
pub fn align_floor(ts: TimestampMs, width: BucketWidth) -> TimestampMs {
    let w = width.millis();
    ts.div_euclid(w) * w
}

/// Ceil `ts` to the nearest bucket boundary at or above it.
pub fn align_ceil(ts: TimestampMs, width: BucketWidth) -> TimestampMs {
    let w = width.millis();
    let rem = ts.rem_euclid(w);
    if rem == 0 {
        ts
    } else {
        ts - rem + w
    }
}

/// Number of buckets on the grid from `oldest_start` to `newest_start`
/// inclusive, or zero when the bounds are inverted.
///
/// Used both to prove cache completeness and to size gap-filled output.
pub fn expected_bucket_count(
    oldest_start: TimestampMs,
    newest_start: TimestampMs,
    width: BucketWidth,
) -> usize {
    if oldest_start > newest_start {
        return 0;
    }
    (((newest_start - oldest_start) / width.millis()) + 1) as usize
}

/// Resolve a requested window against current time and data availability.
///
/// The first serviceable bucket is the later of the request's aligned start
/// and the earliest data's aligned start; the end is clamped to `now` and
/// floored, so a bucket that starts exactly at `now` is not closed (it has
/// no data yet). When no complete closed bucket survives the clamping, the
/// outcome is [`RangeResolution::BeforeEarliest`].
pub fn resolve_search_range(
    requested: TimeRange,
    now: TimestampMs,
    width: BucketWidth,
    earliest: Option<TimestampMs>,
) -> RangeResolution {
    let Some(earliest) = earliest else {
        return RangeResolution::NoData;
    };

    let first_bucket_start = align_floor(requested.start, width).max(align_floor(earliest, width));
    let clamped_end = requested.end.min(now);
    let last_closed_bucket_end = align_floor(clamped_end, width);
    let last_closed_bucket_start = last_closed_bucket_end - width.millis();

    if first_bucket_start > last_closed_bucket_start {
        return RangeResolution::BeforeEarliest;
    }

    RangeResolution::Serviceable(SearchRange {
        first_bucket_start,
        last_closed_bucket_start,
        last_closed_bucket_end,
    })
}

/// True when the still-accumulating bucket after `last_closed_end` overlaps
/// the caller's window.
///
/// All three comparisons are strict: `now` exactly on the boundary means the
/// next bucket has not begun and yields false.
pub fn needs_open_bucket(
    now: TimestampMs,
    desired_end: TimestampMs,
    last_closed_end: TimestampMs,
    width: BucketWidth,
) -> bool {
    last_closed_end < now && now < last_closed_end + width.millis() && desired_end > last_closed_end
}

/// How the seed bucket for a gap fill is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedStrategy {
    /// The first source row starts exactly at the effective start and seeds
    /// itself.
    UseFirstResult,
    /// Fetch the nearest existing bucket at or before the effective start.
    FetchSeed,
}

/// Decide how to obtain the seed for a fill starting at `first_bucket_start`.
pub fn seed_strategy(
    first_row_start: Option<TimestampMs>,
    first_bucket_start: TimestampMs,
) -> SeedStrategy {
    match first_row_start {
        Some(start) if start == first_bucket_start => SeedStrategy::UseFirstResult,
        _ => SeedStrategy::FetchSeed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: BucketWidth = BucketWidth::HOUR;

    fn h(n: i64) -> TimestampMs {
        n * HOUR.millis()
    }

    #[test]
    fn test_align_floor() {
        assert_eq!(align_floor(h(5) + 1, HOUR), h(5));
        assert_eq!(align_floor(h(5), HOUR), h(5));
        assert_eq!(align_floor(h(6) - 1, HOUR), h(5));
    }

    #[test]
    fn test_align_ceil() {
        assert_eq!(align_ceil(h(5) + 1, HOUR), h(6));
        assert_eq!(align_ceil(h(5), HOUR), h(5));
        assert_eq!(align_ceil(h(6) - 1, HOUR), h(6));
    }

    #[test]
    fn test_alignment_before_epoch() {
        assert_eq!(align_floor(-1, HOUR), h(-1));
        assert_eq!(align_floor(h(-1), HOUR), h(-1));
        assert_eq!(align_ceil(-1, HOUR), 0);
        assert_eq!(align_ceil(h(-1) - 1, HOUR), h(-1));
    }

    #[test]
    fn test_expected_bucket_count() {
        assert_eq!(expected_bucket_count(h(0), h(0), HOUR), 1);
        assert_eq!(expected_bucket_count(h(0), h(3), HOUR), 4);
        assert_eq!(expected_bucket_count(h(3), h(0), HOUR), 0);
    }

    #[test]
    fn test_resolve_without_earliest_is_no_data() {
        let resolved = resolve_search_range(TimeRange::new(h(0), h(4)), h(10), HOUR, None);
        assert_eq!(resolved, RangeResolution::NoData);
    }

    #[test]
    fn test_resolve_clamps_end_to_now() {
        let resolved =
            resolve_search_range(TimeRange::new(h(0), h(100)), h(3), HOUR, Some(h(0)));
        assert_eq!(
            resolved,
            RangeResolution::Serviceable(SearchRange {
                first_bucket_start: h(0),
                last_closed_bucket_start: h(2),
                last_closed_bucket_end: h(3),
            })
        );
    }

    #[test]
    fn test_resolve_clamps_start_to_earliest() {
        let resolved =
            resolve_search_range(TimeRange::new(h(0), h(10)), h(10), HOUR, Some(h(4)));
        assert_eq!(
            resolved,
            RangeResolution::Serviceable(SearchRange {
                first_bucket_start: h(4),
                last_closed_bucket_start: h(9),
                last_closed_bucket_end: h(10),
            })
        );
    }

    #[test]
    fn test_resolve_request_before_any_data() {
        let resolved =
            resolve_search_range(TimeRange::new(h(0), h(2)), h(20), HOUR, Some(h(10)));
        assert_eq!(resolved, RangeResolution::BeforeEarliest);
    }

    #[test]
    fn test_resolve_request_inside_open_bucket() {
        // 10:15 - 10:45 with now at 10:30 and hourly buckets: the only
        // touched bucket is still open, so nothing is serviceable.
        let quarter = 15 * 60_000;
        let resolved = resolve_search_range(
            TimeRange::new(h(10) + quarter, h(10) + 3 * quarter),
            h(10) + 2 * quarter,
            HOUR,
            Some(h(0)),
        );
        assert_eq!(resolved, RangeResolution::BeforeEarliest);
    }

    #[test]
    fn test_resolve_bucket_starting_exactly_at_now_is_excluded() {
        // now sits on the h(12) boundary: the bucket starting there has no
        // data yet and must not be treated as closed.
        let resolved =
            resolve_search_range(TimeRange::new(h(0), h(13)), h(12), HOUR, Some(h(0)));
        assert_eq!(
            resolved,
            RangeResolution::Serviceable(SearchRange {
                first_bucket_start: h(0),
                last_closed_bucket_start: h(11),
                last_closed_bucket_end: h(12),
            })
        );
    }

    #[test]
    fn test_needs_open_bucket_boundary() {
        assert!(!needs_open_bucket(h(12), h(13), h(12), HOUR));
        assert!(needs_open_bucket(h(12) + 1, h(13), h(12), HOUR));
        assert!(!needs_open_bucket(h(13), h(14), h(12), HOUR));
    }

    #[test]
    fn test_needs_open_bucket_requires_window_overlap() {
        // now is inside the open bucket but the caller's window stops at the
        // last closed boundary.
        assert!(!needs_open_bucket(h(12) + 1, h(12), h(12), HOUR));
        assert!(!needs_open_bucket(h(12) + 1, h(11), h(12), HOUR));
    }

    #[test]
    fn test_seed_strategy_decision_table() {
        assert_eq!(seed_strategy(None, h(4)), SeedStrategy::FetchSeed);
        assert_eq!(seed_strategy(Some(h(4)), h(4)), SeedStrategy::UseFirstResult);
        assert_eq!(seed_strategy(Some(h(5)), h(4)), SeedStrategy::FetchSeed);
    }
}
