//! Test fixtures and generators for Tranche.
//!
//! Sample bucket types, fill rules, and proptest strategies shared by the
//! workspace's tests. Nothing here is meant for production use.

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tranche_core::{BucketWidth, FillRule, TimeBucket, TimestampMs};

/// Minimal metric bucket: one gauge value per time slice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaugeBucket {
    pub start: TimestampMs,
    pub value: f64,
    /// Number of real samples aggregated; zero marks a synthesized bucket.
    pub samples: u32,
}

impl GaugeBucket {
    pub fn new(start: TimestampMs, value: f64) -> Self {
        Self {
            start,
            value,
            samples: 1,
        }
    }
}

impl TimeBucket for GaugeBucket {
    fn bucket_start(&self) -> TimestampMs {
        self.start
    }
}

/// Shorthand for a one-sample gauge bucket.
pub fn gauge(start: TimestampMs, value: f64) -> GaugeBucket {
    GaugeBucket::new(start, value)
}

/// Carry the previous gauge value forward into empty slices.
pub fn carry_forward() -> impl FillRule<GaugeBucket> {
    |prev: &GaugeBucket, start: TimestampMs| GaugeBucket {
        start,
        value: prev.value,
        samples: 0,
    }
}

/// Fill empty slices with zero.
pub fn zero_fill() -> impl FillRule<GaugeBucket> {
    |_prev: &GaugeBucket, start: TimestampMs| GaugeBucket {
        start,
        value: 0.0,
        samples: 0,
    }
}

/// OHLCV candle bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandleBucket {
    pub start: TimestampMs,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub trades: u32,
}

impl TimeBucket for CandleBucket {
    fn bucket_start(&self) -> TimestampMs {
        self.start
    }
}

/// A candle from a single trade at `price`.
pub fn candle(start: TimestampMs, price: f64, volume: f64) -> CandleBucket {
    CandleBucket {
        start,
        open: price,
        high: price,
        low: price,
        close: price,
        volume,
        trades: 1,
    }
}

/// Flat no-trade candle carried forward from the previous close.
pub fn flat_candle_fill() -> impl FillRule<CandleBucket> {
    |prev: &CandleBucket, start: TimestampMs| CandleBucket {
        start,
        open: prev.close,
        high: prev.close,
        low: prev.close,
        close: prev.close,
        volume: 0.0,
        trades: 0,
    }
}

/// Strategy: a start timestamp on the `width` grid.
pub fn aligned_start(width: BucketWidth) -> impl Strategy<Value = TimestampMs> {
    (0i64..10_000).prop_map(move |n| n * width.millis())
}

/// Strategy: an ascending sparse gauge series over `slots` grid positions
/// starting at `first_start`, keeping each slot with probability one half.
/// The first slot is always kept so the series can seed itself.
pub fn sparse_gauge_series(
    first_start: TimestampMs,
    width: BucketWidth,
    slots: usize,
) -> impl Strategy<Value = Vec<GaugeBucket>> {
    proptest::collection::vec(any::<bool>(), slots).prop_map(move |keep| {
        keep.into_iter()
            .enumerate()
            .filter(|(i, kept)| *i == 0 || *kept)
            .map(|(i, _)| gauge(first_start + (i as i64) * width.millis(), i as f64))
            .collect()
    })
}
