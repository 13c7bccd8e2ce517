//! Tranche Core - Bucket Types and Trait Seams
//!
//! Pure data structures and the trait seams shared by every other crate.
//! This crate contains no engine logic - alignment, gap filling, and the
//! cache orchestration all live in `tranche-storage`.

pub mod bucket;
pub mod error;
pub mod range;

pub use bucket::{BucketWidth, FillRule, TimeBucket, TimestampMs};
pub use error::{IntegrityError, SourceError, StoreError, TrancheError, TrancheResult};
pub use range::{RangeReadout, RangeResolution, SearchRange, TimeRange};
