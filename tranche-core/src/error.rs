//! Error types for Tranche operations
//!
//! All error types derive `Clone`: the coalescing layer shares one outcome
//! between every caller joined to an in-flight execution.

use thiserror::Error;

/// Sorted-set / scalar cache store failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store backend failed on {key}: {reason}")]
    Backend { key: String, reason: String },

    #[error("Could not encode value for {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Could not decode cached value at {key}: {reason}")]
    Decode { key: String, reason: String },
}

/// Authoritative bucket source failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Source query failed for {entity}: {reason}")]
    QueryFailed { entity: String, reason: String },
}

/// Invariant violations that abort the request.
///
/// There is no partial or best-effort fallback for these: serving past one
/// of them would silently return a wrong dense sequence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("Source returned unsorted buckets for {entity}: {prev_start} followed by {next_start}")]
    UnsortedSource {
        entity: String,
        prev_start: i64,
        next_start: i64,
    },

    #[error("No bucket at or before {at} for {entity} despite earliest data at {earliest}")]
    SeedMissing {
        entity: String,
        at: i64,
        earliest: i64,
    },

    #[error("Seed bucket starts at {seed_start}, after the desired oldest start {oldest_start}")]
    SeedAfterOldest { seed_start: i64, oldest_start: i64 },

    #[error("Seed bucket at {seed_start} is off the {width}ms bucket grid")]
    SeedOffGrid { seed_start: i64, width: i64 },

    #[error("Fill bound {bound} is not aligned to bucket width {width}")]
    MisalignedBound { bound: i64, width: i64 },

    #[error("Inverted fill bounds: oldest {oldest_start} > newest {newest_start}")]
    InvertedBounds {
        oldest_start: i64,
        newest_start: i64,
    },

    #[error("Gap fill produced {actual} buckets where {expected} were expected")]
    FillShape { expected: usize, actual: usize },
}

/// Master error type for all Tranche operations.
#[derive(Debug, Clone, Error)]
pub enum TrancheError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Integrity violation: {0}")]
    Integrity(#[from] IntegrityError),

    #[error("In-flight work for {key} was dropped before completing")]
    InFlightAborted { key: String },
}

/// Result type alias for Tranche operations.
pub type TrancheResult<T> = Result<T, TrancheError>;

// =============================================================================
// TESTS
// =============================================================================
