//! Decides how many subdivisions a big-mode run uses.
//!
//! Two signals can push a compaction into big mode:
//!
//! ```text
//! existing artifact recordCount > threshold
//!     subdivisions = clamp(round(existing / size), 2, 50)
//!
//! new records observed in memory > threshold
//!     average      = ceil(observed / chunks_seen)
//!     estimate     = average * (chunks_seen + chunks_remaining)
//!     subdivisions = clamp(ceil(estimate / size), 2, 50)
//! ```
//!
//! The clamp keeps the number of open files and the per-file size bounded.

/// Fewest subdivisions a big-mode run will use.
pub const MIN_SUBDIVISIONS: usize = 2;
/// Most subdivisions a big-mode run will use.
pub const MAX_SUBDIVISIONS: usize = 50;

/// Why a compaction runs in big mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BigModeReason {
    /// The existing artifact's `recordCount` is above the threshold.
    ExistingRecords,
    /// Streaming the new records overran the threshold.
    NewRecords,
}

/// Subdivisions for an existing artifact holding `existing_records` records.
#[must_use]
pub fn subdivisions_for_existing(existing_records: u64, subdivision_size: usize) -> usize {
    clamp_subdivisions((existing_records as f64 / subdivision_size as f64).round())
}

/// Estimated total record count and the resulting subdivisions, after the
/// in-memory path gave up having seen `observed_records` records across
/// `observed_chunks` chunks with `remaining_chunks` still to come.
#[must_use]
pub fn subdivisions_for_estimate(
    observed_records: u64,
    observed_chunks: u64,
    remaining_chunks: u64,
    subdivision_size: usize,
) -> (u64, usize) {
    let per_chunk = (observed_records as f64 / observed_chunks.max(1) as f64).ceil();
    let estimate = per_chunk * (observed_chunks + remaining_chunks) as f64;
    let subdivisions = clamp_subdivisions((estimate / subdivision_size as f64).ceil());
    (estimate as u64, subdivisions)
}

fn clamp_subdivisions(value: f64) -> usize {
    // `as` saturates, so NaN and negative values land on the minimum.
    (value as usize).clamp(MIN_SUBDIVISIONS, MAX_SUBDIVISIONS)
}
