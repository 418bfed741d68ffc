//! The record contract shared by every CSV artifact.
//!
//! A record type implements [`CsvRecord`] for its per-row behaviour (the
//! bucket key it sorts and shards by, plus `serde` for the row encoding). The
//! per-type behaviour that does not depend on a row instance lives on a
//! separate [`RecordSchema`] strategy object that is passed explicitly to the
//! writer, reader and compactor.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::borrow::Cow;
use std::hash::Hash;

/// One row of a compacted CSV artifact.
///
/// Rows are serialized with `serde` in field order, so the order of the
/// struct fields must match [`RecordSchema::header`].
pub trait CsvRecord: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// The string that decides both which bucket owns this record and where
    /// it sorts inside that bucket's artifact.
    fn bucket_key(&self) -> Cow<'_, str>;
}

/// Static, per-type behaviour for a [`CsvRecord`].
pub trait RecordSchema<T: CsvRecord>: Send + Sync {
    /// The identity of a record. Must be unique within a bucket after the
    /// final prune.
    type Key: Eq + Hash;

    /// Human readable name used in logs and diagnostics.
    fn record_type(&self) -> &str;

    /// Column names written as the first CSV line.
    fn header(&self) -> &[&str];

    /// Names of the columns that make up [`Self::Key`].
    fn key_fields(&self) -> &[&str];

    /// Extracts the identity of `record`.
    ///
    /// Records with equal keys must have equal [`CsvRecord::bucket_key`]s.
    /// Disk-based compaction checks uniqueness per subdivision, and the
    /// subdivision is chosen from the bucket key, so duplicates that differ
    /// in bucket key would go undetected there.
    fn key(&self, record: &T) -> Self::Key;

    /// Returns `true` when `a` and `b` have the same identity.
    fn key_equals(&self, a: &T, b: &T) -> bool {
        self.key(a) == self.key(b)
    }
}

/// Stable-sorts `records` ascending by bucket key.
///
/// Records sharing a bucket key keep their relative order.
pub fn sort_by_bucket_key<T: CsvRecord>(records: &mut [T]) {
    records.sort_by(|a, b| a.bucket_key().cmp(&b.bucket_key()));
}

/// Returns `true` if `records` is non-decreasing by bucket key.
#[must_use]
pub fn is_sorted_by_bucket_key<T: CsvRecord>(records: &[T]) -> bool {
    records
        .windows(2)
        .all(|pair| pair[0].bucket_key() <= pair[1].bucket_key())
}
