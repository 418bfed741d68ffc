//! The caller-supplied source of new records for one bucket.

use crate::{ArtifactProperties, BoxError};
use async_trait::async_trait;
use csvfile::CsvRecord;
use futures::stream::BoxStream;
use std::collections::HashMap;

/// A batch of records produced by a provider.
///
/// `position` is an opaque continuation token. It is handed back to
/// [`RecordProvider::count_remaining_chunks`] when the in-memory path gives up
/// and needs an estimate of how much data is left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk<T> {
    pub records: Vec<T>,
    pub position: String,
}

impl<T> Chunk<T> {
    pub fn new(records: Vec<T>, position: impl Into<String>) -> Self {
        Self {
            records,
            position: position.into(),
        }
    }
}

/// Drives what goes into a bucket's artifact.
///
/// The compactor owns the I/O and the mode decision; the provider owns the
/// domain rules: where new records come from, how duplicates are reduced and
/// which extra metadata is attached.
#[async_trait]
pub trait RecordProvider<T: CsvRecord>: Send + Sync {
    /// Called with the current artifact's properties (or `None` when there is
    /// no artifact yet). Returning `false` makes the whole compaction a no-op.
    fn should_compact(&self, existing: Option<&ArtifactProperties>) -> bool;

    /// Whether the records of the existing artifact are merged into the new
    /// one. Providers that regenerate the full bucket every time return
    /// `false`.
    fn use_existing_records(&self) -> bool;

    /// Whether an artifact holding only the header is written when there are
    /// no new records.
    fn write_empty_output(&self) -> bool;

    /// Streams the new records for `bucket`. Every call starts from the
    /// beginning.
    fn get_chunks(&self, bucket: u32) -> BoxStream<'_, Result<Chunk<T>, BoxError>>;

    /// Estimates how many chunks follow the one whose position is
    /// `last_position` (`None` means from the beginning).
    async fn count_remaining_chunks(
        &self,
        bucket: u32,
        last_position: Option<&str>,
    ) -> Result<usize, BoxError>;

    /// Reduces `records`, typically collapsing records that share a key.
    ///
    /// Called periodically with `is_final == false` while records accumulate
    /// and once more with `is_final == true` before the key uniqueness check.
    fn prune(&self, records: Vec<T>, is_final: bool) -> Vec<T>;

    /// Adds or overrides metadata attached to the uploaded artifact.
    fn add_artifact_metadata(&self, _metadata: &mut HashMap<String, String>) {}
}
