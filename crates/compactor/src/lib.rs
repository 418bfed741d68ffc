//! # compactor - per-bucket CSV compaction
//!
//! Merges new records from a [`RecordProvider`] with a bucket's existing
//! compacted artifact, prunes the union down to one record per key, sorts it
//! by bucket key and writes it back as a single gzip-compressed CSV object,
//! guarded by an optimistic-concurrency precondition.
//!
//! ## Flow
//!
//! ```text
//! compact(provider, schema, container, bucket)
//!   |
//!   | HEAD existing artifact ──> should_compact? ── no ──> Skipped
//!   |
//!   | recordCount > threshold ──────────────────────────┐
//!   |                                                   |
//!   v                                                   v
//! memory.rs: stream chunks into a Vec        big_mode.rs: S temp files
//!   |  (running count > threshold) ─── switch ──>  partition new + existing
//!   |                                              prune each file
//!   |  + existing records                          k-way merge -> gzip file
//!   |  final prune, gzip in memory                      |
//!   v                                                   v
//!                 finalize.rs: conditional put (create / if-match)
//! ```
//!
//! Either path produces the same bytes for the same inputs.
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                                |
//! |----------------|--------------------------------------------------------|
//! | [`lib.rs`]     | `CsvRecordStorage` struct and constructor              |
//! | [`storage`]    | `initialize`, `read`, `list_compacted_buckets`, URLs   |
//! | [`compact`]    | orchestrator, `CompactOutcome`                         |
//! | [`memory`]     | in-memory compaction path                              |
//! | [`big_mode`]   | disk-based compaction with subdivisions                |
//! | [`finalize`]   | metadata and conditional upload                        |
//! | [`prune`]      | reducer, uniqueness check, sort                        |
//! | [`mode`]       | subdivision count calculations                         |
//! | [`artifact`]   | artifact naming and `ArtifactProperties`               |
//! | [`provider`]   | `RecordProvider` trait, `Chunk`                        |

pub mod artifact;
mod big_mode;
mod compact;
mod error;
mod finalize;
mod memory;
pub mod mode;
pub mod provider;
pub mod prune;
mod storage;
mod temp;

pub use artifact::{artifact_name, artifact_path, ArtifactProperties};
pub use compact::{CompactOutcome, CompactSummary, CompactionMode};
pub use config::CompactionConfig;
pub use error::{BoxError, Error, Result};
pub use provider::{Chunk, RecordProvider};

use object_store::ObjectStore;
use std::sync::Arc;
use url::Url;

/// Reads and compacts bucketed CSV artifacts stored in an object store.
///
/// Holds no per-bucket state; any number of compactions for different
/// buckets may run concurrently against one instance. Compactions of the
/// same bucket race on the conditional write and at most one succeeds.
#[derive(Debug, Clone)]
pub struct CsvRecordStorage {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) config: CompactionConfig,
    /// Public URL the container paths are resolved against. Always ends in
    /// `/`.
    pub(crate) base_url: Url,
}

impl CsvRecordStorage {
    /// Creates a storage service over `store`.
    ///
    /// `base_url` is the public address of the store's root; artifact URLs are
    /// built as `{base_url}/{container}/compact_{bucket}.csv.gz`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `config` does not validate.
    pub fn new(store: Arc<dyn ObjectStore>, config: CompactionConfig, mut base_url: Url) -> Result<Self> {
        config.validate()?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            store,
            config,
            base_url,
        })
    }

    #[must_use]
    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// The bucket a record with `bucket_key` belongs to.
    #[must_use]
    pub fn bucket_for(&self, bucket_key: &str) -> u32 {
        bucketing::bucket_for(self.config.bucket_count, bucket_key)
    }
}

#[cfg(test)]
mod tests;
