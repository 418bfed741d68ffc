/// Orchestration of a single bucket compaction.
///
/// Looks at the existing artifact, lets the provider veto the run, then picks
/// the in-memory or the big-mode path. The path that runs hands its output to
/// the finalizer.
use crate::artifact::artifact_path;
use crate::memory::MemoryLoad;
use crate::mode::{subdivisions_for_existing, BigModeReason};
use crate::{CsvRecordStorage, RecordProvider, Result};
use csvfile::{CsvRecord, RecordSchema};
use object_store::path::Path;
use std::time::Instant;
use tracing::{info, info_span, Instrument};

/// What a call to [`CsvRecordStorage::compact`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactOutcome {
    /// The provider's `should_compact` returned `false`.
    Skipped,
    /// There were no new records and the provider does not want an empty
    /// artifact written. Nothing was uploaded.
    NoData,
    /// A new artifact was uploaded.
    Written(CompactSummary),
}

/// Which compaction path produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionMode {
    InMemory,
    BigMode { subdivisions: usize },
}

/// Details about an uploaded artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactSummary {
    pub mode: CompactionMode,
    pub record_count: u64,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    /// `false` when the new body is byte-identical to the previous artifact.
    pub changed: bool,
    pub e_tag: Option<String>,
}

/// The bucket a compaction works on.
#[derive(Debug)]
pub(crate) struct Target<'a> {
    pub bucket: u32,
    pub record_type: &'a str,
    pub path: Path,
}

impl CsvRecordStorage {
    /// Merges new records from `provider` into the artifact for `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`](crate::Error::Conflict) if the artifact
    /// changed while the compaction ran, and
    /// [`Error::DuplicateKeys`](crate::Error::DuplicateKeys) if the provider's
    /// final prune left two records with the same key. Nothing is written in
    /// either case.
    pub async fn compact<T, P, S>(
        &self,
        provider: &P,
        schema: &S,
        container: &str,
        bucket: u32,
    ) -> Result<CompactOutcome>
    where
        T: CsvRecord,
        P: RecordProvider<T> + ?Sized,
        S: RecordSchema<T> + ?Sized,
    {
        let span = info_span!(
            "compact",
            container,
            bucket,
            record_type = schema.record_type()
        );
        let target = Target {
            bucket,
            record_type: schema.record_type(),
            path: artifact_path(container, bucket),
        };
        self.run_compaction(provider, schema, &target)
            .instrument(span)
            .await
    }

    async fn run_compaction<T, P, S>(
        &self,
        provider: &P,
        schema: &S,
        target: &Target<'_>,
    ) -> Result<CompactOutcome>
    where
        T: CsvRecord,
        P: RecordProvider<T> + ?Sized,
        S: RecordSchema<T> + ?Sized,
    {
        let started = Instant::now();
        let existing = self.fetch_properties(&target.path).await?;

        if !provider.should_compact(existing.as_ref()) {
            info!("provider declined compaction");
            return Ok(CompactOutcome::Skipped);
        }

        let threshold = self.config.big_mode_record_threshold as u64;
        let existing_records = existing.as_ref().and_then(|e| e.record_count());

        let outcome = match existing_records {
            Some(existing_records) if existing_records > threshold => {
                let subdivisions = subdivisions_for_existing(
                    existing_records,
                    self.config.big_mode_subdivision_size,
                );
                info!(
                    existing_records,
                    threshold,
                    subdivisions,
                    "existing artifact is large, using big mode"
                );
                self.compact_big_mode::<T, P, S>(
                    provider,
                    schema,
                    target,
                    existing,
                    subdivisions,
                    BigModeReason::ExistingRecords,
                )
                .await?
            }
            _ => match self.load_new_records::<T, P, S>(provider, schema, target).await? {
                MemoryLoad::NoData => {
                    info!("no new records, nothing to write");
                    CompactOutcome::NoData
                }
                MemoryLoad::SwitchToBigMode { subdivisions } => {
                    self.compact_big_mode::<T, P, S>(
                        provider,
                        schema,
                        target,
                        existing,
                        subdivisions,
                        BigModeReason::NewRecords,
                    )
                    .await?
                }
                MemoryLoad::Loaded(records) => {
                    self.compact_in_memory(provider, schema, target, records, existing)
                        .await?
                }
            },
        };

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "compaction finished");
        Ok(outcome)
    }
}
