/// In-memory compaction path.
///
/// New records are buffered in a `Vec` while they are streamed from the
/// provider. If the running count exceeds the big-mode threshold the buffer
/// is dropped and the caller restarts in big mode, which streams the chunks
/// again from the beginning.
use crate::compact::Target;
use crate::mode::subdivisions_for_estimate;
use crate::prune::prune;
use crate::{
    ArtifactProperties, CompactOutcome, CompactionMode, CsvRecordStorage, Error, RecordProvider,
    Result,
};
use csvfile::{compress_records, CsvRecord, RecordSchema};
use futures::TryStreamExt;
use std::time::Instant;
use tracing::{debug, info};

/// Result of streaming the new records into memory.
#[derive(Debug)]
pub(crate) enum MemoryLoad<T> {
    Loaded(Vec<T>),
    NoData,
    SwitchToBigMode { subdivisions: usize },
}

impl CsvRecordStorage {
    pub(crate) async fn load_new_records<T, P, S>(
        &self,
        provider: &P,
        schema: &S,
        target: &Target<'_>,
    ) -> Result<MemoryLoad<T>>
    where
        T: CsvRecord,
        P: RecordProvider<T> + ?Sized,
        S: RecordSchema<T> + ?Sized,
    {
        let started = Instant::now();
        let threshold = self.config.big_mode_record_threshold as u64;
        let prune_every = self.config.prune_every_n_chunks as u64;

        let mut records: Vec<T> = Vec::new();
        let mut chunk_count = 0u64;
        let mut record_count = 0u64;
        let mut last_position: Option<String> = None;
        let mut over_threshold = false;

        let mut chunks = provider.get_chunks(target.bucket);
        while let Some(chunk) = chunks.try_next().await.map_err(Error::Provider)? {
            chunk_count += 1;
            record_count += chunk.records.len() as u64;
            last_position = Some(chunk.position);

            if record_count > threshold {
                over_threshold = true;
                break;
            }

            records.extend(chunk.records);
            if chunk_count.is_multiple_of(prune_every) {
                records = prune(provider, schema, records, false)?;
            }
        }
        drop(chunks);

        if over_threshold {
            // Big mode re-streams every chunk, the buffer is useless now.
            drop(records);
            let remaining = provider
                .count_remaining_chunks(target.bucket, last_position.as_deref())
                .await
                .map_err(Error::Provider)? as u64;
            let (estimated_records, subdivisions) = subdivisions_for_estimate(
                record_count,
                chunk_count,
                remaining,
                self.config.big_mode_subdivision_size,
            );
            info!(
                observed_records = record_count,
                observed_chunks = chunk_count,
                remaining_chunks = remaining,
                estimated_records,
                subdivisions,
                threshold,
                "too many new records for memory, switching to big mode"
            );
            return Ok(MemoryLoad::SwitchToBigMode { subdivisions });
        }

        debug!(
            records = records.len(),
            chunks = chunk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded new records into memory"
        );

        if records.is_empty() && !provider.write_empty_output() {
            return Ok(MemoryLoad::NoData);
        }
        Ok(MemoryLoad::Loaded(records))
    }

    /// Merges the existing artifact into `records` when the provider asks for
    /// it, prunes, compresses and uploads.
    pub(crate) async fn compact_in_memory<T, P, S>(
        &self,
        provider: &P,
        schema: &S,
        target: &Target<'_>,
        mut records: Vec<T>,
        mut existing: Option<ArtifactProperties>,
    ) -> Result<CompactOutcome>
    where
        T: CsvRecord,
        P: RecordProvider<T> + ?Sized,
        S: RecordSchema<T> + ?Sized,
    {
        if provider.use_existing_records() {
            if let Some(properties) = existing.take() {
                existing = self
                    .append_existing_records(schema, &properties, &mut records)
                    .await?;
            }
        }

        let started = Instant::now();
        let records = prune(provider, schema, records, true)?;
        let compressed = compress_records(schema, &records)?;
        debug!(
            records = compressed.rows,
            uncompressed_size = compressed.uncompressed_size,
            compressed_size = compressed.bytes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "serialized artifact in memory"
        );

        let summary = self
            .upload::<T, P>(
                provider,
                target,
                existing.as_ref(),
                compressed.bytes,
                compressed.rows,
                compressed.uncompressed_size,
                CompactionMode::InMemory,
            )
            .await?;
        Ok(CompactOutcome::Written(summary))
    }

    /// Downloads the existing artifact and appends its records. Returns the
    /// properties the upload must be conditioned on: those of the downloaded
    /// version, or `None` if the artifact has disappeared.
    async fn append_existing_records<T, S>(
        &self,
        schema: &S,
        properties: &ArtifactProperties,
        records: &mut Vec<T>,
    ) -> Result<Option<ArtifactProperties>>
    where
        T: CsvRecord,
        S: RecordSchema<T> + ?Sized,
    {
        let Some(result) = self.open_existing(properties).await? else {
            debug!("existing artifact disappeared before download");
            return Ok(None);
        };

        let downloaded = ArtifactProperties::from_parts(&result.meta, &result.attributes);
        let body = result.bytes().await?;
        let existing_records: Vec<T> = self.decode(schema, downloaded.encoding(), body)?;
        debug!(
            existing_records = existing_records.len(),
            new_records = records.len(),
            "merged existing records"
        );
        records.extend(existing_records);
        Ok(Some(downloaded))
    }
}
