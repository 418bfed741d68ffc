/// Disk-based ("big mode") compaction.
///
/// Used when a bucket holds too many records to sort in memory. Records are
/// spread over `S` subdivision files by a second-level hash of their bucket
/// key, so every record sharing a key lands in the same file. Each file is
/// pruned on its own, then all of them are k-way merged into the final
/// compressed artifact.
///
/// ```text
/// new chunks ─┐                         ┌─ sub_0.csv ─ prune ─┐
///             ├─ subdivision_for(key) ──┼─ sub_1.csv ─ prune ─┼─ merge ─ gzip ─ upload
/// existing ───┘                         └─ sub_S.csv ─ prune ─┘
/// ```
///
/// Peak memory is one pruned subdivision plus one record per subdivision
/// during the merge.
use crate::compact::Target;
use crate::mode::{BigModeReason, MAX_SUBDIVISIONS, MIN_SUBDIVISIONS};
use crate::prune::prune;
use crate::temp::TempCsvFile;
use crate::{
    ArtifactProperties, CompactOutcome, CompactionMode, CsvRecordStorage, Error, RecordProvider,
    Result,
};
use bucketing::SubdivisionRouter;
use csvfile::{
    read_all, write_records, CountingWriter, CsvRecord, CsvRecordReader, CsvRecordWriter,
    Encoding, MergeIterator, RecordSchema,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::TryStreamExt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

type SubdivisionWriter = CsvRecordWriter<BufWriter<File>>;

/// Subdivision files of one run plus their open writers.
///
/// Writers are declared first so they are closed before the files are
/// deleted.
struct Subdivisions {
    writers: Vec<SubdivisionWriter>,
    files: Vec<TempCsvFile>,
    router: SubdivisionRouter,
}

impl Subdivisions {
    fn create<T, S>(dir: &Path, prefix: &str, count: usize, schema: &S) -> Result<Self>
    where
        T: CsvRecord,
        S: RecordSchema<T> + ?Sized,
    {
        let mut files = Vec::with_capacity(count);
        let mut writers = Vec::with_capacity(count);
        for index in 0..count {
            let (file, handle) = TempCsvFile::create(dir, &format!("{prefix}_{index}_"), ".csv")?;
            files.push(file);
            writers.push(CsvRecordWriter::new::<T, S>(BufWriter::new(handle), schema)?);
        }

        Ok(Self {
            writers,
            files,
            router: SubdivisionRouter::new(count),
        })
    }

    fn write<T: CsvRecord>(&mut self, record: &T) -> Result<()> {
        let index = self.router.route(&record.bucket_key());
        self.writers[index].write(record)?;
        Ok(())
    }

    /// Flushes and closes every writer, leaving only the files behind.
    fn finish_writing(self) -> Result<Vec<TempCsvFile>> {
        for writer in self.writers {
            let mut out = writer.into_inner()?;
            out.flush()?;
        }
        Ok(self.files)
    }
}

impl CsvRecordStorage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn compact_big_mode<T, P, S>(
        &self,
        provider: &P,
        schema: &S,
        target: &Target<'_>,
        mut existing: Option<ArtifactProperties>,
        subdivisions: usize,
        reason: BigModeReason,
    ) -> Result<CompactOutcome>
    where
        T: CsvRecord,
        P: RecordProvider<T> + ?Sized,
        S: RecordSchema<T> + ?Sized,
    {
        check_subdivisions(subdivisions)?;
        info!(subdivisions, ?reason, "starting big mode compaction");

        let dir = self.config.temp_dir.as_path();
        fs::create_dir_all(dir)?;
        let prefix = format!("{}_{}", target.record_type, target.bucket);
        let mut parts = Subdivisions::create::<T, S>(dir, &prefix, subdivisions, schema)?;

        // New records, partitioned by subdivision.
        let started = Instant::now();
        let mut chunk_count = 0u64;
        let mut new_records = 0u64;
        let mut chunks = provider.get_chunks(target.bucket);
        while let Some(chunk) = chunks.try_next().await.map_err(Error::Provider)? {
            chunk_count += 1;
            for record in &chunk.records {
                parts.write(record)?;
            }
            new_records += chunk.records.len() as u64;
        }
        drop(chunks);
        debug!(
            new_records,
            chunks = chunk_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "partitioned new records"
        );

        if new_records == 0 && !provider.write_empty_output() {
            info!("no new records, nothing to write");
            return Ok(CompactOutcome::NoData);
        }

        // Existing records, partitioned the same way.
        if provider.use_existing_records() {
            if let Some(properties) = existing.take() {
                existing = self
                    .partition_existing::<T, S>(schema, &properties, &prefix, &mut parts)
                    .await?;
            }
        }

        let files = parts.finish_writing()?;
        let (pruned_records, uncompressed_size) =
            self.prune_subdivisions::<T, P, S>(provider, schema, &files).await?;

        let (output, merged) =
            self.merge_subdivisions::<T, S>(schema, &files, &prefix, uncompressed_size)?;
        drop(files);

        verify_merge_count(pruned_records, merged.records)?;

        // Conditional puts cannot be multipart, so the body goes up in one
        // request.
        let body = tokio::fs::read(output.path()).await?;
        let summary = self
            .upload::<T, P>(
                provider,
                target,
                existing.as_ref(),
                body,
                merged.records,
                merged.uncompressed_size,
                CompactionMode::BigMode { subdivisions },
            )
            .await?;
        Ok(CompactOutcome::Written(summary))
    }

    /// Downloads the existing artifact to a temp file and routes its records
    /// into `parts`. Returns the properties of the downloaded version, or
    /// `None` if the artifact has disappeared.
    async fn partition_existing<T, S>(
        &self,
        schema: &S,
        properties: &ArtifactProperties,
        prefix: &str,
        parts: &mut Subdivisions,
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

        let started = Instant::now();
        let (download, handle) =
            TempCsvFile::create(&self.config.temp_dir, &format!("{prefix}_existing_"), ".csv.gz")?;
        let mut out = tokio::fs::File::from_std(handle);
        let mut body = result.into_stream();
        while let Some(bytes) = body.try_next().await? {
            out.write_all(&bytes).await?;
        }
        out.flush().await?;
        drop(out);
        debug!(
            size = downloaded.size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "downloaded existing artifact"
        );

        let existing_records = self.route_existing_file::<T, S>(
            schema,
            download.path(),
            downloaded.encoding(),
            parts,
        )?;
        debug!(existing_records, "partitioned existing records");
        Ok(Some(downloaded))
    }

    fn route_existing_file<T, S>(
        &self,
        schema: &S,
        path: &Path,
        encoding: Encoding,
        parts: &mut Subdivisions,
    ) -> Result<u64>
    where
        T: CsvRecord,
        S: RecordSchema<T> + ?Sized,
    {
        let input = encoding.decode(BufReader::new(File::open(path)?));
        let reader: CsvRecordReader<_, T> =
            CsvRecordReader::new(input, schema, self.config.max_read_buffer_size)?;

        let mut count = 0u64;
        for record in reader {
            parts.write(&record?)?;
            count += 1;
        }
        Ok(count)
    }

    /// Runs the final prune on each subdivision and rewrites it in place.
    /// Returns the total record count and the summed CSV size.
    ///
    /// Yields to the executor between subdivisions, each one being a
    /// blocking read, prune and rewrite.
    async fn prune_subdivisions<T, P, S>(
        &self,
        provider: &P,
        schema: &S,
        files: &[TempCsvFile],
    ) -> Result<(u64, u64)>
    where
        T: CsvRecord,
        P: RecordProvider<T> + ?Sized,
        S: RecordSchema<T> + ?Sized,
    {
        let mut total_records = 0u64;
        let mut total_size = 0u64;

        for (index, file) in files.iter().enumerate() {
            let started = Instant::now();
            let original_size = fs::metadata(file.path())?.len();
            info!(
                subdivision = index + 1,
                subdivisions = files.len(),
                size = original_size,
                "pruning subdivision"
            );

            let records: Vec<T> = read_all(
                BufReader::new(File::open(file.path())?),
                schema,
                self.config.max_read_buffer_size,
            )?;
            let loaded = records.len();
            let records = prune(provider, schema, records, true)?;

            let out = OpenOptions::new().write(true).open(file.path())?;
            let size = write_records(BufWriter::new(&out), schema, &records)?;
            if size < original_size {
                out.set_len(size)?;
            }

            debug!(
                subdivision = index + 1,
                loaded,
                kept = records.len(),
                size,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "pruned subdivision"
            );
            total_records += records.len() as u64;
            total_size += size;
            tokio::task::yield_now().await;
        }

        Ok((total_records, total_size))
    }

    /// K-way merges the pruned subdivisions into one gzip file.
    fn merge_subdivisions<T, S>(
        &self,
        schema: &S,
        files: &[TempCsvFile],
        prefix: &str,
        uncompressed_size: u64,
    ) -> Result<(TempCsvFile, MergedOutput)>
    where
        T: CsvRecord,
        S: RecordSchema<T> + ?Sized,
    {
        let started = Instant::now();
        let (output, handle) =
            TempCsvFile::create(&self.config.temp_dir, &format!("{prefix}_final_"), ".csv.gz")?;
        // Reserve the plain-text size up front, trimmed once compressed.
        handle.set_len(uncompressed_size)?;

        let mut readers = Vec::with_capacity(files.len());
        for file in files {
            let reader: CsvRecordReader<_, T> = CsvRecordReader::new(
                BufReader::new(File::open(file.path())?),
                schema,
                self.config.max_read_buffer_size,
            )?;
            readers.push(reader);
        }

        let encoder = GzEncoder::new(
            CountingWriter::new(BufWriter::new(handle)),
            Compression::default(),
        );
        let mut writer = CsvRecordWriter::new::<T, S>(CountingWriter::new(encoder), schema)?;
        let mut merge = MergeIterator::new(readers);
        while let Some(record) = merge.next_entry()? {
            writer.write(&record)?;
        }
        let records = writer.rows();

        let plain = writer.into_inner()?;
        let written_uncompressed = plain.count();
        let mut compressed = plain.into_inner().finish()?;
        compressed.flush()?;
        let compressed_size = compressed.count();
        let handle = compressed
            .into_inner()
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))?;
        if handle.metadata()?.len() > compressed_size {
            handle.set_len(compressed_size)?;
        }
        handle.sync_all()?;

        info!(
            records,
            uncompressed_size = written_uncompressed,
            compressed_size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "merged subdivisions"
        );

        Ok((
            output,
            MergedOutput {
                records,
                uncompressed_size: written_uncompressed,
            },
        ))
    }
}

pub(crate) fn check_subdivisions(subdivisions: usize) -> Result<()> {
    if !(MIN_SUBDIVISIONS..=MAX_SUBDIVISIONS).contains(&subdivisions) {
        return Err(Error::InvalidSubdivisions(subdivisions));
    }
    Ok(())
}

/// Every pruned record must come out of the merge exactly once.
pub(crate) fn verify_merge_count(expected: u64, actual: u64) -> Result<()> {
    if expected != actual {
        return Err(Error::MergeCountMismatch { expected, actual });
    }
    Ok(())
}

struct MergedOutput {
    records: u64,
    uncompressed_size: u64,
}
