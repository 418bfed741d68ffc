use crate::prune::keep_latest_by_key;
use crate::*;
use futures::stream::{self, BoxStream, StreamExt};
use object_store::memory::InMemory;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use url::Url;

pub const CONTAINER: &str = "packages";
pub const BASE_URL: &str = "https://storage.example.test/artifacts";

// -------------------- Record fixture --------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub id: String,
    pub version: String,
    pub listed: bool,
    pub updated: u64,
}

impl PackageVersion {
    pub fn new(id: &str, version: &str, updated: u64) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
            listed: true,
            updated,
        }
    }
}

impl csvfile::CsvRecord for PackageVersion {
    fn bucket_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PackageVersionSchema;

impl csvfile::RecordSchema<PackageVersion> for PackageVersionSchema {
    type Key = (String, String);

    fn record_type(&self) -> &str {
        "PackageVersion"
    }

    fn header(&self) -> &[&str] {
        &["id", "version", "listed", "updated"]
    }

    fn key_fields(&self) -> &[&str] {
        &["id", "version"]
    }

    fn key(&self, record: &PackageVersion) -> Self::Key {
        (record.id.clone(), record.version.clone())
    }
}

/// `count` records with distinct ids `{prefix}-{i}`, all version 1.0.0.
pub fn versions(prefix: &str, count: usize, updated: u64) -> Vec<PackageVersion> {
    (0..count)
        .map(|i| PackageVersion::new(&format!("{prefix}-{i:04}"), "1.0.0", updated))
        .collect()
}

/// Splits `records` into chunks of `size`.
pub fn chunked(records: Vec<PackageVersion>, size: usize) -> Vec<Vec<PackageVersion>> {
    records.chunks(size).map(<[PackageVersion]>::to_vec).collect()
}

// -------------------- Provider fixture --------------------

/// A provider backed by a fixed list of chunks.
#[derive(Debug)]
pub struct TestProvider {
    pub chunks: Vec<Vec<PackageVersion>>,
    pub use_existing: bool,
    pub write_empty: bool,
    pub compact: bool,
    /// When `false`, `prune` returns its input unchanged.
    pub dedupe: bool,
    /// Index of a chunk that fails instead of being yielded.
    pub fail_at: Option<usize>,
    pub extra_metadata: Vec<(String, String)>,
    /// `(input length, is_final)` of every `prune` call.
    pub prune_calls: Mutex<Vec<(usize, bool)>>,
    /// `last_position` of every `count_remaining_chunks` call.
    pub remaining_queries: Mutex<Vec<Option<String>>>,
}

impl TestProvider {
    /// Merges with the existing artifact and keeps the newest record per key.
    pub fn merging(chunks: Vec<Vec<PackageVersion>>) -> Self {
        Self {
            chunks,
            use_existing: true,
            write_empty: false,
            compact: true,
            dedupe: true,
            fail_at: None,
            extra_metadata: Vec::new(),
            prune_calls: Mutex::new(Vec::new()),
            remaining_queries: Mutex::new(Vec::new()),
        }
    }

    /// Rewrites the artifact from scratch on every run, empty or not.
    pub fn replacing(chunks: Vec<Vec<PackageVersion>>) -> Self {
        Self {
            use_existing: false,
            write_empty: true,
            ..Self::merging(chunks)
        }
    }

    pub fn final_prunes(&self) -> usize {
        self.prune_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, is_final)| *is_final)
            .count()
    }

    pub fn partial_prunes(&self) -> usize {
        self.prune_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, is_final)| !*is_final)
            .count()
    }
}

#[async_trait::async_trait]
impl RecordProvider<PackageVersion> for TestProvider {
    fn should_compact(&self, _existing: Option<&ArtifactProperties>) -> bool {
        self.compact
    }

    fn use_existing_records(&self) -> bool {
        self.use_existing
    }

    fn write_empty_output(&self) -> bool {
        self.write_empty
    }

    fn get_chunks(&self, _bucket: u32) -> BoxStream<'_, Result<Chunk<PackageVersion>, BoxError>> {
        stream::iter(self.chunks.iter().enumerate().map(move |(i, records)| {
            if self.fail_at == Some(i) {
                return Err(BoxError::from(format!("chunk {i} is unavailable")));
            }
            Ok(Chunk::new(records.clone(), i.to_string()))
        }))
        .boxed()
    }

    async fn count_remaining_chunks(
        &self,
        _bucket: u32,
        last_position: Option<&str>,
    ) -> Result<usize, BoxError> {
        self.remaining_queries
            .lock()
            .unwrap()
            .push(last_position.map(str::to_string));
        let consumed = match last_position {
            Some(position) => position.parse::<usize>()? + 1,
            None => 0,
        };
        Ok(self.chunks.len().saturating_sub(consumed))
    }

    fn prune(&self, records: Vec<PackageVersion>, is_final: bool) -> Vec<PackageVersion> {
        self.prune_calls.lock().unwrap().push((records.len(), is_final));
        if self.dedupe {
            keep_latest_by_key(&PackageVersionSchema, records, |r| r.updated)
        } else {
            records
        }
    }

    fn add_artifact_metadata(&self, metadata: &mut HashMap<String, String>) {
        for (key, value) in &self.extra_metadata {
            metadata.insert(key.clone(), value.clone());
        }
    }
}

// -------------------- Storage fixture --------------------

pub fn test_config(temp_dir: &Path, threshold: usize) -> CompactionConfig {
    CompactionConfig {
        big_mode_record_threshold: threshold,
        big_mode_subdivision_size: 10,
        prune_every_n_chunks: 2,
        initial_read_buffer_size: 256,
        max_read_buffer_size: 64 * 1024,
        temp_dir: temp_dir.to_path_buf(),
        ..CompactionConfig::default()
    }
}

/// An in-memory store plus a storage service with its own scratch directory.
pub struct Fixture {
    pub store: Arc<InMemory>,
    pub storage: CsvRecordStorage,
    _temp: TempDir,
}

impl Fixture {
    pub fn new(threshold: usize) -> anyhow::Result<Self> {
        Self::with_store(Arc::new(InMemory::new()), threshold)
    }

    /// A second service over the same store, with a different threshold.
    pub fn with_store(store: Arc<InMemory>, threshold: usize) -> anyhow::Result<Self> {
        let temp = tempfile::tempdir()?;
        let storage = CsvRecordStorage::new(
            Arc::clone(&store) as Arc<dyn ObjectStore>,
            test_config(&temp.path().join("scratch"), threshold),
            Url::parse(BASE_URL)?,
        )?;
        Ok(Self {
            store,
            storage,
            _temp: temp,
        })
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.storage.config().temp_dir
    }

    /// Files left behind in the scratch directory.
    pub fn leftover_files(&self) -> anyhow::Result<usize> {
        if !self.scratch_dir().exists() {
            return Ok(0);
        }
        Ok(std::fs::read_dir(self.scratch_dir())?.count())
    }

    pub async fn compact<P: RecordProvider<PackageVersion>>(
        &self,
        provider: &P,
        bucket: u32,
    ) -> Result<CompactOutcome> {
        self.storage
            .compact(provider, &PackageVersionSchema, CONTAINER, bucket)
            .await
    }

    pub async fn read(&self, bucket: u32) -> Result<Vec<PackageVersion>> {
        self.storage
            .read(&PackageVersionSchema, CONTAINER, bucket)
            .await
    }

    /// Raw compressed body of the artifact for `bucket`.
    pub async fn raw_artifact(&self, bucket: u32) -> anyhow::Result<bytes::Bytes> {
        let path = artifact_path(CONTAINER, bucket);
        Ok(self.store.get(&path).await?.bytes().await?)
    }
}

pub fn written(outcome: CompactOutcome) -> CompactSummary {
    match outcome {
        CompactOutcome::Written(summary) => summary,
        other => panic!("expected an upload, got {other:?}"),
    }
}

// -------------------- Concurrent writer --------------------

/// Wraps a [`TestProvider`] and overwrites the artifact from "another
/// writer" while the first chunk is being produced.
pub struct RacingProvider {
    pub inner: TestProvider,
    pub store: Arc<InMemory>,
    pub bucket: u32,
}

pub const RACE_BODY: &[u8] = b"written by someone else";

#[async_trait::async_trait]
impl RecordProvider<PackageVersion> for RacingProvider {
    fn should_compact(&self, existing: Option<&ArtifactProperties>) -> bool {
        self.inner.should_compact(existing)
    }

    fn use_existing_records(&self) -> bool {
        self.inner.use_existing_records()
    }

    fn write_empty_output(&self) -> bool {
        self.inner.write_empty_output()
    }

    fn get_chunks(&self, bucket: u32) -> BoxStream<'_, Result<Chunk<PackageVersion>, BoxError>> {
        let store = Arc::clone(&self.store);
        let path = artifact_path(CONTAINER, self.bucket);
        let race = stream::once(async move {
            store
                .put(&path, object_store::PutPayload::from_static(RACE_BODY))
                .await?;
            Ok::<_, BoxError>(None)
        });
        let chunks = self.inner.get_chunks(bucket).map(|chunk| chunk.map(Some));
        race.chain(chunks)
            .filter_map(|item| async move { item.transpose() })
            .boxed()
    }

    async fn count_remaining_chunks(
        &self,
        bucket: u32,
        last_position: Option<&str>,
    ) -> Result<usize, BoxError> {
        self.inner.count_remaining_chunks(bucket, last_position).await
    }

    fn prune(&self, records: Vec<PackageVersion>, is_final: bool) -> Vec<PackageVersion> {
        self.inner.prune(records, is_final)
    }
}
