//! Read-side operations and helpers shared by both compaction paths.

use crate::artifact::{artifact_name, artifact_path, parse_artifact_name, CONTAINER_MARKER};
use crate::{ArtifactProperties, CsvRecordStorage, Error, Result};
use bytes::Bytes;
use csvfile::{read_all_with_retry, CsvRecord, Encoding, RecordSchema};
use object_store::path::Path;
use object_store::{GetOptions, GetResult, PutMode, PutOptions, PutPayload};
use std::io::Cursor;
use tracing::{debug, info};
use url::Url;

impl CsvRecordStorage {
    /// Prepares `container` for use by writing its marker object.
    ///
    /// Calling this for a container that is already initialized is a no-op.
    pub async fn initialize(&self, container: &str) -> Result<()> {
        let marker = Path::from(container).child(CONTAINER_MARKER);
        let options = PutOptions {
            mode: PutMode::Create,
            ..Default::default()
        };

        match self.store.put_opts(&marker, PutPayload::new(), options).await {
            Ok(_) => {
                info!(container, "initialized container");
                Ok(())
            }
            Err(object_store::Error::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Reads every record of the artifact for `bucket`.
    ///
    /// Returns an empty list when the bucket has no artifact yet.
    pub async fn read<T, S>(&self, schema: &S, container: &str, bucket: u32) -> Result<Vec<T>>
    where
        T: CsvRecord,
        S: RecordSchema<T> + ?Sized,
    {
        let path = artifact_path(container, bucket);
        let result = match self.store.get(&path).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let encoding = ArtifactProperties::from_parts(&result.meta, &result.attributes).encoding();
        let body = result.bytes().await?;
        let records = self.decode(schema, encoding, body)?;
        debug!(%path, records = records.len(), "read artifact");
        Ok(records)
    }

    /// Lists the buckets of `container` that have an artifact, ascending.
    pub async fn list_compacted_buckets(&self, container: &str) -> Result<Vec<u32>> {
        let prefix = Path::from(container);
        let listing = self.store.list_with_delimiter(Some(&prefix)).await?;

        let mut buckets: Vec<u32> = listing
            .objects
            .iter()
            .filter_map(|meta| meta.location.filename().and_then(parse_artifact_name))
            .collect();
        buckets.sort_unstable();
        Ok(buckets)
    }

    /// Public URL of the artifact for `bucket`. The artifact need not exist.
    pub fn get_artifact_url(&self, container: &str, bucket: u32) -> Result<Url> {
        let relative = format!("{}/{}", container.trim_matches('/'), artifact_name(bucket));
        Ok(self.base_url.join(&relative)?)
    }

    /// Properties of the artifact for `bucket`, or `None` if it does not exist.
    pub async fn get_artifact_properties(
        &self,
        container: &str,
        bucket: u32,
    ) -> Result<Option<ArtifactProperties>> {
        self.fetch_properties(&artifact_path(container, bucket)).await
    }

    pub(crate) async fn fetch_properties(&self, path: &Path) -> Result<Option<ArtifactProperties>> {
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        match self.store.get_opts(path, options).await {
            Ok(result) => Ok(Some(ArtifactProperties::from_parts(
                &result.meta,
                &result.attributes,
            ))),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Opens the body of the artifact described by `existing`, pinned to the
    /// ETag it was observed with.
    ///
    /// Returns `Ok(None)` if the artifact has been deleted since.
    pub(crate) async fn open_existing(&self, existing: &ArtifactProperties) -> Result<Option<GetResult>> {
        let options = GetOptions {
            if_match: existing.e_tag.clone(),
            ..Default::default()
        };
        match self.store.get_opts(&existing.location, options).await {
            Ok(result) => Ok(Some(result)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e @ object_store::Error::Precondition { .. }) => Err(Error::Conflict {
                path: existing.location.to_string(),
                source: e,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses an artifact body held in memory, retrying once with the maximum
    /// row buffer.
    pub(crate) fn decode<T, S>(&self, schema: &S, encoding: Encoding, body: Bytes) -> Result<Vec<T>>
    where
        T: CsvRecord,
        S: RecordSchema<T> + ?Sized,
    {
        let records = read_all_with_retry(
            || Ok(encoding.decode(Cursor::new(body.clone()))),
            schema,
            self.config.initial_read_buffer_size,
            self.config.max_read_buffer_size,
        )?;
        Ok(records)
    }
}
