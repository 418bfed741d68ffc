/// Upload of a finished artifact.
///
/// The write is conditional: `Create` when no artifact was seen at the start
/// of the compaction, otherwise `Update` pinned to the ETag observed then. A
/// lost race surfaces as [`Error::Conflict`] and is not retried here; the
/// caller reruns the whole compaction.
use crate::artifact::{CONTENT_SHA256_METADATA, RAW_SIZE_BYTES_METADATA, RECORD_COUNT_METADATA};
use crate::compact::Target;
use crate::{
    ArtifactProperties, CompactSummary, CompactionMode, CsvRecordStorage, Error, RecordProvider,
    Result,
};
use csvfile::format::{CONTENT_TYPE, GZIP_ENCODING};
use csvfile::CsvRecord;
use object_store::{Attribute, Attributes, PutMode, PutOptions, PutPayload};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::info;

impl CsvRecordStorage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn upload<T, P>(
        &self,
        provider: &P,
        target: &Target<'_>,
        existing: Option<&ArtifactProperties>,
        body: Vec<u8>,
        record_count: u64,
        uncompressed_size: u64,
        mode: CompactionMode,
    ) -> Result<CompactSummary>
    where
        T: CsvRecord,
        P: RecordProvider<T> + ?Sized,
    {
        let content_hash = hex::encode(Sha256::digest(&body));
        let compressed_size = body.len() as u64;

        let mut metadata = HashMap::new();
        metadata.insert(RAW_SIZE_BYTES_METADATA.to_string(), uncompressed_size.to_string());
        metadata.insert(RECORD_COUNT_METADATA.to_string(), record_count.to_string());
        metadata.insert(CONTENT_SHA256_METADATA.to_string(), content_hash.clone());
        provider.add_artifact_metadata(&mut metadata);

        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, CONTENT_TYPE.into());
        attributes.insert(Attribute::ContentEncoding, GZIP_ENCODING.into());
        for (key, value) in metadata {
            attributes.insert(Attribute::Metadata(key.into()), value.into());
        }

        let put_mode = match existing {
            Some(existing) => PutMode::Update(existing.update_version()),
            None => PutMode::Create,
        };
        let options = PutOptions {
            mode: put_mode,
            attributes,
            ..Default::default()
        };

        let result = match self
            .store
            .put_opts(&target.path, PutPayload::from(body), options)
            .await
        {
            Ok(result) => result,
            Err(e @ (object_store::Error::AlreadyExists { .. } | object_store::Error::Precondition { .. })) => {
                return Err(Error::Conflict {
                    path: target.path.to_string(),
                    source: e,
                });
            }
            Err(e) => return Err(e.into()),
        };

        let previous_hash = existing.and_then(ArtifactProperties::content_hash);
        let changed = previous_hash != Some(content_hash.as_str());
        info!(
            path = %target.path,
            records = record_count,
            uncompressed_size,
            compressed_size,
            changed,
            ?mode,
            "uploaded artifact"
        );

        Ok(CompactSummary {
            mode,
            record_count,
            uncompressed_size,
            compressed_size,
            changed,
            e_tag: result.e_tag,
        })
    }
}
