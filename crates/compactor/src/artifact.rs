//! Naming, location and metadata of compacted artifacts.
//!
//! ```text
//! {container}/
//!   .container            marker written by initialize()
//!   compact_0.csv.gz
//!   compact_1.csv.gz
//!   ...
//! ```

use csvfile::Encoding;
use object_store::path::Path;
use object_store::{Attribute, Attributes, ObjectMeta, UpdateVersion};
use std::collections::HashMap;

/// Metadata key holding the uncompressed CSV size in bytes.
pub const RAW_SIZE_BYTES_METADATA: &str = "rawSizeBytes";
/// Metadata key holding the number of records (header excluded).
pub const RECORD_COUNT_METADATA: &str = "recordCount";
/// Metadata key holding the hex SHA-256 of the compressed body.
pub const CONTENT_SHA256_METADATA: &str = "contentSha256";

const ARTIFACT_PREFIX: &str = "compact_";
const ARTIFACT_SUFFIX: &str = ".csv.gz";
pub(crate) const CONTAINER_MARKER: &str = ".container";

/// File name of the artifact for `bucket`.
#[must_use]
pub fn artifact_name(bucket: u32) -> String {
    format!("{ARTIFACT_PREFIX}{bucket}{ARTIFACT_SUFFIX}")
}

/// Object store location of the artifact for `bucket` in `container`.
#[must_use]
pub fn artifact_path(container: &str, bucket: u32) -> Path {
    Path::from(container).child(artifact_name(bucket))
}

/// Parses a bucket number back out of an artifact file name.
#[must_use]
pub fn parse_artifact_name(name: &str) -> Option<u32> {
    name.strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(ARTIFACT_SUFFIX)?
        .parse()
        .ok()
}

/// What the compactor knows about an artifact without reading its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactProperties {
    pub location: Path,
    pub e_tag: Option<String>,
    pub version: Option<String>,
    /// Stored (compressed) size in bytes.
    pub size: usize,
    pub content_encoding: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl ArtifactProperties {
    pub(crate) fn from_parts(meta: &ObjectMeta, attributes: &Attributes) -> Self {
        let mut metadata = HashMap::new();
        let mut content_encoding = None;
        for (attribute, value) in attributes.iter() {
            let value: &str = value.as_ref();
            match attribute {
                Attribute::Metadata(key) => {
                    metadata.insert(key.to_string(), value.to_string());
                }
                Attribute::ContentEncoding => content_encoding = Some(value.to_string()),
                _ => {}
            }
        }

        Self {
            location: meta.location.clone(),
            e_tag: meta.e_tag.clone(),
            version: meta.version.clone(),
            size: meta.size,
            content_encoding,
            metadata,
        }
    }

    /// The `recordCount` metadata, if present and numeric.
    #[must_use]
    pub fn record_count(&self) -> Option<u64> {
        self.metadata_u64(RECORD_COUNT_METADATA)
    }

    /// The `rawSizeBytes` metadata, if present and numeric.
    #[must_use]
    pub fn uncompressed_size(&self) -> Option<u64> {
        self.metadata_u64(RAW_SIZE_BYTES_METADATA)
    }

    #[must_use]
    pub fn content_hash(&self) -> Option<&str> {
        self.metadata.get(CONTENT_SHA256_METADATA).map(String::as_str)
    }

    /// How the stored body is encoded.
    #[must_use]
    pub fn encoding(&self) -> Encoding {
        Encoding::from_content_encoding(self.content_encoding.as_deref())
    }

    /// The version a conditional overwrite must match.
    pub(crate) fn update_version(&self) -> UpdateVersion {
        UpdateVersion {
            e_tag: self.e_tag.clone(),
            version: self.version.clone(),
        }
    }

    fn metadata_u64(&self, key: &str) -> Option<u64> {
        self.metadata.get(key)?.trim().parse().ok()
    }
}
