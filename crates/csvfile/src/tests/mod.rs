use crate::{CsvRecord, RecordSchema};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;


/// Test record: one row per package version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) struct PackageRow {
    pub id: String,
    pub version: String,
    pub downloads: u64,
}

impl PackageRow {
    pub(crate) fn new(id: &str, version: &str, downloads: u64) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
            downloads,
        }
    }
}

impl CsvRecord for PackageRow {
    fn bucket_key(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.id)
    }
}

pub(crate) struct PackageSchema;

impl RecordSchema<PackageRow> for PackageSchema {
    type Key = (String, String);

    fn record_type(&self) -> &str {
        "PackageRow"
    }

    fn header(&self) -> &[&str] {
        &["id", "version", "downloads"]
    }

    fn key_fields(&self) -> &[&str] {
        &["id", "version"]
    }

    fn key(&self, record: &PackageRow) -> Self::Key {
        (record.id.clone(), record.version.clone())
    }
}

/// Rows sorted by id, one version each.
pub(crate) fn sorted_rows(prefix: &str, count: usize) -> Vec<PackageRow> {
    (0..count)
        .map(|i| PackageRow::new(&format!("{}{:04}", prefix, i), "1.0.0", i as u64))
        .collect()
}
