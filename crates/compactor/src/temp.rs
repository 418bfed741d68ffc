//! Scratch files used by big mode.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::warn;

/// A temporary file that is deleted when the guard is dropped.
///
/// Deletion is best effort: a failure is logged and never turned into an
/// error, so it cannot mask the outcome of the compaction.
#[derive(Debug)]
pub(crate) struct TempCsvFile {
    location: PathBuf,
    guard: Option<TempPath>,
}

impl TempCsvFile {
    /// Creates an empty file named `{prefix}<random>{suffix}` in `dir` and
    /// returns the guard together with a handle opened for writing.
    pub(crate) fn create(dir: &Path, prefix: &str, suffix: &str) -> io::Result<(Self, File)> {
        let named = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?;
        let (file, guard) = named.into_parts();
        let location = guard.to_path_buf();

        Ok((
            Self {
                location,
                guard: Some(guard),
            },
            file,
        ))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.location
    }
}

impl Drop for TempCsvFile {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            if let Err(e) = guard.close() {
                warn!(
                    path = %self.location.display(),
                    error = %e,
                    "failed to delete temporary file"
                );
            }
        }
    }
}
