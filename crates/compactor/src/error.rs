/// Boxed error returned by [`RecordProvider`](crate::RecordProvider)
/// implementations.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result alias for the compactor.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by [`CsvRecordStorage`](crate::CsvRecordStorage).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// The conditional write lost against another writer of the same
    /// artifact. Not retried here.
    #[error("artifact {path} was changed by another writer: {source}")]
    Conflict {
        path: String,
        source: object_store::Error,
    },

    /// At least two records survived the final prune with the same key.
    #[error(
        "At least two records had the same key.\n\
         Type: {record_type}\n\
         Key fields: {key_fields}\n\
         Total duplicates: {total}\n\
         Sample of duplicate records (as CSV):\n{sample}"
    )]
    DuplicateKeys {
        record_type: String,
        key_fields: String,
        total: usize,
        sample: String,
    },

    #[error(
        "the number of records written to the final CSV does not match the number of \
         records after pruning. Expected: {expected}. Actual: {actual}"
    )]
    MergeCountMismatch { expected: u64, actual: u64 },

    #[error("the number of subdivisions must be between 2 and 50, got {0}")]
    InvalidSubdivisions(usize),

    #[error("record provider failed: {0}")]
    Provider(#[source] BoxError),

    #[error(transparent)]
    Csv(#[from] csvfile::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error("invalid artifact URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` for a lost optimistic-concurrency race.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
