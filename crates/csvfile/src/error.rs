use std::io;

/// Result alias for the CSV serializer.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised while writing or reading CSV record streams.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("CSV header mismatch for {record_type}: expected [{expected}], found [{actual}]")]
    HeaderMismatch {
        record_type: String,
        expected: String,
        actual: String,
    },

    /// A single row did not fit the configured buffer. Callers may retry
    /// with a larger buffer.
    #[error("row on line {line} is {row_bytes} bytes, larger than the {limit} byte buffer")]
    BufferTooSmall {
        line: u64,
        row_bytes: u64,
        limit: usize,
    },

    #[error("could not deserialize records after trying buffers up to {max} bytes in size")]
    BufferExhausted { max: usize },

    #[error(
        "merge source {source_index} is not sorted: {next:?} follows {previous:?}"
    )]
    UnsortedSource {
        source_index: usize,
        previous: String,
        next: String,
    },
}
