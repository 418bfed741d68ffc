//! # csvfile - CSV record serialization
//!
//! The on-disk and on-wire representation of compacted records. The same
//! writer and reader serve every path that touches CSV text: the in-memory
//! compaction buffer, big-mode subdivision files, the final merged artifact
//! and reads of the existing artifact. Because they share one serializer,
//! subdivision files and the merged output are byte-for-byte comparable.
//!
//! ## Body layout
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ header line   (RecordSchema::header)        │
//! ├────────────────────────────────────────────┤
//! │ row\n                                       │
//! │ row\n          sorted by bucket key once    │
//! │ ...            a compaction has finished    │
//! └────────────────────────────────────────────┘
//! ```
//!
//! Artifacts are stored gzip-compressed; see [`format`].
//!
//! ## Modules
//!
//! | Module     | Purpose                                                 |
//! |------------|---------------------------------------------------------|
//! | [`record`] | `CsvRecord` / `RecordSchema` contract, bucket-key sort   |
//! | [`format`] | constants, content encoding, `CountingWriter`           |
//! | [`writer`] | `CsvRecordWriter`, in-memory gzip compression           |
//! | [`reader`] | `CsvRecordReader` with bounded rows and one retry       |
//! | [`merge`]  | k-way `MergeIterator` over sorted streams               |

mod error;
pub mod format;
pub mod merge;
pub mod reader;
pub mod record;
pub mod writer;

pub use error::{Error, Result};
pub use format::{CountingWriter, Encoding};
pub use merge::MergeIterator;
pub use reader::{read_all, read_all_with_retry, CsvRecordReader};
pub use record::{is_sorted_by_bucket_key, sort_by_bucket_key, CsvRecord, RecordSchema};
pub use writer::{compress_records, write_records, CompressedCsv, CsvRecordWriter};

#[cfg(test)]
mod tests;
