//! Artifact format constants and small I/O helpers.
//!
//! ```text
//! gzip(
//!   header\n          <- RecordSchema::header joined by ','
//!   row\n             <- one per record, serde field order
//!   ...
//! )
//! ```
//!
//! UTF-8 without a byte-order mark, `\n` line endings, RFC 4180 quoting only
//! where needed.

use flate2::read::GzDecoder;
use std::io::{self, Read, Write};

/// Line terminator used for every row, including the header.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Field delimiter.
pub const DELIMITER: u8 = b',';

/// `Content-Type` the artifact is uploaded with.
pub const CONTENT_TYPE: &str = "text/plain";

/// `Content-Encoding` value for a gzip-compressed artifact.
pub const GZIP_ENCODING: &str = "gzip";

/// How the bytes of a CSV body are encoded at rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Identity,
}

impl Encoding {
    /// Maps a `Content-Encoding` header value. Anything other than `gzip`
    /// (including no header) is treated as plain CSV.
    #[must_use]
    pub fn from_content_encoding(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.eq_ignore_ascii_case(GZIP_ENCODING) => Self::Gzip,
            _ => Self::Identity,
        }
    }

    /// Wraps `input` so that reads yield the uncompressed CSV text.
    pub fn decode<'a, R: Read + 'a>(self, input: R) -> Box<dyn Read + 'a> {
        match self {
            Self::Gzip => Box::new(GzDecoder::new(input)),
            Self::Identity => Box::new(input),
        }
    }
}

/// A [`Write`] adapter that counts the bytes passed through it.
///
/// Placed in front of a gzip encoder it measures the uncompressed size; placed
/// behind it, the compressed size.
#[derive(Debug)]
pub struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
