use csv::{ByteRecord, ReaderBuilder, Terminator};
use std::io::Read;
use std::marker::PhantomData;

use crate::format::{DELIMITER, LINE_TERMINATOR};
use crate::{CsvRecord, Error, RecordSchema, Result};

/// Upper bound on the csv crate's internal read buffer. The row size limit
/// is enforced separately, so this only trades memory for syscalls.
const MAX_INTERNAL_BUFFER: usize = 64 * 1024;

/// Lazily parses a header + body CSV stream into typed records.
///
/// The header must match [`RecordSchema::header`] exactly. Each row must fit
/// in `max_row_bytes`; a larger row yields [`Error::BufferTooSmall`] so the
/// caller can retry with a bigger limit.
pub struct CsvRecordReader<R: Read, T> {
    inner: csv::Reader<R>,
    headers: ByteRecord,
    row: ByteRecord,
    max_row_bytes: usize,
    /// Byte offset just past the previous row.
    offset: u64,
    done: bool,
    _record: PhantomData<fn() -> T>,
}

impl<R: Read, T> std::fmt::Debug for CsvRecordReader<R, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvRecordReader")
            .field("max_row_bytes", &self.max_row_bytes)
            .field("offset", &self.offset)
            .field("done", &self.done)
            .finish()
    }
}

impl<R: Read, T: CsvRecord> CsvRecordReader<R, T> {
    /// Opens a reader over `input` and validates its header against `schema`.
    ///
    /// An empty stream (no header at all) is accepted and yields no records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HeaderMismatch`] if the header differs from the
    /// schema, or an I/O / CSV error if it cannot be read.
    pub fn new<S>(input: R, schema: &S, max_row_bytes: usize) -> Result<Self>
    where
        S: RecordSchema<T> + ?Sized,
    {
        let mut inner = ReaderBuilder::new()
            .has_headers(true)
            .delimiter(DELIMITER)
            .terminator(Terminator::Any(LINE_TERMINATOR))
            .buffer_capacity(max_row_bytes.clamp(1, MAX_INTERNAL_BUFFER))
            .from_reader(input);

        let headers = inner.byte_headers()?.clone();
        let done = headers.is_empty();
        if !done && !header_matches(&headers, schema.header()) {
            return Err(Error::HeaderMismatch {
                record_type: schema.record_type().to_string(),
                expected: schema.header().join(","),
                actual: headers
                    .iter()
                    .map(String::from_utf8_lossy)
                    .collect::<Vec<_>>()
                    .join(","),
            });
        }

        let offset = inner.position().byte();

        Ok(Self {
            inner,
            headers,
            row: ByteRecord::new(),
            max_row_bytes,
            offset,
            done,
            _record: PhantomData,
        })
    }

    /// Returns the next record, or `None` at end of input.
    pub fn next_record(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }

        if !self.inner.read_byte_record(&mut self.row)? {
            self.done = true;
            return Ok(None);
        }

        let end = self.inner.position().byte();
        let row_bytes = end - self.offset;
        self.offset = end;
        if row_bytes > self.max_row_bytes as u64 {
            self.done = true;
            return Err(Error::BufferTooSmall {
                line: self.inner.position().line(),
                row_bytes,
                limit: self.max_row_bytes,
            });
        }

        let record = self.row.deserialize(Some(&self.headers))?;
        Ok(Some(record))
    }

    /// Reads every remaining record into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<T>> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

impl<R: Read, T: CsvRecord> Iterator for CsvRecordReader<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn header_matches(actual: &ByteRecord, expected: &[&str]) -> bool {
    actual.len() == expected.len()
        && actual
            .iter()
            .zip(expected)
            .all(|(a, e)| a == e.as_bytes())
}

/// Reads all records from `input` with a fixed row size limit.
pub fn read_all<R, T, S>(input: R, schema: &S, max_row_bytes: usize) -> Result<Vec<T>>
where
    R: Read,
    T: CsvRecord,
    S: RecordSchema<T> + ?Sized,
{
    CsvRecordReader::new(input, schema, max_row_bytes)?.collect_all()
}

/// Reads all records, retrying once with `max_buffer` if a row does not fit in
/// `initial_buffer`.
///
/// `open` is called once per attempt and must return a fresh stream positioned
/// at the start of the body.
///
/// # Errors
///
/// Returns [`Error::BufferExhausted`] if a row is larger than `max_buffer`.
pub fn read_all_with_retry<F, R, T, S>(
    mut open: F,
    schema: &S,
    initial_buffer: usize,
    max_buffer: usize,
) -> Result<Vec<T>>
where
    F: FnMut() -> std::io::Result<R>,
    R: Read,
    T: CsvRecord,
    S: RecordSchema<T> + ?Sized,
{
    let mut buffer = initial_buffer.min(max_buffer);
    loop {
        match read_all(open()?, schema, buffer) {
            Err(Error::BufferTooSmall { .. }) if buffer < max_buffer => {
                buffer = max_buffer;
            }
            Err(Error::BufferTooSmall { .. }) => {
                return Err(Error::BufferExhausted { max: max_buffer });
            }
            other => return other,
        }
    }
}
