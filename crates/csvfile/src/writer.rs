use csv::{QuoteStyle, Terminator, WriterBuilder};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

use crate::format::{CountingWriter, DELIMITER, LINE_TERMINATOR};
use crate::{CsvRecord, Error, RecordSchema, Result};

/// Streams records to a CSV text sink.
///
/// The header is written on construction, so even a writer that never sees
/// a record produces a valid (header-only) body. Every row ends with `\n`.
pub struct CsvRecordWriter<W: Write> {
    inner: csv::Writer<W>,
    rows: u64,
}

impl<W: Write> std::fmt::Debug for CsvRecordWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvRecordWriter")
            .field("rows", &self.rows)
            .finish()
    }
}

impl<W: Write> CsvRecordWriter<W> {
    /// Creates a writer and emits the schema's header line.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the header fails.
    pub fn new<T, S>(out: W, schema: &S) -> Result<Self>
    where
        T: CsvRecord,
        S: RecordSchema<T> + ?Sized,
    {
        let mut inner = WriterBuilder::new()
            .has_headers(false)
            .delimiter(DELIMITER)
            .terminator(Terminator::Any(LINE_TERMINATOR))
            .quote_style(QuoteStyle::Necessary)
            .from_writer(out);
        inner.write_record(schema.header())?;

        Ok(Self { inner, rows: 0 })
    }

    /// Appends one record as a CSV line.
    pub fn write<T: CsvRecord>(&mut self, record: &T) -> Result<()> {
        self.inner.serialize(record)?;
        self.rows += 1;
        Ok(())
    }

    /// Appends every record from `records`, returning how many were written.
    pub fn write_all<'a, T, I>(&mut self, records: I) -> Result<u64>
    where
        T: CsvRecord,
        I: IntoIterator<Item = &'a T>,
    {
        let before = self.rows;
        for record in records {
            self.write(record)?;
        }
        Ok(self.rows - before)
    }

    /// Number of records (not counting the header) written so far.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flushes buffered rows and returns the underlying sink.
    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| Error::Io(e.into_error()))
    }
}

/// A gzip-compressed CSV body held in memory.
#[derive(Debug, Clone)]
pub struct CompressedCsv {
    pub bytes: Vec<u8>,
    /// Size of the CSV text before compression.
    pub uncompressed_size: u64,
    pub rows: u64,
}

/// Serializes `records` (header first) through gzip into a memory buffer.
///
/// Used by the in-memory compaction path, where the whole pruned record set
/// already lives in memory.
pub fn compress_records<T, S>(schema: &S, records: &[T]) -> Result<CompressedCsv>
where
    T: CsvRecord,
    S: RecordSchema<T> + ?Sized,
{
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut writer = CsvRecordWriter::new(CountingWriter::new(encoder), schema)?;
    writer.write_all(records)?;
    let rows = writer.rows();

    let counting = writer.into_inner()?;
    let uncompressed_size = counting.count();
    let bytes = counting.into_inner().finish()?;

    Ok(CompressedCsv {
        bytes,
        uncompressed_size,
        rows,
    })
}

/// Serializes `records` (header first) to `out` without compression and
/// returns the number of bytes written.
pub fn write_records<W, T, S>(out: W, schema: &S, records: &[T]) -> Result<u64>
where
    W: Write,
    T: CsvRecord,
    S: RecordSchema<T> + ?Sized,
{
    let mut writer = CsvRecordWriter::new(CountingWriter::new(out), schema)?;
    writer.write_all(records)?;
    let mut counting = writer.into_inner()?;
    counting.flush()?;
    Ok(counting.count())
}
