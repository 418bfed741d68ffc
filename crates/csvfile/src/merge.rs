//! K-way merge over already-sorted record streams.
//!
//! Produces records in ascending bucket-key order. Unlike a deduplicating
//! merge, every input record is emitted exactly once: the inputs have already
//! been pruned, so the output count must equal the sum of the input counts.
//!
//! Each source is checked as it is consumed; a source that goes backwards
//! fails the merge with [`Error::UnsortedSource`] instead of silently
//! producing an unsorted artifact.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::{CsvRecord, Error, Result};

/// The current head of one source.
struct HeapEntry<T> {
    key: String,
    record: T,
    /// Index into the `sources` vector.
    source: usize,
}

impl<T> PartialEq for HeapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl<T> Eq for HeapEntry<T> {}

impl<T> PartialOrd for HeapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for HeapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest key pops first.
        // Ties go to the lower source index.
        other
            .key
            .cmp(&self.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merges N sorted record streams into one sorted stream.
///
/// Sources are pulled lazily: at most one record per source is held in
/// memory at a time.
pub struct MergeIterator<T, I> {
    sources: Vec<I>,
    heap: BinaryHeap<HeapEntry<T>>,
    /// Last key emitted from each source, for the sortedness check.
    last_keys: Vec<Option<String>>,
    emitted: u64,
    failed: bool,
    primed: bool,
}

impl<T, I> std::fmt::Debug for MergeIterator<T, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeIterator")
            .field("sources", &self.sources.len())
            .field("pending", &self.heap.len())
            .field("emitted", &self.emitted)
            .finish()
    }
}

impl<T, I> MergeIterator<T, I>
where
    T: CsvRecord,
    I: Iterator<Item = Result<T>>,
{
    /// Creates a merge over `sources`. Nothing is read until the first call
    /// to [`next_entry`](Self::next_entry).
    pub fn new(sources: Vec<I>) -> Self {
        let n = sources.len();
        Self {
            sources,
            heap: BinaryHeap::with_capacity(n),
            last_keys: vec![None; n],
            emitted: 0,
            failed: false,
            primed: false,
        }
    }

    /// Number of records returned so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Pulls the next record from `source` onto the heap.
    fn advance(&mut self, source: usize) -> Result<()> {
        let record = match self.sources[source].next() {
            Some(record) => record?,
            None => return Ok(()),
        };
        let key = record.bucket_key().into_owned();

        if let Some(previous) = &self.last_keys[source] {
            if key < *previous {
                return Err(Error::UnsortedSource {
                    source_index: source,
                    previous: previous.clone(),
                    next: key,
                });
            }
        }
        self.last_keys[source] = Some(key.clone());

        self.heap.push(HeapEntry {
            key,
            record,
            source,
        });
        Ok(())
    }

    /// Returns the next record in sorted order, or `None` when every source
    /// is exhausted.
    pub fn next_entry(&mut self) -> Result<Option<T>> {
        if self.failed {
            return Ok(None);
        }

        let result = self.next_inner();
        if result.is_err() {
            self.failed = true;
        }
        result
    }

    fn next_inner(&mut self) -> Result<Option<T>> {
        if !self.primed {
            self.primed = true;
            for source in 0..self.sources.len() {
                self.advance(source)?;
            }
        }

        let top = match self.heap.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };

        self.advance(top.source)?;
        self.emitted += 1;
        Ok(Some(top.record))
    }

    /// Collects all remaining records into a `Vec`.
    pub fn collect_all(&mut self) -> Result<Vec<T>> {
        let mut result = Vec::new();
        while let Some(record) = self.next_entry()? {
            result.push(record);
        }
        Ok(result)
    }
}

impl<T, I> Iterator for MergeIterator<T, I>
where
    T: CsvRecord,
    I: Iterator<Item = Result<T>>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}
