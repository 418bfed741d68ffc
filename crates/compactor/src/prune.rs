//! Pruning: the provider's reducer plus, on the final pass, the key
//! uniqueness check and the bucket-key sort.

use crate::{Error, RecordProvider, Result};
use csvfile::{sort_by_bucket_key, CsvRecord, CsvRecordWriter, RecordSchema};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tracing::debug;

/// Most duplicate rows rendered into a [`Error::DuplicateKeys`] message.
pub const MAX_DUPLICATE_SAMPLE: usize = 10;

/// Runs the provider's reducer over `records`.
///
/// When `is_final` is set, the result must hold at most one record per
/// [`RecordSchema::key`] and is returned stable-sorted by bucket key.
///
/// # Errors
///
/// Returns [`Error::DuplicateKeys`] if the final result still contains two
/// records with the same key.
pub fn prune<T, P, S>(provider: &P, schema: &S, records: Vec<T>, is_final: bool) -> Result<Vec<T>>
where
    T: CsvRecord,
    P: RecordProvider<T> + ?Sized,
    S: RecordSchema<T> + ?Sized,
{
    let before = records.len();
    let mut records = if records.is_empty() {
        records
    } else {
        provider.prune(records, is_final)
    };
    debug!(before, after = records.len(), is_final, "pruned records");

    if !is_final {
        return Ok(records);
    }

    check_unique_keys(schema, &records)?;
    sort_by_bucket_key(&mut records);
    Ok(records)
}

/// Fails if two records in `records` share a key.
///
/// # Errors
///
/// Returns [`Error::DuplicateKeys`] with the header and up to
/// [`MAX_DUPLICATE_SAMPLE`] offending rows rendered as CSV.
pub fn check_unique_keys<T, S>(schema: &S, records: &[T]) -> Result<()>
where
    T: CsvRecord,
    S: RecordSchema<T> + ?Sized,
{
    let mut groups: HashMap<S::Key, Vec<usize>> = HashMap::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        groups.entry(schema.key(record)).or_default().push(index);
    }

    let mut duplicates: Vec<Vec<usize>> = groups.into_values().filter(|g| g.len() > 1).collect();
    if duplicates.is_empty() {
        return Ok(());
    }
    duplicates.sort_unstable_by_key(|g| g[0]);

    let total = duplicates.iter().map(Vec::len).sum();
    let sample = render_sample(schema, records, &duplicates)?;

    Err(Error::DuplicateKeys {
        record_type: schema.record_type().to_string(),
        key_fields: schema.key_fields().join(", "),
        total,
        sample,
    })
}

/// Writes the header and up to [`MAX_DUPLICATE_SAMPLE`] rows. A group that is
/// started always shows at least two rows so the collision is visible.
fn render_sample<T, S>(schema: &S, records: &[T], duplicates: &[Vec<usize>]) -> Result<String>
where
    T: CsvRecord,
    S: RecordSchema<T> + ?Sized,
{
    let mut writer = CsvRecordWriter::new::<T, S>(Vec::new(), schema)?;
    'groups: for group in duplicates {
        for (n, &index) in group.iter().enumerate() {
            if writer.rows() >= MAX_DUPLICATE_SAMPLE as u64 {
                if n >= 2 {
                    continue 'groups;
                }
                if n == 0 {
                    break 'groups;
                }
            }
            writer.write(&records[index])?;
        }
    }
    let bytes = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// A ready-made reducer: keeps one record per key, the one with the greatest
/// `version`. On a tie the earlier record wins.
///
/// The survivors keep the position of the first record seen for their key, so
/// the output order only depends on the input order.
pub fn keep_latest_by_key<T, S, V, F>(schema: &S, records: Vec<T>, version: F) -> Vec<T>
where
    T: CsvRecord,
    S: RecordSchema<T> + ?Sized,
    V: Ord,
    F: Fn(&T) -> V,
{
    let mut slots: HashMap<S::Key, usize> = HashMap::with_capacity(records.len());
    let mut kept: Vec<T> = Vec::with_capacity(records.len());

    for record in records {
        match slots.entry(schema.key(&record)) {
            Entry::Vacant(slot) => {
                slot.insert(kept.len());
                kept.push(record);
            }
            Entry::Occupied(slot) => {
                let current = &mut kept[*slot.get()];
                if version(&record) > version(current) {
                    *current = record;
                }
            }
        }
    }
    kept
}
