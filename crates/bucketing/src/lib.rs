//! # Bucketing
//!
//! Stable hashing used to shard records into buckets and, during a big-mode
//! compaction, to split one bucket into run-local subdivisions.
//!
//! Both levels use the same pure function, [`hash`], over the UTF-8 bytes of a
//! record's bucket key followed by a level-specific salt:
//!
//! ```text
//! SHA-256(bucket_key ++ salt)[0..8]  as u64 (little-endian)  mod count
//! ```
//!
//! | Level        | Salt          | Count                         |
//! |--------------|---------------|-------------------------------|
//! | bucket       | (empty)       | `bucket_count`, e.g. 1000     |
//! | subdivision  | `[2]`         | 2..=50, chosen per run        |
//!
//! Using a different salt for subdivisions matters: every record in a bucket
//! already shares the same `hash mod bucket_count`, so reusing the bucket hash
//! would route correlated keys into the same subdivision.
//!
//! ## Example
//!
//! ```rust
//! use bucketing::{bucket_for, subdivision_for};
//!
//! let bucket = bucket_for(1000, "newtonsoft.json");
//! assert!(bucket < 1000);
//! assert_eq!(bucket, bucket_for(1000, "newtonsoft.json"));
//!
//! let part = subdivision_for(8, "newtonsoft.json");
//! assert!(part < 8);
//! ```
use sha2::{Digest, Sha256};

/// Salt for top-level bucket assignment.
pub const BUCKET_SALT: &[u8] = &[];

/// Salt for big-mode subdivision routing. Must differ from [`BUCKET_SALT`].
pub const SUBDIVISION_SALT: &[u8] = &[2];

/// Hashes `key` followed by `salt` and returns the first 8 digest bytes as a
/// little-endian `u64`.
///
/// The result is independent of platform endianness and process, so it is
/// safe to persist bucket assignments derived from it.
#[must_use]
pub fn hash(key: &[u8], salt: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(salt);
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(prefix)
}

/// Returns the bucket (`0..bucket_count`) that owns `bucket_key`.
///
/// # Panics
///
/// Panics if `bucket_count` is 0.
#[must_use]
pub fn bucket_for(bucket_count: u32, bucket_key: &str) -> u32 {
    assert!(bucket_count > 0, "bucket_count must be > 0");
    (hash(bucket_key.as_bytes(), BUCKET_SALT) % u64::from(bucket_count)) as u32
}

/// Returns the subdivision (`0..subdivisions`) that `bucket_key` is routed to
/// during a big-mode compaction.
///
/// # Panics
///
/// Panics if `subdivisions` is 0.
#[must_use]
pub fn subdivision_for(subdivisions: usize, bucket_key: &str) -> usize {
    assert!(subdivisions > 0, "subdivisions must be > 0");
    (hash(bucket_key.as_bytes(), SUBDIVISION_SALT) % subdivisions as u64) as usize
}

/// Routes consecutive records to subdivisions, skipping the hash when the
/// bucket key repeats.
///
/// Records arrive grouped by bucket key surprisingly often (an existing
/// artifact is sorted by it), so remembering the last key avoids rehashing
/// long runs.
#[derive(Debug)]
pub struct SubdivisionRouter {
    subdivisions: usize,
    last: Option<(String, usize)>,
}

impl SubdivisionRouter {
    /// Creates a router over `subdivisions` partitions.
    ///
    /// # Panics
    ///
    /// Panics if `subdivisions` is 0.
    pub fn new(subdivisions: usize) -> Self {
        assert!(subdivisions > 0, "subdivisions must be > 0");
        Self {
            subdivisions,
            last: None,
        }
    }

    /// Returns the number of subdivisions this router distributes over.
    #[must_use]
    pub fn subdivisions(&self) -> usize {
        self.subdivisions
    }

    /// Returns the subdivision index for `bucket_key`.
    pub fn route(&mut self, bucket_key: &str) -> usize {
        if let Some((key, index)) = &self.last {
            if key == bucket_key {
                return *index;
            }
        }

        let index = subdivision_for(self.subdivisions, bucket_key);
        self.last = Some((bucket_key.to_string(), index));
        index
    }
}
