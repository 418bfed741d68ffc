//! # Config - compaction settings
//!
//! [`CompactionConfig`] carries every tunable the compactor reads. Defaults
//! are usable as-is; deployments override them through environment variables:
//!
//! ```text
//! COMPACTOR_BIG_MODE_RECORD_THRESHOLD  records before switching to big mode   (default: 25000)
//! COMPACTOR_BIG_MODE_SUBDIVISION_SIZE  target records per subdivision        (default: 10000)
//! COMPACTOR_PRUNE_EVERY_N_CHUNKS       non-final prune cadence, in chunks    (default: 500)
//! COMPACTOR_INITIAL_READ_BUFFER        first-attempt max row size in bytes   (default: 32768)
//! COMPACTOR_MAX_READ_BUFFER            retry max row size in bytes           (default: 33554432)
//! COMPACTOR_BUCKET_COUNT               number of buckets                     (default: 1000)
//! COMPACTOR_TEMP_DIR                   big-mode scratch directory            (default: $TMP/bucket-compactor)
//! ```
use std::path::PathBuf;

/// Default record count above which a bucket is compacted on disk.
pub const DEFAULT_BIG_MODE_RECORD_THRESHOLD: usize = 25_000;

/// Default number of records each big-mode subdivision aims to hold.
pub const DEFAULT_BIG_MODE_SUBDIVISION_SIZE: usize = 10_000;

/// Default number of chunks between two non-final prunes.
pub const DEFAULT_PRUNE_EVERY_N_CHUNKS: usize = 500;

/// Default row size limit (bytes) for the first deserialization attempt.
pub const DEFAULT_INITIAL_READ_BUFFER_SIZE: usize = 32 * 1024;

/// Default row size limit (bytes) for the single retry.
pub const DEFAULT_MAX_READ_BUFFER_SIZE: usize = 32 * 1024 * 1024;

/// Default number of buckets. Bulk ingestion tools tend to cap the number of
/// blobs per import at 1000.
pub const DEFAULT_BUCKET_COUNT: u32 = 1000;

const TEMP_DIR_NAME: &str = "bucket-compactor";

/// Errors produced while loading or validating a [`CompactionConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("initial read buffer ({initial} bytes) exceeds the max read buffer ({max} bytes)")]
    BufferOrder { initial: usize, max: usize },
}

/// Settings for one compaction engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionConfig {
    /// Record count above which the disk-based path is used. Compared
    /// against both the existing artifact's `recordCount` and the running
    /// count of new records.
    pub big_mode_record_threshold: usize,
    /// Target record count per big-mode subdivision.
    pub big_mode_subdivision_size: usize,
    /// The in-memory path runs a non-final prune every this many chunks.
    pub prune_every_n_chunks: usize,
    pub initial_read_buffer_size: usize,
    pub max_read_buffer_size: usize,
    pub bucket_count: u32,
    /// Scratch directory for big-mode subdivision and output files.
    pub temp_dir: PathBuf,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            big_mode_record_threshold: DEFAULT_BIG_MODE_RECORD_THRESHOLD,
            big_mode_subdivision_size: DEFAULT_BIG_MODE_SUBDIVISION_SIZE,
            prune_every_n_chunks: DEFAULT_PRUNE_EVERY_N_CHUNKS,
            initial_read_buffer_size: DEFAULT_INITIAL_READ_BUFFER_SIZE,
            max_read_buffer_size: DEFAULT_MAX_READ_BUFFER_SIZE,
            bucket_count: DEFAULT_BUCKET_COUNT,
            temp_dir: std::env::temp_dir().join(TEMP_DIR_NAME),
        }
    }
}

impl CompactionConfig {
    /// Loads the configuration from `COMPACTOR_*` environment variables,
    /// falling back to the defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but unparsable, or if the
    /// resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through `lookup`,
    /// which keeps tests independent of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            big_mode_record_threshold: parse_or(
                &lookup,
                "COMPACTOR_BIG_MODE_RECORD_THRESHOLD",
                defaults.big_mode_record_threshold,
            )?,
            big_mode_subdivision_size: parse_or(
                &lookup,
                "COMPACTOR_BIG_MODE_SUBDIVISION_SIZE",
                defaults.big_mode_subdivision_size,
            )?,
            prune_every_n_chunks: parse_or(
                &lookup,
                "COMPACTOR_PRUNE_EVERY_N_CHUNKS",
                defaults.prune_every_n_chunks,
            )?,
            initial_read_buffer_size: parse_or(
                &lookup,
                "COMPACTOR_INITIAL_READ_BUFFER",
                defaults.initial_read_buffer_size,
            )?,
            max_read_buffer_size: parse_or(
                &lookup,
                "COMPACTOR_MAX_READ_BUFFER",
                defaults.max_read_buffer_size,
            )?,
            bucket_count: parse_or(&lookup, "COMPACTOR_BUCKET_COUNT", defaults.bucket_count)?,
            temp_dir: lookup("COMPACTOR_TEMP_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.temp_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the compactor relies on.
    ///
    /// A `big_mode_record_threshold` of 0 is allowed and forces big mode for
    /// every bucket with data.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.big_mode_subdivision_size == 0 {
            return Err(ConfigError::Zero {
                field: "big_mode_subdivision_size",
            });
        }
        if self.prune_every_n_chunks == 0 {
            return Err(ConfigError::Zero {
                field: "prune_every_n_chunks",
            });
        }
        if self.initial_read_buffer_size == 0 {
            return Err(ConfigError::Zero {
                field: "initial_read_buffer_size",
            });
        }
        if self.bucket_count == 0 {
            return Err(ConfigError::Zero {
                field: "bucket_count",
            });
        }
        if self.initial_read_buffer_size > self.max_read_buffer_size {
            return Err(ConfigError::BufferOrder {
                initial: self.initial_read_buffer_size,
                max: self.max_read_buffer_size,
            });
        }
        Ok(())
    }
}

/// Reads `var` through `lookup` and parses it, or returns `default` when unset.
fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        None => Ok(default),
    }
}
