//! Error types for the shardmerge library

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for shardmerge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while combining shards
#[derive(Error, Debug)]
pub enum Error {
    /// Device or configuration file could not be resolved
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A matched shard could not be deserialized
    #[error("Failed to read shard {path:?}: {reason}")]
    ShardRead { path: PathBuf, reason: String },

    /// Vectors, ids and items disagree on row count
    #[error("Row alignment mismatch: {0}")]
    Alignment(String),

    /// Item table could not be read or is missing a column
    #[error("Item table error: {0}")]
    ItemTable(String),

    /// Shard glob pattern is malformed
    #[error("Invalid shard pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    /// Error reading/writing files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error parsing YAML
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Error parsing TOML
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Parquet read error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// NPY read error
    #[error("NPY read error: {0}")]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    /// NPY write error
    #[error("NPY write error: {0}")]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    /// Any of the above, attributed to the (kind, pass) pair being combined
    #[error("Combining {pair} failed: {source}")]
    Pair {
        pair: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn shard_read(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::ShardRead {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Attach the failing pair label (e.g. `query/forward`)
    pub fn for_pair(self, pair: impl Into<String>) -> Self {
        Error::Pair {
            pair: pair.into(),
            source: Box::new(self),
        }
    }
}
