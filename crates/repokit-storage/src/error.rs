//! Error types for repokit-storage.
//!
//! [`RepositoryError`] covers every failure a repository or unit of work can
//! surface: missing indices, corrupt stored data, index factory failures, and
//! the I/O, SQLite and serialization errors of the backends underneath.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::CodecError;

/// Errors produced by repository and unit-of-work operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A unit-of-work operation targeted an index absent from the working set.
    #[error("the item with index {index} does not exist within the repository")]
    NotFound { index: String },

    /// A read against durable state targeted an absent index.
    #[error("the given key '{index}' was not present in the repository")]
    KeyNotFound { index: String },

    /// A stored index or record could not be decoded.
    #[error("corrupt record at index {index}: {reason}")]
    CorruptRecord { index: String, reason: String },

    /// The backing file exists but does not hold a serialized entry map.
    #[error("corrupt repository file {}: {reason}", path.display())]
    CorruptFile { path: PathBuf, reason: String },

    /// The index factory could not produce a usable index.
    #[error("index factory exhausted: {reason}")]
    FactoryExhausted { reason: String },

    /// A key or record could not be encoded by the codec.
    #[error("encoding error: {0}")]
    Encode(#[from] CodecError),

    /// JSON serialization of a native record column failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedded SQLite database reported an error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying schema migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// The lock guarding durable state was poisoned by a panicking writer.
    #[error("repository lock was poisoned")]
    LockPoisoned,
}

impl RepositoryError {
    /// Returns true for the two "index is absent" variants.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepositoryError::NotFound { .. } | RepositoryError::KeyNotFound { .. }
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RepositoryError>;
