//! Storage error types.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Table file could not be read or written.
    #[error("I/O failure on table '{table}': {source}")]
    Io {
        table: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Table file contents could not be decoded.
    #[error("corrupt table file '{table}': {source}")]
    Corrupt {
        table: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Uniqueness violation (e.g. duplicate project slug within a tenant).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StorageError {
    pub fn io(table: &'static str, source: std::io::Error) -> Self {
        Self::Io { table, source }
    }

    pub fn corrupt(table: &'static str, source: serde_json::Error) -> Self {
        Self::Corrupt { table, source }
    }
}
