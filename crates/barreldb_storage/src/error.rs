//! Error types for I/O handle operations.

use std::io;
use thiserror::Error;

/// Result type for I/O handle operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in I/O handle operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the file.
    #[error("read beyond end of file: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current file size.
        size: u64,
    },

    /// The handle does not accept writes.
    #[error("handle is read-only")]
    ReadOnly,
}
