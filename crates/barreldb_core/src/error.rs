//! Error types for engine operations.

use barreldb_storage::StorageError;
use std::io;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the engine to callers.
#[derive(Debug, Error)]
pub enum Error {
    /// The key of a put, get or delete was empty.
    #[error("key is empty")]
    KeyIsEmpty,

    /// The key is not present in the index.
    #[error("key not found in database")]
    KeyNotFound,

    /// The index points at a segment the engine does not hold.
    #[error("data file not found: id {file_id}")]
    DataFileNotFound {
        /// The segment ID the index referenced.
        file_id: u32,
    },

    /// A file in the data directory has a name that is not a segment ID.
    #[error("data directory may be corrupted: unexpected entry {name:?}")]
    DataDirectoryCorrupted {
        /// The offending file name.
        name: String,
    },

    /// A record failed its checksum.
    #[error("invalid CRC, log record may be corrupted")]
    InvalidCrc,

    /// The index refused a delete that a prior lookup said must succeed.
    #[error("failed to update index")]
    IndexUpdateFailed,

    /// A batch staged more distinct keys than the configured maximum.
    #[error("exceeded the max batch number: {count} staged, {max} allowed")]
    ExceedMaxBatchNum {
        /// Number of staged records.
        count: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Another process holds the directory's advisory lock.
    #[error("the database directory is used by another process")]
    DatabaseIsUsing,

    /// A merge is already running.
    #[error("merge is in progress, try again later")]
    MergeInProgress,

    /// The reclaimable fraction has not reached the configured ratio.
    #[error("the merge ratio is unreached")]
    MergeRatioUnreached,

    /// The free space left on the volume cannot hold the merged data set.
    #[error("no enough disk space for merge")]
    NoEnoughSpaceForMerge,

    /// An option failed validation at open.
    #[error("invalid options: {message}")]
    InvalidOptions {
        /// Description of the invalid option.
        message: String,
    },

    /// On-disk state that must decode (named files, hint values) did not.
    #[error("corrupted database state: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// An I/O handle error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A raw I/O error from directory management.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Creates a corrupted-state error.
    pub(crate) fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid-options error.
    pub(crate) fn invalid_options(message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            message: message.into(),
        }
    }
}
