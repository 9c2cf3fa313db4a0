//! I/O handle trait definition.

use crate::error::StorageResult;
use crate::file::FileIo;
use crate::mmap::MmapIo;
use std::path::Path;

/// A low-level I/O handle for one on-disk file.
///
/// Handles are **opaque byte files**. They provide positional reads,
/// appends, and durability control. The engine owns all record framing -
/// handles do not understand log records, segments, or hint entries.
///
/// # Invariants
///
/// - `append` returns the offset where the data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `sync` ensures all appended data and file metadata are durable
/// - Handles must be `Send + Sync` for concurrent access
pub trait IoHandle: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read would extend beyond the current size
    /// or an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the file.
    ///
    /// Returns the offset where the data was written. The write is
    /// complete on return: short writes surface as errors, never as a
    /// partial success.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Syncs all data and metadata to durable storage.
    ///
    /// After this returns successfully, all previously appended data is
    /// guaranteed to survive process termination.
    fn sync(&mut self) -> StorageResult<()>;

    /// Returns the current size of the file in bytes.
    ///
    /// This is the offset where the next `append` will write.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the file to `new_size` bytes and syncs the change.
    ///
    /// Used by recovery to discard a torn record at the tail of the last
    /// segment. Growing the file is not permitted.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` exceeds the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}

/// Selects the handle implementation used to open a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IoType {
    /// Standard file I/O. The only type that accepts writes.
    #[default]
    Standard,
    /// Read-only memory-mapped I/O, used for recovery scans.
    MemoryMap,
}

/// Opens an I/O handle of the requested type, creating the file if absent.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or mapped.
pub fn open_handle(path: &Path, io_type: IoType) -> StorageResult<Box<dyn IoHandle>> {
    match io_type {
        IoType::Standard => Ok(Box::new(FileIo::open(path)?)),
        IoType::MemoryMap => Ok(Box::new(MmapIo::open(path)?)),
    }
}
