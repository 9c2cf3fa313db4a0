//! In-memory I/O handle for testing.

use crate::error::{StorageError, StorageResult};
use crate::handle::IoHandle;
use parking_lot::RwLock;

/// An I/O handle that keeps all bytes in memory.
///
/// Suitable for unit tests of the record and segment layers where real
/// files would only slow things down. Never used by an opened engine.
///
/// # Example
///
/// ```rust
/// use barreldb_storage::{IoHandle, MemoryIo};
///
/// let mut handle = MemoryIo::new();
/// let offset = handle.append(b"test data").unwrap();
/// assert_eq!(offset, 0);
/// assert_eq!(handle.size().unwrap(), 9);
/// ```
#[derive(Debug, Default)]
pub struct MemoryIo {
    data: RwLock<Vec<u8>>,
}

impl MemoryIo {
    /// Creates a new empty in-memory handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an in-memory handle with pre-existing bytes.
    ///
    /// Useful for corrupting encoded records in recovery tests.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of all bytes in the handle.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl IoHandle for MemoryIo {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = offset as usize;
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        // Nothing to persist.
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();

        if new_size > data.len() as u64 {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate {} bytes to {}", data.len(), new_size),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}
