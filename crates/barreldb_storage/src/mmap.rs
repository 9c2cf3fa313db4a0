//! Read-only memory-mapped I/O handle.

use crate::error::{StorageError, StorageResult};
use crate::handle::IoHandle;
use memmap2::Mmap;
use std::fs::OpenOptions;
use std::path::Path;

/// A read-only I/O handle backed by a memory mapping.
///
/// Used to accelerate the sequential record scans of startup recovery:
/// positional reads become plain memory copies instead of seek+read
/// syscalls. The engine never writes through this handle - once recovery
/// finishes, segments are reopened with [`crate::FileIo`].
///
/// An empty file maps to nothing; every read on it reports
/// [`StorageError::ReadPastEnd`].
#[derive(Debug)]
pub struct MmapIo {
    map: Option<Mmap>,
    size: u64,
}

impl MmapIo {
    /// Opens the file at `path` and maps it read-only.
    ///
    /// The file is created if absent so that callers can open a
    /// just-rotated, still-empty segment uniformly.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped.
    #[allow(unsafe_code)]
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();
        let map = if size == 0 {
            None
        } else {
            // SAFETY: the mapping is read-only and the engine holds an
            // exclusive directory lock, so no other process truncates or
            // rewrites the file while it is mapped.
            Some(unsafe { Mmap::map(&file)? })
        };

        Ok(Self { map, size })
    }
}

impl IoHandle for MmapIo {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let map = self.map.as_ref().ok_or(StorageError::ReadPastEnd {
            offset,
            len,
            size,
        })?;

        let start = offset as usize;
        Ok(map[start..start + len].to_vec())
    }

    fn append(&mut self, _data: &[u8]) -> StorageResult<u64> {
        Err(StorageError::ReadOnly)
    }

    fn sync(&mut self) -> StorageResult<()> {
        // Nothing buffered: the mapping is read-only.
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, _new_size: u64) -> StorageResult<()> {
        Err(StorageError::ReadOnly)
    }
}
