//! Standard-file I/O handle.

use crate::error::{StorageError, StorageResult};
use crate::handle::IoHandle;
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An I/O handle backed by a regular file.
///
/// This is the handle used for every writable file in the engine: the
/// active segment, hint files, and the seq-no and merge-finished markers.
///
/// # Durability
///
/// `sync()` calls `File::sync_all()`, so both data and file metadata are
/// on disk when it returns.
///
/// # Thread Safety
///
/// Reads and writes serialize on an interior lock; the cached size means
/// `size()` never touches the file system.
#[derive(Debug)]
pub struct FileIo {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FileIo {
    /// Opens or creates a file at the given path.
    ///
    /// Existing content is preserved; appends land at the current end.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IoHandle for FileIo {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn sync(&mut self) -> StorageResult<()> {
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("cannot truncate {} bytes to {}", *size, new_size),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let handle = FileIo::open(&path).unwrap();
        assert_eq!(handle.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let mut handle = FileIo::open(&path).unwrap();

        let offset1 = handle.append(b"hello").unwrap();
        assert_eq!(offset1, 0);

        let offset2 = handle.append(b" world").unwrap();
        assert_eq!(offset2, 5);

        assert_eq!(handle.size().unwrap(), 11);

        let data = handle.read_at(0, 11).unwrap();
        assert_eq!(&data, b"hello world");
    }

    #[test]
    fn file_read_partial() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let mut handle = FileIo::open(&path).unwrap();
        handle.append(b"hello world").unwrap();

        let data = handle.read_at(6, 5).unwrap();
        assert_eq!(&data, b"world");
    }

    #[test]
    fn file_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let mut handle = FileIo::open(&path).unwrap();
        handle.append(b"hello").unwrap();

        let result = handle.read_at(10, 5);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn file_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        {
            let mut handle = FileIo::open(&path).unwrap();
            handle.append(b"persistent data").unwrap();
            handle.sync().unwrap();
        }

        {
            let handle = FileIo::open(&path).unwrap();
            assert_eq!(handle.size().unwrap(), 15);

            let data = handle.read_at(0, 15).unwrap();
            assert_eq!(&data, b"persistent data");
        }
    }

    #[test]
    fn file_reopen_appends_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        {
            let mut handle = FileIo::open(&path).unwrap();
            handle.append(b"first").unwrap();
        }

        let mut handle = FileIo::open(&path).unwrap();
        let offset = handle.append(b"second").unwrap();
        assert_eq!(offset, 5);
        assert_eq!(handle.read_at(0, 11).unwrap(), b"firstsecond");
    }

    #[test]
    fn file_truncate_discards_tail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let mut handle = FileIo::open(&path).unwrap();
        handle.append(b"hello world").unwrap();

        handle.truncate(5).unwrap();
        assert_eq!(handle.size().unwrap(), 5);
        assert_eq!(handle.read_at(0, 5).unwrap(), b"hello");

        let offset = handle.append(b"!").unwrap();
        assert_eq!(offset, 5);
    }

    #[test]
    fn file_truncate_to_larger_size_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let mut handle = FileIo::open(&path).unwrap();
        handle.append(b"hello").unwrap();

        assert!(handle.truncate(100).is_err());
    }

    #[test]
    fn file_empty_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.data");

        let mut handle = FileIo::open(&path).unwrap();
        handle.append(b"hello").unwrap();

        let data = handle.read_at(2, 0).unwrap();
        assert!(data.is_empty());
    }
}
