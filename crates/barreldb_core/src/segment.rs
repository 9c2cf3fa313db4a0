//! Segment files.
//!
//! A segment is a numbered append-only file of log records, named
//! `<file_id padded to 9 decimals>.data`. At most one segment per
//! directory is *active* (writable); all lower-numbered segments are
//! read-only until a merge deletes them.
//!
//! Three specially named files share the record format but hold directory
//! level metadata: `hint-index` (one record per live key, written by
//! merge), `merge-finished` (the smallest non-merged file ID), and
//! `seq-no` (the engine's sequence counter, written at close).

use crate::error::{Error, Result};
use crate::record::{
    compute_record_crc, decode_header, DecodedHeader, LogRecord, RecordLocation, RecordType,
    CRC_SIZE, MAX_HEADER_SIZE,
};
use barreldb_storage::{open_handle, IoHandle, IoType};
use std::path::{Path, PathBuf};

/// Suffix of numbered segment files.
pub const SEGMENT_FILE_SUFFIX: &str = ".data";

/// Name of the hint file produced by merge.
pub const HINT_FILE_NAME: &str = "hint-index";

/// Name of the marker file recording a completed merge.
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// Name of the sequence-number file written at close.
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// A numbered append-only file of log records.
pub struct SegmentFile {
    file_id: u32,
    write_offset: i64,
    io: Box<dyn IoHandle>,
}

impl SegmentFile {
    /// Opens (creating if absent) the segment numbered `file_id` in `dir`.
    ///
    /// The write offset starts at zero; the engine positions it after
    /// recovery. Appends always land at the physical end of the file.
    pub fn open(dir: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        let path = Self::data_file_path(dir, file_id);
        Self::open_at(&path, file_id, io_type)
    }

    /// Opens the hint file of `dir`.
    pub fn open_hint_file(dir: &Path) -> Result<Self> {
        Self::open_at(&dir.join(HINT_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the merge-finished marker file of `dir`.
    pub fn open_merge_finished_file(dir: &Path) -> Result<Self> {
        Self::open_at(&dir.join(MERGE_FINISHED_FILE_NAME), 0, IoType::Standard)
    }

    /// Opens the sequence-number file of `dir`.
    pub fn open_seq_no_file(dir: &Path) -> Result<Self> {
        Self::open_at(&dir.join(SEQ_NO_FILE_NAME), 0, IoType::Standard)
    }

    fn open_at(path: &Path, file_id: u32, io_type: IoType) -> Result<Self> {
        let io = open_handle(path, io_type)?;
        Ok(Self {
            file_id,
            write_offset: 0,
            io,
        })
    }

    /// Returns the path of the segment numbered `file_id` in `dir`.
    #[must_use]
    pub fn data_file_path(dir: &Path, file_id: u32) -> PathBuf {
        dir.join(format!("{file_id:09}{SEGMENT_FILE_SUFFIX}"))
    }

    /// Returns this segment's file ID.
    #[must_use]
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the current write offset.
    #[must_use]
    pub fn write_offset(&self) -> i64 {
        self.write_offset
    }

    pub(crate) fn set_write_offset(&mut self, offset: i64) {
        self.write_offset = offset;
    }

    /// Returns the size of the underlying file in bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(self.io.size()?)
    }

    /// Appends `buf` and advances the write offset by its length.
    pub fn append(&mut self, buf: &[u8]) -> Result<()> {
        self.io.append(buf)?;
        self.write_offset += buf.len() as i64;
        Ok(())
    }

    /// Fsyncs the underlying file.
    pub fn sync(&mut self) -> Result<()> {
        Ok(self.io.sync()?)
    }

    /// Truncates the underlying file, discarding bytes past `new_size`.
    pub(crate) fn truncate(&mut self, new_size: u64) -> Result<()> {
        Ok(self.io.truncate(new_size)?)
    }

    /// Replaces the I/O handle with a standard-file one.
    ///
    /// Used after a memory-mapped recovery scan so that subsequent reads
    /// and writes go through plain file I/O.
    pub(crate) fn reset_io(&mut self, dir: &Path) -> Result<()> {
        let path = Self::data_file_path(dir, self.file_id);
        self.io = open_handle(&path, IoType::Standard)?;
        Ok(())
    }

    /// Reads the record starting at `offset`.
    ///
    /// Returns `Ok(None)` at the end of the segment: past the last byte,
    /// on the all-zero end marker, or when too few bytes remain to form a
    /// header.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCrc`] when a complete record fails its
    /// checksum; a read that runs past the file end (a torn tail)
    /// surfaces as the underlying storage error.
    pub fn read_record(&self, offset: i64) -> Result<Option<(LogRecord, u32)>> {
        if offset < 0 {
            return Err(Error::corrupted("negative record offset"));
        }

        let file_size = self.io.size()? as i64;
        if offset >= file_size {
            return Ok(None);
        }

        // Clamp the header read near the end of the file.
        let window = MAX_HEADER_SIZE.min((file_size - offset) as usize);
        let header_buf = self.io.read_at(offset as u64, window)?;

        let (header, header_len) = match decode_header(&header_buf) {
            DecodedHeader::Unreadable | DecodedHeader::EndOfSegment => return Ok(None),
            DecodedHeader::Corrupt => return Err(Error::InvalidCrc),
            DecodedHeader::Header { header, len } => (header, len),
        };

        let key_size = header.key_size as usize;
        let value_size = header.value_size as usize;

        let kv = if key_size + value_size > 0 {
            self.io
                .read_at(offset as u64 + header_len as u64, key_size + value_size)?
        } else {
            Vec::new()
        };
        let (key, value) = kv.split_at(key_size);

        let crc = compute_record_crc(&header_buf[CRC_SIZE..header_len], key, value);
        if crc != header.crc {
            return Err(Error::InvalidCrc);
        }

        let record = LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            record_type: header.record_type,
        };
        Ok(Some((record, (header_len + key_size + value_size) as u32)))
    }

    /// Appends a hint record: the real key paired with its encoded
    /// location in the merged data set.
    pub fn write_hint_record(&mut self, key: &[u8], loc: RecordLocation) -> Result<()> {
        let record = LogRecord {
            key: key.to_vec(),
            value: loc.encode(),
            record_type: RecordType::Normal,
        };
        self.append(&record.encode())
    }
}

impl std::fmt::Debug for SegmentFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentFile")
            .field("file_id", &self.file_id)
            .field("write_offset", &self.write_offset)
            .finish_non_exhaustive()
    }
}
