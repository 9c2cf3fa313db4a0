//! The storage engine: open/close, write path, read path.
//!
//! All writes funnel through one append path: encode the record, rotate
//! the active segment when it would overflow, append, then apply the
//! configured sync policy. Reads resolve the key through the in-memory
//! index and fetch the record from whichever segment the location names.
//!
//! The engine is safe for concurrent readers and a single logical writer:
//! a read-write lock guards the segment set and sync accounting, and the
//! index carries its own interior lock.

use crate::error::{Error, Result};
use crate::fsutil;
use crate::index::{new_indexer, Indexer};
use crate::options::Options;
use crate::record::{
    encode_key_with_seq, LogRecord, RecordLocation, RecordType, NON_TXN_SEQ_NO,
};
use crate::segment::SegmentFile;
use barreldb_storage::IoType;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Name of the advisory lock file inside the data directory.
pub(crate) const LOCK_FILE_NAME: &str = "flock";

/// Key of the single record in the seq-no file.
const SEQ_NO_KEY: &[u8] = b"seq.no";

/// Mutable segment state guarded by the engine lock.
pub(crate) struct EngineState {
    /// The writable segment with the largest file ID, if any exist.
    pub(crate) active: Option<SegmentFile>,
    /// Read-only segments by file ID.
    pub(crate) older: HashMap<u32, SegmentFile>,
    /// Bytes appended since the last fsync, for the bytes-per-sync policy.
    pub(crate) bytes_since_sync: u64,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone)]
pub struct Stat {
    /// Number of live keys in the index.
    pub key_count: usize,
    /// Number of segment files, the active one included.
    pub data_file_count: usize,
    /// Bytes occupied by superseded or tombstoned records.
    pub reclaimable_size: i64,
    /// Total on-disk size of the data directory.
    pub disk_size: u64,
}

/// A Bitcask-model key-value storage engine.
///
/// One engine owns one data directory, protected by an OS advisory lock
/// so a second process cannot open it concurrently.
///
/// # Example
///
/// ```no_run
/// use barreldb_core::{Engine, Options};
///
/// let engine = Engine::open(Options::new("/tmp/barrel-example"))?;
/// engine.put(b"alpha", b"1")?;
/// assert_eq!(engine.get(b"alpha")?, b"1");
/// engine.close()?;
/// # Ok::<(), barreldb_core::Error>(())
/// ```
pub struct Engine {
    pub(crate) options: Options,
    pub(crate) state: RwLock<EngineState>,
    pub(crate) index: Box<dyn Indexer>,
    pub(crate) seq_no: AtomicU64,
    pub(crate) reclaim_size: AtomicI64,
    pub(crate) merging: AtomicBool,
    lock_file: File,
    is_initial: bool,
}

impl Engine {
    /// Opens the engine on the directory named by `options`.
    ///
    /// Creates the directory if missing, acquires the advisory lock,
    /// ingests any completed merge output, and rebuilds the index from
    /// hint files and segment replay.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::DatabaseIsUsing`] when another process holds
    /// the directory, [`Error::InvalidOptions`] on bad configuration, and
    /// propagates recovery failures.
    pub fn open(options: Options) -> Result<Self> {
        check_options(&options)?;

        let mut is_initial = false;
        if !options.dir_path.is_dir() {
            is_initial = true;
            fs::create_dir_all(&options.dir_path)?;
        }
        if fs::read_dir(&options.dir_path)?.next().is_none() {
            is_initial = true;
        }

        let lock_file = acquire_dir_lock(&options.dir_path)?;

        crate::merge::ingest_merge_dir(&options)?;

        let engine = Self {
            index: new_indexer(options.index_type),
            state: RwLock::new(EngineState {
                active: None,
                older: HashMap::new(),
                bytes_since_sync: 0,
            }),
            seq_no: AtomicU64::new(NON_TXN_SEQ_NO),
            reclaim_size: AtomicI64::new(0),
            merging: AtomicBool::new(false),
            lock_file,
            is_initial,
            options,
        };

        let file_ids = crate::recovery::load_segment_files(&engine)?;
        crate::merge::load_index_from_hint_file(&engine)?;
        let replay_end = crate::recovery::replay_segments(&engine, &file_ids)?;
        crate::recovery::load_seq_no(&engine)?;

        {
            let mut state = engine.state.write();

            if engine.options.mmap_at_startup {
                for segment in state.older.values_mut() {
                    segment.reset_io(&engine.options.dir_path)?;
                }
                if let Some(active) = state.active.as_mut() {
                    active.reset_io(&engine.options.dir_path)?;
                }
            }

            if let Some(active) = state.active.as_mut() {
                if let Some(end) = replay_end {
                    let size = active.size()? as i64;
                    if end < size {
                        warn!(
                            file_id = active.file_id(),
                            discarded = size - end,
                            "discarding torn bytes at the active segment tail"
                        );
                        active.truncate(end as u64)?;
                    }
                }
                let size = active.size()? as i64;
                active.set_write_offset(size);
            }
        }

        info!(
            dir = %engine.options.dir_path.display(),
            is_initial = engine.is_initial,
            keys = engine.index.len(),
            "engine opened"
        );
        Ok(engine)
    }

    /// Returns true when the data directory was created (or empty) at open.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        self.is_initial
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Rejects an empty key with [`Error::KeyIsEmpty`].
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let record = LogRecord {
            key: encode_key_with_seq(key, NON_TXN_SEQ_NO),
            value: value.to_vec(),
            record_type: RecordType::Normal,
        };
        let loc = self.append_record(&record)?;

        if let Some(old) = self.index.put(key.to_vec(), loc) {
            self.reclaim_size
                .fetch_add(i64::from(old.size), Ordering::SeqCst);
        }
        Ok(())
    }

    /// Removes `key` by appending a tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] when the key is absent.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        if self.index.get(key).is_none() {
            return Err(Error::KeyNotFound);
        }

        let record = LogRecord {
            key: encode_key_with_seq(key, NON_TXN_SEQ_NO),
            value: Vec::new(),
            record_type: RecordType::Deleted,
        };
        let loc = self.append_record(&record)?;
        // The tombstone itself is dead weight from the moment it lands.
        self.reclaim_size
            .fetch_add(i64::from(loc.size), Ordering::SeqCst);

        match self.index.delete(key) {
            Some(old) => {
                self.reclaim_size
                    .fetch_add(i64::from(old.size), Ordering::SeqCst);
                Ok(())
            }
            None => Err(Error::IndexUpdateFailed),
        }
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] when the key is absent.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }
        let Some(loc) = self.index.get(key) else {
            return Err(Error::KeyNotFound);
        };

        let state = self.state.read();
        self.value_at_location(&state, loc)
    }

    /// Fsyncs the active segment.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.write();
        if let Some(active) = state.active.as_mut() {
            active.sync()?;
        }
        Ok(())
    }

    /// Returns engine statistics.
    pub fn stat(&self) -> Result<Stat> {
        let state = self.state.read();
        let data_file_count = state.older.len() + usize::from(state.active.is_some());
        let disk_size = fsutil::dir_size(&self.options.dir_path)?;

        Ok(Stat {
            key_count: self.index.len(),
            data_file_count,
            reclaimable_size: self.reclaim_size.load(Ordering::SeqCst),
            disk_size,
        })
    }

    /// Copies every file of the data directory into `dst`, except the
    /// advisory lock file.
    pub fn backup(&self, dst: impl AsRef<Path>) -> Result<()> {
        let _guard = self.state.read();
        fsutil::copy_dir(&self.options.dir_path, dst.as_ref(), &[LOCK_FILE_NAME])?;
        Ok(())
    }

    /// Returns all live keys in ascending byte order.
    #[must_use]
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut iter = self.index.iterator(false);
        let mut keys = Vec::with_capacity(self.index.len());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        keys
    }

    /// Visits every key-value pair in ascending key order until `visit`
    /// returns false.
    pub fn fold<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> bool,
    {
        let mut iter = self.index.iterator(false);
        while iter.valid() {
            let value = {
                let state = self.state.read();
                self.value_at_location(&state, iter.value())?
            };
            if !visit(iter.key(), &value) {
                break;
            }
            iter.next();
        }
        Ok(())
    }

    /// Closes the engine: persists the sequence number, closes every
    /// segment and the index, and releases the directory lock.
    pub fn close(&self) -> Result<()> {
        {
            let mut state = self.state.write();

            if state.active.is_some() {
                let mut seq_file = SegmentFile::open_seq_no_file(&self.options.dir_path)?;
                let record = LogRecord {
                    key: SEQ_NO_KEY.to_vec(),
                    value: self
                        .seq_no
                        .load(Ordering::SeqCst)
                        .to_string()
                        .into_bytes(),
                    record_type: RecordType::Normal,
                };
                seq_file.append(&record.encode())?;
                seq_file.sync()?;

                if let Some(active) = state.active.as_mut() {
                    active.sync()?;
                }
            }

            state.active = None;
            state.older.clear();
        }

        self.index.close()?;
        self.lock_file.unlock()?;
        debug!(dir = %self.options.dir_path.display(), "engine closed");
        Ok(())
    }

    /// Appends a record under the engine write lock.
    pub(crate) fn append_record(&self, record: &LogRecord) -> Result<RecordLocation> {
        let mut state = self.state.write();
        self.append_record_locked(&mut state, record)
    }

    /// The shared append path: rotation, write, sync policy.
    ///
    /// The caller holds the engine write lock.
    pub(crate) fn append_record_locked(
        &self,
        state: &mut EngineState,
        record: &LogRecord,
    ) -> Result<RecordLocation> {
        if state.active.is_none() {
            state.active = Some(SegmentFile::open(
                &self.options.dir_path,
                0,
                IoType::Standard,
            )?);
            debug!(file_id = 0, "opened initial segment");
        }

        let encoded = record.encode();
        let size = encoded.len() as u32;

        let needs_rotation = state.active.as_ref().is_some_and(|active| {
            active.write_offset() + i64::from(size) > self.options.data_file_size
        });
        if needs_rotation {
            // The retiring segment must be durable before it goes read-only.
            if let Some(active) = state.active.as_mut() {
                active.sync()?;
            }
            if let Some(active) = state.active.take() {
                let next_id = active.file_id() + 1;
                state.older.insert(active.file_id(), active);
                state.active = Some(SegmentFile::open(
                    &self.options.dir_path,
                    next_id,
                    IoType::Standard,
                )?);
                debug!(file_id = next_id, "rotated to a new active segment");
            }
        }

        let Some(active) = state.active.as_mut() else {
            return Err(Error::corrupted("active segment missing after rotation"));
        };

        let offset = active.write_offset();
        active.append(&encoded)?;

        state.bytes_since_sync += u64::from(size);
        let need_sync = self.options.sync_writes
            || (self.options.bytes_per_sync > 0
                && state.bytes_since_sync >= self.options.bytes_per_sync);
        if need_sync {
            active.sync()?;
            state.bytes_since_sync = 0;
        }

        Ok(RecordLocation {
            file_id: active.file_id(),
            offset,
            size,
        })
    }

    /// Resolves a record location to its stored value.
    ///
    /// The caller holds at least the read side of the engine lock.
    pub(crate) fn value_at_location(
        &self,
        state: &EngineState,
        loc: RecordLocation,
    ) -> Result<Vec<u8>> {
        let segment = if state.active.as_ref().map(SegmentFile::file_id) == Some(loc.file_id) {
            state.active.as_ref()
        } else {
            state.older.get(&loc.file_id)
        };
        let Some(segment) = segment else {
            return Err(Error::DataFileNotFound {
                file_id: loc.file_id,
            });
        };

        match segment.read_record(loc.offset)? {
            None => Err(Error::corrupted("indexed record missing from segment")),
            Some((record, _)) => {
                if record.record_type == RecordType::Deleted {
                    // Cannot happen while invariants hold; treat as corruption.
                    return Err(Error::KeyNotFound);
                }
                Ok(record.value)
            }
        }
    }
}

fn check_options(options: &Options) -> Result<()> {
    if options.dir_path.as_os_str().is_empty() {
        return Err(Error::invalid_options("database dir path is empty"));
    }
    if options.data_file_size <= 0 {
        return Err(Error::invalid_options(
            "data file size must be greater than 0",
        ));
    }
    if !(0.0..=1.0).contains(&options.data_file_merge_ratio) {
        return Err(Error::invalid_options(
            "merge ratio must be between 0 and 1",
        ));
    }
    Ok(())
}

fn acquire_dir_lock(dir: &Path) -> Result<File> {
    let lock_path = dir.join(LOCK_FILE_NAME);
    let lock_file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;

    if lock_file.try_lock_exclusive().is_err() {
        return Err(Error::DatabaseIsUsing);
    }
    Ok(lock_file)
}
