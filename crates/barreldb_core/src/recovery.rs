//! Startup recovery: segment discovery and index reconstruction.
//!
//! Replay walks every segment at or above the merge boundary in ascending
//! file-ID order. Non-transactional records apply to the index at once;
//! records carrying a sequence number are buffered until their
//! transaction-finished marker appears, and are silently discarded when
//! it never does (the batch never committed).
//!
//! Two end conditions are tolerated as a clean stop: the zero-header
//! end-of-segment marker, and a torn record at the tail of the last
//! segment (a crash mid-append). A checksum failure on a complete record
//! is corruption and aborts the open.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::record::{parse_key_with_seq, LogRecord, RecordLocation, RecordType, NON_TXN_SEQ_NO};
use crate::segment::{
    SegmentFile, MERGE_FINISHED_FILE_NAME, SEGMENT_FILE_SUFFIX, SEQ_NO_FILE_NAME,
};
use barreldb_storage::{IoType, StorageError};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

/// Lists the `.data` files of the directory, opens them, and installs the
/// highest-numbered one as the active segment.
///
/// Returns the sorted file IDs for the replay pass.
pub(crate) fn load_segment_files(engine: &Engine) -> Result<Vec<u32>> {
    let mut file_ids: Vec<u32> = Vec::new();

    for entry in fs::read_dir(&engine.options.dir_path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_suffix(SEGMENT_FILE_SUFFIX) else {
            continue;
        };
        let id: u32 = stem
            .parse()
            .map_err(|_| Error::DataDirectoryCorrupted { name: name.clone() })?;
        file_ids.push(id);
    }
    file_ids.sort_unstable();

    let io_type = if engine.options.mmap_at_startup {
        IoType::MemoryMap
    } else {
        IoType::Standard
    };

    let mut state = engine.state.write();
    for (i, &file_id) in file_ids.iter().enumerate() {
        let segment = SegmentFile::open(&engine.options.dir_path, file_id, io_type)?;
        if i == file_ids.len() - 1 {
            state.active = Some(segment);
        } else {
            state.older.insert(file_id, segment);
        }
    }

    debug!(segments = file_ids.len(), "loaded segment files");
    Ok(file_ids)
}

/// Replays segments into the index and returns the replay end offset of
/// the last file, or `None` when the directory holds no segments.
pub(crate) fn replay_segments(engine: &Engine, file_ids: &[u32]) -> Result<Option<i64>> {
    if file_ids.is_empty() {
        return Ok(None);
    }

    // A completed merge means every file below the boundary is already
    // covered by the hint file.
    let merge_boundary = if engine
        .options
        .dir_path
        .join(MERGE_FINISHED_FILE_NAME)
        .exists()
    {
        Some(crate::merge::read_non_merge_file_id(
            &engine.options.dir_path,
        )?)
    } else {
        None
    };

    let state = engine.state.read();
    let mut txn_buffer: HashMap<u64, Vec<(LogRecord, RecordLocation)>> = HashMap::new();
    let mut current_seq = NON_TXN_SEQ_NO;
    let mut last_offset = 0i64;

    for (i, &file_id) in file_ids.iter().enumerate() {
        if merge_boundary.is_some_and(|boundary| file_id < boundary) {
            continue;
        }

        let is_last = i == file_ids.len() - 1;
        let segment = if is_last {
            state.active.as_ref()
        } else {
            state.older.get(&file_id)
        };
        let Some(segment) = segment else {
            return Err(Error::DataFileNotFound { file_id });
        };

        let mut offset = 0i64;
        loop {
            let (record, size) = match segment.read_record(offset) {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                // A torn record at the tail of the last segment is a crash
                // artifact, not corruption; the caller trims the bytes.
                Err(Error::Storage(StorageError::ReadPastEnd { .. })) if is_last => {
                    warn!(file_id, offset, "torn record at segment tail");
                    break;
                }
                Err(err) => return Err(err),
            };

            let loc = RecordLocation {
                file_id,
                offset,
                size,
            };
            let (real_key, seq_no) = parse_key_with_seq(&record.key);

            if seq_no == NON_TXN_SEQ_NO {
                apply_to_index(engine, real_key, record.record_type, loc);
            } else if record.record_type == RecordType::TxnFinished {
                for (buffered, buffered_loc) in txn_buffer.remove(&seq_no).unwrap_or_default() {
                    apply_to_index(engine, &buffered.key, buffered.record_type, buffered_loc);
                }
            } else {
                let buffered = LogRecord {
                    key: real_key.to_vec(),
                    value: record.value,
                    record_type: record.record_type,
                };
                txn_buffer.entry(seq_no).or_default().push((buffered, loc));
            }

            current_seq = current_seq.max(seq_no);
            offset += i64::from(size);
        }

        if is_last {
            last_offset = offset;
        }
    }

    engine.seq_no.store(current_seq, Ordering::SeqCst);
    if !txn_buffer.is_empty() {
        debug!(
            batches = txn_buffer.len(),
            "discarded batch records without a finished marker"
        );
    }

    info!(keys = engine.index.len(), "replayed segment files");
    Ok(Some(last_offset))
}

fn apply_to_index(engine: &Engine, key: &[u8], record_type: RecordType, loc: RecordLocation) {
    let old = if record_type == RecordType::Deleted {
        engine
            .reclaim_size
            .fetch_add(i64::from(loc.size), Ordering::SeqCst);
        engine.index.delete(key)
    } else {
        engine.index.put(key.to_vec(), loc)
    };

    if let Some(old) = old {
        engine
            .reclaim_size
            .fetch_add(i64::from(old.size), Ordering::SeqCst);
    }
}

/// Seeds the sequence counter from the `seq-no` file, then deletes it.
///
/// The file is written at close and exists only across a clean
/// close/open cycle; replay already recomputed a lower bound from the
/// segments themselves.
pub(crate) fn load_seq_no(engine: &Engine) -> Result<()> {
    let path = engine.options.dir_path.join(SEQ_NO_FILE_NAME);
    if !path.exists() {
        return Ok(());
    }

    let seq_file = SegmentFile::open_seq_no_file(&engine.options.dir_path)?;
    let Some((record, _)) = seq_file.read_record(0)? else {
        return Err(Error::corrupted("seq-no file holds no record"));
    };

    let text = std::str::from_utf8(&record.value)
        .map_err(|_| Error::corrupted("seq-no value is not UTF-8"))?;
    let seq_no: u64 = text
        .parse()
        .map_err(|_| Error::corrupted("seq-no value is not a number"))?;

    engine.seq_no.fetch_max(seq_no, Ordering::SeqCst);
    fs::remove_file(&path)?;
    Ok(())
}
