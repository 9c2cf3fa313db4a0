//! Merge: compaction of older segments and hint-file generation.
//!
//! Merge rewrites only the read-only segments below a boundary fixed at
//! its start. Live records (those the index still points at) are
//! re-appended through a temporary engine rooted in a sibling staging
//! directory; everything else is dropped. A hint file pairs every live
//! key with its new location so the next open can rebuild the index for
//! the merged range without replaying records.
//!
//! The staging directory becomes authoritative only once the
//! `merge-finished` marker is durable; ingest at the next open discards
//! an unmarked staging directory wholesale.

use crate::engine::{Engine, LOCK_FILE_NAME};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::options::Options;
use crate::record::{
    encode_key_with_seq, parse_key_with_seq, LogRecord, RecordLocation, RecordType,
    NON_TXN_SEQ_NO,
};
use crate::segment::{
    SegmentFile, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME, SEQ_NO_FILE_NAME,
};
use barreldb_storage::IoType;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use tracing::{info, warn};

/// Suffix of the sibling staging directory.
const MERGE_DIR_SUFFIX: &str = "-merge";

/// Key of the single record in the merge-finished file.
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

/// Clears the merging flag when the merge exits, on any path.
struct MergingGuard<'a>(&'a Engine);

impl Drop for MergingGuard<'_> {
    fn drop(&mut self) {
        self.0.merging.store(false, Ordering::SeqCst);
    }
}

impl Engine {
    /// Compacts the older segments, reclaiming superseded and tombstoned
    /// records, and writes a hint file for the next open.
    ///
    /// A no-op success on an engine with no segments yet.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::MergeInProgress`] when a merge is already
    /// running, [`Error::MergeRatioUnreached`] below the configured
    /// reclaim ratio, and [`Error::NoEnoughSpaceForMerge`] when the
    /// volume cannot hold the rewritten data set.
    pub fn merge(&self) -> Result<()> {
        if self.state.read().active.is_none() {
            return Ok(());
        }
        if self.merging.swap(true, Ordering::SeqCst) {
            return Err(Error::MergeInProgress);
        }
        let _guard = MergingGuard(self);

        let Some((non_merge_file_id, snapshot_ids)) = self.prepare_merge()? else {
            return Ok(());
        };
        self.run_merge(non_merge_file_id, &snapshot_ids)
    }

    /// Checks the merge preconditions and rotates the active segment.
    ///
    /// Returns the merge boundary and the sorted snapshot of segment IDs
    /// to rewrite, all decided under the writer lock.
    fn prepare_merge(&self) -> Result<Option<(u32, Vec<u32>)>> {
        let mut state = self.state.write();
        if state.active.is_none() {
            return Ok(None);
        }

        let total_size = fsutil::dir_size(&self.options.dir_path)?;
        let reclaimable = self.reclaim_size.load(Ordering::SeqCst).max(0) as u64;
        if (reclaimable as f32) / (total_size as f32) < self.options.data_file_merge_ratio {
            return Err(Error::MergeRatioUnreached);
        }

        let available = fs2::available_space(&self.options.dir_path)?;
        if total_size.saturating_sub(reclaimable) >= available {
            return Err(Error::NoEnoughSpaceForMerge);
        }

        // Retire the active segment; the new one bounds the merge.
        if let Some(active) = state.active.as_mut() {
            active.sync()?;
        }
        let Some(retired) = state.active.take() else {
            return Ok(None);
        };
        let retired_id = retired.file_id();
        state.older.insert(retired_id, retired);
        state.active = Some(SegmentFile::open(
            &self.options.dir_path,
            retired_id + 1,
            IoType::Standard,
        )?);

        let mut snapshot_ids: Vec<u32> = state.older.keys().copied().collect();
        snapshot_ids.sort_unstable();

        Ok(Some((retired_id + 1, snapshot_ids)))
    }

    /// Rewrites the snapshot into the staging directory.
    ///
    /// Runs without the engine lock: the snapshot segments are immutable,
    /// and index lookups synchronize on the index's own lock.
    fn run_merge(&self, non_merge_file_id: u32, snapshot_ids: &[u32]) -> Result<()> {
        let merge_dir = merge_path(&self.options.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        let mut merge_options = self.options.clone();
        merge_options.dir_path = merge_dir.clone();
        merge_options.sync_writes = false;
        let merge_engine = Engine::open(merge_options)?;
        let mut hint_file = SegmentFile::open_hint_file(&merge_dir)?;

        let mut rewritten = 0u64;
        for &file_id in snapshot_ids {
            // Fresh read-only handles: the files are immutable once
            // rotated out, so no lock is needed while scanning them.
            let segment = SegmentFile::open(&self.options.dir_path, file_id, IoType::Standard)?;
            let mut offset = 0i64;

            while let Some((record, size)) = segment.read_record(offset)? {
                let (real_key, _) = parse_key_with_seq(&record.key);

                let live = self
                    .index
                    .get(real_key)
                    .is_some_and(|loc| loc.file_id == file_id && loc.offset == offset);
                if live {
                    let clean = LogRecord {
                        key: encode_key_with_seq(real_key, NON_TXN_SEQ_NO),
                        value: record.value.clone(),
                        record_type: RecordType::Normal,
                    };
                    let new_loc = merge_engine.append_record(&clean)?;
                    hint_file.write_hint_record(real_key, new_loc)?;
                    rewritten += 1;
                }

                offset += i64::from(size);
            }
        }

        hint_file.sync()?;
        merge_engine.sync()?;
        merge_engine.close()?;

        // The marker flips the staging directory from discardable to
        // authoritative; it must be the last thing made durable.
        let mut finished = SegmentFile::open_merge_finished_file(&merge_dir)?;
        let record = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            record_type: RecordType::Normal,
        };
        finished.append(&record.encode())?;
        finished.sync()?;

        info!(rewritten, non_merge_file_id, "merge completed");
        Ok(())
    }
}

/// Returns the sibling staging directory of a data directory.
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    let base = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    parent.join(format!("{base}{MERGE_DIR_SUFFIX}"))
}

/// Reads the merge boundary from the merge-finished file in `dir`.
pub(crate) fn read_non_merge_file_id(dir: &Path) -> Result<u32> {
    let file = SegmentFile::open_merge_finished_file(dir)?;
    let Some((record, _)) = file.read_record(0)? else {
        return Err(Error::corrupted("merge-finished file holds no record"));
    };

    let text = std::str::from_utf8(&record.value)
        .map_err(|_| Error::corrupted("merge boundary is not UTF-8"))?;
    text.parse()
        .map_err(|_| Error::corrupted("merge boundary is not a number"))
}

/// Ingests a completed merge at open, before segments are loaded.
///
/// An unfinished staging directory (no marker) is discarded. A finished
/// one replaces every data file below the boundary; its `flock` and
/// `seq-no` entries belong to the temporary engine and stay behind.
pub(crate) fn ingest_merge_dir(options: &Options) -> Result<()> {
    let merge_dir = merge_path(&options.dir_path);
    if !merge_dir.exists() {
        return Ok(());
    }

    let mut finished = false;
    let mut names: Vec<String> = Vec::new();
    for entry in fs::read_dir(&merge_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == MERGE_FINISHED_FILE_NAME {
            finished = true;
        }
        if name == SEQ_NO_FILE_NAME || name == LOCK_FILE_NAME {
            continue;
        }
        names.push(name);
    }

    if !finished {
        warn!(dir = %merge_dir.display(), "discarding unfinished merge directory");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    }

    let non_merge_file_id = read_non_merge_file_id(&merge_dir)?;

    for file_id in 0..non_merge_file_id {
        let path = SegmentFile::data_file_path(&options.dir_path, file_id);
        if path.exists() {
            fs::remove_file(&path)?;
        }
    }

    for name in names {
        let src = merge_dir.join(&name);
        let dst = options.dir_path.join(&name);
        fs::rename(&src, &dst)?;
    }
    fs::remove_dir_all(&merge_dir)?;

    info!(non_merge_file_id, "ingested merge output");
    Ok(())
}

/// Rebuilds index entries for the merged range from the hint file.
///
/// Hint entries are live by construction, so no reclaim accounting is
/// needed here.
pub(crate) fn load_index_from_hint_file(engine: &Engine) -> Result<()> {
    let path = engine.options.dir_path.join(HINT_FILE_NAME);
    if !path.exists() {
        return Ok(());
    }

    let hint_file = SegmentFile::open_hint_file(&engine.options.dir_path)?;
    let mut offset = 0i64;
    let mut loaded = 0u64;

    while let Some((record, size)) = hint_file.read_record(offset)? {
        let loc = RecordLocation::decode(&record.value)?;
        engine.index.put(record.key, loc);
        offset += i64::from(size);
        loaded += 1;
    }

    info!(loaded, "loaded index entries from hint file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn merge_ready_options(dir: &Path) -> Options {
        // Ratio zero so tests can force a merge at will.
        Options::new(dir)
            .data_file_size(512)
            .data_file_merge_ratio(0.0)
    }

    #[test]
    fn merge_path_is_a_sibling() {
        assert_eq!(
            merge_path(Path::new("/data/barrel")),
            Path::new("/data/barrel-merge")
        );
    }

    #[test]
    fn merge_on_empty_engine_is_a_no_op() {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("db");
        let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();

        engine.merge().unwrap();
        assert!(!merge_path(&db_dir).exists());
    }

    #[test]
    fn merge_ratio_gate() {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("db");
        let options = Options::new(&db_dir)
            .data_file_size(512)
            .data_file_merge_ratio(0.9);
        let engine = Engine::open(options).unwrap();

        // Only live data: nothing close to 90% reclaimable.
        engine.put(b"k", b"v").unwrap();
        assert!(matches!(engine.merge(), Err(Error::MergeRatioUnreached)));
    }

    #[test]
    fn merge_drops_dead_records_and_keeps_live_ones() {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("db");

        {
            let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();
            for round in 0..4u8 {
                for i in 0..16u8 {
                    engine.put(&[i + 1], &[round; 24]).unwrap();
                }
            }
            engine.delete(&[1]).unwrap();

            engine.merge().unwrap();
            engine.close().unwrap();

            // Staging directory carries the rewritten set plus markers.
            assert!(merge_path(&db_dir).exists());
        }

        let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();
        assert!(!merge_path(&db_dir).exists());
        assert!(matches!(engine.get(&[1]), Err(Error::KeyNotFound)));
        for i in 1..16u8 {
            assert_eq!(engine.get(&[i + 1]).unwrap(), vec![3u8; 24]);
        }
        assert!(db_dir.join(HINT_FILE_NAME).exists());
    }

    #[test]
    fn merge_shrinks_the_directory() {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("db");

        let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();
        for round in 0..8u8 {
            for i in 0..8u8 {
                engine.put(&[i + 1], &[round; 32]).unwrap();
            }
        }
        let before = fsutil::dir_size(&db_dir).unwrap();
        engine.merge().unwrap();
        engine.close().unwrap();

        let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();
        let after = fsutil::dir_size(&db_dir).unwrap();
        assert!(
            after < before,
            "directory must shrink: before={before} after={after}"
        );
        for i in 0..8u8 {
            assert_eq!(engine.get(&[i + 1]).unwrap(), vec![7u8; 32]);
        }
    }

    #[test]
    fn unfinished_merge_directory_is_discarded() {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("db");

        {
            let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();
            engine.put(b"k", b"v").unwrap();
            engine.close().unwrap();
        }

        // A staging directory without the finished marker.
        let staging = merge_path(&db_dir);
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("000000000.data"), b"half-written").unwrap();

        let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();
        assert!(!staging.exists());
        assert_eq!(engine.get(b"k").unwrap(), b"v");
    }

    #[test]
    fn writes_during_merge_land_in_the_new_active_segment() {
        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("db");
        let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();

        for i in 0..16u8 {
            engine.put(&[i + 1], &[0; 24]).unwrap();
        }
        engine.merge().unwrap();

        // Post-merge writes go to the segment above the boundary and
        // survive the ingest of the merge output.
        engine.put(b"fresh", b"value").unwrap();
        engine.close().unwrap();

        let engine = Engine::open(merge_ready_options(&db_dir)).unwrap();
        assert_eq!(engine.get(b"fresh").unwrap(), b"value");
        for i in 0..16u8 {
            assert_eq!(engine.get(&[i + 1]).unwrap(), vec![0; 24]);
        }
    }
}
