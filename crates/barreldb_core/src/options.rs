//! Engine configuration.

use std::path::PathBuf;

/// Selects the in-memory index backing.
///
/// Only the byte-ordered B-tree is implemented today; the other variants
/// are accepted and currently served by the same backing so that callers
/// can pin a choice ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexType {
    /// Byte-ordered B-tree.
    #[default]
    BTree,
    /// Adaptive radix tree.
    Art,
    /// Disk-backed B+ tree.
    BPlusTree,
}

/// Configuration for opening an engine.
#[derive(Debug, Clone)]
pub struct Options {
    /// Data directory. Must be non-empty.
    pub dir_path: PathBuf,

    /// Rotation threshold for segment files, in bytes. Must be positive.
    pub data_file_size: i64,

    /// Whether to fsync the active segment after every append.
    pub sync_writes: bool,

    /// Fsync after this many accumulated bytes; 0 disables the policy.
    pub bytes_per_sync: u64,

    /// In-memory index backing.
    pub index_type: IndexType,

    /// Use memory-mapped reads for the recovery scan at open.
    pub mmap_at_startup: bool,

    /// Reclaimable fraction of the directory that permits a merge.
    /// Must lie in `[0, 1]`.
    pub data_file_merge_ratio: f32,
}

impl Options {
    /// Creates options for the given directory with defaults everywhere
    /// else: 256 MiB segments, no per-write fsync, B-tree index, merge at
    /// half the directory reclaimable.
    #[must_use]
    pub fn new(dir_path: impl Into<PathBuf>) -> Self {
        Self {
            dir_path: dir_path.into(),
            data_file_size: 256 * 1024 * 1024,
            sync_writes: false,
            bytes_per_sync: 0,
            index_type: IndexType::BTree,
            mmap_at_startup: false,
            data_file_merge_ratio: 0.5,
        }
    }

    /// Sets the segment rotation threshold.
    #[must_use]
    pub const fn data_file_size(mut self, size: i64) -> Self {
        self.data_file_size = size;
        self
    }

    /// Sets whether every append is fsynced.
    #[must_use]
    pub const fn sync_writes(mut self, value: bool) -> Self {
        self.sync_writes = value;
        self
    }

    /// Sets the accumulated-bytes fsync threshold.
    #[must_use]
    pub const fn bytes_per_sync(mut self, bytes: u64) -> Self {
        self.bytes_per_sync = bytes;
        self
    }

    /// Sets the index backing.
    #[must_use]
    pub const fn index_type(mut self, index_type: IndexType) -> Self {
        self.index_type = index_type;
        self
    }

    /// Sets whether recovery reads use memory mapping.
    #[must_use]
    pub const fn mmap_at_startup(mut self, value: bool) -> Self {
        self.mmap_at_startup = value;
        self
    }

    /// Sets the reclaimable ratio that permits a merge.
    #[must_use]
    pub const fn data_file_merge_ratio(mut self, ratio: f32) -> Self {
        self.data_file_merge_ratio = ratio;
        self
    }
}

/// Configuration for a write batch.
#[derive(Debug, Clone)]
pub struct WriteBatchOptions {
    /// Maximum number of distinct keys a single batch may stage.
    pub max_batch_num: usize,

    /// Whether commit fsyncs the active segment before returning.
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_num: 10_000,
            sync_writes: true,
        }
    }
}

/// Configuration for an engine iterator.
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Iterate keys in descending byte order.
    pub reverse: bool,

    /// Skip keys that do not begin with this prefix. Empty matches all.
    pub prefix: Vec<u8>,
}
