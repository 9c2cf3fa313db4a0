//! In-memory index: ordered map from key to record location.

mod btree;

pub use btree::BTreeIndex;

use crate::error::Result;
use crate::options::IndexType;
use crate::record::RecordLocation;

/// Contract for the in-memory index.
///
/// Keys are ordered by lexicographic byte comparison. Every call is
/// atomic; implementations carry their own interior synchronization so a
/// reader calling [`Indexer::get`] is safe against a concurrent writer
/// calling [`Indexer::put`].
pub trait Indexer: Send + Sync {
    /// Inserts or replaces a key's location.
    ///
    /// Returns the previous location when the key was already present,
    /// for reclaim accounting.
    fn put(&self, key: Vec<u8>, loc: RecordLocation) -> Option<RecordLocation>;

    /// Looks up a key's location.
    fn get(&self, key: &[u8]) -> Option<RecordLocation>;

    /// Removes a key's mapping.
    ///
    /// Returns the removed location, or `None` when the key was absent.
    fn delete(&self, key: &[u8]) -> Option<RecordLocation>;

    /// Creates an iterator over a snapshot of the current keys.
    ///
    /// `reverse` yields descending byte order. Concurrent writers do not
    /// modify the iterator's view.
    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator>;

    /// Returns the number of keys in the index.
    fn len(&self) -> usize;

    /// Returns true if the index holds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Releases any resources held by the index.
    fn close(&self) -> Result<()>;
}

/// Iterator over an index snapshot.
///
/// A fresh iterator is positioned at the first key of its order; after
/// the last position [`IndexIterator::valid`] returns false and the
/// accessors must not be called.
pub trait IndexIterator: Send {
    /// Moves to the first key in the iteration order.
    fn rewind(&mut self);

    /// Moves to the first key `k` with `k >= key` (forward) or `k <= key`
    /// (reverse).
    fn seek(&mut self, key: &[u8]);

    /// Advances by one position.
    fn next(&mut self);

    /// Returns false once the iterator has moved past the last position.
    fn valid(&self) -> bool;

    /// Returns the key at the current position.
    fn key(&self) -> &[u8];

    /// Returns the location at the current position.
    fn value(&self) -> RecordLocation;

    /// Releases the snapshot.
    fn close(&mut self);
}

/// Constructs the index backing selected by `index_type`.
///
/// The byte-ordered B-tree currently serves every variant; it is the only
/// backing the engine requires.
#[must_use]
pub fn new_indexer(index_type: IndexType) -> Box<dyn Indexer> {
    match index_type {
        IndexType::BTree | IndexType::Art | IndexType::BPlusTree => Box::new(BTreeIndex::new()),
    }
}
