//! Byte-ordered B-tree index backing.

use crate::error::Result;
use crate::index::{IndexIterator, Indexer};
use crate::record::RecordLocation;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Index backed by a `BTreeMap` keyed on raw bytes.
///
/// `BTreeMap` already orders `Vec<u8>` keys lexicographically, which is
/// exactly the ordering the iterator contract requires. An interior
/// read-write lock makes every operation atomic.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, RecordLocation>>,
}

impl BTreeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, loc: RecordLocation) -> Option<RecordLocation> {
        self.tree.write().insert(key, loc)
    }

    fn get(&self, key: &[u8]) -> Option<RecordLocation> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> Option<RecordLocation> {
        self.tree.write().remove(key)
    }

    fn iterator(&self, reverse: bool) -> Box<dyn IndexIterator> {
        let tree = self.tree.read();
        let mut entries: Vec<(Vec<u8>, RecordLocation)> = tree
            .iter()
            .map(|(key, loc)| (key.clone(), *loc))
            .collect();
        if reverse {
            entries.reverse();
        }

        Box::new(BTreeIndexIterator {
            entries,
            current: 0,
            reverse,
        })
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Iterator over a sorted snapshot of the tree.
struct BTreeIndexIterator {
    entries: Vec<(Vec<u8>, RecordLocation)>,
    current: usize,
    reverse: bool,
}

impl IndexIterator for BTreeIndexIterator {
    fn rewind(&mut self) {
        self.current = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.current = if self.reverse {
            self.entries.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.entries.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.current += 1;
    }

    fn valid(&self) -> bool {
        self.current < self.entries.len()
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.current].0
    }

    fn value(&self) -> RecordLocation {
        self.entries[self.current].1
    }

    fn close(&mut self) {
        self.entries = Vec::new();
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(file_id: u32, offset: i64) -> RecordLocation {
        RecordLocation {
            file_id,
            offset,
            size: 10,
        }
    }

    #[test]
    fn put_returns_previous_location() {
        let index = BTreeIndex::new();

        assert!(index.put(b"k".to_vec(), loc(0, 0)).is_none());
        let old = index.put(b"k".to_vec(), loc(0, 100)).unwrap();
        assert_eq!(old, loc(0, 0));
        assert_eq!(index.get(b"k").unwrap(), loc(0, 100));
    }

    #[test]
    fn get_missing_key() {
        let index = BTreeIndex::new();
        assert!(index.get(b"missing").is_none());
    }

    #[test]
    fn delete_returns_removed_location() {
        let index = BTreeIndex::new();
        index.put(b"k".to_vec(), loc(1, 42));

        assert_eq!(index.delete(b"k").unwrap(), loc(1, 42));
        assert!(index.get(b"k").is_none());
        assert!(index.delete(b"k").is_none());
    }

    #[test]
    fn len_tracks_distinct_keys() {
        let index = BTreeIndex::new();
        assert_eq!(index.len(), 0);

        index.put(b"a".to_vec(), loc(0, 0));
        index.put(b"b".to_vec(), loc(0, 10));
        index.put(b"a".to_vec(), loc(0, 20));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn forward_iteration_is_byte_ordered() {
        let index = BTreeIndex::new();
        for key in [b"cc".as_slice(), b"aa", b"b"] {
            index.put(key.to_vec(), loc(0, 0));
        }

        let mut iter = index.iterator(false);
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }

        assert_eq!(keys, vec![b"aa".to_vec(), b"b".to_vec(), b"cc".to_vec()]);
    }

    #[test]
    fn reverse_iteration_descends() {
        let index = BTreeIndex::new();
        for key in [b"a".as_slice(), b"b", b"c"] {
            index.put(key.to_vec(), loc(0, 0));
        }

        let mut iter = index.iterator(true);
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }

        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn seek_forward_finds_first_at_or_after() {
        let index = BTreeIndex::new();
        for key in [b"aa".as_slice(), b"cc", b"ee"] {
            index.put(key.to_vec(), loc(0, 0));
        }

        let mut iter = index.iterator(false);
        iter.seek(b"bb");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"cc");

        iter.seek(b"cc");
        assert_eq!(iter.key(), b"cc");

        iter.seek(b"zz");
        assert!(!iter.valid());
    }

    #[test]
    fn seek_reverse_finds_first_at_or_before() {
        let index = BTreeIndex::new();
        for key in [b"aa".as_slice(), b"cc", b"ee"] {
            index.put(key.to_vec(), loc(0, 0));
        }

        let mut iter = index.iterator(true);
        iter.seek(b"dd");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"cc");

        iter.seek(b"cc");
        assert_eq!(iter.key(), b"cc");

        iter.seek(b"a");
        assert!(!iter.valid());
    }

    #[test]
    fn iterator_sees_a_snapshot() {
        let index = BTreeIndex::new();
        index.put(b"a".to_vec(), loc(0, 0));

        let mut iter = index.iterator(false);
        index.put(b"z".to_vec(), loc(0, 10));
        index.delete(b"a");

        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"a".to_vec()]);
    }

    #[test]
    fn rewind_restarts_iteration() {
        let index = BTreeIndex::new();
        index.put(b"a".to_vec(), loc(0, 0));
        index.put(b"b".to_vec(), loc(0, 10));

        let mut iter = index.iterator(false);
        iter.next();
        iter.next();
        assert!(!iter.valid());

        iter.rewind();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"a");
    }

    #[test]
    fn close_releases_the_snapshot() {
        let index = BTreeIndex::new();
        index.put(b"a".to_vec(), loc(0, 0));

        let mut iter = index.iterator(false);
        iter.close();
        assert!(!iter.valid());
    }
}
