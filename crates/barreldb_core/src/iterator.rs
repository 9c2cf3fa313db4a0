//! Engine-level iteration over live keys.

use crate::engine::Engine;
use crate::error::Result;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

/// Cursor over a snapshot of the engine's keys.
///
/// Wraps an index iterator and resolves values through the read path on
/// demand; the snapshot is taken at construction, so concurrent writers
/// do not change the set of keys seen.
pub struct EngineIterator<'a> {
    engine: &'a Engine,
    inner: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl Engine {
    /// Creates an iterator positioned at the first matching key.
    #[must_use]
    pub fn iterator(&self, options: IteratorOptions) -> EngineIterator<'_> {
        let mut iter = EngineIterator {
            inner: self.index.iterator(options.reverse),
            engine: self,
            options,
        };
        iter.skip_to_matching();
        iter
    }
}

impl EngineIterator<'_> {
    /// Moves back to the first matching key.
    pub fn rewind(&mut self) {
        self.inner.rewind();
        self.skip_to_matching();
    }

    /// Moves to the first matching key at or beyond `key` in the
    /// iteration order.
    pub fn seek(&mut self, key: &[u8]) {
        self.inner.seek(key);
        self.skip_to_matching();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.inner.next();
        self.skip_to_matching();
    }

    /// Returns false once the cursor has passed the last matching key.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    /// Returns the key at the current position.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.inner.key()
    }

    /// Reads the value at the current position from its segment.
    pub fn value(&self) -> Result<Vec<u8>> {
        let loc = self.inner.value();
        let state = self.engine.state.read();
        self.engine.value_at_location(&state, loc)
    }

    /// Releases the snapshot.
    pub fn close(&mut self) {
        self.inner.close();
    }

    fn skip_to_matching(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.inner.valid() && !self.inner.key().starts_with(&self.options.prefix) {
            self.inner.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use tempfile::tempdir;

    fn seeded_engine(dir: &std::path::Path) -> Engine {
        let engine = Engine::open(Options::new(dir).data_file_size(1024 * 1024)).unwrap();
        for (key, value) in [
            (b"app:1".as_slice(), b"one".as_slice()),
            (b"app:2", b"two"),
            (b"web:1", b"three"),
            (b"zzz", b"four"),
        ] {
            engine.put(key, value).unwrap();
        }
        engine
    }

    #[test]
    fn forward_iteration_is_strictly_increasing() {
        let dir = tempdir().unwrap();
        let engine = seeded_engine(dir.path());

        let mut iter = engine.iterator(IteratorOptions::default());
        let mut previous: Option<Vec<u8>> = None;
        let mut count = 0;
        while iter.valid() {
            if let Some(prev) = &previous {
                assert!(iter.key() > prev.as_slice());
            }
            previous = Some(iter.key().to_vec());
            count += 1;
            iter.next();
        }
        assert_eq!(count, 4);
    }

    #[test]
    fn reverse_iteration_is_strictly_decreasing() {
        let dir = tempdir().unwrap();
        let engine = seeded_engine(dir.path());

        let options = IteratorOptions {
            reverse: true,
            ..Default::default()
        };
        let mut iter = engine.iterator(options);
        let mut previous: Option<Vec<u8>> = None;
        while iter.valid() {
            if let Some(prev) = &previous {
                assert!(iter.key() < prev.as_slice());
            }
            previous = Some(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(previous.unwrap(), b"app:1");
    }

    #[test]
    fn prefix_filters_keys() {
        let dir = tempdir().unwrap();
        let engine = seeded_engine(dir.path());

        let options = IteratorOptions {
            prefix: b"app:".to_vec(),
            ..Default::default()
        };
        let mut iter = engine.iterator(options);

        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"app:1".to_vec(), b"app:2".to_vec()]);
    }

    #[test]
    fn values_resolve_through_the_read_path() {
        let dir = tempdir().unwrap();
        let engine = seeded_engine(dir.path());

        let mut iter = engine.iterator(IteratorOptions::default());
        assert_eq!(iter.key(), b"app:1");
        assert_eq!(iter.value().unwrap(), b"one");
        iter.next();
        assert_eq!(iter.value().unwrap(), b"two");
    }

    #[test]
    fn seek_positions_at_first_match() {
        let dir = tempdir().unwrap();
        let engine = seeded_engine(dir.path());

        let mut iter = engine.iterator(IteratorOptions::default());
        iter.seek(b"b");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"web:1");
    }

    #[test]
    fn snapshot_ignores_later_writes() {
        let dir = tempdir().unwrap();
        let engine = seeded_engine(dir.path());

        let mut iter = engine.iterator(IteratorOptions::default());
        engine.put(b"aaa", b"new").unwrap();

        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert!(!keys.contains(&b"aaa".to_vec()));
    }

    #[test]
    fn rewind_after_exhaustion() {
        let dir = tempdir().unwrap();
        let engine = seeded_engine(dir.path());

        let mut iter = engine.iterator(IteratorOptions::default());
        while iter.valid() {
            iter.next();
        }

        iter.rewind();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"app:1");
    }
}
