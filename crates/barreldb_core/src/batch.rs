//! Atomic write batches.
//!
//! A batch stages records in memory, coalescing by key (last writer
//! wins), and commits them in one critical section on the engine writer
//! lock. Every committed record carries the batch's sequence number in
//! its key prefix; a trailing transaction-finished sentinel makes the
//! whole batch visible to recovery. A batch whose sentinel never reached
//! disk is invisible after reopen.

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::options::WriteBatchOptions;
use crate::record::{encode_key_with_seq, LogRecord, RecordLocation, RecordType};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::Ordering;

/// Key of the transaction-finished sentinel record.
const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// A staged group of writes committed atomically.
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Engine {
    /// Creates an empty write batch against this engine.
    #[must_use]
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            engine: self,
            options,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl WriteBatch<'_> {
    /// Stages a put. Nothing reaches disk until [`WriteBatch::commit`].
    ///
    /// # Errors
    ///
    /// Rejects an empty key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let mut pending = self.pending.lock();
        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                record_type: RecordType::Normal,
            },
        );
        Ok(())
    }

    /// Stages a delete.
    ///
    /// A key that neither exists in the engine nor is staged is a no-op;
    /// a staged-but-unpersisted key is simply dropped from the stage.
    ///
    /// # Errors
    ///
    /// Rejects an empty key.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::KeyIsEmpty);
        }

        let mut pending = self.pending.lock();
        if self.engine.index.get(key).is_none() {
            pending.remove(key);
            return Ok(());
        }

        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                record_type: RecordType::Deleted,
            },
        );
        Ok(())
    }

    /// Commits the staged records atomically and clears the stage.
    ///
    /// All appends, the sentinel, and the index updates happen under one
    /// acquisition of the engine writer lock, so batches are linearizable
    /// with concurrent non-batch writers.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::ExceedMaxBatchNum`] when more distinct keys
    /// are staged than the batch options allow.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_num {
            return Err(Error::ExceedMaxBatchNum {
                count: pending.len(),
                max: self.options.max_batch_num,
            });
        }

        let mut state = self.engine.state.write();
        let seq_no = self.engine.seq_no.fetch_add(1, Ordering::SeqCst) + 1;

        let mut locations: HashMap<Vec<u8>, RecordLocation> =
            HashMap::with_capacity(pending.len());
        for (key, record) in pending.iter() {
            let physical = LogRecord {
                key: encode_key_with_seq(key, seq_no),
                value: record.value.clone(),
                record_type: record.record_type,
            };
            let loc = self.engine.append_record_locked(&mut state, &physical)?;
            locations.insert(key.clone(), loc);
        }

        let finished = LogRecord {
            key: encode_key_with_seq(TXN_FIN_KEY, seq_no),
            value: Vec::new(),
            record_type: RecordType::TxnFinished,
        };
        self.engine.append_record_locked(&mut state, &finished)?;

        if self.options.sync_writes {
            if let Some(active) = state.active.as_mut() {
                active.sync()?;
            }
        }

        for (key, record) in pending.iter() {
            let Some(&loc) = locations.get(key) else {
                continue;
            };

            let old = match record.record_type {
                RecordType::Normal => self.engine.index.put(key.clone(), loc),
                RecordType::Deleted => {
                    // The tombstone's own bytes are reclaimable at once.
                    self.engine
                        .reclaim_size
                        .fetch_add(i64::from(loc.size), Ordering::SeqCst);
                    self.engine.index.delete(key)
                }
                RecordType::TxnFinished => None,
            };
            if let Some(old) = old {
                self.engine
                    .reclaim_size
                    .fetch_add(i64::from(old.size), Ordering::SeqCst);
            }
        }
        drop(state);

        pending.clear();
        Ok(())
    }
}
