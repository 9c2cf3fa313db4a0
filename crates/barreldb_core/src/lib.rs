//! # BarrelDB Core
//!
//! A persistent, embedded key-value engine on the Bitcask model.
//!
//! Records append to numbered segment files; an in-memory ordered index
//! maps each live key to its newest on-disk location. The crate provides:
//!
//! - Durable put/get/delete over arbitrary byte keys and values
//! - Ordered iteration with prefix filtering and reverse order
//! - Atomic multi-operation batches sequenced by a monotonic counter
//! - Merge compaction that reclaims superseded and deleted records,
//!   with hint files that accelerate the next open
//! - Deterministic index reconstruction at open
//!
//! ## Example
//!
//! ```no_run
//! use barreldb_core::{Engine, Options};
//!
//! let engine = Engine::open(Options::new("/tmp/barrel-demo"))?;
//! engine.put(b"alpha", b"1")?;
//! assert_eq!(engine.get(b"alpha")?, b"1");
//! engine.delete(b"alpha")?;
//! engine.close()?;
//! # Ok::<(), barreldb_core::Error>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod engine;
mod error;
mod fsutil;
mod index;
mod iterator;
mod merge;
mod options;
mod record;
mod recovery;
mod segment;

pub use batch::WriteBatch;
pub use engine::{Engine, Stat};
pub use error::{Error, Result};
pub use index::{BTreeIndex, IndexIterator, Indexer};
pub use iterator::EngineIterator;
pub use options::{IndexType, IteratorOptions, Options, WriteBatchOptions};
pub use record::{LogRecord, RecordLocation, RecordType};
pub use segment::SegmentFile;
