//! # BarrelDB Storage
//!
//! I/O handle trait and implementations for BarrelDB.
//!
//! This crate provides the lowest-level I/O abstraction for the engine.
//! Handles are **opaque byte files** - they do not interpret the data they
//! store. The engine owns all record framing and file-format knowledge.
//!
//! ## Design Principles
//!
//! - Handles expose four operations: positional read, append, sync, size
//! - No knowledge of record formats, segments, or indexes
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Handles
//!
//! - [`FileIo`] - Standard file I/O for persistent storage
//! - [`MmapIo`] - Read-only memory-mapped I/O for recovery scans
//! - [`MemoryIo`] - In-memory handle for testing
//!
//! ## Example
//!
//! ```rust
//! use barreldb_storage::{IoHandle, MemoryIo};
//!
//! let mut handle = MemoryIo::new();
//! handle.append(b"hello world").unwrap();
//! let data = handle.read_at(0, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod handle;
mod memory;
mod mmap;

pub use error::{StorageError, StorageResult};
pub use file::FileIo;
pub use handle::{open_handle, IoHandle, IoType};
pub use memory::MemoryIo;
pub use mmap::MmapIo;
