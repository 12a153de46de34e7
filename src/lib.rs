//! # Keyfile - Paginated On-Disk Keyed Files
//!
//! A keyed file maps variable-length byte keys (or integers) to
//! variable-length records. Keys live in a prefix-compressed multi-level
//! index of fixed 4 KiB blocks; short records are embedded in the leaf
//! entries and longer ones are stored in extents. A keyed file may span up
//! to 127 segment files.
//!
//! ## Quick Start
//!
//! ```ignore
//! use keyfile::{Keyfile, config::MIN_FCB_LC};
//!
//! let mut kf = Keyfile::create("terms.kf", MIN_FCB_LC)?;
//! kf.put(b"doc1", b"hello")?;
//! kf.put_int(42, b"answer")?;
//!
//! assert_eq!(kf.get(b"doc1")?, Some(b"hello".to_vec()));
//! assert_eq!(kf.get_size(b"doc2")?, None);
//! kf.close()?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │        Keyfile (control block)      │  errors, cursors, free space
//! ├─────────────────────────────────────┤
//! │   Index trees (user, free-rec,      │  search, split, scan
//! │   free-lc)        │  Record store   │
//! ├─────────────────────────────────────┤
//! │     Buffer pool (hash + LRU)        │  buddy write coalescing
//! ├─────────────────────────────────────┤
//! │  Page codec  │  Segment files       │  big-endian on disk
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! ```text
//! terms.kf          segment 0: block 0 = file-info block, then blocks
//!                   and record extents in allocation order
//! terms$1.kf        segment 1, created once segment 0 is full
//! kf_error_log      fatal errors, appended on first failure
//! ```
//!
//! ## Errors
//!
//! Every operation returns `eyre::Result`. The [`ErrorKind`] inside a
//! report tells transient conditions (missing key, end of scan, bad key)
//! from fatal ones. A fatal error breaks the control block: all later
//! calls fail with the same kind and perform no I/O.
//!
//! ## Concurrency
//!
//! A `Keyfile` is single-threaded and has no internal locking. Distinct
//! keyed files can be used from different threads.
//!
//! ## Module Overview
//!
//! - [`config`]: layout constants
//! - [`encoding`]: varints, key lengths and integer keys
//! - [`storage`]: blocks, pointers, page codec, segment files, buffer pool
//! - [`btree`]: the index tree algorithms
//! - [`record`]: reading and writing records
//! - [`keyfile`]: the control block and public operations

pub mod btree;
pub mod config;
pub mod encoding;
pub mod error;
pub mod keyfile;
pub mod record;
pub mod storage;

pub use error::{ErrorKind, Severity};
pub use keyfile::{Entries, KeyRecord, Keyfile, KeyfileBuilder};
pub use storage::{BlockPointer, IndexId, IoStats, Level0Pointer, PoolStats};
