//! # Storage Layer
//!
//! Everything between an index tree and the bytes on disk:
//!
//! ```text
//!  btree / keyfile
//!        │
//!  ┌─────▼──────┐   get_index / get_new_block / flush_all
//!  │ BufferPool │   (cache.rs: hash chains + LRU list + buddy writes)
//!  └─────┬──────┘
//!        │ BlockDevice (driver.rs)
//!  ┌─────▼────────┐
//!  │ SegmentFiles │ (file_manager.rs: segment naming, handle LRU)
//!  └─────┬────────┘
//!        │ encode_block / decode_block (codec.rs)
//!        ▼
//!   segment files
//! ```
//!
//! ## Modules
//!
//! - [`page`]: [`IndexBlock`] layout, accessors and in-block search
//! - [`entry`]: decoded entries, block packing and split choice
//! - [`pointer`]: level-0 and level-n pointers and their compressed forms
//! - [`codec`]: byte-order aware block serialization
//! - [`headers`]: the file-info block
//! - [`driver`]: the [`BlockDevice`] trait and I/O counters
//! - [`file_manager`]: segment files
//! - [`cache`]: the buffer pool
//! - [`space`]: block and extent allocation at segment tails

pub mod cache;
pub mod codec;
pub mod driver;
pub mod entry;
pub mod file_manager;
pub mod headers;
pub mod page;
pub mod pointer;
pub mod space;

pub use cache::{pool_geometry, BufferId, BufferPool, PoolStats};
pub use codec::{decode_block, encode_block, DiskOrder};
pub use driver::{BlockDevice, IoStats};
pub use entry::{Entry, EntryValue};
pub use file_manager::{segment_path, SegmentFiles};
pub use headers::FileInfo;
pub use page::{IndexBlock, IndexId, SearchResult};
pub use pointer::{BlockPointer, Level0Pointer, EMBEDDED_SEGMENT};
