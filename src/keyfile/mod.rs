//! # Keyed File Control Block
//!
//! [`Keyfile`] owns everything one open keyed file needs: the decoded
//! file-info block, the buffer pool, the segment handles, one cursor per
//! index and the error state.
//!
//! ## States
//!
//! ```text
//!            open / create
//!  Closed ─────────────────> Open ──── fatal error ───> Broken
//!     ^                        │                          │
//!     └──────── close ─────────┴────────── close ─────────┘
//! ```
//!
//! Every public operation goes through `Keyfile::run`:
//!
//! 1. A broken file returns its sticky fatal kind without touching disk.
//! 2. The transient code of the previous call is cleared.
//! 3. The operation runs. A failure records its kind; a fatal kind breaks
//!    the file, is logged with `tracing::error!` and is appended to the
//!    diagnostic error log.
//!
//! Non-failing transient outcomes (key not found, end of scan) return `Ok`
//! and leave their kind in [`Keyfile::error_code`].
//!
//! ## Usage
//!
//! ```ignore
//! let mut kf = Keyfile::create("index.kf", MIN_FCB_LC)?;
//! kf.put(b"doc1", b"hello")?;
//! assert_eq!(kf.get(b"doc1")?, Some(b"hello".to_vec()));
//! kf.close()?;
//! ```
//!
//! ## Module Organization
//!
//! - `builder`: [`KeyfileBuilder`] options
//! - `lifecycle`: open, create, flush, close
//! - `access`: point reads and writes
//! - `scan`: sequential cursors
//! - `space`: record extent allocation over the free-space indexes
//! - `error_log`: the lazily opened diagnostic log

mod access;
mod builder;
mod error_log;
mod lifecycle;
mod scan;
mod space;

use std::path::{Path, PathBuf};

use eyre::{Report, Result};
use tracing::error;

use crate::btree::{IndexTree, Position};
use crate::config::{MAXKEY_LC, MAX_INDEX};
use crate::error::ErrorKind;
use crate::storage::{BufferPool, FileInfo, IndexId, IoStats, PoolStats, SegmentFiles};

pub use builder::KeyfileBuilder;
pub use scan::{Entries, KeyRecord};

use error_log::ErrorLog;

/// Sequential cursor of one index.
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    /// `None` is beginning of file.
    position: Option<Position>,
    seq_cnt: u64,
}

/// An open keyed file.
pub struct Keyfile {
    path: PathBuf,
    fib: FileInfo,
    pool: BufferPool,
    files: SegmentFiles,
    cursors: [Cursor; MAX_INDEX],
    error_code: Option<ErrorKind>,
    read_only: bool,
    error_log: ErrorLog,
    closed: bool,
}

impl Keyfile {
    pub fn builder(path: impl AsRef<Path>) -> KeyfileBuilder {
        KeyfileBuilder::new(path)
    }

    fn tree(&mut self, index: IndexId) -> IndexTree<'_, SegmentFiles> {
        IndexTree::new(index, &mut self.fib, &mut self.pool, &mut self.files)
    }

    /// Runs one public operation under the error-state protocol.
    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if !self.fib.file_ok {
            let kind = self.error_code.unwrap_or(ErrorKind::FileNotOk);
            return Err(kind.with(format!("keyed file {:?} is broken", self.path)));
        }
        self.error_code = None;
        let result = op(self);
        if let Err(report) = &result {
            self.record_error(report);
        }
        result
    }

    fn record_error(&mut self, report: &Report) {
        let kind = ErrorKind::of(report).unwrap_or(ErrorKind::IxStruct);
        self.error_code = Some(kind);
        if kind.is_fatal() {
            self.fib.file_ok = false;
            self.fib.error_code = kind.code();
            error!(path = %self.path.display(), code = kind.code(), "keyed file broken: {:#}", report);
            self.error_log.append(&self.path, kind, report);
        }
    }

    /// Records a transient outcome that is not returned as an error.
    fn note(&mut self, kind: ErrorKind) {
        debug_assert!(!kind.is_fatal());
        self.error_code = Some(kind);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// False once a fatal error has occurred.
    pub fn is_ok(&self) -> bool {
        self.fib.file_ok
    }

    /// Outcome of the last operation: `None` after a clean call, the
    /// transient kind it reported, or the sticky fatal kind.
    pub fn error_code(&self) -> Option<ErrorKind> {
        self.error_code
    }

    pub fn io_stats(&self) -> IoStats {
        self.files.stats()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Levels above the leaves in the given index.
    pub fn primary_level(&self, index: IndexId) -> u32 {
        self.fib.primary_level[index.slot()]
    }

    pub fn segment_cnt(&self) -> u32 {
        self.fib.segment_cnt
    }

    pub fn data_in_index_lc(&self) -> u32 {
        self.fib.data_in_index_lc
    }
}

fn check_key(key: &[u8]) -> Result<()> {
    if key.is_empty() || key.len() >= MAXKEY_LC {
        return Err(ErrorKind::BadKey.with(format!(
            "key of {} bytes, expected 1..{}",
            key.len(),
            MAXKEY_LC
        )));
    }
    Ok(())
}
