//! # Keyfile Builder
//!
//! [`KeyfileBuilder`] collects the options for opening or creating a keyed
//! file and then calls [`open`](KeyfileBuilder::open) or
//! [`create`](KeyfileBuilder::create).
//!
//! ## Options
//!
//! | Option           | Default                | Applies to     |
//! |------------------|------------------------|----------------|
//! | cache_size       | `DEFAULT_CACHE_SIZE`   | open, create   |
//! | read_only        | false                  | open           |
//! | data_in_index_lc | 16 bytes               | create         |
//! | max_segment_lc   | 1 GiB                  | create         |
//! | error_log        | `kf_error_log` beside  | open, create   |
//!
//! The inline threshold and the segment length are stored in the file-info
//! block, so they are fixed when the file is created.
//!
//! ```ignore
//! let kf = Keyfile::builder("terms.kf")
//!     .cache_size(4 << 20)
//!     .data_in_index_lc(64)
//!     .create()?;
//! ```

use std::path::{Path, PathBuf};

use eyre::Result;

use super::error_log::ErrorLog;
use super::Keyfile;
use crate::config::{
    DEFAULT_CACHE_SIZE, DEFAULT_DATA_IN_INDEX_LC, DEFAULT_MAX_SEGMENT_LC, MAX_DATA_IN_INDEX_LC,
    MAX_SEGMENT_LC, MIN_SEGMENT_LC,
};
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq)]
enum LogTarget {
    Beside,
    At(PathBuf),
    Off,
}

/// Options for opening or creating a [`Keyfile`].
#[derive(Debug, Clone)]
pub struct KeyfileBuilder {
    path: PathBuf,
    cache_size: Option<usize>,
    read_only: bool,
    data_in_index_lc: Option<u32>,
    max_segment_lc: Option<u64>,
    error_log: LogTarget,
}

impl KeyfileBuilder {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache_size: None,
            read_only: false,
            data_in_index_lc: None,
            max_segment_lc: None,
            error_log: LogTarget::Beside,
        }
    }

    /// Memory budget in bytes for the control block and its buffer pool.
    /// Must be at least `MIN_FCB_LC`.
    pub fn cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = Some(bytes);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Records up to this many bytes are stored inside the leaf entry.
    pub fn data_in_index_lc(mut self, lc: u32) -> Self {
        self.data_in_index_lc = Some(lc);
        self
    }

    /// Length at which a new segment file is started.
    pub fn max_segment_lc(mut self, lc: u64) -> Self {
        self.max_segment_lc = Some(lc);
        self
    }

    pub fn error_log(mut self, path: impl AsRef<Path>) -> Self {
        self.error_log = LogTarget::At(path.as_ref().to_path_buf());
        self
    }

    pub fn no_error_log(mut self) -> Self {
        self.error_log = LogTarget::Off;
        self
    }

    pub fn get_path(&self) -> &Path {
        &self.path
    }

    pub fn get_cache_size(&self) -> usize {
        self.cache_size.unwrap_or(DEFAULT_CACHE_SIZE)
    }

    pub fn get_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get_data_in_index_lc(&self) -> u32 {
        self.data_in_index_lc.unwrap_or(DEFAULT_DATA_IN_INDEX_LC)
    }

    pub fn get_max_segment_lc(&self) -> u64 {
        self.max_segment_lc.unwrap_or(DEFAULT_MAX_SEGMENT_LC)
    }

    pub fn get_error_log(&self) -> Option<PathBuf> {
        match &self.error_log {
            LogTarget::Beside => Some(ErrorLog::beside(&self.path)),
            LogTarget::At(path) => Some(path.clone()),
            LogTarget::Off => None,
        }
    }

    pub(crate) fn make_error_log(&self) -> ErrorLog {
        ErrorLog::new(self.get_error_log())
    }

    /// Validates the layout options used by `create`.
    pub(crate) fn check_layout(&self) -> Result<()> {
        if self.read_only {
            return Err(ErrorKind::BadCreate.with("cannot create a keyed file read only"));
        }
        let dil = self.get_data_in_index_lc();
        if dil > MAX_DATA_IN_INDEX_LC {
            return Err(ErrorKind::BadCreate.with(format!(
                "inline threshold {} above maximum {}",
                dil, MAX_DATA_IN_INDEX_LC
            )));
        }
        let max_lc = self.get_max_segment_lc();
        if !(MIN_SEGMENT_LC..=MAX_SEGMENT_LC).contains(&max_lc) {
            return Err(ErrorKind::BadCreate.with(format!(
                "segment length {} outside {}..={}",
                max_lc, MIN_SEGMENT_LC, MAX_SEGMENT_LC
            )));
        }
        Ok(())
    }

    /// Opens an existing keyed file.
    pub fn open(self) -> Result<Keyfile> {
        Keyfile::open_with(&self)
    }

    /// Creates a keyed file, replacing any file at the path.
    pub fn create(self) -> Result<Keyfile> {
        Keyfile::create_with(&self)
    }
}
