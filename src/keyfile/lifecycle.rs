//! # Keyfile Lifecycle
//!
//! ## Open
//!
//! 1. Size the buffer pool from the cache budget (`SmallFcb` below the
//!    minimum).
//! 2. Read the version word; any version but the current one is rejected
//!    before the rest of block 0 is decoded.
//! 3. Decode the file-info block and check the marker and the persisted
//!    `file_ok` flag.
//!
//! ## Create
//!
//! Segment 0 is created or truncated, a fresh fib is built and every index
//! receives an empty leaf as its root. The file is flushed before `create`
//! returns.
//!
//! ## Flush and Close
//!
//! Flushing writes every dirty buffer, then the fib, then syncs the open
//! segments. Closing a broken writable file writes only the fib, carrying
//! `file_ok = false` and the fatal code, so the damage is visible to the
//! next open. Dropping an open `Keyfile` closes it on a best-effort basis.

use std::path::Path;

use eyre::{Report, Result, WrapErr};
use tracing::{debug, error, info, warn};

use super::builder::KeyfileBuilder;
use super::Keyfile;
use crate::config::{CURRENT_VERSION, FIB_LC, KEYF_MARKER};
use crate::error::ErrorKind;
use crate::storage::headers::read_version;
use crate::storage::{BufferPool, DiskOrder, FileInfo, IndexId, SegmentFiles};

impl Keyfile {
    /// Opens an existing keyed file.
    pub fn open(path: impl AsRef<Path>, cache_size: usize, read_only: bool) -> Result<Self> {
        Self::builder(path)
            .cache_size(cache_size)
            .read_only(read_only)
            .open()
    }

    pub fn open_read(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        Self::open(path, cache_size, true)
    }

    /// Creates a keyed file with the default layout options.
    pub fn create(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        Self::builder(path).cache_size(cache_size).create()
    }

    pub(crate) fn open_with(opts: &KeyfileBuilder) -> Result<Self> {
        let result = Self::load(opts);
        if let Err(report) = &result {
            log_failure(opts, "open", report);
        }
        result
    }

    pub(crate) fn create_with(opts: &KeyfileBuilder) -> Result<Self> {
        let result = Self::build(opts);
        if let Err(report) = &result {
            log_failure(opts, "create", report);
        }
        result
    }

    fn load(opts: &KeyfileBuilder) -> Result<Self> {
        let path = opts.get_path();
        let read_only = opts.get_read_only();
        let pool = BufferPool::for_cache_size(opts.get_cache_size())?;
        let mut files = SegmentFiles::new(path, read_only);

        let mut head = [0u8; 8];
        files
            .read_at(0, 0, &mut head)
            .wrap_err(ErrorKind::BadOpen)
            .wrap_err_with(|| format!("failed to open keyed file {:?}", path))?;
        let version = read_version(&head)?;
        if version != CURRENT_VERSION {
            return Err(ErrorKind::Version.with(format!(
                "{:?} has version {}, supported version is {}",
                path, version, CURRENT_VERSION
            )));
        }

        let mut image = vec![0u8; FIB_LC];
        files
            .read_at(0, 0, &mut image)
            .wrap_err(ErrorKind::BadOpen)
            .wrap_err_with(|| format!("failed to read file info block of {:?}", path))?;
        let fib = FileInfo::from_image::<DiskOrder>(&image)?;
        if fib.marker != KEYF_MARKER {
            return Err(ErrorKind::NotKeyfile.with(format!(
                "{:?} has marker {:#x}",
                path, fib.marker
            )));
        }
        fib.validate()
            .wrap_err_with(|| format!("corrupt file info block in {:?}", path))?;
        let stored = ErrorKind::from_code(fib.error_code);
        if !fib.file_ok || stored.is_some_and(ErrorKind::is_fatal) {
            return Err(ErrorKind::FileNotOk.with(format!(
                "{:?} was closed broken (error code {})",
                path, fib.error_code
            )));
        }

        files.set_segment_cnt(fib.segment_cnt);
        info!(
            path = %path.display(),
            segments = fib.segment_cnt,
            buffers = pool.capacity(),
            read_only,
            "opened keyed file"
        );
        Ok(Self::assemble(opts, fib, pool, files))
    }

    fn build(opts: &KeyfileBuilder) -> Result<Self> {
        opts.check_layout()?;
        let pool = BufferPool::for_cache_size(opts.get_cache_size())?;
        let files = SegmentFiles::create(opts.get_path())
            .wrap_err_with(|| format!("failed to create keyed file {:?}", opts.get_path()))?;
        let fib = FileInfo::new(opts.get_max_segment_lc(), opts.get_data_in_index_lc());

        let mut kf = Self::assemble(opts, fib, pool, files);
        if let Err(report) = kf.initialize() {
            kf.closed = true;
            return Err(report);
        }
        info!(
            path = %kf.path.display(),
            data_in_index_lc = kf.fib.data_in_index_lc,
            max_segment_lc = kf.fib.max_file_lc,
            "created keyed file"
        );
        Ok(kf)
    }

    fn assemble(
        opts: &KeyfileBuilder,
        fib: FileInfo,
        pool: BufferPool,
        files: SegmentFiles,
    ) -> Self {
        Self {
            path: opts.get_path().to_path_buf(),
            fib,
            pool,
            files,
            cursors: Default::default(),
            error_code: None,
            read_only: opts.get_read_only(),
            error_log: opts.make_error_log(),
            closed: false,
        }
    }

    fn initialize(&mut self) -> Result<()> {
        for index in IndexId::ALL {
            self.tree(index).create_root()?;
        }
        self.write_out()
    }

    /// Writes all modified blocks and the file-info block to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.run(Self::write_out)
    }

    fn write_out(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let blocks = self.pool.flush_all(&mut self.files)?;
        let image = self.fib.to_block_image::<DiskOrder>()?;
        self.files.write_at(0, 0, &image)?;
        self.files.sync_all()?;
        debug!(blocks, "flushed keyed file");
        Ok(())
    }

    /// Flushes and closes the file.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.read_only {
            self.files.close_all()?;
            info!(path = %self.path.display(), "closed keyed file");
            return Ok(());
        }

        if !self.fib.file_ok {
            // The error that broke the file stays the one reported.
            let persisted = self
                .fib
                .to_block_image::<DiskOrder>()
                .and_then(|image| self.files.write_at(0, 0, &image));
            if let Err(report) = persisted {
                warn!(
                    path = %self.path.display(),
                    "failed to persist state of broken keyed file: {:#}", report
                );
            }
            if let Err(report) = self.files.close_all() {
                warn!(
                    path = %self.path.display(),
                    "failed to close segments of broken keyed file: {:#}", report
                );
            }
            warn!(
                path = %self.path.display(),
                code = self.fib.error_code,
                "closed broken keyed file"
            );
            return Ok(());
        }

        let result = self.write_out().and_then(|()| self.files.close_all());
        match &result {
            Ok(()) => info!(path = %self.path.display(), "closed keyed file"),
            Err(report) => self.record_error(report),
        }
        result
    }
}

impl Drop for Keyfile {
    fn drop(&mut self) {
        if let Err(report) = self.shutdown() {
            warn!(path = %self.path.display(), "closing keyed file on drop failed: {:#}", report);
        }
    }
}

fn log_failure(opts: &KeyfileBuilder, op: &str, report: &Report) {
    let kind = ErrorKind::of(report).unwrap_or(ErrorKind::BadOpen);
    error!(path = %opts.get_path().display(), code = kind.code(), "{} failed: {:#}", op, report);
    opts.make_error_log().append(opts.get_path(), kind, report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MIN_FCB_LC, ERROR_LOG_NAME};
    use tempfile::tempdir;

    #[test]
    fn create_writes_a_fib_with_three_empty_roots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("new.kf");
        Keyfile::create(&path, MIN_FCB_LC).unwrap().close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let fib = FileInfo::from_image::<DiskOrder>(&bytes).unwrap();
        assert_eq!(fib.version, CURRENT_VERSION);
        assert_eq!(fib.marker, KEYF_MARKER);
        assert!(fib.file_ok);
        for index in IndexId::ALL {
            assert!(!fib.root(index.slot()).is_null());
            assert_eq!(fib.primary_level[index.slot()], 0);
        }
        assert_eq!(bytes.len(), 4 * 4096);
    }

    #[test]
    fn open_rejects_other_versions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v.kf");
        Keyfile::create(&path, MIN_FCB_LC).unwrap().close().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&6u32.to_be_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let err = Keyfile::open(&path, MIN_FCB_LC, false).err().unwrap();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::Version));
    }

    #[test]
    fn open_rejects_bad_marker() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.kf");
        Keyfile::create(&path, MIN_FCB_LC).unwrap().close().unwrap();

        let mut fib = FileInfo::from_image::<DiskOrder>(&std::fs::read(&path).unwrap()).unwrap();
        fib.marker = 0xdead_beef;
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[..4096].copy_from_slice(&fib.to_block_image::<DiskOrder>().unwrap());
        std::fs::write(&path, &bytes).unwrap();

        let err = Keyfile::open(&path, MIN_FCB_LC, true).err().unwrap();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::NotKeyfile));
    }

    #[test]
    fn missing_file_is_bad_open_and_logged() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.kf");

        let err = Keyfile::open(&path, MIN_FCB_LC, true).err().unwrap();

        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::BadOpen));
        let log = std::fs::read_to_string(dir.path().join(ERROR_LOG_NAME)).unwrap();
        assert!(log.contains("error 1 "));
    }

    #[test]
    fn small_cache_is_rejected() {
        let dir = tempdir().unwrap();
        let err = Keyfile::builder(dir.path().join("s.kf"))
            .cache_size(MIN_FCB_LC - 1)
            .no_error_log()
            .create()
            .err()
            .unwrap();

        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::SmallFcb));
        assert!(!dir.path().join("s.kf").exists());
    }

    #[test]
    fn broken_file_stays_broken_after_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("b.kf");
        let mut kf = Keyfile::builder(&path).cache_size(MIN_FCB_LC).no_error_log().create().unwrap();
        let report = ErrorKind::IxStruct.with("simulated damage");
        kf.record_error(&report);
        assert!(!kf.is_ok());
        kf.close().unwrap();

        let err = Keyfile::builder(&path).no_error_log().open().err().unwrap();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::FileNotOk));
    }

    #[test]
    fn broken_file_closes_when_its_fib_cannot_be_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.kf");
        let mut kf = Keyfile::builder(&path).cache_size(MIN_FCB_LC).no_error_log().create().unwrap();
        kf.record_error(&ErrorKind::IxStruct.with("simulated damage"));
        kf.files.close_all().unwrap();
        std::fs::remove_file(&path).unwrap();

        kf.shutdown().unwrap();

        assert!(kf.closed);
        assert_eq!(kf.error_code(), Some(ErrorKind::IxStruct));
        assert!(!path.exists());
    }
}
