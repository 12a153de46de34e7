//! # Segment File Manager
//!
//! A keyed file is stored in one or more segment files. Segment 0 carries
//! the caller's file name; later segments insert `$<n>` between the stem and
//! the extension:
//!
//! ```text
//! index.kf        segment 0 (file-info block + blocks + records)
//! index$1.kf      segment 1
//! index$2.kf      segment 2
//! ```
//!
//! ## Handle Table
//!
//! At most `MAX_FILES` segment handles are open at once. Every access stamps
//! the handle with the current age; when the table is full the handle with
//! the largest age (longest since last use) is synced and closed to make
//! room. Segments are opened lazily on first use.
//!
//! ## Creating Segments
//!
//! Asking for a segment at or beyond the current segment count creates it,
//! truncating any stale file of that name. On a read-only keyed file the
//! segment cannot exist and the request fails with the fatal
//! [`ErrorKind::SegmentOpen`].
//!
//! ## I/O
//!
//! Blocks and records are transferred with positioned reads and writes on
//! the segment handle. Short reads, failed seeks and failed writes are
//! reported as the fatal [`ErrorKind::Read`], [`ErrorKind::Seek`] and
//! [`ErrorKind::Write`]; the control block marks itself broken on any of
//! them.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use tracing::debug;

use super::codec::{decode_block, encode_block, DiskOrder};
use super::driver::{BlockDevice, IoStats};
use super::page::IndexBlock;
use super::pointer::BlockPointer;
use crate::config::{BLOCK_LC, MAX_FILES, MAX_SEGMENT, SEGMENT_NAME_SEPARATOR};
use crate::error::ErrorKind;

/// Path of segment `segment` of the keyed file at `base`.
pub fn segment_path(base: &Path, segment: u16) -> Result<PathBuf> {
    if segment == 0 {
        return Ok(base.to_path_buf());
    }
    let name = base
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ErrorKind::BadName.with(format!("no usable file name in {:?}", base)))?;
    let (stem, extension) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    Ok(base.with_file_name(format!(
        "{}{}{}{}",
        stem, SEGMENT_NAME_SEPARATOR, segment, extension
    )))
}

struct OpenSegment {
    segment: u16,
    file: File,
    age: u64,
}

pub struct SegmentFiles {
    base: PathBuf,
    read_only: bool,
    segment_cnt: u32,
    current_age: u64,
    files: Vec<OpenSegment>,
    stats: IoStats,
}

impl SegmentFiles {
    /// Manager for an existing keyed file. Only segment 0 is assumed to
    /// exist until [`set_segment_cnt`](Self::set_segment_cnt) is called.
    pub fn new(base: impl Into<PathBuf>, read_only: bool) -> Self {
        Self {
            base: base.into(),
            read_only,
            segment_cnt: 1,
            current_age: 0,
            files: Vec::with_capacity(MAX_FILES),
            stats: IoStats::default(),
        }
    }

    /// Manager for a new keyed file: segment 0 is created (or truncated).
    pub fn create(base: impl Into<PathBuf>) -> Result<Self> {
        let mut files = Self::new(base, false);
        files.segment_cnt = 0;
        files.handle(0).wrap_err(ErrorKind::BadCreate)?;
        Ok(files)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn segment_cnt(&self) -> u32 {
        self.segment_cnt
    }

    pub fn set_segment_cnt(&mut self, segment_cnt: u32) {
        self.segment_cnt = segment_cnt;
    }

    pub fn stats(&self) -> IoStats {
        self.stats
    }

    pub fn open_handles(&self) -> usize {
        self.files.len()
    }

    pub fn is_open(&self, segment: u16) -> bool {
        self.files.iter().any(|f| f.segment == segment)
    }

    fn open_file(&mut self, segment: u16) -> Result<File> {
        if segment as usize >= MAX_SEGMENT {
            return Err(ErrorKind::SegmentOpen.with(format!(
                "segment {} beyond limit {}",
                segment, MAX_SEGMENT
            )));
        }
        if segment as u32 > self.segment_cnt {
            return Err(ErrorKind::IxStruct.with(format!(
                "segment {} requested but segment {} does not exist",
                segment, self.segment_cnt
            )));
        }
        let path = segment_path(&self.base, segment)?;
        let creating = segment as u32 == self.segment_cnt;
        if creating && self.read_only {
            return Err(ErrorKind::SegmentOpen.with(format!(
                "segment {} does not exist in read-only file {:?}",
                segment, path
            )));
        }

        let mut options = OpenOptions::new();
        options.read(true);
        if creating {
            options.write(true).create(true).truncate(true);
        } else if !self.read_only {
            options.write(true);
        }
        let file = options
            .open(&path)
            .wrap_err(ErrorKind::SegmentOpen)
            .wrap_err_with(|| format!("failed to open segment {:?}", path))?;

        if creating {
            self.segment_cnt = segment as u32 + 1;
        }
        self.stats.segment_opens += 1;
        debug!(segment, path = %path.display(), creating, "opened segment");
        Ok(file)
    }

    /// Closes the handle unused for the longest time.
    fn vacate_file_index(&mut self) -> Result<()> {
        let Some(victim) = self
            .files
            .iter()
            .enumerate()
            .max_by_key(|(_, f)| self.current_age - f.age)
            .map(|(ix, _)| ix)
        else {
            return Ok(());
        };
        let closed = self.files.swap_remove(victim);
        if !self.read_only {
            closed.file.sync_data().wrap_err(ErrorKind::Write)?;
        }
        debug!(segment = closed.segment, "closed segment handle");
        Ok(())
    }

    /// Open handle for `segment`, opening or creating it as needed.
    pub fn handle(&mut self, segment: u16) -> Result<&mut File> {
        self.current_age += 1;
        let age = self.current_age;

        let ix = match self.files.iter().position(|f| f.segment == segment) {
            Some(ix) => ix,
            None => {
                if self.files.len() >= MAX_FILES {
                    self.vacate_file_index()?;
                }
                let file = self.open_file(segment)?;
                self.files.push(OpenSegment { segment, file, age });
                self.files.len() - 1
            }
        };
        let open = &mut self.files[ix];
        open.age = age;
        Ok(&mut open.file)
    }

    fn positioned(&mut self, segment: u16, offset: u64) -> Result<&mut File> {
        let file = self.handle(segment)?;
        file.seek(SeekFrom::Start(offset))
            .wrap_err(ErrorKind::Seek)
            .wrap_err_with(|| format!("seek to {} in segment {}", offset, segment))?;
        Ok(file)
    }

    pub fn read_at(&mut self, segment: u16, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.positioned(segment, offset)?
            .read_exact(buf)
            .wrap_err(ErrorKind::Read)
            .wrap_err_with(|| {
                format!("read {} bytes at {} in segment {}", buf.len(), offset, segment)
            })
    }

    pub fn write_at(&mut self, segment: u16, offset: u64, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(ErrorKind::ReadOnly.with("write to read-only keyed file"));
        }
        self.positioned(segment, offset)?
            .write_all(data)
            .wrap_err(ErrorKind::Write)
            .wrap_err_with(|| {
                format!("write {} bytes at {} in segment {}", data.len(), offset, segment)
            })
    }

    /// Reads `buf.len()` record bytes starting at `sc`.
    pub fn read_record(&mut self, segment: u16, sc: u64, buf: &mut [u8]) -> Result<()> {
        self.read_at(segment, sc, buf)?;
        self.stats.record_reads += 1;
        Ok(())
    }

    pub fn write_record(&mut self, segment: u16, sc: u64, data: &[u8]) -> Result<()> {
        self.write_at(segment, sc, data)?;
        self.stats.record_writes += 1;
        Ok(())
    }

    /// Syncs every open handle to disk.
    pub fn sync_all(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        for open in &self.files {
            open.file.sync_data().wrap_err(ErrorKind::Write)?;
        }
        Ok(())
    }

    /// Closes every handle.
    pub fn close_all(&mut self) -> Result<()> {
        self.sync_all()?;
        self.files.clear();
        Ok(())
    }
}

impl BlockDevice for SegmentFiles {
    fn read_block(&mut self, at: BlockPointer, block: &mut IndexBlock) -> Result<()> {
        let mut image = vec![0u8; BLOCK_LC];
        self.read_at(at.segment, at.offset(), &mut image)?;
        self.stats.block_reads += 1;
        decode_block::<DiskOrder>(&image, block)
            .wrap_err_with(|| format!("decoding block {:?}", at))
    }

    fn write_block(&mut self, at: BlockPointer, block: &IndexBlock) -> Result<()> {
        let mut image = vec![0u8; BLOCK_LC];
        encode_block::<DiskOrder>(block, &mut image)?;
        self.write_at(at.segment, at.offset(), &image)?;
        self.stats.block_writes += 1;
        Ok(())
    }

    fn reserve_segments(&mut self, segment_cnt: u32) -> Result<()> {
        while self.segment_cnt < segment_cnt {
            self.handle(self.segment_cnt as u16)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entry::{Entry, EntryValue};
    use crate::storage::page::IndexId;
    use tempfile::tempdir;

    #[test]
    fn segment_names_insert_number_before_extension() {
        let base = Path::new("/data/index.kf");
        assert_eq!(segment_path(base, 0).unwrap(), PathBuf::from("/data/index.kf"));
        assert_eq!(segment_path(base, 3).unwrap(), PathBuf::from("/data/index$3.kf"));
    }

    #[test]
    fn segment_names_without_extension() {
        let base = Path::new("/data.d/index");
        assert_eq!(segment_path(base, 12).unwrap(), PathBuf::from("/data.d/index$12"));
    }

    #[test]
    fn hidden_file_dot_is_not_an_extension() {
        let base = Path::new("/data/.keys");
        assert_eq!(segment_path(base, 1).unwrap(), PathBuf::from("/data/.keys$1"));
    }

    #[test]
    fn block_write_then_read() {
        let dir = tempdir().unwrap();
        let mut files = SegmentFiles::create(dir.path().join("blocks.kf")).unwrap();

        let mut block = IndexBlock::new(IndexId::User, 0);
        block
            .pack(&[Entry::new(b"key".to_vec(), EntryValue::Embedded(b"value".to_vec()))])
            .unwrap();
        files.write_block(BlockPointer::new(0, 3), &block).unwrap();

        let mut read = IndexBlock::default();
        files.read_block(BlockPointer::new(0, 3), &mut read).unwrap();

        assert_eq!(read, block);
        assert_eq!(files.stats().block_writes, 1);
        assert_eq!(files.stats().block_reads, 1);
    }

    #[test]
    fn new_segment_is_created_on_first_use() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("multi.kf");
        let mut files = SegmentFiles::create(&base).unwrap();

        files.write_record(1, 0, b"next door").unwrap();
        files.write_record(2, 0, b"far away").unwrap();

        assert_eq!(files.segment_cnt(), 3);
        assert!(dir.path().join("multi$2.kf").exists());
    }

    #[test]
    fn skipping_a_segment_is_a_structure_error() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("gap.kf");
        let mut files = SegmentFiles::create(&base).unwrap();

        let err = files.write_record(2, 0, b"far away").unwrap_err();

        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::IxStruct));
        assert_eq!(files.segment_cnt(), 1);
        assert!(!dir.path().join("gap$2.kf").exists());
    }

    #[test]
    fn reserved_segments_accept_writes_in_any_order() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("reserve.kf");
        let mut files = SegmentFiles::create(&base).unwrap();

        files.reserve_segments(4).unwrap();
        assert_eq!(files.segment_cnt(), 4);
        assert!(dir.path().join("reserve$3.kf").exists());

        files.write_record(3, 0, b"last").unwrap();
        files.write_record(1, 0, b"first").unwrap();
        files.reserve_segments(2).unwrap();
        assert_eq!(files.segment_cnt(), 4);
    }

    #[test]
    fn read_only_file_cannot_grow() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("ro.kf");
        drop(SegmentFiles::create(&base).unwrap());

        let mut files = SegmentFiles::new(&base, true);
        let err = files.handle(1).unwrap_err();

        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::SegmentOpen));
        assert!(!dir.path().join("ro$1.kf").exists());
    }

    #[test]
    fn least_recently_used_handle_is_closed() {
        let dir = tempdir().unwrap();
        let mut files = SegmentFiles::create(dir.path().join("lru.kf")).unwrap();

        for segment in 1..MAX_FILES as u16 {
            files.handle(segment).unwrap();
        }
        assert_eq!(files.open_handles(), MAX_FILES);

        files.handle(0).unwrap();
        files.handle(MAX_FILES as u16).unwrap();

        assert_eq!(files.open_handles(), MAX_FILES);
        assert!(files.is_open(0));
        assert!(!files.is_open(1));
        assert!(files.is_open(MAX_FILES as u16));
    }

    #[test]
    fn short_read_is_fatal_read_error() {
        let dir = tempdir().unwrap();
        let mut files = SegmentFiles::create(dir.path().join("short.kf")).unwrap();
        let mut block = IndexBlock::default();

        let err = files.read_block(BlockPointer::new(0, 5), &mut block).unwrap_err();

        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::Read));
    }
}
