//! # File-Info Block
//!
//! Block 0 of segment 0 holds the file-info block ("fib"): everything needed
//! to find the roots of the three index trees, the extent of every segment
//! and the persisted health of the file.
//!
//! ## Layout
//!
//! All integers are written in [`DiskOrder`](super::codec::DiskOrder),
//! field by field, with no padding:
//!
//! ```text
//! error_code              u32
//! version                 u32     (CURRENT_VERSION, read before anything else)
//! sub_version             u32
//! segment_cnt             u32
//! primary_level[index]    u32 x MAX_INDEX
//! marker                  u32     ("keyf")
//! file_ok                 u32     (0 or 1)
//! first_free_block[l][i]  (u16 segment, u64 block) x MAX_LEVEL x MAX_INDEX
//! first_at_level[l][i]    (u16 segment, u64 block) x MAX_LEVEL x MAX_INDEX
//! last_pntr[l][i]         (u16 segment, u64 block) x MAX_LEVEL x MAX_INDEX
//! max_file_lc             u64
//! segment_length[s]       u64 x MAX_SEGMENT
//! data_in_index_lc        u32
//! ```
//!
//! The serialized length must be exactly [`FIB_LC`]; a fib that decodes to
//! any other length is rejected as a bad open. The remainder of block 0 is
//! zero filled.
//!
//! ## Tree Roots
//!
//! For index `i` the root is `first_at_level[primary_level[i]][i]`. At every
//! level `first_at_level` names the leftmost block, and for interior levels
//! `last_pntr` is the child covering keys greater than every separator in
//! the rightmost block of that level.

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use eyre::{Result, WrapErr};

use super::pointer::BlockPointer;
use crate::config::{
    BLOCK_LC, CURRENT_SUB_VERSION, CURRENT_VERSION, FIB_LC, KEYF_MARKER, MAX_DATA_IN_INDEX_LC,
    MAX_INDEX, MAX_LEVEL, MAX_SEGMENT, MAX_SEGMENT_LC, MIN_SEGMENT_LC,
};
use crate::error::ErrorKind;

pub type LevelTable = [[BlockPointer; MAX_INDEX]; MAX_LEVEL];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub error_code: u32,
    pub version: u32,
    pub sub_version: u32,
    pub segment_cnt: u32,
    pub primary_level: [u32; MAX_INDEX],
    pub marker: u32,
    pub file_ok: bool,
    pub first_free_block: LevelTable,
    pub first_at_level: LevelTable,
    pub last_pntr: LevelTable,
    pub max_file_lc: u64,
    pub segment_length: [u64; MAX_SEGMENT],
    pub data_in_index_lc: u32,
}

/// Reads the format version word without decoding the rest of the fib.
pub fn read_version(head: &[u8]) -> Result<u32> {
    if head.len() < 8 {
        return Err(ErrorKind::NotKeyfile.with(format!(
            "file too short for a version word: {} bytes",
            head.len()
        )));
    }
    Ok(BigEndian::read_u32(&head[4..8]))
}

impl FileInfo {
    /// Fib of a freshly created file with a single segment whose first block
    /// is reserved for the fib itself.
    pub fn new(max_file_lc: u64, data_in_index_lc: u32) -> Self {
        let mut segment_length = [0u64; MAX_SEGMENT];
        segment_length[0] = BLOCK_LC as u64;
        Self {
            error_code: 0,
            version: CURRENT_VERSION,
            sub_version: CURRENT_SUB_VERSION,
            segment_cnt: 1,
            primary_level: [0; MAX_INDEX],
            marker: KEYF_MARKER,
            file_ok: true,
            first_free_block: [[BlockPointer::NULL; MAX_INDEX]; MAX_LEVEL],
            first_at_level: [[BlockPointer::NULL; MAX_INDEX]; MAX_LEVEL],
            last_pntr: [[BlockPointer::NULL; MAX_INDEX]; MAX_LEVEL],
            max_file_lc,
            segment_length,
            data_in_index_lc,
        }
    }

    /// Root block of an index tree.
    pub fn root(&self, index: usize) -> BlockPointer {
        self.first_at_level[self.primary_level[index] as usize][index]
    }

    pub fn write_to<E: ByteOrder, W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        w.write_u32::<E>(self.error_code)?;
        w.write_u32::<E>(self.version)?;
        w.write_u32::<E>(self.sub_version)?;
        w.write_u32::<E>(self.segment_cnt)?;
        for level in self.primary_level {
            w.write_u32::<E>(level)?;
        }
        w.write_u32::<E>(self.marker)?;
        w.write_u32::<E>(self.file_ok as u32)?;
        for table in [&self.first_free_block, &self.first_at_level, &self.last_pntr] {
            for ptr in table.iter().flatten() {
                w.write_u16::<E>(ptr.segment)?;
                w.write_u64::<E>(ptr.block)?;
            }
        }
        w.write_u64::<E>(self.max_file_lc)?;
        for lc in self.segment_length {
            w.write_u64::<E>(lc)?;
        }
        w.write_u32::<E>(self.data_in_index_lc)
    }

    pub fn read_from<E: ByteOrder, R: Read>(r: &mut R) -> std::io::Result<Self> {
        let error_code = r.read_u32::<E>()?;
        let version = r.read_u32::<E>()?;
        let sub_version = r.read_u32::<E>()?;
        let segment_cnt = r.read_u32::<E>()?;
        let mut primary_level = [0u32; MAX_INDEX];
        for level in primary_level.iter_mut() {
            *level = r.read_u32::<E>()?;
        }
        let marker = r.read_u32::<E>()?;
        let file_ok = r.read_u32::<E>()? != 0;

        let mut tables = [[[BlockPointer::NULL; MAX_INDEX]; MAX_LEVEL]; 3];
        for table in tables.iter_mut() {
            for ptr in table.iter_mut().flatten() {
                let segment = r.read_u16::<E>()?;
                let block = r.read_u64::<E>()?;
                *ptr = BlockPointer::new(segment, block);
            }
        }
        let [first_free_block, first_at_level, last_pntr] = tables;

        let max_file_lc = r.read_u64::<E>()?;
        let mut segment_length = [0u64; MAX_SEGMENT];
        for lc in segment_length.iter_mut() {
            *lc = r.read_u64::<E>()?;
        }
        let data_in_index_lc = r.read_u32::<E>()?;

        Ok(Self {
            error_code,
            version,
            sub_version,
            segment_cnt,
            primary_level,
            marker,
            file_ok,
            first_free_block,
            first_at_level,
            last_pntr,
            max_file_lc,
            segment_length,
            data_in_index_lc,
        })
    }

    /// Serializes the fib into a full, zero-padded block 0 image.
    pub fn to_block_image<E: ByteOrder>(&self) -> Result<Vec<u8>> {
        let mut image = vec![0u8; BLOCK_LC];
        let mut w = Cursor::new(&mut image[..]);
        self.write_to::<E, _>(&mut w).wrap_err(ErrorKind::Write)?;
        let written = w.position() as usize;
        if written != FIB_LC {
            return Err(ErrorKind::Write.with(format!(
                "fib serialized to {} bytes, expected {}",
                written, FIB_LC
            )));
        }
        Ok(image)
    }

    /// Decodes a fib image, requiring exactly `FIB_LC` bytes of content.
    pub fn from_image<E: ByteOrder>(image: &[u8]) -> Result<Self> {
        if image.len() < FIB_LC {
            return Err(ErrorKind::BadOpen.with(format!(
                "fib image of {} bytes, expected {}",
                image.len(),
                FIB_LC
            )));
        }
        let mut r = Cursor::new(image);
        let fib = Self::read_from::<E, _>(&mut r).wrap_err(ErrorKind::BadOpen)?;
        let consumed = r.position() as usize;
        if consumed != FIB_LC {
            return Err(ErrorKind::BadOpen.with(format!(
                "fib decoded from {} bytes, expected {}",
                consumed, FIB_LC
            )));
        }
        Ok(fib)
    }

    /// Range-checks the fields later used as table indexes or allocation
    /// bounds. A fib read from disk must pass before any tree is touched.
    pub fn validate(&self) -> Result<()> {
        for (index, &level) in self.primary_level.iter().enumerate() {
            if level as usize >= MAX_LEVEL {
                return Err(ErrorKind::BadOpen.with(format!(
                    "index {} has primary level {}, limit is {}",
                    index, level, MAX_LEVEL
                )));
            }
        }
        if self.segment_cnt == 0 || self.segment_cnt as usize > MAX_SEGMENT {
            return Err(ErrorKind::BadOpen.with(format!(
                "segment count {} outside 1..={}",
                self.segment_cnt, MAX_SEGMENT
            )));
        }
        if self.data_in_index_lc > MAX_DATA_IN_INDEX_LC {
            return Err(ErrorKind::BadOpen.with(format!(
                "inline record limit {} above {}",
                self.data_in_index_lc, MAX_DATA_IN_INDEX_LC
            )));
        }
        if !(MIN_SEGMENT_LC..=MAX_SEGMENT_LC).contains(&self.max_file_lc) {
            return Err(ErrorKind::BadOpen.with(format!(
                "segment length {} outside {}..={}",
                self.max_file_lc, MIN_SEGMENT_LC, MAX_SEGMENT_LC
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::DiskOrder;

    fn populated_fib() -> FileInfo {
        let mut fib = FileInfo::new(1 << 24, 32);
        fib.segment_cnt = 3;
        fib.primary_level = [2, 0, 1];
        fib.first_at_level[0][0] = BlockPointer::new(0, 1);
        fib.first_at_level[2][0] = BlockPointer::new(1, 44);
        fib.last_pntr[1][2] = BlockPointer::new(2, 9);
        fib.segment_length[..3].copy_from_slice(&[1 << 24, 1 << 24, 12_288]);
        fib
    }

    #[test]
    fn serialized_length_is_fib_lc() {
        let mut buf = Vec::new();
        populated_fib().write_to::<DiskOrder, _>(&mut buf).unwrap();
        assert_eq!(buf.len(), FIB_LC);
    }

    #[test]
    fn image_round_trip() {
        let fib = populated_fib();
        let image = fib.to_block_image::<DiskOrder>().unwrap();

        assert_eq!(image.len(), BLOCK_LC);
        assert_eq!(FileInfo::from_image::<DiskOrder>(&image).unwrap(), fib);
    }

    #[test]
    fn version_is_second_big_endian_word() {
        let image = populated_fib().to_block_image::<DiskOrder>().unwrap();

        assert_eq!(read_version(&image).unwrap(), CURRENT_VERSION);
        assert_eq!(&image[4..8], &[0, 0, 0, 7]);
    }

    #[test]
    fn root_follows_primary_level() {
        let fib = populated_fib();
        assert_eq!(fib.root(0), BlockPointer::new(1, 44));
        assert_eq!(fib.root(1), BlockPointer::NULL);
    }

    #[test]
    fn truncated_image_is_bad_open() {
        let image = populated_fib().to_block_image::<DiskOrder>().unwrap();
        let err = FileInfo::from_image::<DiskOrder>(&image[..FIB_LC - 1]).unwrap_err();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::BadOpen));
    }

    #[test]
    fn out_of_range_fields_fail_validation() {
        assert!(populated_fib().validate().is_ok());

        let mut deep = populated_fib();
        deep.primary_level[1] = MAX_LEVEL as u32;
        let mut empty = populated_fib();
        empty.segment_cnt = 0;
        let mut crowded = populated_fib();
        crowded.segment_cnt = MAX_SEGMENT as u32 + 1;
        let mut wide = populated_fib();
        wide.data_in_index_lc = MAX_DATA_IN_INDEX_LC + 1;
        let mut tiny = populated_fib();
        tiny.max_file_lc = 0;

        for fib in [deep, empty, crowded, wide, tiny] {
            let err = fib.validate().unwrap_err();
            assert_eq!(ErrorKind::of(&err), Some(ErrorKind::BadOpen));
        }
    }

    #[test]
    fn new_fib_reserves_block_zero() {
        let fib = FileInfo::new(1 << 20, 16);
        assert_eq!(fib.segment_length[0], BLOCK_LC as u64);
        assert_eq!(fib.segment_cnt, 1);
        assert!(fib.file_ok);
        assert_eq!(fib.marker, KEYF_MARKER);
    }
}
