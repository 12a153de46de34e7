//! # Record Space Management
//!
//! Freed record extents are tracked in two internal indexes that share the
//! tree code of the user index. Their entries carry an empty record; all
//! information is in the key:
//!
//! ```text
//! FreeRec key:  [segment u16][sc u64][lc u32]     ordered by location
//! FreeLc  key:  [lc u32][segment u16][sc u64]     ordered by length
//! ```
//!
//! All fields are big-endian so byte order equals numeric order.
//!
//! ## Allocation
//!
//! First fit by length: the first `FreeLc` key `>= (lc, 0, 0)` names the
//! smallest free extent that is large enough. It is removed from both
//! indexes and any unused tail is put back. Without a fitting extent the
//! record is appended at the tail of the newest segment.
//!
//! ## Deallocation
//!
//! A freed extent is merged with a free extent ending where it starts and
//! one starting where it ends, both found through `FreeRec`. A merged
//! extent that ends at the tail of the newest segment shrinks the segment
//! instead of being indexed.

use byteorder::{BigEndian, ByteOrder};
use eyre::Result;
use tracing::debug;

use super::Keyfile;
use crate::error::ErrorKind;
use crate::storage::space::{append_extent, extent_lc};
use crate::storage::{BlockDevice, EntryValue, IndexId, Level0Pointer};

const FREE_KEY_LC: usize = 2 + 8 + 4;

fn free_rec_key(segment: u16, sc: u64, lc: u32) -> [u8; FREE_KEY_LC] {
    let mut key = [0u8; FREE_KEY_LC];
    BigEndian::write_u16(&mut key[0..2], segment);
    BigEndian::write_u64(&mut key[2..10], sc);
    BigEndian::write_u32(&mut key[10..14], lc);
    key
}

fn free_lc_key(lc: u32, segment: u16, sc: u64) -> [u8; FREE_KEY_LC] {
    let mut key = [0u8; FREE_KEY_LC];
    BigEndian::write_u32(&mut key[0..4], lc);
    BigEndian::write_u16(&mut key[4..6], segment);
    BigEndian::write_u64(&mut key[6..14], sc);
    key
}

fn check_free_key(key: &[u8]) -> Result<()> {
    if key.len() != FREE_KEY_LC {
        return Err(ErrorKind::IxStruct.with(format!(
            "free space key of {} bytes, expected {}",
            key.len(),
            FREE_KEY_LC
        )));
    }
    Ok(())
}

/// Decodes a `FreeRec` key into `(segment, sc, lc)`.
fn parse_free_rec_key(key: &[u8]) -> Result<(u16, u64, u32)> {
    check_free_key(key)?;
    Ok((
        BigEndian::read_u16(&key[0..2]),
        BigEndian::read_u64(&key[2..10]),
        BigEndian::read_u32(&key[10..14]),
    ))
}

/// Decodes a `FreeLc` key into `(segment, sc, lc)`.
fn parse_free_lc_key(key: &[u8]) -> Result<(u16, u64, u32)> {
    check_free_key(key)?;
    Ok((
        BigEndian::read_u16(&key[4..6]),
        BigEndian::read_u64(&key[6..14]),
        BigEndian::read_u32(&key[0..4]),
    ))
}

fn free_lc(lc: u64) -> Result<u32> {
    u32::try_from(lc)
        .map_err(|_| ErrorKind::DeallocRec.with(format!("free extent of {} bytes", lc)))
}

impl Keyfile {
    /// Reserves an extent for a record of `lc` bytes.
    pub(super) fn allocate_extent(&mut self, lc: u32) -> Result<Level0Pointer> {
        let want = extent_lc(lc);
        let wanted = free_lc_key(free_lc(want)?, 0, 0);
        let found = {
            let mut tree = self.tree(IndexId::FreeLc);
            let mut pos = tree.seek(&wanted)?;
            tree.next_entry(&mut pos)?
        };

        let Some(entry) = found else {
            let (segment, sc) = append_extent(&mut self.fib, lc)?;
            self.files.reserve_segments(self.fib.segment_cnt)?;
            return Ok(Level0Pointer::extent(lc, segment, sc));
        };

        let (segment, sc, avail) = parse_free_lc_key(&entry.key)?;
        if (avail as u64) < want {
            return Err(ErrorKind::AllocRec.with(format!(
                "free extent of {} bytes chosen for {} bytes",
                avail, want
            )));
        }
        self.unlink_free(segment, sc, avail)?;
        if avail as u64 > want {
            self.link_free(segment, sc + want, avail - want as u32)?;
        }
        debug!(segment, sc, lc, avail, "reused free extent");
        Ok(Level0Pointer::extent(lc, segment, sc))
    }

    /// Returns `lc` reserved bytes at `(segment, sc)` to free space.
    pub(super) fn free_extent(&mut self, segment: u16, sc: u64, lc: u64) -> Result<()> {
        let mut start = sc;
        let mut len = lc;

        let after = {
            let mut tree = self.tree(IndexId::FreeRec);
            let mut pos = tree.seek(&free_rec_key(segment, start + len, 0))?;
            tree.next_entry(&mut pos)?
        };
        if let Some(entry) = after {
            let (seg, off, l) = parse_free_rec_key(&entry.key)?;
            if seg == segment && off == start + len {
                self.unlink_free(seg, off, l)?;
                len += l as u64;
            }
        }

        let before = {
            let mut tree = self.tree(IndexId::FreeRec);
            let mut pos = tree.seek(&free_rec_key(segment, start, 0))?;
            tree.prev_entry(&mut pos)?
        };
        if let Some(entry) = before {
            let (seg, off, l) = parse_free_rec_key(&entry.key)?;
            if seg == segment && off + l as u64 == start {
                self.unlink_free(seg, off, l)?;
                start = off;
                len += l as u64;
            }
        }

        let newest = self.fib.segment_cnt as usize - 1;
        if segment as usize == newest && start + len == self.fib.segment_length[newest] {
            self.fib.segment_length[newest] = start;
            debug!(segment, length = start, "trimmed segment tail");
            return Ok(());
        }
        self.link_free(segment, start, free_lc(len)?)
    }

    fn link_free(&mut self, segment: u16, sc: u64, lc: u32) -> Result<()> {
        let empty = || EntryValue::Embedded(Vec::new());
        let by_rec = self
            .tree(IndexId::FreeRec)
            .insert(&free_rec_key(segment, sc, lc), empty())?;
        let by_lc = self
            .tree(IndexId::FreeLc)
            .insert(&free_lc_key(lc, segment, sc), empty())?;
        self.reset_free_cursors();
        if by_rec.is_some() || by_lc.is_some() {
            return Err(ErrorKind::FreeInsert.with(format!(
                "extent ({}, {}, {}) already free",
                segment, sc, lc
            )));
        }
        Ok(())
    }

    fn unlink_free(&mut self, segment: u16, sc: u64, lc: u32) -> Result<()> {
        let by_rec = self
            .tree(IndexId::FreeRec)
            .delete(&free_rec_key(segment, sc, lc))?;
        let by_lc = self
            .tree(IndexId::FreeLc)
            .delete(&free_lc_key(lc, segment, sc))?;
        self.reset_free_cursors();
        if by_rec.is_none() || by_lc.is_none() {
            return Err(ErrorKind::FreeDelete.with(format!(
                "extent ({}, {}, {}) missing from free space indexes",
                segment, sc, lc
            )));
        }
        Ok(())
    }

    fn reset_free_cursors(&mut self) {
        self.cursors[IndexId::FreeRec.slot()].position = None;
        self.cursors[IndexId::FreeLc.slot()].position = None;
    }

    /// Free extents as `(segment, sc, lc)` in location order.
    pub fn free_extents(&mut self) -> Result<Vec<(u16, u64, u32)>> {
        self.run(|kf| {
            let mut tree = kf.tree(IndexId::FreeRec);
            let mut pos = tree.first_position();
            let mut extents = Vec::new();
            while let Some(entry) = tree.next_entry(&mut pos)? {
                extents.push(parse_free_rec_key(&entry.key)?);
            }
            Ok(extents)
        })
    }
}
