//! # Block and Record Pointers
//!
//! Two pointer shapes appear inside index entries:
//!
//! - [`BlockPointer`] (level-n): `(segment, block)` of a child index block.
//! - [`Level0Pointer`]: length and location of a leaf record. A record whose
//!   length is at most the file's `data_in_index_lc` is embedded in the leaf
//!   right after the pointer and its segment is the `MAX_SEGMENT` sentinel.
//!
//! ## Compressed Forms
//!
//! ```text
//! level-n:  c64(block << 1 | has_segment) [c16(segment)]
//! level-0:  c32(lc) data[lc]                                  lc <= data_in_index_lc
//!           c32(lc) c64(sc / UNIT << 1 | has_segment) [c16(segment)]   otherwise
//! ```
//!
//! `cN` is the 7-bit group compression from [`crate::encoding::varint`].
//! Segment 0 is implied when the low bit is clear, which keeps single-segment
//! files compact. Record offsets are always multiples of
//! `REC_ALLOCATION_UNIT` and are stored scaled.

use eyre::Result;

use crate::config::{BLOCK_SHIFT, MAX_SEGMENT, REC_ALLOCATION_UNIT};
use crate::encoding::{compress_u16, compress_u32, compress_u64, compressed_len};
use crate::encoding::{uncompress_u16, uncompress_u32, uncompress_u64};
use crate::error::ErrorKind;

/// Segment value of a record embedded in its leaf entry.
pub const EMBEDDED_SEGMENT: u16 = MAX_SEGMENT as u16;

/// Address of an index block. Ordered by segment, then block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockPointer {
    pub segment: u16,
    pub block: u64,
}

impl BlockPointer {
    /// Block 0 of segment 0 holds the file-info block, so it never names an
    /// index block.
    pub const NULL: BlockPointer = BlockPointer {
        segment: 0,
        block: 0,
    };

    pub const fn new(segment: u16, block: u64) -> Self {
        Self { segment, block }
    }

    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    /// Byte offset of the block within its segment file.
    pub fn offset(&self) -> u64 {
        self.block << BLOCK_SHIFT
    }

    pub fn encoded_len(&self) -> usize {
        let has_segment = self.segment != 0;
        compressed_len((self.block << 1) | has_segment as u64)
            + if has_segment {
                compressed_len(self.segment as u64)
            } else {
                0
            }
    }

    pub fn encode(&self, buf: &mut [u8]) -> usize {
        let has_segment = self.segment != 0;
        let mut len = compress_u64((self.block << 1) | has_segment as u64, buf);
        if has_segment {
            len += compress_u16(self.segment, &mut buf[len..]);
        }
        len
    }

    pub fn decode(buf: &[u8]) -> Result<(Self, usize)> {
        let (esc, mut len) = uncompress_u64(buf)?;
        let segment = if esc & 1 == 1 {
            let (segment, used) = uncompress_u16(&buf[len..])?;
            len += used;
            segment
        } else {
            0
        };
        Ok((Self::new(segment, esc >> 1), len))
    }
}

/// Leaf record pointer as decoded from an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Level0Pointer {
    pub lc: u32,
    pub segment: u16,
    pub sc: u64,
}

impl Level0Pointer {
    pub const fn embedded(lc: u32) -> Self {
        Self {
            lc,
            segment: EMBEDDED_SEGMENT,
            sc: 0,
        }
    }

    pub const fn extent(lc: u32, segment: u16, sc: u64) -> Self {
        Self { lc, segment, sc }
    }

    pub fn is_embedded(&self) -> bool {
        self.segment == EMBEDDED_SEGMENT
    }

    /// Encoded size, excluding embedded data bytes.
    pub fn encoded_len(&self) -> usize {
        let mut len = compressed_len(self.lc as u64);
        if !self.is_embedded() {
            let has_segment = self.segment != 0;
            len += compressed_len(((self.sc / REC_ALLOCATION_UNIT) << 1) | has_segment as u64);
            if has_segment {
                len += compressed_len(self.segment as u64);
            }
        }
        len
    }

    /// Writes the pointer. Embedded data is written by the caller.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        debug_assert!(self.is_embedded() || self.sc % REC_ALLOCATION_UNIT == 0);
        let mut len = compress_u32(self.lc, buf);
        if !self.is_embedded() {
            let has_segment = self.segment != 0;
            let esc = ((self.sc / REC_ALLOCATION_UNIT) << 1) | has_segment as u64;
            len += compress_u64(esc, &mut buf[len..]);
            if has_segment {
                len += compress_u16(self.segment, &mut buf[len..]);
            }
        }
        len
    }

    /// Decodes a pointer. For an embedded record the `lc` data bytes start
    /// right after the returned length.
    pub fn decode(buf: &[u8], data_in_index_lc: u32) -> Result<(Self, usize)> {
        let (lc, mut len) = uncompress_u32(buf)?;
        if lc <= data_in_index_lc {
            if buf.len() < len + lc as usize {
                return Err(ErrorKind::IxStruct.with(format!(
                    "embedded record of {} bytes overruns its entry",
                    lc
                )));
            }
            return Ok((Self::embedded(lc), len));
        }

        let (esc, used) = uncompress_u64(&buf[len..])?;
        len += used;
        let segment = if esc & 1 == 1 {
            let (segment, used) = uncompress_u16(&buf[len..])?;
            len += used;
            segment
        } else {
            0
        };
        let sc = (esc >> 1).checked_mul(REC_ALLOCATION_UNIT).ok_or_else(|| {
            ErrorKind::IxStruct.with(format!("record offset unit {} out of range", esc >> 1))
        })?;
        Ok((Self::extent(lc, segment, sc), len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_pointer_is_fib_block() {
        assert!(BlockPointer::NULL.is_null());
        assert!(!BlockPointer::new(0, 1).is_null());
        assert!(!BlockPointer::new(1, 0).is_null());
    }

    #[test]
    fn block_pointer_order_is_segment_then_block() {
        assert!(BlockPointer::new(0, 900) < BlockPointer::new(1, 1));
        assert!(BlockPointer::new(2, 3) < BlockPointer::new(2, 4));
    }

    #[test]
    fn segment_zero_block_pointer_omits_segment() {
        let mut buf = [0u8; 16];
        let ptr = BlockPointer::new(0, 5);
        let len = ptr.encode(&mut buf);

        assert_eq!(len, 1);
        assert_eq!(buf[0], 10);
        assert_eq!(BlockPointer::decode(&buf).unwrap(), (ptr, 1));
    }

    #[test]
    fn block_pointer_with_segment() {
        let mut buf = [0u8; 16];
        let ptr = BlockPointer::new(3, 70_000);
        let len = ptr.encode(&mut buf);

        assert_eq!(len, ptr.encoded_len());
        assert_eq!(BlockPointer::decode(&buf[..len]).unwrap(), (ptr, len));
    }

    #[test]
    fn small_record_decodes_as_embedded() {
        let mut buf = [0u8; 16];
        let ptr = Level0Pointer::embedded(5);
        let len = ptr.encode(&mut buf);
        buf[len..len + 5].copy_from_slice(b"hello");

        let (decoded, used) = Level0Pointer::decode(&buf, 16).unwrap();
        assert!(decoded.is_embedded());
        assert_eq!(decoded.lc, 5);
        assert_eq!(&buf[used..used + 5], b"hello");
    }

    #[test]
    fn large_record_decodes_as_extent() {
        let mut buf = [0u8; 32];
        let ptr = Level0Pointer::extent(4000, 2, 8 * 12_345);
        let len = ptr.encode(&mut buf);

        assert_eq!(len, ptr.encoded_len());
        let (decoded, used) = Level0Pointer::decode(&buf, 16).unwrap();
        assert_eq!(decoded, ptr);
        assert_eq!(used, len);
    }

    #[test]
    fn threshold_decides_placement() {
        let mut buf = [0u8; 64];
        let ptr = Level0Pointer::extent(17, 0, 64);
        ptr.encode(&mut buf);

        let (decoded, _) = Level0Pointer::decode(&buf, 16).unwrap();
        assert!(!decoded.is_embedded());
        assert_eq!(decoded.sc, 64);
    }

    #[test]
    fn truncated_embedded_record_is_structural_error() {
        let mut buf = [0u8; 3];
        let len = Level0Pointer::embedded(10).encode(&mut buf);

        let err = Level0Pointer::decode(&buf[..len + 1], 16).unwrap_err();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::IxStruct));
    }
}
