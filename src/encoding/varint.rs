//! # Compressed Integers
//!
//! Lengths, record locators and block pointers stored inside index entries
//! are compressed into groups of seven bits. The most significant group is
//! written first and every byte except the last has its high bit set.
//!
//! ## Encoding Format
//!
//! ```text
//! value            bytes
//! 0..=127          0vvvvvvv
//! 128..=16383      1vvvvvvv 0vvvvvvv
//! ...              1vvvvvvv ... 0vvvvvvv   (up to 10 bytes for u64)
//! ```
//!
//! Because the first byte holds the high-order bits, the byte count of a
//! value is known from its magnitude alone, see [`compressed_len`].
//!
//! ## Key Lengths
//!
//! The suffix length of a key uses a separate fixed 1-or-2 byte form:
//!
//! ```text
//! lc < 128     0lllllll
//! lc < 16384   1hhhhhhh 0lllllll     lc = h * 128 + l
//! ```
//!
//! ## Malformed Input
//!
//! Decoding a sequence that never terminates inside the slice is a
//! structural error, reported as [`ErrorKind::IxStruct`]. Encoded bytes only
//! ever come from index blocks this module wrote, so callers treat such a
//! failure as damage to the file.

use eyre::Result;

use crate::config::{MAX_COMPRESSED_U16_LC, MAX_COMPRESSED_U32_LC, MAX_COMPRESSED_U64_LC};
use crate::error::ErrorKind;

/// Number of bytes `compress_u64(value)` produces.
pub fn compressed_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Writes `value` into `buf` and returns the number of bytes used.
///
/// `buf` must hold at least [`compressed_len`] bytes.
pub fn compress_u64(value: u64, buf: &mut [u8]) -> usize {
    let len = compressed_len(value);
    for (i, byte) in buf[..len].iter_mut().enumerate() {
        let shift = 7 * (len - 1 - i);
        let group = ((value >> shift) & 0x7f) as u8;
        *byte = if i + 1 < len { group | 0x80 } else { group };
    }
    len
}

pub fn compress_u32(value: u32, buf: &mut [u8]) -> usize {
    compress_u64(value as u64, buf)
}

pub fn compress_u16(value: u16, buf: &mut [u8]) -> usize {
    compress_u64(value as u64, buf)
}

fn uncompress(buf: &[u8], max_len: usize, what: &str) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in buf.iter().take(max_len).enumerate() {
        value = (value << 7) | (byte & 0x7f) as u64;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(ErrorKind::IxStruct.with(format!(
        "unterminated compressed {} in {} bytes",
        what,
        buf.len().min(max_len)
    )))
}

/// Decodes a compressed u64, returning the value and the bytes consumed.
pub fn uncompress_u64(buf: &[u8]) -> Result<(u64, usize)> {
    uncompress(buf, MAX_COMPRESSED_U64_LC, "u64")
}

pub fn uncompress_u32(buf: &[u8]) -> Result<(u32, usize)> {
    let (value, len) = uncompress(buf, MAX_COMPRESSED_U32_LC, "u32")?;
    let value = u32::try_from(value)
        .map_err(|_| ErrorKind::IxStruct.with(format!("compressed u32 overflows: {}", value)))?;
    Ok((value, len))
}

pub fn uncompress_u16(buf: &[u8]) -> Result<(u16, usize)> {
    let (value, len) = uncompress(buf, MAX_COMPRESSED_U16_LC, "u16")?;
    let value = u16::try_from(value)
        .map_err(|_| ErrorKind::IxStruct.with(format!("compressed u16 overflows: {}", value)))?;
    Ok((value, len))
}

/// Bytes used by the key-length form of `lc`.
pub fn key_lc_len(lc: usize) -> usize {
    if lc < 128 {
        1
    } else {
        2
    }
}

/// Writes a key suffix length. `lc` must be below 2^14.
pub fn encode_key_lc(lc: usize, buf: &mut [u8]) -> usize {
    debug_assert!(lc <= crate::config::MAX_KEY_LC_VALUE);
    if lc < 128 {
        buf[0] = lc as u8;
        1
    } else {
        buf[0] = 0x80 | (lc >> 7) as u8;
        buf[1] = (lc & 0x7f) as u8;
        2
    }
}

pub fn decode_key_lc(buf: &[u8]) -> Result<(usize, usize)> {
    match buf {
        [p0, ..] if *p0 < 128 => Ok((*p0 as usize, 1)),
        [p0, p1, ..] => Ok((((*p0 & 0x7f) as usize) * 128 + *p1 as usize, 2)),
        _ => Err(ErrorKind::IxStruct.with("truncated key length")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_len_boundaries() {
        assert_eq!(compressed_len(0), 1);
        assert_eq!(compressed_len(127), 1);
        assert_eq!(compressed_len(128), 2);
        assert_eq!(compressed_len(16383), 2);
        assert_eq!(compressed_len(16384), 3);
        assert_eq!(compressed_len(u32::MAX as u64), 5);
        assert_eq!(compressed_len(u64::MAX), 10);
    }

    #[test]
    fn compress_writes_most_significant_group_first() {
        let mut buf = [0u8; 10];
        let len = compress_u64(300, &mut buf);

        assert_eq!(len, 2);
        assert_eq!(&buf[..2], &[0x82, 0x2c]);
    }

    #[test]
    fn single_byte_values_have_no_continuation_bit() {
        let mut buf = [0u8; 10];
        assert_eq!(compress_u64(0x7f, &mut buf), 1);
        assert_eq!(buf[0], 0x7f);
    }

    #[test]
    fn uncompress_reports_consumed_bytes() {
        let bytes = [0x82, 0x2c, 0xff, 0xff];
        let (value, used) = uncompress_u64(&bytes).unwrap();

        assert_eq!(value, 300);
        assert_eq!(used, 2);
    }

    #[test]
    fn uncompress_u64_extremes() {
        let mut buf = [0u8; 10];
        let len = compress_u64(u64::MAX, &mut buf);
        assert_eq!(uncompress_u64(&buf[..len]).unwrap(), (u64::MAX, 10));

        let len = compress_u32(u32::MAX, &mut buf);
        assert_eq!(uncompress_u32(&buf[..len]).unwrap(), (u32::MAX, 5));

        let len = compress_u16(u16::MAX, &mut buf);
        assert_eq!(uncompress_u16(&buf[..len]).unwrap(), (u16::MAX, 3));
    }

    #[test]
    fn unterminated_sequence_is_structural_error() {
        let err = uncompress_u64(&[0x80, 0x81]).unwrap_err();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::IxStruct));
    }

    #[test]
    fn u16_overflow_is_rejected() {
        let mut buf = [0u8; 10];
        let len = compress_u64(70_000, &mut buf);
        assert!(uncompress_u16(&buf[..len]).is_err());
    }

    #[test]
    fn key_lc_one_and_two_byte_forms() {
        let mut buf = [0u8; 2];

        assert_eq!(encode_key_lc(5, &mut buf), 1);
        assert_eq!(decode_key_lc(&buf).unwrap(), (5, 1));

        assert_eq!(encode_key_lc(511, &mut buf), 2);
        assert_eq!(buf, [0x83, 0x7f]);
        assert_eq!(decode_key_lc(&buf).unwrap(), (511, 2));
        assert_eq!(key_lc_len(127), 1);
        assert_eq!(key_lc_len(128), 2);
    }
}
