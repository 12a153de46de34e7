//! # Integer Keys
//!
//! Integer-keyed records are stored under a fixed six-byte printable key.
//! The integer is split into six 6-bit groups, most significant first; each
//! group is OR'd with `0x40` and bit 7 is cleared, so every byte lands in
//! `0x40..=0x7f`.
//!
//! ```text
//! n = g0 g1 g2 g3 g4 g5      (6 bits each, g0 most significant)
//! key[i] = (g_i | 0x40) & 0x7f
//! ```
//!
//! Byte order of the key follows numeric order, so integer keys sort
//! numerically inside the index.
//!
//! Only the low 36 bits of the integer are represented. Larger values are
//! silently truncated; callers that need a wider domain must use byte keys.

/// Length of an encoded integer key.
pub const INT_KEY_LC: usize = 6;

/// Bits of an integer preserved by [`create_key`].
pub const INT_KEY_BITS: u32 = 6 * INT_KEY_LC as u32;

pub fn create_key(number: u64) -> [u8; INT_KEY_LC] {
    let mut key = [0u8; INT_KEY_LC];
    for (digit, byte) in key.iter_mut().enumerate() {
        let shift = (INT_KEY_LC - 1 - digit) * 6;
        *byte = (((number >> shift) & 0x3f) as u8 | 0x40) & !0x80;
    }
    key
}

pub fn decode_key(key: &[u8; INT_KEY_LC]) -> u64 {
    key.iter()
        .fold(0u64, |number, &byte| (number << 6) | (byte & 0x3f) as u64)
}
