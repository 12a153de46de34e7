//! # Key and Integer Encoding
//!
//! Byte-level codecs shared by the page codec and the public API:
//!
//! - [`varint`]: 7-bit group compression for lengths, locators and block
//!   pointers, plus the 1-or-2 byte key length form
//! - [`key`]: the six-byte printable encoding of integer keys

pub mod key;
pub mod varint;

pub use key::{create_key, decode_key, INT_KEY_LC};
pub use varint::{
    compress_u16, compress_u32, compress_u64, compressed_len, decode_key_lc, encode_key_lc,
    key_lc_len, uncompress_u16, uncompress_u32, uncompress_u64,
};
