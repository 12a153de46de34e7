//! # Page Codec
//!
//! Transfers an [`IndexBlock`] to and from its fixed-size on-disk image.
//! Header fields are written one by one in the requested byte order, followed
//! by the keyspace. Inside the keyspace only the packed `u16` offset array is
//! byte-order sensitive; prefix and entry bytes are already byte streams
//! (compressed integers are big-endian by construction) and are copied
//! verbatim.
//!
//! Keyed files are always written as [`DiskOrder`] (big-endian). The codec
//! is generic over [`ByteOrder`] so a block image produced on one byte order
//! can be decoded on the other, which is how cross-endian compatibility is
//! tested.
//!
//! ```text
//! offset  size  field
//! 0       2     keys_in_block
//! 2       2     chars_in_use
//! 4       1     index_type
//! 5       1     prefix_lc
//! 6       1     unused
//! 7       1     level
//! 8       2     next.segment
//! 10      8     next.block
//! 18      2     prev.segment
//! 20      8     prev.block
//! 28      4068  keyspace: offsets (E-ordered u16) | raw bytes
//! ```

use std::io::{Cursor, Read, Write};

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use eyre::{Result, WrapErr};

use super::page::IndexBlock;
use super::pointer::BlockPointer;
use crate::config::{BLOCK_HEADER_LC, BLOCK_LC, KEYSPACE_LC, KEY_PTR_LC, MAX_INDEX, MAX_LEVEL};
use crate::error::ErrorKind;

/// Byte order of every keyed file on disk.
pub type DiskOrder = BigEndian;

fn write_pointer<E: ByteOrder, W: Write>(w: &mut W, ptr: BlockPointer) -> std::io::Result<()> {
    w.write_u16::<E>(ptr.segment)?;
    w.write_u64::<E>(ptr.block)
}

fn read_pointer<E: ByteOrder, R: Read>(r: &mut R) -> std::io::Result<BlockPointer> {
    let segment = r.read_u16::<E>()?;
    let block = r.read_u64::<E>()?;
    Ok(BlockPointer::new(segment, block))
}

/// Serializes `block` into `out`, which must be exactly `BLOCK_LC` bytes.
pub fn encode_block<E: ByteOrder>(block: &IndexBlock, out: &mut [u8]) -> Result<()> {
    debug_assert_eq!(out.len(), BLOCK_LC);
    let mut w = Cursor::new(out);
    write_header::<E, _>(&mut w, block).wrap_err(ErrorKind::Write)?;

    let n = block.keys_in_block();
    for ix in 0..n {
        w.write_u16::<E>(block.offset(ix) as u16)
            .wrap_err(ErrorKind::Write)?;
    }
    w.write_all(&block.keyspace()[KEY_PTR_LC * n..])
        .wrap_err(ErrorKind::Write)?;
    debug_assert_eq!(w.position() as usize, BLOCK_LC);
    Ok(())
}

fn write_header<E: ByteOrder, W: Write>(w: &mut W, block: &IndexBlock) -> std::io::Result<()> {
    w.write_u16::<E>(block.keys_in_block)?;
    w.write_u16::<E>(block.chars_in_use)?;
    w.write_u8(block.index_type)?;
    w.write_u8(block.prefix_lc)?;
    w.write_u8(block.unused)?;
    w.write_u8(block.level)?;
    write_pointer::<E, _>(w, block.next)?;
    write_pointer::<E, _>(w, block.prev)
}

/// Deserializes a `BLOCK_LC` image into `block`, validating the header
/// against the keyspace geometry.
pub fn decode_block<E: ByteOrder>(bytes: &[u8], block: &mut IndexBlock) -> Result<()> {
    if bytes.len() < BLOCK_LC {
        return Err(ErrorKind::Read.with(format!(
            "block image of {} bytes, expected {}",
            bytes.len(),
            BLOCK_LC
        )));
    }
    let mut r = Cursor::new(bytes);
    let read = |e: std::io::Error| eyre::Report::new(e).wrap_err(ErrorKind::Read);

    let keys_in_block = r.read_u16::<E>().map_err(read)?;
    let chars_in_use = r.read_u16::<E>().map_err(read)?;
    let index_type = r.read_u8().map_err(read)?;
    let prefix_lc = r.read_u8().map_err(read)?;
    let unused = r.read_u8().map_err(read)?;
    let level = r.read_u8().map_err(read)?;
    let next = read_pointer::<E, _>(&mut r).map_err(read)?;
    let prev = read_pointer::<E, _>(&mut r).map_err(read)?;
    debug_assert_eq!(r.position() as usize, BLOCK_HEADER_LC);

    let n = keys_in_block as usize;
    if KEY_PTR_LC * n + chars_in_use as usize > KEYSPACE_LC
        || prefix_lc as u16 > chars_in_use
        || level as usize >= MAX_LEVEL
        || index_type as usize >= MAX_INDEX
    {
        return Err(ErrorKind::IxStruct.with(format!(
            "inconsistent block header: keys={} chars={} prefix={} level={} index={}",
            keys_in_block, chars_in_use, prefix_lc, level, index_type
        )));
    }

    block.keys_in_block = keys_in_block;
    block.chars_in_use = chars_in_use;
    block.index_type = index_type;
    block.prefix_lc = prefix_lc;
    block.unused = unused;
    block.level = level;
    block.next = next;
    block.prev = prev;

    for ix in 0..n {
        let offset = r.read_u16::<E>().map_err(read)?;
        block.set_offset(ix, offset as usize);
    }
    let start = KEY_PTR_LC * n;
    r.read_exact(&mut block.keys[start..]).map_err(read)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entry::{Entry, EntryValue};
    use crate::storage::page::IndexId;
    use crate::storage::pointer::Level0Pointer;
    use byteorder::LittleEndian;

    fn sample_block() -> IndexBlock {
        let mut entries: Vec<Entry> = (0..40)
            .map(|i| {
                let key = format!("collection/doc{:05}", i * 7).into_bytes();
                Entry::new(key, EntryValue::Embedded(vec![i as u8; i % 12]))
            })
            .collect();
        entries.push(Entry::new(
            b"collection/zz".to_vec(),
            EntryValue::Extent(Level0Pointer::extent(5000, 3, 8 * 1024)),
        ));
        let mut block = IndexBlock::new(IndexId::User, 0);
        block.pack(&entries).unwrap();
        block.set_next(BlockPointer::new(0, 17));
        block.set_prev(BlockPointer::new(2, 0x0102_0304_0506));
        block
    }

    #[test]
    fn big_endian_round_trip_is_identical() {
        let block = sample_block();
        let mut image = vec![0u8; BLOCK_LC];
        encode_block::<DiskOrder>(&block, &mut image).unwrap();

        let mut decoded = IndexBlock::default();
        decode_block::<DiskOrder>(&image, &mut decoded).unwrap();

        assert_eq!(decoded, block);
    }

    #[test]
    fn little_endian_round_trip_is_identical() {
        let block = sample_block();
        let mut image = vec![0u8; BLOCK_LC];
        encode_block::<LittleEndian>(&block, &mut image).unwrap();

        let mut decoded = IndexBlock::default();
        decode_block::<LittleEndian>(&image, &mut decoded).unwrap();

        assert_eq!(decoded, block);
    }

    #[test]
    fn header_and_offsets_swap_but_entry_bytes_do_not() {
        let block = sample_block();
        let mut big = vec![0u8; BLOCK_LC];
        let mut little = vec![0u8; BLOCK_LC];
        encode_block::<BigEndian>(&block, &mut big).unwrap();
        encode_block::<LittleEndian>(&block, &mut little).unwrap();

        assert_eq!(big[0..2], [little[1], little[0]]);
        let offsets_end = BLOCK_HEADER_LC + KEY_PTR_LC * block.keys_in_block();
        for at in (BLOCK_HEADER_LC..offsets_end).step_by(2) {
            assert_eq!(big[at..at + 2], [little[at + 1], little[at]]);
        }
        assert_eq!(big[offsets_end..], little[offsets_end..]);
    }

    #[test]
    fn decoded_block_searches_like_original() {
        let block = sample_block();
        let mut image = vec![0u8; BLOCK_LC];
        encode_block::<DiskOrder>(&block, &mut image).unwrap();
        let mut decoded = IndexBlock::default();
        decode_block::<DiskOrder>(&image, &mut decoded).unwrap();

        for ix in 0..block.keys_in_block() {
            let key = block.key_at(ix).unwrap();
            assert!(decoded.search(&key).unwrap().is_found());
        }
    }

    #[test]
    fn zeroed_image_decodes_as_empty_leaf() {
        let image = vec![0u8; BLOCK_LC];
        let mut block = sample_block();
        decode_block::<DiskOrder>(&image, &mut block).unwrap();

        assert!(block.is_empty());
        assert!(block.is_leaf());
    }

    #[test]
    fn impossible_header_is_structural_error() {
        let mut image = vec![0u8; BLOCK_LC];
        image[0..2].copy_from_slice(&3000u16.to_be_bytes());
        let mut block = IndexBlock::default();

        let err = decode_block::<DiskOrder>(&image, &mut block).unwrap_err();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::IxStruct));
    }

    #[test]
    fn short_image_is_read_error() {
        let mut block = IndexBlock::default();
        let err = decode_block::<DiskOrder>(&[0u8; 100], &mut block).unwrap_err();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::Read));
    }
}
