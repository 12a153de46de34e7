//! Fuzz testing for the index block decoder.
//!
//! Arbitrary block images are decoded and, when the header is accepted,
//! every entry is walked and the block is searched. Malformed images must
//! come back as errors, never as panics.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use keyfile::config::BLOCK_LC;
use keyfile::storage::{decode_block, DiskOrder, IndexBlock, IndexId};

#[derive(Debug, Arbitrary)]
struct BlockInput {
    image: Vec<u8>,
    search_key: Vec<u8>,
    data_in_index_lc: u8,
}

fuzz_target!(|input: BlockInput| {
    let mut image = input.image;
    image.resize(BLOCK_LC, 0);

    let mut block = IndexBlock::new(IndexId::User, 0);
    if decode_block::<DiskOrder>(&image, &mut block).is_err() {
        return;
    }

    let _ = block.entries(u32::from(input.data_in_index_lc));
    if !input.search_key.is_empty() {
        let _ = block.search(&input.search_key);
    }
});
