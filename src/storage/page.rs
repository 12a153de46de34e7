//! # Index Blocks
//!
//! An index block is the fixed-size unit of I/O, caching and searching. Every
//! level of every index tree is made of index blocks; level 0 blocks are
//! leaves whose entries point at records, higher levels point at child
//! blocks.
//!
//! ## Block Layout
//!
//! ```text
//! +-----------------------------------------------------------+
//! | header (28 bytes)                                         |
//! |   keys_in_block u16 | chars_in_use u16 | index_type u8    |
//! |   prefix_lc u8 | unused u8 | level u8                     |
//! |   next (segment u16, block u64)                           |
//! |   prev (segment u16, block u64)                           |
//! +-----------------------------------------------------------+
//! | keyspace (KEYSPACE_LC bytes)                              |
//! |   offset[0] offset[1] ... offset[n-1]   (u16 each)        |
//! |   ... free ...                                            |
//! |   entry[n-1] ... entry[1] entry[0]                        |
//! |   shared prefix (prefix_lc bytes)                         |
//! +-----------------------------------------------------------+
//! ```
//!
//! Each entry is `key_lc | key suffix | pointer [| embedded record]`. The
//! full key of entry `i` is `prefix ++ suffix(i)`. Offsets are kept in
//! ascending key order, so `offset[i]` locates the i-th smallest key.
//!
//! `chars_in_use` counts the prefix plus all entry bytes; the offset array is
//! accounted separately as `KEY_PTR_LC * keys_in_block`.
//!
//! ## Memory Representation
//!
//! [`IndexBlock`] owns its keyspace as a boxed byte arena. Offsets are held
//! in native byte order in memory; [`super::codec`] converts them to the
//! file's byte order on the way in and out. All access goes through typed
//! accessors that bounds-check against the arena, so a damaged block reports
//! [`ErrorKind::IxStruct`] instead of reading out of range.
//!
//! ## Searching
//!
//! [`IndexBlock::search`] first compares the query against the shared
//! prefix. A query that differs inside the prefix, or is shorter than it,
//! sorts before or after every entry and is resolved without touching
//! individual entries. Otherwise the remaining query bytes are binary
//! searched against the entry suffixes. Byte-lexicographic order applies,
//! so a query that is a strict prefix of a stored key sorts before it.

use std::cmp::Ordering;
use std::fmt;

use eyre::Result;

use super::pointer::{BlockPointer, Level0Pointer};
use crate::config::{KEYSPACE_LC, KEY_PTR_LC, MAX_INDEX};
use crate::encoding::decode_key_lc;
use crate::error::ErrorKind;

/// The three logical indexes sharing one keyed file.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexId {
    /// Caller keys.
    User = 0,
    /// Free record extents ordered by location.
    FreeRec = 1,
    /// Free record extents ordered by length.
    FreeLc = 2,
}

impl IndexId {
    pub const ALL: [IndexId; MAX_INDEX] = [IndexId::User, IndexId::FreeRec, IndexId::FreeLc];

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(IndexId::User),
            1 => Some(IndexId::FreeRec),
            2 => Some(IndexId::FreeLc),
            _ => None,
        }
    }

    pub const fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    NotFound(usize),
}

impl SearchResult {
    /// Position of the first entry >= the query.
    pub fn index(self) -> usize {
        match self {
            SearchResult::Found(ix) | SearchResult::NotFound(ix) => ix,
        }
    }

    pub fn is_found(self) -> bool {
        matches!(self, SearchResult::Found(_))
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct IndexBlock {
    pub(crate) keys_in_block: u16,
    pub(crate) chars_in_use: u16,
    pub(crate) index_type: u8,
    pub(crate) prefix_lc: u8,
    pub(crate) unused: u8,
    pub(crate) level: u8,
    pub(crate) next: BlockPointer,
    pub(crate) prev: BlockPointer,
    pub(crate) keys: Box<[u8]>,
}

impl fmt::Debug for IndexBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBlock")
            .field("keys_in_block", &self.keys_in_block)
            .field("chars_in_use", &self.chars_in_use)
            .field("index_type", &self.index_type)
            .field("prefix_lc", &self.prefix_lc)
            .field("level", &self.level)
            .field("next", &self.next)
            .field("prev", &self.prev)
            .finish_non_exhaustive()
    }
}

impl Default for IndexBlock {
    fn default() -> Self {
        Self::new(IndexId::User, 0)
    }
}

impl IndexBlock {
    pub fn new(index: IndexId, level: u8) -> Self {
        Self {
            keys_in_block: 0,
            chars_in_use: 0,
            index_type: index as u8,
            prefix_lc: 0,
            unused: 0,
            level,
            next: BlockPointer::NULL,
            prev: BlockPointer::NULL,
            keys: vec![0u8; KEYSPACE_LC].into_boxed_slice(),
        }
    }

    /// Turns the block into an empty block of the given index and level.
    pub fn reset(&mut self, index: IndexId, level: u8) {
        self.keys_in_block = 0;
        self.chars_in_use = 0;
        self.index_type = index as u8;
        self.prefix_lc = 0;
        self.unused = 0;
        self.level = level;
        self.next = BlockPointer::NULL;
        self.prev = BlockPointer::NULL;
        self.keys.fill(0);
    }

    pub fn keys_in_block(&self) -> usize {
        self.keys_in_block as usize
    }

    pub fn is_empty(&self) -> bool {
        self.keys_in_block == 0
    }

    pub fn chars_in_use(&self) -> usize {
        self.chars_in_use as usize
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn is_leaf(&self) -> bool {
        self.level == 0
    }

    pub fn index_type(&self) -> u8 {
        self.index_type
    }

    pub fn index_id(&self) -> Option<IndexId> {
        IndexId::from_byte(self.index_type)
    }

    pub fn next(&self) -> BlockPointer {
        self.next
    }

    pub fn prev(&self) -> BlockPointer {
        self.prev
    }

    pub fn set_next(&mut self, next: BlockPointer) {
        self.next = next;
    }

    pub fn set_prev(&mut self, prev: BlockPointer) {
        self.prev = prev;
    }

    pub fn prefix_lc(&self) -> usize {
        self.prefix_lc as usize
    }

    /// Bytes still available for new entries and their offset slots.
    pub fn free_space(&self) -> usize {
        KEYSPACE_LC - self.chars_in_use() - KEY_PTR_LC * self.keys_in_block()
    }

    pub fn keyspace(&self) -> &[u8] {
        &self.keys
    }

    pub fn prefix(&self) -> &[u8] {
        &self.keys[KEYSPACE_LC - self.prefix_lc()..]
    }

    pub fn offset(&self, ix: usize) -> usize {
        let at = ix * KEY_PTR_LC;
        u16::from_ne_bytes([self.keys[at], self.keys[at + 1]]) as usize
    }

    pub(crate) fn set_offset(&mut self, ix: usize, offset: usize) {
        let at = ix * KEY_PTR_LC;
        self.keys[at..at + KEY_PTR_LC].copy_from_slice(&(offset as u16).to_ne_bytes());
    }

    fn entry_bytes(&self, ix: usize) -> Result<&[u8]> {
        if ix >= self.keys_in_block() {
            return Err(ErrorKind::IxStruct.with(format!(
                "entry {} out of bounds (keys_in_block={})",
                ix, self.keys_in_block
            )));
        }
        let offset = self.offset(ix);
        let end = KEYSPACE_LC - self.prefix_lc();
        if offset < KEY_PTR_LC * self.keys_in_block() || offset >= end {
            return Err(ErrorKind::IxStruct.with(format!(
                "entry {} offset {} outside entry area",
                ix, offset
            )));
        }
        Ok(&self.keys[offset..end])
    }

    /// Key suffix of entry `ix` and the bytes that follow it.
    fn split_entry(&self, ix: usize) -> Result<(&[u8], &[u8])> {
        let bytes = self.entry_bytes(ix)?;
        let (lc, used) = decode_key_lc(bytes)?;
        let rest = &bytes[used..];
        if rest.len() < lc {
            return Err(ErrorKind::IxStruct.with(format!(
                "key of entry {} overruns the block ({} bytes)",
                ix, lc
            )));
        }
        Ok(rest.split_at(lc))
    }

    pub fn key_suffix(&self, ix: usize) -> Result<&[u8]> {
        Ok(self.split_entry(ix)?.0)
    }

    /// Full key of entry `ix` (shared prefix followed by the suffix).
    pub fn key_at(&self, ix: usize) -> Result<Vec<u8>> {
        let suffix = self.key_suffix(ix)?;
        let mut key = Vec::with_capacity(self.prefix_lc() + suffix.len());
        key.extend_from_slice(self.prefix());
        key.extend_from_slice(suffix);
        Ok(key)
    }

    /// Child pointer of entry `ix` in an interior block.
    pub fn child_at(&self, ix: usize) -> Result<BlockPointer> {
        let (_, pointer) = self.split_entry(ix)?;
        Ok(BlockPointer::decode(pointer)?.0)
    }

    /// Record pointer of entry `ix` in a leaf, with the embedded record
    /// bytes (empty for out-of-line records).
    pub fn record_at(&self, ix: usize, data_in_index_lc: u32) -> Result<(Level0Pointer, &[u8])> {
        let (_, pointer) = self.split_entry(ix)?;
        let (ptr, used) = Level0Pointer::decode(pointer, data_in_index_lc)?;
        let data = if ptr.is_embedded() {
            &pointer[used..used + ptr.lc as usize]
        } else {
            &[][..]
        };
        Ok((ptr, data))
    }

    /// Finds the first entry whose full key is >= `key`.
    pub fn search(&self, key: &[u8]) -> Result<SearchResult> {
        let n = self.keys_in_block();
        if n == 0 {
            return Ok(SearchResult::NotFound(0));
        }

        let prefix = self.prefix();
        let common = key.len().min(prefix.len());
        match key[..common].cmp(&prefix[..common]) {
            Ordering::Less => return Ok(SearchResult::NotFound(0)),
            Ordering::Greater => return Ok(SearchResult::NotFound(n)),
            Ordering::Equal if key.len() < prefix.len() => return Ok(SearchResult::NotFound(0)),
            Ordering::Equal => {}
        }

        let query = &key[prefix.len()..];
        let (mut lo, mut hi) = (0, n);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match self.key_suffix(mid)?.cmp(query) {
                Ordering::Less => lo = mid + 1,
                Ordering::Equal => return Ok(SearchResult::Found(mid)),
                Ordering::Greater => hi = mid,
            }
        }
        Ok(SearchResult::NotFound(lo))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::entry::{Entry, EntryValue};

    fn leaf_with(keys: &[&[u8]]) -> IndexBlock {
        let entries: Vec<Entry> = keys
            .iter()
            .map(|k| Entry::new(k.to_vec(), EntryValue::Embedded(k.to_vec())))
            .collect();
        let mut block = IndexBlock::new(IndexId::User, 0);
        block.pack(&entries).unwrap();
        block
    }

    #[test]
    fn empty_block_search_returns_zero() {
        let block = IndexBlock::new(IndexId::User, 0);
        assert_eq!(block.search(b"anything").unwrap(), SearchResult::NotFound(0));
        assert_eq!(block.free_space(), KEYSPACE_LC);
    }

    #[test]
    fn search_finds_every_stored_key() {
        let block = leaf_with(&[b"apple", b"apricot", b"banana", b"cherry"]);

        assert_eq!(block.search(b"apple").unwrap(), SearchResult::Found(0));
        assert_eq!(block.search(b"apricot").unwrap(), SearchResult::Found(1));
        assert_eq!(block.search(b"banana").unwrap(), SearchResult::Found(2));
        assert_eq!(block.search(b"cherry").unwrap(), SearchResult::Found(3));
    }

    #[test]
    fn search_returns_insertion_point_when_missing() {
        let block = leaf_with(&[b"b", b"d", b"f"]);

        assert_eq!(block.search(b"a").unwrap(), SearchResult::NotFound(0));
        assert_eq!(block.search(b"c").unwrap(), SearchResult::NotFound(1));
        assert_eq!(block.search(b"e").unwrap(), SearchResult::NotFound(2));
        assert_eq!(block.search(b"g").unwrap(), SearchResult::NotFound(3));
    }

    #[test]
    fn strict_prefix_query_sorts_before_longer_key() {
        let block = leaf_with(&[b"abc", b"abcd"]);

        assert_eq!(block.search(b"ab").unwrap(), SearchResult::NotFound(0));
        assert_eq!(block.search(b"abc").unwrap(), SearchResult::Found(0));
        assert_eq!(block.search(b"abcc").unwrap(), SearchResult::NotFound(1));
    }

    #[test]
    fn mismatch_inside_shared_prefix_resolves_without_entries() {
        let block = leaf_with(&[b"doc-001", b"doc-002", b"doc-003"]);
        assert_eq!(block.prefix(), b"doc-00");

        assert_eq!(block.search(b"doa").unwrap(), SearchResult::NotFound(0));
        assert_eq!(block.search(b"dod").unwrap(), SearchResult::NotFound(3));
        assert_eq!(block.search(b"doc").unwrap(), SearchResult::NotFound(0));
    }

    #[test]
    fn keys_reconstruct_from_prefix_and_suffix() {
        let keys: [&[u8]; 3] = [b"term:alpha", b"term:beta", b"term:gamma"];
        let block = leaf_with(&keys);

        for (ix, key) in keys.iter().enumerate() {
            let suffix = block.key_suffix(ix).unwrap();
            assert_eq!([block.prefix(), suffix].concat(), key.to_vec());
            assert_eq!(block.key_at(ix).unwrap(), key.to_vec());
        }
    }

    #[test]
    fn embedded_records_are_returned_in_place() {
        let block = leaf_with(&[b"k1", b"k2"]);
        let (ptr, data) = block.record_at(1, 16).unwrap();

        assert!(ptr.is_embedded());
        assert_eq!(data, b"k2");
    }

    #[test]
    fn out_of_range_entry_is_structural_error() {
        let block = leaf_with(&[b"only"]);
        let err = block.key_at(1).unwrap_err();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::IxStruct));
    }

    #[test]
    fn reset_clears_entries_and_links() {
        let mut block = leaf_with(&[b"x", b"y"]);
        block.set_next(BlockPointer::new(0, 9));
        block.reset(IndexId::FreeLc, 2);

        assert!(block.is_empty());
        assert_eq!(block.level(), 2);
        assert_eq!(block.index_id(), Some(IndexId::FreeLc));
        assert!(block.next().is_null());
        assert_eq!(block.chars_in_use(), 0);
    }
}
