//! # Decoded Entries and Block Packing
//!
//! Modifying an index block works on decoded entries: the block is unpacked
//! into a sorted `Vec<Entry>`, the change is applied, and the entries are
//! packed back with a freshly computed shared prefix. When the entries no
//! longer fit, [`choose_split`] picks the point at which to divide them
//! between two blocks.
//!
//! ## Prefix Choice
//!
//! The shared prefix of a packed block is the longest common prefix of its
//! first and last key, capped at `MAX_PREFIX_LC`. Keys are sorted, so every
//! key in between shares it as well.
//!
//! ## Split Choice
//!
//! Splits balance the packed size of the two halves. Sizes are estimated in
//! O(1) per candidate from running totals, the best estimate is verified by
//! packing arithmetic, and only if that fails are all candidates measured
//! exactly. A fitting split always exists when at most one entry was added to
//! a block that fitted before.

use eyre::Result;

use super::page::IndexBlock;
use super::pointer::{BlockPointer, Level0Pointer};
use crate::config::{KEYSPACE_LC, KEY_PTR_LC, MAX_PREFIX_LC};
use crate::encoding::{compress_u32, compressed_len, encode_key_lc, key_lc_len};
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
    /// Leaf record stored inside the entry.
    Embedded(Vec<u8>),
    /// Leaf record stored in a record extent.
    Extent(Level0Pointer),
    /// Interior entry pointing at a child block.
    Child(BlockPointer),
}

impl EntryValue {
    /// Record pointer of a leaf value; `None` for interior entries.
    pub fn pointer(&self) -> Option<Level0Pointer> {
        match self {
            EntryValue::Embedded(data) => Some(Level0Pointer::embedded(data.len() as u32)),
            EntryValue::Extent(ptr) => Some(*ptr),
            EntryValue::Child(_) => None,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            EntryValue::Embedded(data) => compressed_len(data.len() as u64) + data.len(),
            EntryValue::Extent(ptr) => ptr.encoded_len(),
            EntryValue::Child(ptr) => ptr.encoded_len(),
        }
    }

    fn encode(&self, buf: &mut [u8]) -> usize {
        match self {
            EntryValue::Embedded(data) => {
                let len = compress_u32(data.len() as u32, buf);
                buf[len..len + data.len()].copy_from_slice(data);
                len + data.len()
            }
            EntryValue::Extent(ptr) => ptr.encode(buf),
            EntryValue::Child(ptr) => ptr.encode(buf),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: EntryValue,
}

impl Entry {
    pub fn new(key: Vec<u8>, value: EntryValue) -> Self {
        Self { key, value }
    }

    /// Bytes this entry occupies when `prefix_lc` bytes of its key are shared.
    pub fn packed_lc(&self, prefix_lc: usize) -> usize {
        let suffix = self.key.len() - prefix_lc;
        key_lc_len(suffix) + suffix + self.value.encoded_len()
    }
}

pub fn common_prefix_lc(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn block_prefix_lc(entries: &[Entry]) -> usize {
    match entries {
        [] => 0,
        [only] => only.key.len().min(MAX_PREFIX_LC),
        [first, .., last] => common_prefix_lc(&first.key, &last.key).min(MAX_PREFIX_LC),
    }
}

/// Keyspace bytes needed to pack `entries`, offsets included.
pub fn packed_lc(entries: &[Entry]) -> usize {
    let prefix_lc = block_prefix_lc(entries);
    prefix_lc
        + entries
            .iter()
            .map(|e| e.packed_lc(prefix_lc) + KEY_PTR_LC)
            .sum::<usize>()
}

pub fn fits(entries: &[Entry]) -> bool {
    packed_lc(entries) <= KEYSPACE_LC
}

/// Picks `s` so that `entries[..s]` and `entries[s..]` both fit in a block,
/// balancing their packed sizes. Returns `None` when no such point exists.
pub fn choose_split(entries: &[Entry]) -> Option<usize> {
    let n = entries.len();
    if n < 2 {
        return None;
    }

    // Upper bound of an entry's size: full key, worst-case key_lc form.
    let full: Vec<usize> = entries
        .iter()
        .map(|e| key_lc_len(e.key.len()) + e.key.len() + e.value.encoded_len() + KEY_PTR_LC)
        .collect();
    let mut running = Vec::with_capacity(n + 1);
    running.push(0usize);
    for lc in &full {
        running.push(running.last().copied().unwrap_or(0) + lc);
    }

    let estimate = |lo: usize, hi: usize| -> usize {
        let prefix_lc = block_prefix_lc(&entries[lo..hi]);
        running[hi] - running[lo] - (hi - lo) * prefix_lc + prefix_lc
    };

    let best_by = |measure: &dyn Fn(usize, usize) -> usize| -> Option<usize> {
        (1..n)
            .filter_map(|s| {
                let left = measure(0, s);
                let right = measure(s, n);
                (left <= KEYSPACE_LC && right <= KEYSPACE_LC).then(|| (left.abs_diff(right), s))
            })
            .min()
            .map(|(_, s)| s)
    };

    if let Some(s) = best_by(&estimate) {
        if fits(&entries[..s]) && fits(&entries[s..]) {
            return Some(s);
        }
    }
    best_by(&|lo: usize, hi: usize| packed_lc(&entries[lo..hi]))
}

impl IndexBlock {
    pub fn entry_at(&self, ix: usize, data_in_index_lc: u32) -> Result<Entry> {
        let key = self.key_at(ix)?;
        let value = if self.is_leaf() {
            let (ptr, data) = self.record_at(ix, data_in_index_lc)?;
            if ptr.is_embedded() {
                EntryValue::Embedded(data.to_vec())
            } else {
                EntryValue::Extent(ptr)
            }
        } else {
            EntryValue::Child(self.child_at(ix)?)
        };
        Ok(Entry::new(key, value))
    }

    /// Decodes every entry of the block in key order.
    pub fn entries(&self, data_in_index_lc: u32) -> Result<Vec<Entry>> {
        (0..self.keys_in_block())
            .map(|ix| self.entry_at(ix, data_in_index_lc))
            .collect()
    }

    /// Replaces the block's entries. Header fields other than the counts and
    /// the prefix are left alone.
    pub fn pack(&mut self, entries: &[Entry]) -> Result<()> {
        let needed = packed_lc(entries);
        if needed > KEYSPACE_LC {
            return Err(ErrorKind::IxStruct.with(format!(
                "{} entries need {} bytes, keyspace holds {}",
                entries.len(),
                needed,
                KEYSPACE_LC
            )));
        }

        let prefix_lc = block_prefix_lc(entries);
        let mut cursor = KEYSPACE_LC - prefix_lc;
        if let Some(first) = entries.first() {
            self.keys[cursor..].copy_from_slice(&first.key[..prefix_lc]);
        }

        for (ix, entry) in entries.iter().enumerate() {
            let suffix = &entry.key[prefix_lc..];
            cursor -= entry.packed_lc(prefix_lc);
            self.set_offset(ix, cursor);

            let buf = &mut self.keys[cursor..];
            let mut len = encode_key_lc(suffix.len(), buf);
            buf[len..len + suffix.len()].copy_from_slice(suffix);
            len += suffix.len();
            entry.value.encode(&mut buf[len..]);
        }

        let offsets_end = KEY_PTR_LC * entries.len();
        self.keys[offsets_end..cursor].fill(0);
        self.keys_in_block = entries.len() as u16;
        self.prefix_lc = prefix_lc as u8;
        self.chars_in_use = (KEYSPACE_LC - cursor) as u16;
        Ok(())
    }
}
