//! # Index Trees
//!
//! One keyed file holds three independently rooted trees (user keys, free
//! records by location, free records by length). They share this single
//! implementation; an [`IndexTree`] is a short-lived view binding an
//! [`IndexId`] to the control block's fib, buffer pool and device.
//!
//! ## Shape
//!
//! ```text
//! level 2                 [ m | last_pntr[2] ─────────────┐ ]
//!                           │                             │
//! level 1        [ c | g | m ]  <──prev/next──>  [ t | last_pntr[1] ]
//!                 │   │   │                        │        │
//! level 0       [..c][..g][..m] <─────────────> [..t]    [..zzz]
//! ```
//!
//! An interior entry `(k, child)` covers keys `<= k` not covered by the
//! entry before it. Keys greater than every entry of the rightmost block of
//! a level are covered by `last_pntr[level]`, which is never materialized
//! as an entry. Every level is a doubly linked list whose head is
//! `first_at_level[level]`; the root is `first_at_level[primary_level]`.
//!
//! ## Search
//!
//! [`IndexTree::search_index`] starts at the root and, at each level, takes
//! the first entry `>= key`. Past the last entry it follows `last_pntr` if
//! the block is the rightmost of its level; otherwise the tree is damaged
//! and the fatal [`ErrorKind::MaxKey`] is raised.
//!
//! ## Insertion and Splits
//!
//! A modified block is repacked from its decoded entries. When the entries
//! no longer fit, the lower part moves to a newly allocated block linked in
//! front of the original:
//!
//! ```text
//! before:   prev <──> B[a..z]
//! after:    prev <──> N[a..m] <──> B[n..z]      parent += (m, N)
//! ```
//!
//! The original block keeps its parent entry (or its `last_pntr` slot), so
//! only one separator is added upward. Splitting the root grows the tree by
//! one level: the new root holds `(max key of N, N)` and its `last_pntr` is
//! the old root.
//!
//! ## Deletion
//!
//! Deletion removes the entry from its leaf without rebalancing. Leaves may
//! become empty; cursors step over them.

use eyre::Result;
use smallvec::SmallVec;
use tracing::debug;

use crate::config::MAX_LEVEL;
use crate::error::ErrorKind;
use crate::storage::entry::{choose_split, fits, Entry, EntryValue};
use crate::storage::space::allocate_block;
use crate::storage::{BlockDevice, BlockPointer, BufferId, BufferPool, FileInfo, IndexId};
use crate::storage::SearchResult;

/// Pointers from the root down to the block where a descent stopped.
pub type PathStack = SmallVec<[BlockPointer; 8]>;

/// A slot between leaf entries: the next entry returned going forward is
/// the one at `ix`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub block: BlockPointer,
    pub ix: usize,
}

/// Outcome of a point lookup in a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub leaf: BlockPointer,
    /// Left sibling of the leaf.
    pub prev: BlockPointer,
    pub result: SearchResult,
    pub value: Option<EntryValue>,
}

pub struct IndexTree<'a, D: BlockDevice> {
    index: IndexId,
    fib: &'a mut FileInfo,
    pool: &'a mut BufferPool,
    dev: &'a mut D,
}

impl<'a, D: BlockDevice> IndexTree<'a, D> {
    pub fn new(
        index: IndexId,
        fib: &'a mut FileInfo,
        pool: &'a mut BufferPool,
        dev: &'a mut D,
    ) -> Self {
        Self {
            index,
            fib,
            pool,
            dev,
        }
    }

    pub fn index(&self) -> IndexId {
        self.index
    }

    pub fn root(&self) -> BlockPointer {
        self.fib.root(self.index.slot())
    }

    pub fn primary_level(&self) -> u8 {
        self.fib.primary_level[self.index.slot()] as u8
    }

    fn data_in_index_lc(&self) -> u32 {
        self.fib.data_in_index_lc
    }

    fn new_block(&mut self) -> Result<BlockPointer> {
        let at = allocate_block(self.fib)?;
        self.dev.reserve_segments(self.fib.segment_cnt)?;
        Ok(at)
    }

    /// Allocates an empty leaf and makes it the root of this index.
    pub fn create_root(&mut self) -> Result<BlockPointer> {
        let ix = self.index.slot();
        let root = self.new_block()?;
        self.pool.get_new_block(root, self.index, 0, &mut *self.dev)?;
        self.fib.first_at_level[0][ix] = root;
        self.fib.primary_level[ix] = 0;
        Ok(root)
    }

    /// Pages in `ptr` and checks it belongs to this index at `level`.
    fn fetch(&mut self, ptr: BlockPointer, level: u8) -> Result<BufferId> {
        if ptr.is_null() {
            return Err(ErrorKind::IxStruct.with(format!(
                "null block pointer at level {} of {:?}",
                level, self.index
            )));
        }
        let id = self.pool.get_index(ptr, &mut *self.dev)?;
        let block = self.pool.block(id);
        if block.index_type() != self.index as u8 || block.level() != level {
            return Err(ErrorKind::IxStruct.with(format!(
                "block {:?} is index {} level {}, expected {:?} level {}",
                ptr,
                block.index_type(),
                block.level(),
                self.index,
                level
            )));
        }
        Ok(id)
    }

    /// Descends from the root towards `key`, stopping at `stop_level`.
    pub fn descend(&mut self, key: &[u8], stop_level: u8) -> Result<PathStack> {
        let ix = self.index.slot();
        let mut level = self.primary_level();
        let mut ptr = self.root();
        let mut path = PathStack::new();

        loop {
            let id = self.fetch(ptr, level)?;
            path.push(ptr);
            if level <= stop_level {
                return Ok(path);
            }

            let block = self.pool.block(id);
            let slot = block.search(key)?.index();
            ptr = if slot < block.keys_in_block() {
                block.child_at(slot)?
            } else if block.next().is_null() {
                self.fib.last_pntr[level as usize][ix]
            } else {
                return Err(ErrorKind::MaxKey.with(format!(
                    "key past last entry of block {:?} at level {} which has a right sibling",
                    ptr, level
                )));
            };
            level -= 1;
        }
    }

    /// Block at `stop_level` whose key range covers `key`.
    pub fn search_index(&mut self, key: &[u8], stop_level: u8) -> Result<BlockPointer> {
        let path = self.descend(key, stop_level)?;
        path.last()
            .copied()
            .ok_or_else(|| ErrorKind::IxStruct.with("empty search path"))
    }

    pub fn lookup(&mut self, key: &[u8]) -> Result<Lookup> {
        let leaf = self.search_index(key, 0)?;
        let id = self.fetch(leaf, 0)?;
        let dil = self.data_in_index_lc();
        let block = self.pool.block(id);
        let result = block.search(key)?;
        let value = match result {
            SearchResult::Found(ix) => Some(block.entry_at(ix, dil)?.value),
            SearchResult::NotFound(_) => None,
        };
        Ok(Lookup {
            leaf,
            prev: block.prev(),
            result,
            value,
        })
    }

    /// Inserts or replaces `key`. Returns the replaced value.
    pub fn insert(&mut self, key: &[u8], value: EntryValue) -> Result<Option<EntryValue>> {
        let path = self.descend(key, 0)?;
        let leaf = path[path.len() - 1];
        let id = self.fetch(leaf, 0)?;
        let mut entries = self.pool.block(id).entries(self.data_in_index_lc())?;

        let old = match entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(ix) => Some(std::mem::replace(&mut entries[ix].value, value)),
            Err(ix) => {
                entries.insert(ix, Entry::new(key.to_vec(), value));
                None
            }
        };
        self.store_entries(&path, entries)?;
        Ok(old)
    }

    /// Removes `key` from its leaf. Returns the removed value.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<EntryValue>> {
        let leaf = self.search_index(key, 0)?;
        let id = self.fetch(leaf, 0)?;
        let mut entries = self.pool.block(id).entries(self.data_in_index_lc())?;

        match entries.binary_search_by(|e| e.key.as_slice().cmp(key)) {
            Ok(ix) => {
                let removed = entries.remove(ix);
                self.pool.block_mut(id).pack(&entries)?;
                Ok(Some(removed.value))
            }
            Err(_) => Ok(None),
        }
    }

    /// Writes `entries` into the last block of `path`, splitting upward as
    /// needed.
    fn store_entries(&mut self, path: &[BlockPointer], entries: Vec<Entry>) -> Result<()> {
        let depth = path.len() - 1;
        let ptr = path[depth];
        let id = self.pool.get_index(ptr, &mut *self.dev)?;
        if fits(&entries) {
            return self.pool.block_mut(id).pack(&entries);
        }

        let split = choose_split(&entries).ok_or_else(|| {
            ErrorKind::IxStruct.with(format!(
                "no split point for {} entries in block {:?}",
                entries.len(),
                ptr
            ))
        })?;
        let (lower, upper) = entries.split_at(split);
        let level = self.pool.block(id).level();
        let old_prev = self.pool.block(id).prev();

        self.pool.lock(id);
        let new_ptr = self.split_block(ptr, id, level, old_prev, lower, upper);
        self.pool.unlock(id);
        let new_ptr = new_ptr?;

        if !old_prev.is_null() {
            let pid = self.fetch(old_prev, level)?;
            self.pool.block_mut(pid).set_next(new_ptr);
        }
        let ix = self.index.slot();
        if self.fib.first_at_level[level as usize][ix] == ptr {
            self.fib.first_at_level[level as usize][ix] = new_ptr;
        }
        debug!(index = ?self.index, level, ?ptr, ?new_ptr, lower = lower.len(), upper = upper.len(), "split block");

        let separator = lower[lower.len() - 1].key.clone();
        if depth == 0 {
            return self.grow_root(level, separator, new_ptr, ptr);
        }

        let parent = path[depth - 1];
        let pid = self.fetch(parent, level + 1)?;
        let mut parent_entries = self.pool.block(pid).entries(self.data_in_index_lc())?;
        match parent_entries.binary_search_by(|e| e.key.as_slice().cmp(&separator)) {
            Ok(_) => Err(ErrorKind::MoveKeys.with(format!(
                "separator already present in parent {:?}",
                parent
            ))),
            Err(pos) => {
                parent_entries.insert(pos, Entry::new(separator, EntryValue::Child(new_ptr)));
                self.store_entries(&path[..depth], parent_entries)
            }
        }
    }

    fn split_block(
        &mut self,
        ptr: BlockPointer,
        id: BufferId,
        level: u8,
        old_prev: BlockPointer,
        lower: &[Entry],
        upper: &[Entry],
    ) -> Result<BlockPointer> {
        let new_ptr = self.new_block()?;
        let nid = self
            .pool
            .get_new_block(new_ptr, self.index, level, &mut *self.dev)?;

        let new_block = self.pool.block_mut(nid);
        new_block.pack(lower)?;
        new_block.set_prev(old_prev);
        new_block.set_next(ptr);

        let block = self.pool.block_mut(id);
        block.pack(upper)?;
        block.set_prev(new_ptr);
        Ok(new_ptr)
    }

    fn grow_root(
        &mut self,
        level: u8,
        separator: Vec<u8>,
        left: BlockPointer,
        old_root: BlockPointer,
    ) -> Result<()> {
        let new_level = level as usize + 1;
        if new_level >= MAX_LEVEL {
            return Err(ErrorKind::MaxLevel.with(format!(
                "{:?} index would exceed {} levels",
                self.index, MAX_LEVEL
            )));
        }
        let root = self.new_block()?;
        let rid = self
            .pool
            .get_new_block(root, self.index, new_level as u8, &mut *self.dev)?;
        self.pool
            .block_mut(rid)
            .pack(&[Entry::new(separator, EntryValue::Child(left))])?;

        let ix = self.index.slot();
        self.fib.last_pntr[new_level][ix] = old_root;
        self.fib.first_at_level[new_level][ix] = root;
        self.fib.primary_level[ix] = new_level as u32;
        debug!(index = ?self.index, level = new_level, ?root, "grew new root");
        Ok(())
    }

    /// Before the first entry of the index.
    pub fn first_position(&self) -> Position {
        Position {
            block: self.fib.first_at_level[0][self.index.slot()],
            ix: 0,
        }
    }

    /// After the last entry of the index.
    pub fn last_position(&mut self) -> Result<Position> {
        let leaf = if self.primary_level() == 0 {
            self.root()
        } else {
            self.fib.last_pntr[1][self.index.slot()]
        };
        let id = self.fetch(leaf, 0)?;
        Ok(Position {
            block: leaf,
            ix: self.pool.block(id).keys_in_block(),
        })
    }

    /// Slot before the first entry `>= key`.
    pub fn seek(&mut self, key: &[u8]) -> Result<Position> {
        let leaf = self.search_index(key, 0)?;
        let id = self.fetch(leaf, 0)?;
        Ok(Position {
            block: leaf,
            ix: self.pool.block(id).search(key)?.index(),
        })
    }

    /// Returns the entry after `pos` and advances past it.
    pub fn next_entry(&mut self, pos: &mut Position) -> Result<Option<Entry>> {
        let dil = self.data_in_index_lc();
        loop {
            let id = self.fetch(pos.block, 0)?;
            let block = self.pool.block(id);
            if pos.ix < block.keys_in_block() {
                let entry = block.entry_at(pos.ix, dil)?;
                pos.ix += 1;
                return Ok(Some(entry));
            }
            let next = block.next();
            if next.is_null() {
                return Ok(None);
            }
            *pos = Position { block: next, ix: 0 };
        }
    }

    /// Returns the entry before `pos` and moves back over it.
    pub fn prev_entry(&mut self, pos: &mut Position) -> Result<Option<Entry>> {
        let dil = self.data_in_index_lc();
        loop {
            let id = self.fetch(pos.block, 0)?;
            let block = self.pool.block(id);
            let ix = pos.ix.min(block.keys_in_block());
            if ix > 0 {
                let entry = block.entry_at(ix - 1, dil)?;
                pos.ix = ix - 1;
                return Ok(Some(entry));
            }
            let prev = block.prev();
            if prev.is_null() {
                pos.ix = 0;
                return Ok(None);
            }
            *pos = Position {
                block: prev,
                ix: usize::MAX,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIN_SEGMENT_LC;
    use crate::storage::driver::MemDevice;

    struct Fixture {
        fib: FileInfo,
        pool: BufferPool,
        dev: MemDevice,
    }

    impl Fixture {
        fn new(buffers: usize) -> Self {
            let mut fx = Self {
                fib: FileInfo::new(64 * MIN_SEGMENT_LC, 16),
                pool: BufferPool::with_capacity(buffers, 31),
                dev: MemDevice::default(),
            };
            for index in IndexId::ALL {
                fx.tree(index).create_root().unwrap();
            }
            fx
        }

        fn tree(&mut self, index: IndexId) -> IndexTree<'_, MemDevice> {
            IndexTree::new(index, &mut self.fib, &mut self.pool, &mut self.dev)
        }

        fn user(&mut self) -> IndexTree<'_, MemDevice> {
            self.tree(IndexId::User)
        }
    }

    fn key(i: usize) -> Vec<u8> {
        format!("doc/{:06}", i).into_bytes()
    }

    fn value(i: usize) -> EntryValue {
        EntryValue::Embedded(format!("v{:08}", i).into_bytes())
    }

    /// Checks sort order, prefix reconstruction and sibling links of every
    /// leaf, returning all keys in order.
    fn walk_leaves(fx: &mut Fixture) -> Vec<Vec<u8>> {
        let mut keys = Vec::new();
        let mut ptr = fx.user().first_position().block;
        let mut prev = BlockPointer::NULL;
        while !ptr.is_null() {
            let id = fx.pool.get_index(ptr, &mut fx.dev).unwrap();
            let block = fx.pool.block(id);
            assert_eq!(block.prev(), prev);
            for ix in 0..block.keys_in_block() {
                let full = block.key_at(ix).unwrap();
                assert!(full.starts_with(block.prefix()));
                assert_eq!(&full[block.prefix_lc()..], block.key_suffix(ix).unwrap());
                keys.push(full);
            }
            prev = ptr;
            ptr = block.next();
        }
        keys
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let mut fx = Fixture::new(8);
        let lookup = fx.user().lookup(b"missing").unwrap();

        assert_eq!(lookup.result, SearchResult::NotFound(0));
        assert!(lookup.value.is_none());
    }

    #[test]
    fn insert_then_lookup_single_key() {
        let mut fx = Fixture::new(8);
        assert!(fx.user().insert(b"doc1", value(1)).unwrap().is_none());

        let lookup = fx.user().lookup(b"doc1").unwrap();
        assert!(lookup.result.is_found());
        assert_eq!(lookup.value, Some(value(1)));
        assert!(!fx.user().lookup(b"doc2").unwrap().result.is_found());
    }

    #[test]
    fn replace_returns_previous_value() {
        let mut fx = Fixture::new(8);
        fx.user().insert(b"k", value(1)).unwrap();
        let old = fx.user().insert(b"k", value(2)).unwrap();

        assert_eq!(old, Some(value(1)));
        assert_eq!(fx.user().lookup(b"k").unwrap().value, Some(value(2)));
    }

    #[test]
    fn many_inserts_split_and_stay_searchable() {
        let mut fx = Fixture::new(6);
        let n = 3000;
        for i in 0..n {
            let k = (i * 7919) % n;
            fx.user().insert(&key(k), value(k)).unwrap();
        }

        assert!(fx.user().primary_level() >= 1);
        for i in 0..n {
            let lookup = fx.user().lookup(&key(i)).unwrap();
            assert_eq!(lookup.value, Some(value(i)), "key {}", i);
        }
        assert!(!fx.user().lookup(b"doc/").unwrap().result.is_found());
        assert!(!fx.user().lookup(b"doc/9999999").unwrap().result.is_found());
    }

    #[test]
    fn leaves_stay_sorted_and_prefix_coded_after_splits() {
        let mut fx = Fixture::new(6);
        let n = 2000;
        for i in (0..n).rev() {
            fx.user().insert(&key(i), value(i)).unwrap();
        }

        let keys = walk_leaves(&mut fx);
        let expected: Vec<Vec<u8>> = (0..n).map(key).collect();
        assert_eq!(keys, expected);
    }

    #[test]
    fn not_found_returns_in_bounds_insertion_point() {
        let mut fx = Fixture::new(8);
        for i in (0..500).step_by(2) {
            fx.user().insert(&key(i), value(i)).unwrap();
        }
        for i in (1..500).step_by(2) {
            let lookup = fx.user().lookup(&key(i)).unwrap();
            let id = fx.pool.get_index(lookup.leaf, &mut fx.dev).unwrap();
            let block = fx.pool.block(id);
            let ix = lookup.result.index();

            assert!(!lookup.result.is_found());
            assert!(ix <= block.keys_in_block());
            if ix > 0 {
                assert!(block.key_at(ix - 1).unwrap() < key(i));
            }
            if ix < block.keys_in_block() {
                assert!(block.key_at(ix).unwrap() > key(i));
            }
        }
    }

    #[test]
    fn cursor_walks_forward_and_backward() {
        let mut fx = Fixture::new(8);
        let n = 800;
        for i in 0..n {
            fx.user().insert(&key(i), value(i)).unwrap();
        }

        let mut pos = fx.user().first_position();
        let mut forward = Vec::new();
        while let Some(entry) = fx.user().next_entry(&mut pos).unwrap() {
            forward.push(entry.key);
        }
        assert_eq!(forward.len(), n);

        let mut pos = fx.user().last_position().unwrap();
        let mut backward = Vec::new();
        while let Some(entry) = fx.user().prev_entry(&mut pos).unwrap() {
            backward.push(entry.key);
        }
        backward.reverse();
        assert_eq!(backward, forward);
    }

    #[test]
    fn seek_positions_before_first_greater_or_equal() {
        let mut fx = Fixture::new(8);
        for i in (0..100).step_by(10) {
            fx.user().insert(&key(i), value(i)).unwrap();
        }

        let mut pos = fx.user().seek(&key(15)).unwrap();
        assert_eq!(fx.user().next_entry(&mut pos).unwrap().unwrap().key, key(20));

        let mut pos = fx.user().seek(&key(15)).unwrap();
        assert_eq!(fx.user().prev_entry(&mut pos).unwrap().unwrap().key, key(10));
    }

    #[test]
    fn delete_removes_and_scans_skip_empty_leaves() {
        let mut fx = Fixture::new(8);
        let n = 1500;
        for i in 0..n {
            fx.user().insert(&key(i), value(i)).unwrap();
        }
        for i in 100..1400 {
            assert_eq!(fx.user().delete(&key(i)).unwrap(), Some(value(i)));
        }
        assert_eq!(fx.user().delete(&key(200)).unwrap(), None);

        let mut pos = fx.user().first_position();
        let mut remaining = Vec::new();
        while let Some(entry) = fx.user().next_entry(&mut pos).unwrap() {
            remaining.push(entry.key);
        }
        let expected: Vec<Vec<u8>> = (0..100).chain(1400..n).map(key).collect();
        assert_eq!(remaining, expected);
        assert!(!fx.user().lookup(&key(700)).unwrap().result.is_found());
    }

    #[test]
    fn indexes_are_independent() {
        let mut fx = Fixture::new(8);
        fx.user().insert(b"shared", value(1)).unwrap();
        fx.tree(IndexId::FreeLc)
            .insert(b"shared", EntryValue::Embedded(Vec::new()))
            .unwrap();

        assert_eq!(fx.user().lookup(b"shared").unwrap().value, Some(value(1)));
        assert_eq!(
            fx.tree(IndexId::FreeLc).lookup(b"shared").unwrap().value,
            Some(EntryValue::Embedded(Vec::new()))
        );
        assert!(!fx.tree(IndexId::FreeRec).lookup(b"shared").unwrap().result.is_found());
    }

    #[test]
    fn large_keys_force_deep_trees() {
        let mut fx = Fixture::new(10);
        let n = 600;
        for i in 0..n {
            let mut k = vec![b'x'; 400];
            k.extend_from_slice(format!("{:05}", (i * 37) % n).as_bytes());
            fx.user().insert(&k, value(i)).unwrap();
        }

        assert!(fx.user().primary_level() >= 2);
        let mut pos = fx.user().first_position();
        let mut count = 0;
        while fx.user().next_entry(&mut pos).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, n);
    }

    #[test]
    fn block_of_wrong_index_is_structural_error() {
        let mut fx = Fixture::new(8);
        let free_root = fx.tree(IndexId::FreeRec).root();
        fx.fib.first_at_level[0][IndexId::User.slot()] = free_root;

        let err = fx.user().lookup(b"k").unwrap_err();
        assert_eq!(ErrorKind::of(&err), Some(ErrorKind::IxStruct));
    }
}
