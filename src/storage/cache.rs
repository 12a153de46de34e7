//! # Buffer Pool
//!
//! Fixed-capacity cache of decoded index blocks, owned by one control block.
//!
//! ## Structure
//!
//! ```text
//! hash_table[(block + segment) % entries] ──> buf ──hash_next──> buf ──> None
//!                                             (chain sorted by segment, block)
//!
//! oldest ──younger──> buf ──younger──> ... ──younger──> youngest
//!        <──older────     <──older────     <──older────
//! ```
//!
//! Buffers live in an arena (`Vec<Buffer>`) and link to each other through
//! [`BufferId`] indices, with `None` ending a list. The arena grows on demand
//! up to the allocated capacity: buffers that were never used are consumed
//! in allocation order before anything is evicted.
//!
//! ## Sizing
//!
//! ```text
//! buffers      = MIN_BUFFER_CNT + (cache_size - MIN_FCB_LC) / BUFFER_LC
//! hash_target  = buffers * BUF_HASH_LOAD_FACTOR
//! hash_blocks  = (hash_target - 1) / HASH_ENTRIES_PER_BUF + 1
//! hash_entries = hash_blocks * HASH_ENTRIES_PER_BUF
//! buffers     -= hash_blocks
//! ```
//!
//! The hash table is charged against the cache budget by giving up whole
//! buffers for it.
//!
//! ## Eviction
//!
//! A miss takes the oldest buffer. Locked buffers (`lock_cnt > 0`) are
//! rotated to the young end and skipped; if every buffer is locked the
//! request fails with [`ErrorKind::AllocBuf`]. A modified victim is written
//! together with its buddies (see below) before being reused.
//!
//! ## Buddy Writes
//!
//! When a dirty victim is flushed, the pool looks for cached, dirty,
//! unlocked blocks at `block - 1, block - 2, ...` and `block + 1, ...` in
//! the same segment, up to `BUDDY_WINDOW` in each direction and stopping at
//! the first gap. They are written in ascending block order around the
//! victim and marked clean, so a sequential bulk load reaches the disk as
//! long ascending runs.

use eyre::Result;
use tracing::debug;

use super::driver::BlockDevice;
use super::page::{IndexBlock, IndexId};
use super::pointer::BlockPointer;
use crate::config::{
    BUDDY_WINDOW, BUFFER_LC, BUF_HASH_LOAD_FACTOR, HASH_ENTRIES_PER_BUF, MIN_BUFFER_CNT,
    MIN_FCB_LC,
};
use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u32);

impl BufferId {
    fn ix(self) -> usize {
        self.0 as usize
    }
}

struct Buffer {
    contents: BlockPointer,
    modified: bool,
    lock_cnt: u32,
    older: Option<BufferId>,
    younger: Option<BufferId>,
    hash_next: Option<BufferId>,
    block: IndexBlock,
}

/// Hit, miss and write-back counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub buddy_writes: u64,
}

pub struct BufferPool {
    buffers: Vec<Buffer>,
    allocated: usize,
    hash_table: Vec<Option<BufferId>>,
    youngest: Option<BufferId>,
    oldest: Option<BufferId>,
    current_age: u64,
    stats: PoolStats,
}

/// Buffer count and hash size for a cache budget of `cache_size` bytes.
pub fn pool_geometry(cache_size: usize) -> Result<(usize, usize)> {
    if cache_size < MIN_FCB_LC {
        return Err(ErrorKind::SmallFcb.with(format!(
            "cache size {} below minimum {}",
            cache_size, MIN_FCB_LC
        )));
    }
    let mut buffers = MIN_BUFFER_CNT + (cache_size - MIN_FCB_LC) / BUFFER_LC;
    let hash_target = buffers * BUF_HASH_LOAD_FACTOR;
    let hash_blocks = (hash_target - 1) / HASH_ENTRIES_PER_BUF + 1;
    let hash_entries = hash_blocks * HASH_ENTRIES_PER_BUF;
    buffers -= hash_blocks;
    Ok((buffers, hash_entries))
}

impl BufferPool {
    pub fn for_cache_size(cache_size: usize) -> Result<Self> {
        let (buffers, hash_entries) = pool_geometry(cache_size)?;
        Ok(Self::with_capacity(buffers, hash_entries))
    }

    pub fn with_capacity(buffers: usize, hash_entries: usize) -> Self {
        assert!(buffers > 0 && hash_entries > 0);
        Self {
            buffers: Vec::with_capacity(buffers),
            allocated: buffers,
            hash_table: vec![None; hash_entries],
            youngest: None,
            oldest: None,
            current_age: 0,
            stats: PoolStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.allocated
    }

    pub fn hash_entries(&self) -> usize {
        self.hash_table.len()
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Number of `get_index` calls so far.
    pub fn current_age(&self) -> u64 {
        self.current_age
    }

    fn buf(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.ix()]
    }

    fn buf_mut(&mut self, id: BufferId) -> &mut Buffer {
        &mut self.buffers[id.ix()]
    }

    pub fn block(&self, id: BufferId) -> &IndexBlock {
        &self.buf(id).block
    }

    /// Mutable access to a cached block; marks it modified.
    pub fn block_mut(&mut self, id: BufferId) -> &mut IndexBlock {
        let buf = self.buf_mut(id);
        buf.modified = true;
        &mut buf.block
    }

    pub fn contents(&self, id: BufferId) -> BlockPointer {
        self.buf(id).contents
    }

    pub fn is_modified(&self, id: BufferId) -> bool {
        self.buf(id).modified
    }

    pub fn lock(&mut self, id: BufferId) {
        self.buf_mut(id).lock_cnt += 1;
    }

    pub fn unlock(&mut self, id: BufferId) {
        let buf = self.buf_mut(id);
        debug_assert!(buf.lock_cnt > 0, "unlock of unlocked buffer");
        buf.lock_cnt = buf.lock_cnt.saturating_sub(1);
    }

    fn hash_slot(&self, ptr: BlockPointer) -> usize {
        ((ptr.block.wrapping_add(ptr.segment as u64)) % self.hash_table.len() as u64) as usize
    }

    /// Cached buffer holding `ptr`, without touching its age.
    pub fn find(&self, ptr: BlockPointer) -> Option<BufferId> {
        let mut next = self.hash_table[self.hash_slot(ptr)];
        while let Some(id) = next {
            let buf = self.buf(id);
            if buf.contents == ptr {
                return Some(id);
            }
            if buf.contents > ptr {
                return None;
            }
            next = buf.hash_next;
        }
        None
    }

    pub fn contains(&self, ptr: BlockPointer) -> bool {
        self.find(ptr).is_some()
    }

    fn hash_insert(&mut self, id: BufferId) {
        let ptr = self.buf(id).contents;
        let slot = self.hash_slot(ptr);

        let mut prev: Option<BufferId> = None;
        let mut next = self.hash_table[slot];
        while let Some(cur) = next {
            if self.buf(cur).contents > ptr {
                break;
            }
            prev = Some(cur);
            next = self.buf(cur).hash_next;
        }
        self.buf_mut(id).hash_next = next;
        match prev {
            Some(p) => self.buf_mut(p).hash_next = Some(id),
            None => self.hash_table[slot] = Some(id),
        }
    }

    fn hash_remove(&mut self, id: BufferId) {
        let slot = self.hash_slot(self.buf(id).contents);
        let after = self.buf(id).hash_next;

        if self.hash_table[slot] == Some(id) {
            self.hash_table[slot] = after;
        } else {
            let mut cur = self.hash_table[slot];
            while let Some(c) = cur {
                if self.buf(c).hash_next == Some(id) {
                    self.buf_mut(c).hash_next = after;
                    break;
                }
                cur = self.buf(c).hash_next;
            }
        }
        self.buf_mut(id).hash_next = None;
    }

    fn unlink(&mut self, id: BufferId) {
        let (older, younger) = (self.buf(id).older, self.buf(id).younger);
        match older {
            Some(o) => self.buf_mut(o).younger = younger,
            None => self.oldest = younger,
        }
        match younger {
            Some(y) => self.buf_mut(y).older = older,
            None => self.youngest = older,
        }
        let buf = self.buf_mut(id);
        buf.older = None;
        buf.younger = None;
    }

    fn link_youngest(&mut self, id: BufferId) {
        let prev_youngest = self.youngest;
        {
            let buf = self.buf_mut(id);
            buf.older = prev_youngest;
            buf.younger = None;
        }
        match prev_youngest {
            Some(y) => self.buf_mut(y).younger = Some(id),
            None => self.oldest = Some(id),
        }
        self.youngest = Some(id);
    }

    fn make_buffer_youngest(&mut self, id: BufferId) {
        if self.youngest != Some(id) {
            self.unlink(id);
            self.link_youngest(id);
        }
    }

    /// Frees a buffer for new contents: an unused one while the arena can
    /// still grow, otherwise the oldest unlocked one (flushed if dirty).
    fn vacate_oldest_buffer(&mut self, dev: &mut impl BlockDevice) -> Result<BufferId> {
        if self.buffers.len() < self.allocated {
            let id = BufferId(self.buffers.len() as u32);
            self.buffers.push(Buffer {
                contents: BlockPointer::NULL,
                modified: false,
                lock_cnt: 0,
                older: None,
                younger: None,
                hash_next: None,
                block: IndexBlock::default(),
            });
            self.link_youngest(id);
            return Ok(id);
        }

        let mut cnt = 0;
        let victim = loop {
            let Some(oldest) = self.oldest else {
                return Err(ErrorKind::AllocBuf.with("buffer pool has no buffers"));
            };
            self.make_buffer_youngest(oldest);
            cnt += 1;
            if self.buf(oldest).lock_cnt == 0 {
                break oldest;
            }
            if cnt > self.allocated {
                return Err(ErrorKind::AllocBuf.with(format!(
                    "all {} buffers are locked",
                    self.allocated
                )));
            }
        };

        if self.buf(victim).modified {
            self.write_block_and_buddies(victim, dev)?;
        }
        self.hash_remove(victim);
        let buf = self.buf_mut(victim);
        debug!(victim = ?buf.contents, "evicted buffer");
        buf.contents = BlockPointer::NULL;
        buf.modified = false;
        self.stats.evictions += 1;
        Ok(victim)
    }

    fn dirty_neighbour(&self, segment: u16, block: u64) -> Option<BufferId> {
        let id = self.find(BlockPointer::new(segment, block))?;
        let buf = self.buf(id);
        (buf.modified && buf.lock_cnt == 0).then_some(id)
    }

    /// Writes `victim` with its contiguous dirty neighbours, ascending.
    /// Returns the number of blocks written.
    pub fn write_block_and_buddies(
        &mut self,
        victim: BufferId,
        dev: &mut impl BlockDevice,
    ) -> Result<usize> {
        let BlockPointer { segment, block } = self.buf(victim).contents;

        let mut before = Vec::new();
        let mut b = block;
        while before.len() < BUDDY_WINDOW as usize && b > 0 {
            b -= 1;
            match self.dirty_neighbour(segment, b) {
                Some(id) => before.push(id),
                None => break,
            }
        }
        let mut after = Vec::new();
        let mut b = block;
        while after.len() < BUDDY_WINDOW as usize {
            b += 1;
            match self.dirty_neighbour(segment, b) {
                Some(id) => after.push(id),
                None => break,
            }
        }

        let order = before
            .iter()
            .rev()
            .copied()
            .chain(std::iter::once(victim))
            .chain(after.iter().copied());
        let mut written = 0;
        for id in order {
            let buf = &self.buffers[id.ix()];
            dev.write_block(buf.contents, &buf.block)?;
            self.buf_mut(id).modified = false;
            written += 1;
        }
        self.stats.buddy_writes += (written - 1) as u64;
        if written > 1 {
            debug!(segment, block, buddies = written - 1, "wrote block with buddies");
        }
        Ok(written)
    }

    /// Returns the buffer holding `ptr`, reading the block on a miss.
    pub fn get_index(&mut self, ptr: BlockPointer, dev: &mut impl BlockDevice) -> Result<BufferId> {
        self.current_age += 1;
        if let Some(id) = self.find(ptr) {
            self.stats.hits += 1;
            self.make_buffer_youngest(id);
            return Ok(id);
        }

        self.stats.misses += 1;
        let id = self.vacate_oldest_buffer(dev)?;
        self.buf_mut(id).contents = ptr;
        self.hash_insert(id);
        let buf = &mut self.buffers[id.ix()];
        if let Err(err) = dev.read_block(ptr, &mut buf.block) {
            self.hash_remove(id);
            self.buf_mut(id).contents = BlockPointer::NULL;
            return Err(err);
        }
        debug!(?ptr, "paged in block");
        Ok(id)
    }

    /// Claims a buffer for a newly allocated block without reading it. The
    /// block starts empty and modified.
    pub fn get_new_block(
        &mut self,
        ptr: BlockPointer,
        index: IndexId,
        level: u8,
        dev: &mut impl BlockDevice,
    ) -> Result<BufferId> {
        self.current_age += 1;
        let id = match self.find(ptr) {
            Some(id) => {
                self.make_buffer_youngest(id);
                id
            }
            None => {
                let id = self.vacate_oldest_buffer(dev)?;
                self.buf_mut(id).contents = ptr;
                self.hash_insert(id);
                id
            }
        };
        self.block_mut(id).reset(index, level);
        Ok(id)
    }

    /// Writes every modified buffer. Returns the number of blocks written.
    pub fn flush_all(&mut self, dev: &mut impl BlockDevice) -> Result<usize> {
        let mut written = 0;
        for ix in 0..self.buffers.len() {
            let id = BufferId(ix as u32);
            if self.buf(id).modified && !self.buf(id).contents.is_null() {
                written += self.write_block_and_buddies(id, dev)?;
            }
        }
        Ok(written)
    }

    /// Number of modified buffers.
    pub fn dirty_count(&self) -> usize {
        self.buffers.iter().filter(|b| b.modified).count()
    }

    /// Cached pointers from oldest to youngest.
    pub fn age_order(&self) -> Vec<BlockPointer> {
        let mut order = Vec::with_capacity(self.buffers.len());
        let mut next = self.oldest;
        while let Some(id) = next {
            order.push(self.buf(id).contents);
            next = self.buf(id).younger;
        }
        order
    }
}
