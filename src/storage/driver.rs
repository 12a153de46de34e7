//! # Block Device Abstraction
//!
//! The buffer pool moves index blocks between memory and whatever stores
//! them through the [`BlockDevice`] trait. The keyed file uses
//! [`SegmentFiles`](super::file_manager::SegmentFiles), which maps a
//! `(segment, block)` pointer onto a segment file and a byte offset; tests
//! substitute an in-memory device to observe exactly which blocks are read
//! and written.
//!
//! ## Copy-Based Interface
//!
//! ```text
//! fn read_block(&mut self, at: BlockPointer, block: &mut IndexBlock) -> Result<()>;
//! fn write_block(&mut self, at: BlockPointer, block: &IndexBlock) -> Result<()>;
//! ```
//!
//! Blocks are decoded into the caller's buffer, so a page fault reuses the
//! victim buffer's allocation.
//!
//! ## Instrumentation
//!
//! [`IoStats`] counts every physical operation. The counters are how tests
//! observe that embedded records are served without any record read, and
//! that a broken file performs no further I/O.

use eyre::Result;

use super::page::IndexBlock;
use super::pointer::BlockPointer;

pub trait BlockDevice {
    fn read_block(&mut self, at: BlockPointer, block: &mut IndexBlock) -> Result<()>;

    fn write_block(&mut self, at: BlockPointer, block: &IndexBlock) -> Result<()>;

    /// Makes sure segments `0..segment_cnt` exist, so blocks may later be
    /// written to any of them in any order.
    fn reserve_segments(&mut self, _segment_cnt: u32) -> Result<()> {
        Ok(())
    }
}

/// Physical I/O performed by one control block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoStats {
    pub block_reads: u64,
    pub block_writes: u64,
    pub record_reads: u64,
    pub record_writes: u64,
    pub segment_opens: u64,
}

impl IoStats {
    /// Total number of physical operations of any kind.
    pub fn total(&self) -> u64 {
        self.block_reads
            + self.block_writes
            + self.record_reads
            + self.record_writes
            + self.segment_opens
    }
}

/// In-memory device recording every block transfer.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct MemDevice {
    pub blocks: hashbrown::HashMap<BlockPointer, IndexBlock>,
    pub reads: Vec<BlockPointer>,
    pub writes: Vec<BlockPointer>,
}

#[cfg(test)]
impl BlockDevice for MemDevice {
    fn read_block(&mut self, at: BlockPointer, block: &mut IndexBlock) -> Result<()> {
        self.reads.push(at);
        *block = self.blocks.get(&at).cloned().unwrap_or_default();
        Ok(())
    }

    fn write_block(&mut self, at: BlockPointer, block: &IndexBlock) -> Result<()> {
        self.writes.push(at);
        self.blocks.insert(at, block.clone());
        Ok(())
    }
}
