//! # Segment Space Allocation
//!
//! New index blocks and record extents are carved from the tail of the
//! newest segment, tracked by `segment_length` in the file-info block.
//! Blocks are aligned to `BLOCK_LC`, extents to `REC_ALLOCATION_UNIT`. An
//! allocation that would pass `max_file_lc` opens the next segment. Callers
//! then reserve the new segment on their device, so a segment file never
//! exists without all of its predecessors.
//!
//! Reuse of freed extents is layered on top of this by the keyed file, which
//! consults its free-space indexes before falling back to [`append_extent`].

use eyre::Result;

use super::headers::FileInfo;
use super::pointer::BlockPointer;
use crate::config::{BLOCK_LC, BLOCK_SHIFT, MAX_SEGMENT, REC_ALLOCATION_UNIT};
use crate::error::ErrorKind;

pub fn round_up(value: u64, unit: u64) -> u64 {
    value.div_ceil(unit) * unit
}

fn start_next_segment(fib: &mut FileInfo) -> Result<usize> {
    let segment = fib.segment_cnt as usize;
    if segment >= MAX_SEGMENT {
        return Err(ErrorKind::NoSpace.with(format!(
            "all {} segments are in use",
            MAX_SEGMENT
        )));
    }
    fib.segment_cnt += 1;
    fib.segment_length[segment] = 0;
    Ok(segment)
}

/// Reserves `lc` bytes aligned to `unit` at the tail of the newest segment.
fn append(fib: &mut FileInfo, lc: u64, unit: u64) -> Result<(u16, u64)> {
    let mut segment = fib.segment_cnt as usize - 1;
    let mut at = round_up(fib.segment_length[segment], unit);
    if at + lc > fib.max_file_lc {
        segment = start_next_segment(fib)?;
        at = 0;
    }
    fib.segment_length[segment] = at + lc;
    Ok((segment as u16, at))
}

pub fn allocate_block(fib: &mut FileInfo) -> Result<BlockPointer> {
    let (segment, at) = append(fib, BLOCK_LC as u64, BLOCK_LC as u64)?;
    Ok(BlockPointer::new(segment, at >> BLOCK_SHIFT))
}

/// Bytes actually reserved for a record of `lc` bytes.
pub fn extent_lc(lc: u32) -> u64 {
    round_up(lc as u64, REC_ALLOCATION_UNIT)
}

/// Reserves an extent for a record of `lc` bytes. Records longer than a
/// segment are rejected with the transient [`ErrorKind::DataLc`].
pub fn append_extent(fib: &mut FileInfo, lc: u32) -> Result<(u16, u64)> {
    let reserved = extent_lc(lc);
    if reserved > fib.max_file_lc {
        return Err(ErrorKind::DataLc.with(format!(
            "record of {} bytes exceeds segment length {}",
            lc, fib.max_file_lc
        )));
    }
    append(fib, reserved, REC_ALLOCATION_UNIT)
}
