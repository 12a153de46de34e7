//! # Record Store
//!
//! Leaf entries either carry their record inline or point at an extent in a
//! segment file. This module turns a decoded leaf value into record bytes.
//!
//! ```text
//! lc <= data_in_index_lc    [key][lc][record bytes]        no disk I/O
//! lc >  data_in_index_lc    [key][lc][segment][sc]  ──>  segment file @ sc
//! ```
//!
//! Reads into a caller buffer follow the classic contract: the buffer is
//! filled with as much of the record as fits, and a record longer than the
//! buffer is reported as the transient [`ErrorKind::LongRec`] after the
//! truncated prefix has been copied.

use eyre::Result;

use crate::error::ErrorKind;
use crate::storage::{EntryValue, Level0Pointer, SegmentFiles};

/// Copies the record described by `value` into `buf` and returns its full
/// length.
pub fn read_into(files: &mut SegmentFiles, value: &EntryValue, buf: &mut [u8]) -> Result<usize> {
    let lc = match value {
        EntryValue::Embedded(data) => {
            let n = data.len().min(buf.len());
            buf[..n].copy_from_slice(&data[..n]);
            data.len()
        }
        EntryValue::Extent(ptr) => {
            let lc = ptr.lc as usize;
            let n = lc.min(buf.len());
            files.read_record(ptr.segment, ptr.sc, &mut buf[..n])?;
            lc
        }
        EntryValue::Child(ptr) => {
            return Err(ErrorKind::IxStruct.with(format!(
                "interior pointer {:?} where a record was expected",
                ptr
            )))
        }
    };
    if lc > buf.len() {
        return Err(ErrorKind::LongRec.with(format!(
            "record of {} bytes, buffer holds {}",
            lc,
            buf.len()
        )));
    }
    Ok(lc)
}

/// Reads the whole record described by `value`.
pub fn read_to_vec(files: &mut SegmentFiles, value: &EntryValue) -> Result<Vec<u8>> {
    match value {
        EntryValue::Embedded(data) => Ok(data.clone()),
        _ => {
            let lc = record_lc(value)?;
            let mut buf = vec![0u8; lc];
            read_into(files, value, &mut buf)?;
            Ok(buf)
        }
    }
}

pub fn record_lc(value: &EntryValue) -> Result<usize> {
    pointer(value).map(|ptr| ptr.lc as usize)
}

pub fn pointer(value: &EntryValue) -> Result<Level0Pointer> {
    value.pointer().ok_or_else(|| {
        ErrorKind::IxStruct.with(format!("interior value {:?} where a record was expected", value))
    })
}

/// Writes `data` into the extent at `ptr`.
pub fn write_extent(files: &mut SegmentFiles, ptr: Level0Pointer, data: &[u8]) -> Result<()> {
    debug_assert_eq!(ptr.lc as usize, data.len());
    files.write_record(ptr.segment, ptr.sc, data)
}
