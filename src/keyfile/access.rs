//! # Point Access
//!
//! Reads and writes by key. A lookup descends the user index to a leaf,
//! binary-searches it and hands the leaf value to the record store:
//!
//! ```text
//! get(key) ─> check key ─> search_index ─> leaf search ─> record store
//!                                               │
//!                                     not found: GetNoKey
//! ```
//!
//! ## Writes
//!
//! `put` decides where the record lives before touching the index:
//!
//! | old value      | new record         | action                              |
//! |----------------|--------------------|-------------------------------------|
//! | any            | inline             | free any old extent                 |
//! | none / inline  | out of line        | allocate an extent                  |
//! | extent         | fits old extent    | rewrite in place, free the tail     |
//! | extent         | larger             | free old extent, allocate a new one |
//!
//! ## Sequential Reads
//!
//! Every successful lookup leaves the user cursor after the found entry and
//! maintains a streak counter: a hit in the same leaf at or after the last
//! hit, or in the leaf right after it, extends the streak; anything else
//! resets it.
//!
//! ## Integer Keys
//!
//! The `*_int` variants encode the integer with the six byte key scheme.
//! Only the low 36 bits are kept, so larger values alias smaller ones.

use eyre::Result;
use tracing::debug;

use super::{check_key, Keyfile};
use crate::btree::{Lookup, Position};
use crate::encoding::create_key;
use crate::error::ErrorKind;
use crate::record;
use crate::storage::space::extent_lc;
use crate::storage::{EntryValue, IndexId, Level0Pointer, SearchResult};

impl Keyfile {
    /// Copies the record for `key` into `buf`. Returns its length, or
    /// `None` if the key does not exist. A record longer than `buf` fills
    /// the buffer and fails with the transient `LongRec`.
    pub fn get_into(&mut self, key: &[u8], buf: &mut [u8]) -> Result<Option<usize>> {
        self.run(|kf| match kf.find(key)? {
            Some(value) => record::read_into(&mut kf.files, &value, buf).map(Some),
            None => Ok(None),
        })
    }

    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.run(|kf| match kf.find(key)? {
            Some(value) => record::read_to_vec(&mut kf.files, &value).map(Some),
            None => Ok(None),
        })
    }

    /// Record length for `key` without reading the record.
    pub fn get_size(&mut self, key: &[u8]) -> Result<Option<usize>> {
        self.run(|kf| match kf.find(key)? {
            Some(value) => record::record_lc(&value).map(Some),
            None => Ok(None),
        })
    }

    /// Leaf pointer for `key` without reading the record.
    pub fn get_ptr(&mut self, key: &[u8]) -> Result<Option<Level0Pointer>> {
        self.run(|kf| match kf.find(key)? {
            Some(value) => record::pointer(&value).map(Some),
            None => Ok(None),
        })
    }

    /// Inserts or replaces the record stored under `key`.
    pub fn put(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        self.run(|kf| kf.store(key, data))
    }

    /// Accepted for compatibility; keys are never removed.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.run(|_| {
            check_key(key)?;
            debug!(key_lc = key.len(), "remove ignored");
            Ok(())
        })
    }

    pub fn get_int(&mut self, key: u64) -> Result<Option<Vec<u8>>> {
        self.get(&create_key(key))
    }

    pub fn get_int_into(&mut self, key: u64, buf: &mut [u8]) -> Result<Option<usize>> {
        self.get_into(&create_key(key), buf)
    }

    pub fn get_size_int(&mut self, key: u64) -> Result<Option<usize>> {
        self.get_size(&create_key(key))
    }

    pub fn put_int(&mut self, key: u64, data: &[u8]) -> Result<()> {
        self.put(&create_key(key), data)
    }

    pub fn remove_int(&mut self, key: u64) -> Result<()> {
        self.remove(&create_key(key))
    }

    fn find(&mut self, key: &[u8]) -> Result<Option<EntryValue>> {
        check_key(key)?;
        let lookup = self.tree(IndexId::User).lookup(key)?;
        self.note_sequential(IndexId::User, &lookup);
        match lookup.result {
            SearchResult::Found(_) => Ok(lookup.value),
            SearchResult::NotFound(_) => {
                self.note(ErrorKind::GetNoKey);
                Ok(None)
            }
        }
    }

    fn note_sequential(&mut self, index: IndexId, lookup: &Lookup) {
        let ix = lookup.result.index();
        let cursor = &mut self.cursors[index.slot()];
        let sequential = cursor.position.is_some_and(|last| {
            (last.block == lookup.leaf && ix >= last.ix) || last.block == lookup.prev
        });
        cursor.seq_cnt = if sequential { cursor.seq_cnt + 1 } else { 0 };
        // A hit is consumed, a miss leaves the cursor on the next larger key.
        let next = match lookup.result {
            SearchResult::Found(ix) => ix + 1,
            SearchResult::NotFound(ix) => ix,
        };
        cursor.position = Some(Position {
            block: lookup.leaf,
            ix: next,
        });
    }

    fn store(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        check_key(key)?;
        if self.read_only {
            return Err(ErrorKind::ReadOnly.with(format!("put into read-only {:?}", self.path)));
        }
        let lc = u32::try_from(data.len())
            .ok()
            .filter(|&lc| extent_lc(lc) <= self.fib.max_file_lc)
            .ok_or_else(|| {
                ErrorKind::DataLc.with(format!(
                    "record of {} bytes exceeds segment length {}",
                    data.len(),
                    self.fib.max_file_lc
                ))
            })?;

        let old_extent = match self.tree(IndexId::User).lookup(key)?.value {
            Some(EntryValue::Extent(ptr)) => Some(ptr),
            _ => None,
        };

        let value = if lc <= self.fib.data_in_index_lc {
            if let Some(old) = old_extent {
                self.free_extent(old.segment, old.sc, extent_lc(old.lc))?;
            }
            EntryValue::Embedded(data.to_vec())
        } else {
            let ptr = match old_extent {
                Some(old) if extent_lc(lc) <= extent_lc(old.lc) => {
                    let spare = extent_lc(old.lc) - extent_lc(lc);
                    if spare > 0 {
                        self.free_extent(old.segment, old.sc + extent_lc(lc), spare)?;
                    }
                    Level0Pointer::extent(lc, old.segment, old.sc)
                }
                Some(old) => {
                    self.free_extent(old.segment, old.sc, extent_lc(old.lc))?;
                    self.allocate_extent(lc)?
                }
                None => self.allocate_extent(lc)?,
            };
            record::write_extent(&mut self.files, ptr, data)?;
            EntryValue::Extent(ptr)
        };

        self.tree(IndexId::User).insert(key, value)?;
        self.cursors[IndexId::User.slot()].position = None;
        Ok(())
    }
}
