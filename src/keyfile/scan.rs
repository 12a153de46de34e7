//! # Sequential Cursors
//!
//! Each index has its own cursor. A cursor sits between two entries:
//! `next_entry` returns the entry after it and moves past it,
//! `prev_entry` returns the entry before it and moves back over it.
//!
//! ```text
//!   BOF | e0 | e1 | e2 | ... | en | EOF
//!        ^ set_bof                 ^ set_eof
//! ```
//!
//! Running off either end returns `Ok(None)` and leaves `AtEof` or `AtBof`
//! in [`Keyfile::error_code`]. Any `put` resets the user cursor to BOF.

use eyre::Result;

use super::Keyfile;
use crate::error::ErrorKind;
use crate::record;
use crate::storage::IndexId;

/// A key and its record.
pub type KeyRecord = (Vec<u8>, Vec<u8>);

impl Keyfile {
    pub fn set_bof(&mut self, index: IndexId) -> Result<()> {
        self.run(|kf| {
            kf.cursors[index.slot()].position = None;
            Ok(())
        })
    }

    pub fn set_eof(&mut self, index: IndexId) -> Result<()> {
        self.run(|kf| {
            let pos = kf.tree(index).last_position()?;
            kf.cursors[index.slot()].position = Some(pos);
            Ok(())
        })
    }

    pub fn next_entry(&mut self, index: IndexId) -> Result<Option<KeyRecord>> {
        self.run(|kf| kf.step(index, true))
    }

    pub fn prev_entry(&mut self, index: IndexId) -> Result<Option<KeyRecord>> {
        self.run(|kf| kf.step(index, false))
    }

    fn step(&mut self, index: IndexId, forward: bool) -> Result<Option<KeyRecord>> {
        let slot = index.slot();
        let stored = self.cursors[slot].position;
        let mut tree = self.tree(index);
        let mut pos = stored.unwrap_or_else(|| tree.first_position());
        let entry = if forward {
            tree.next_entry(&mut pos)?
        } else {
            tree.prev_entry(&mut pos)?
        };
        self.cursors[slot].position = Some(pos);

        match entry {
            Some(entry) => {
                let data = record::read_to_vec(&mut self.files, &entry.value)?;
                Ok(Some((entry.key, data)))
            }
            None => {
                self.note(if forward {
                    ErrorKind::AtEof
                } else {
                    ErrorKind::AtBof
                });
                Ok(None)
            }
        }
    }

    /// Length of the current run of sequential lookups in `index`.
    pub fn seq_cnt(&self, index: IndexId) -> u64 {
        self.cursors[index.slot()].seq_cnt
    }

    /// Iterates over all user entries in key order, starting at BOF.
    pub fn entries(&mut self) -> Entries<'_> {
        Entries {
            kf: self,
            started: false,
            done: false,
        }
    }
}

/// Iterator over the user index. Yields at most one error.
pub struct Entries<'a> {
    kf: &'a mut Keyfile,
    started: bool,
    done: bool,
}

impl Iterator for Entries<'_> {
    type Item = Result<KeyRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            if let Err(report) = self.kf.set_bof(IndexId::User) {
                self.done = true;
                return Some(Err(report));
            }
        }
        match self.kf.next_entry(IndexId::User) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(report) => {
                self.done = true;
                Some(Err(report))
            }
        }
    }
}
