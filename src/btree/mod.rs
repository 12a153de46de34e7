//! # Multi-Level Index
//!
//! The keyed file stores its user keys and both free-space indexes as
//! prefix-compressed B-trees over fixed 4 KiB index blocks. This module
//! holds the tree algorithms; the block layout itself lives in
//! [`crate::storage::page`] and the packing rules in
//! [`crate::storage::entry`].
//!
//! ## Levels
//!
//! Level 0 holds leaves. Leaf entries map a key to a level-0 pointer,
//! optionally followed by the record itself when it is short enough to be
//! embedded. Interior entries at level `n > 0` map a separator key to a
//! child block at level `n - 1`:
//!
//! ```text
//! leaf entry:      [key_lc][key suffix][lc (varint)][record | segment sc]
//! interior entry:  [key_lc][key suffix][segment][block (varint)]
//! ```
//!
//! ## Paths
//!
//! Descents record the block pointer visited at every level in a
//! [`PathStack`]. Splits walk that stack back up to add separators, so no
//! block carries a parent pointer.
//!
//! ## Cursors
//!
//! A [`Position`] names a leaf and a slot within it. Stepping forward or
//! backward follows the leaf sibling links and skips empty leaves.

mod tree;

pub use tree::{IndexTree, Lookup, PathStack, Position};
