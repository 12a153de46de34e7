//! # Keyfile Configuration Module
//!
//! Compile-time layout constants live in [`constants`]; they define the
//! on-disk format and must not change for an existing file. Runtime choices
//! (cache size, read-only mode, inline threshold, segment length, error log
//! location) are made through [`crate::KeyfileBuilder`].
//!
//! ## Module Organization
//!
//! - [`constants`]: block, fib, segment and buffer-pool constants with their
//!   dependency checks

pub mod constants;
pub use constants::*;
