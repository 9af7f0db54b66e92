//! Bit-level and indexing primitives shared by the column kernel.
//!
//! This crate owns no column or table concepts. It provides the two
//! representations the `frame` crate's sparse and packed-categorical column
//! variants are built on:
//!
//! - [`packed_int`]: sub-byte integer storage (`PackedIntegers`) for
//!   categorical columns whose dictionary is small.
//! - [`sparse_bitmap`]: a compact default-value membership map
//!   (`SparseBitmap`) with O(1) amortized rank queries.

pub mod error;
pub mod packed_int;
pub mod sparse_bitmap;

pub use error::{Error, Result};
pub use packed_int::{Format, PackedIntegers};
pub use sparse_bitmap::{SparseBitmap, DEFAULT_INDEX, OUT_OF_BOUNDS_INDEX};
