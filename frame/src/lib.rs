//! # An in-memory, column-oriented table engine
//!
//! A labeled, two-dimensional data container whose columns are strongly
//! typed, immutable, and safely shareable across tables and threads.
//!
//! ## Data structures
//!
//! [`column`] defines the polymorphic, immutable [`Column`](column::Column)
//! abstraction (dense / sparse / mapped / remapped representations) and
//! [`dictionary`] defines the index-to-value mapping categorical columns
//! carry. [`buffer`] provides the mutable builders that produce columns
//! exactly once. [`table`] assembles columns into a labeled, immutable
//! [`Table`](table::Table).
//!
//! ## Data access
//!
//! [`reader`] and [`writer`] provide cursor-based column-wise and row-wise
//! access. [`mapping`] and [`sort`] derive new row orders without copying
//! column payloads unless asked to. [`exec`] hosts the work-stealing
//! execution context and the parallel column transformer used to build a
//! new column from one or more existing ones.
//!
//! ## Data exchange
//!
//! [`wire`] implements the byte-buffer exchange contract columns use to
//! move data in and out of externally managed buffers.

pub mod buffer;
pub mod column;
pub mod dictionary;
pub mod exec;
pub mod mapping;
pub mod reader;
pub mod sort;
pub mod table;
pub mod wire;
pub mod writer;

mod error;

pub use error::{Error, Result};
