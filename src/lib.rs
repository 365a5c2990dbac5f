// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! A self-describing, checksummed, immutable on-disk container for one to
//! three ordered, hierarchically related columns.
//!
//! ##### About
//!
//! A layer file holds the output of one batch of a streaming
//! incremental-computation engine: a sorted column of values, optionally
//! paired with a second (and third) column holding the rows each value's
//! "row group" spans in the next column down. Everything needed to read it
//! back — block layout, checksums, tree roots — lives in the file itself;
//! nothing is inferred from a side channel.
//!
//! A file is written once, end to end, by a single [`file_writer::FileWriter`]
//! driving one [`column_writer::ColumnWriter`] per column, and is only ever
//! read afterwards through a [`file_reader::FileReader`] and the
//! [`cursor::Cursor`]s it hands out. There is no in-place update path; a
//! changed dataset is written as a new file.
//!
//! # Example usage
//!
//! ```
//! use layer_file::column_writer::ColumnWriter;
//! use layer_file::file_reader::FileReader;
//! use layer_file::file_writer::FileWriter;
//! use layer_file::schema::FixedU64Codec;
//! #
//! # let dir = tempfile::tempdir()?;
//! # let path = dir.path().join("batch.layer");
//!
//! let writer = FileWriter::create(&path, 1, Some("example batch"))?;
//! let mut column = ColumnWriter::<FixedU64Codec>::new(writer.io(), false, None);
//! for value in 0..1_000u64 {
//!     column.push(&value, None)?;
//! }
//! let summary = column.finish()?;
//! writer.finish(&[summary])?;
//!
//! let reader = FileReader::open(&path)?;
//! assert_eq!(reader.column(0).unwrap().rows, 1_000);
//! #
//! # Ok::<(), layer_file::Error>(())
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]

/// The block layer: checksummed, self-describing fixed-size units every
/// higher layer is built from.
pub mod block;

pub mod buffer_pool;
mod checksum;
mod coding;
pub mod column_writer;
pub mod config;
pub mod cursor;
pub mod data_block;
mod error;

/// Approximate-membership filter blocks.
pub mod filter;

/// The filter index: a small tree over a column's filter blocks.
pub mod filter_index;

pub mod file_reader;
pub mod file_writer;
mod format_version;
mod hash;

/// Index blocks: interior nodes of a column's value-index and row-index
/// trees.
pub mod index_block;

pub mod io;
pub mod schema;
mod slice;
mod time;

pub use {
    block::kind::BlockKind,
    checksum::Checksum,
    error::{Error, Result},
    format_version::FormatVersion,
    slice::Slice,
};
