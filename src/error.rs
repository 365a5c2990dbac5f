// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::checksum::Checksum;
use crate::format_version::FormatVersion;

/// Errors that can occur while writing or reading a layer file.
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying collaborator.
    Io(std::io::Error),

    /// A block's magic, size-shift, or checksum did not match on read.
    CorruptBlock {
        /// Where the offending block starts.
        offset: u64,
        /// The checksum that was actually computed.
        got: Checksum,
        /// The checksum stored in the block prefix.
        expected: Checksum,
    },

    /// The file header's version disagreed with what this crate can read.
    SchemaMismatch {
        /// Version found in the header.
        found: FormatVersion,
    },

    /// An index entry's bounds disagree with the content of the subtree it
    /// claims to describe.
    InvariantViolated(&'static str),

    /// The block layer reported a permanent I/O failure while building a
    /// file; the file must be discarded.
    WriteFailed(std::io::Error),

    /// The writer received a value that sorts before the previous value in
    /// the same column.
    OutOfOrder,

    /// A row, value, or offset count exceeded the capacity of a packed
    /// field.
    BoundsExceeded(&'static str),

    /// The caller cancelled the operation before it completed.
    Cancelled,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::CorruptBlock {
                offset,
                got,
                expected,
            } => write!(
                f,
                "corrupt block at offset {offset}: checksum {got} != expected {expected}"
            ),
            Self::SchemaMismatch { found } => {
                write!(f, "schema mismatch: file has format version {found}")
            }
            Self::InvariantViolated(msg) => write!(f, "invariant violated: {msg}"),
            Self::WriteFailed(e) => write!(f, "write failed: {e}"),
            Self::OutOfOrder => write!(f, "writer input violated sort order"),
            Self::BoundsExceeded(field) => write!(f, "bounds exceeded: {field}"),
            Self::Cancelled => write!(f, "operation cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) | Self::WriteFailed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Layer file result type.
pub type Result<T> = std::result::Result<T, Error>;
