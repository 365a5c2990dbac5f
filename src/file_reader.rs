// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Opens a layer file, verifies it, and exposes the per-column roots a
//! [`crate::cursor`] descends from.

use crate::block::{self, BlockKind};
use crate::buffer_pool::FileId;
use crate::column_writer::Root;
use crate::file_writer::{ABSENT_SHIFT, FOOTER_LEN, FOOTER_MAGIC};
use crate::format_version::FormatVersion;
use crate::io::{BlockIo, StdFileIo};
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::path::Path;
use varint_rs::VarintReader;

fn decode_root(cursor: &mut &[u8]) -> Result<Option<Root>> {
    let offset = crate::coding::read_u40(cursor).map_err(Error::Io)?;
    let shift = cursor.read_u8().map_err(Error::Io)?;
    if shift == ABSENT_SHIFT {
        Ok(None)
    } else {
        Ok(Some(Root { offset, shift }))
    }
}

/// The roots a cursor needs to descend one column's trees.
#[derive(Copy, Clone, Debug)]
pub struct ColumnRoots {
    pub rows: u64,
    pub value_index_root: Root,
    pub row_index_root: Root,
    pub filter_index_root: Option<Root>,
}

/// A verified, open layer file.
pub struct FileReader {
    io: StdFileIo,
    file_id: FileId,
    format_version: FormatVersion,
    debug_name: String,
    columns: Vec<ColumnRoots>,
}

impl FileReader {
    /// Opens `path`, verifies its header and trailer checksums, and loads
    /// every column's roots into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let io = StdFileIo::open(path).map_err(Error::Io)?;

        let (header_kind, _flags, header_body) = block::read_block(&io, block::BlockOffset(0))?;
        if header_kind != BlockKind::Header {
            return Err(Error::InvariantViolated("first block is not a file header"));
        }

        let mut cursor = &header_body[..];
        let format_version = FormatVersion::try_from(cursor.read_u8().map_err(Error::Io)?)
            .map_err(|()| Error::SchemaMismatch {
                found: FormatVersion::V1,
            })?;
        let column_count = cursor.read_u8().map_err(Error::Io)?;
        let _created_at_nanos = cursor.read_u64::<LittleEndian>().map_err(Error::Io)?;
        let name_len = cursor.read_usize_varint().map_err(Error::Io)?;
        let debug_name = String::from_utf8_lossy(&cursor[..name_len]).into_owned();

        let file_len = io.len().map_err(Error::Io)?;
        if file_len < FOOTER_LEN as u64 {
            return Err(Error::InvariantViolated("file too short to hold a footer"));
        }

        let footer = io
            .read_exact(file_len - FOOTER_LEN as u64, FOOTER_LEN)
            .map_err(Error::Io)?;
        let mut footer_cursor = &footer[..];
        let trailer_offset = crate::coding::read_u40(&mut footer_cursor).map_err(Error::Io)?;
        let trailer_shift = footer_cursor.read_u8().map_err(Error::Io)?;
        let magic = footer_cursor.read_u32::<LittleEndian>().map_err(Error::Io)?;
        if magic != FOOTER_MAGIC {
            return Err(Error::InvariantViolated(
                "footer magic mismatch: not a layer file, or file is truncated",
            ));
        }
        let _ = trailer_shift; // recovered for symmetry; read_block re-derives size from the prefix.

        let (trailer_kind, _flags, trailer_body) =
            block::read_block(&io, block::BlockOffset(trailer_offset))?;
        if trailer_kind != BlockKind::Trailer {
            return Err(Error::InvariantViolated("footer points at a non-trailer block"));
        }

        let mut cursor = &trailer_body[..];
        let mut columns = Vec::with_capacity(column_count as usize);
        for _ in 0..column_count {
            let rows = cursor.read_u64::<LittleEndian>().map_err(Error::Io)?;
            let value_index_root = decode_root(&mut cursor)?
                .ok_or(Error::InvariantViolated("value index root marked absent"))?;
            let row_index_root = decode_root(&mut cursor)?
                .ok_or(Error::InvariantViolated("row index root marked absent"))?;
            let filter_index_root = decode_root(&mut cursor)?;

            columns.push(ColumnRoots {
                rows,
                value_index_root,
                row_index_root,
                filter_index_root,
            });
        }

        Ok(Self {
            io,
            file_id: FileId::new(),
            format_version,
            debug_name,
            columns,
        })
    }

    /// The I/O collaborator a [`crate::cursor::Cursor`] should read blocks
    /// from.
    #[must_use]
    pub fn io(&self) -> &dyn BlockIo {
        &self.io
    }

    /// This open file's identity within a [`crate::buffer_pool::BufferPool`].
    /// Minted fresh per [`Self::open`] call, since a layer file carries no
    /// on-disk identity of its own.
    #[must_use]
    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    #[must_use]
    pub fn format_version(&self) -> FormatVersion {
        self.format_version
    }

    #[must_use]
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column(&self, index: usize) -> Option<ColumnRoots> {
        self.columns.get(index).copied()
    }

    /// A cursor over column `index`, routing block reads through `pool`.
    /// `None` if `index` is out of range.
    #[must_use]
    pub fn cursor<'a, C: crate::schema::ValueCodec>(
        &'a self,
        index: usize,
        pool: &'a crate::buffer_pool::BufferPool,
    ) -> Option<crate::cursor::Cursor<'a, C>> {
        let roots = self.column(index)?;
        Some(crate::cursor::Cursor::for_column(self.io(), roots).with_buffer_pool(pool, self.file_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_writer::ColumnWriter;
    use crate::file_writer::FileWriter;
    use crate::schema::FixedU64Codec;
    use test_log::test;

    #[test]
    fn opens_a_written_file_and_recovers_roots() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let path = dir.path().join("roundtrip.layer");

        let writer = FileWriter::create(&path, 1, Some("roundtrip"))?;
        let mut column = ColumnWriter::<FixedU64Codec>::new(writer.io(), false, Some(10.0));
        for i in 0..5_000u64 {
            column.push(&i, None)?;
        }
        let summary = column.finish()?;
        writer.finish(&[summary])?;

        let reader = FileReader::open(&path)?;
        assert_eq!(reader.format_version(), FormatVersion::V1);
        assert_eq!(reader.debug_name(), "roundtrip");
        assert_eq!(reader.column_count(), 1);

        let roots = reader.column(0).expect("one column");
        assert_eq!(roots.rows, 5_000);
        assert!(roots.filter_index_root.is_some());

        Ok(())
    }

    #[test]
    fn rejects_truncated_file() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let path = dir.path().join("short.layer");

        let writer = FileWriter::create(&path, 1, None)?;
        let mut column = ColumnWriter::<FixedU64Codec>::new(writer.io(), false, None);
        column.push(&1u64, None)?;
        let summary = column.finish()?;
        writer.finish(&[summary])?;

        let bytes = std::fs::read(&path).map_err(Error::Io)?;
        std::fs::write(&path, &bytes[..bytes.len() - 1]).map_err(Error::Io)?;

        assert!(FileReader::open(&path).is_err());

        Ok(())
    }
}
