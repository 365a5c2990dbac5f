// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Composes the header block, drives the per-column writers, and seals the
//! file with a trailer, an fsync, and an atomic rename.
//!
//! Blocks are self-describing (checksum, magic) but a block's own size gives
//! no way to find the *next* block's logical role from an arbitrary offset.
//! The trailer's location is instead recorded in a small fixed-width footer
//! at the true end of the file, the way a reader expects to find it without
//! scanning: seek to the last [`FOOTER_LEN`] bytes, check the magic, and
//! jump straight to the trailer block.

use crate::block::{self, BlockKind};
use crate::column_writer::{ColumnSummary, Root};
use crate::coding::write_u40;
use crate::format_version::FormatVersion;
use crate::io::{fsync_directory, BlockIo, StdFileIo};
use crate::time::unix_timestamp;
use crate::{Error, Result};
use byteorder::{LittleEndian, WriteBytesExt};
use std::path::{Path, PathBuf};
use varint_rs::VarintWriter;

/// Marks the end-of-file footer, written as the literal last bytes of a
/// finished layer file so a reader can find the trailer without scanning.
pub(crate) const FOOTER_MAGIC: u32 = u32::from_le_bytes(*b"LFEF");

/// `trailerOffset:u40, trailerShift:u8, magic:u32`.
pub(crate) const FOOTER_LEN: usize = 5 + 1 + 4;

/// Sentinel `shift` value meaning "this root is absent" in the trailer.
pub(crate) const ABSENT_SHIFT: u8 = 0xFF;

fn encode_required_root(out: &mut Vec<u8>, root: Root) -> Result<()> {
    write_u40(out, root.offset).map_err(Error::Io)?;
    out.push(root.shift);
    Ok(())
}

fn encode_optional_root(out: &mut Vec<u8>, root: Option<Root>) -> Result<()> {
    match root {
        Some(root) => encode_required_root(out, root),
        None => {
            write_u40(out, 0).map_err(Error::Io)?;
            out.push(ABSENT_SHIFT);
            Ok(())
        }
    }
}

/// Writes a layer file, one column at a time, driven by the caller.
///
/// The caller builds one [`crate::column_writer::ColumnWriter`] per column
/// against [`FileWriter::io`], pushes every value into it, and hands the
/// resulting [`ColumnSummary`] to [`FileWriter::finish`] in column order.
pub struct FileWriter {
    io: StdFileIo,
    tmp_path: PathBuf,
    final_path: PathBuf,
    column_count: u8,
}

impl FileWriter {
    /// Creates the file at a temporary path next to `path` and writes its
    /// header block. The file is only visible at `path` after [`Self::finish`]
    /// succeeds.
    pub fn create(path: &Path, column_count: u8, debug_name: Option<&str>) -> Result<Self> {
        assert!(
            (1..=3).contains(&column_count),
            "a layer file holds 1 to 3 columns, got {column_count}"
        );

        let tmp_path = path.with_extension("layerfile-tmp");
        let io = StdFileIo::create_new(&tmp_path).map_err(Error::Io)?;

        let mut payload = Vec::new();
        payload.push(u8::from(FormatVersion::V1));
        payload.push(column_count);
        payload
            .write_u64::<LittleEndian>(unix_timestamp().as_nanos() as u64)
            .map_err(Error::Io)?;

        let name = debug_name.unwrap_or("");
        payload.write_usize_varint(name.len()).map_err(Error::Io)?;
        payload.extend_from_slice(name.as_bytes());

        block::write_block(&io, BlockKind::Header, &payload)?;

        Ok(Self {
            io,
            tmp_path,
            final_path: path.to_path_buf(),
            column_count,
        })
    }

    /// The I/O collaborator column writers should append blocks to.
    #[must_use]
    pub fn io(&self) -> &dyn BlockIo {
        &self.io
    }

    /// Writes the trailer, fsyncs, and atomically renames the file into
    /// place. `summaries` must hold exactly one entry per column, in order.
    pub fn finish(self, summaries: &[ColumnSummary]) -> Result<()> {
        assert_eq!(
            summaries.len(),
            self.column_count as usize,
            "finish() called with the wrong number of column summaries"
        );

        let mut payload = Vec::new();
        for summary in summaries {
            payload
                .write_u64::<LittleEndian>(summary.rows)
                .map_err(Error::Io)?;
            encode_required_root(&mut payload, summary.value_index_root)?;
            encode_required_root(&mut payload, summary.row_index_root)?;
            encode_optional_root(&mut payload, summary.filter_index_root)?;
        }

        let trailer_offset = block::write_block(&self.io, BlockKind::Trailer, &payload)?;
        let trailer_shift = crate::block::Header::shift_for_payload(payload.len())?;

        let mut footer = Vec::with_capacity(FOOTER_LEN);
        write_u40(&mut footer, trailer_offset.0).map_err(Error::Io)?;
        footer.push(trailer_shift);
        footer
            .write_u32::<LittleEndian>(FOOTER_MAGIC)
            .map_err(Error::Io)?;

        self.io.append(&footer).map_err(Error::WriteFailed)?;
        self.io.fsync().map_err(Error::WriteFailed)?;

        drop(self.io);
        std::fs::rename(&self.tmp_path, &self.final_path).map_err(Error::WriteFailed)?;

        if let Some(parent) = self.final_path.parent() {
            fsync_directory(parent).map_err(Error::WriteFailed)?;
        }

        log::debug!(
            "sealed layer file {:?}: {} columns, {} rows",
            self.final_path,
            summaries.len(),
            summaries.iter().map(|s| s.rows).sum::<u64>(),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_writer::ColumnWriter;
    use crate::schema::FixedU64Codec;
    use test_log::test;

    #[test]
    fn writes_header_column_and_trailer() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let path = dir.path().join("single.layer");

        let writer = FileWriter::create(&path, 1, Some("test file"))?;
        let mut column = ColumnWriter::<FixedU64Codec>::new(writer.io(), false, None);
        for i in 0..500u64 {
            column.push(&i, None)?;
        }
        let summary = column.finish()?;
        writer.finish(&[summary])?;

        assert!(path.exists());
        assert!(!dir.path().join("single.layerfile-tmp").exists());

        Ok(())
    }
}
