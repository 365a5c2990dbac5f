// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Streaming tree builder for one column.
//!
//! Holds a stack of open builders: one data-block builder at level 0, one
//! index-block builder per level above it, and (optionally) a parallel
//! filter tree. Each level holds at most one in-progress block, which is
//! what keeps writer memory independent of column size. A push that fills
//! a level's block seals it, writes it, and promotes a summary entry into
//! the level above; this can cascade all the way up the stack.

use crate::block::{self, BlockKind, Header};
use crate::data_block::{self, DataBlockBuilder};
use crate::filter::{self, FilterBuilder};
use crate::filter_index::{self, FilterIndexBuilder};
use crate::index_block::row_index::RowIndexBuilder;
use crate::index_block::value_index::{self, ValueIndexBuilder};
use crate::index_block::{ChildPointer, Push};
use crate::io::BlockIo;
use crate::schema::ValueCodec;
use crate::{Error, Result};

/// Number of values a filter block covers before it's sealed.
pub const FILTER_BLOCK_VALUES: usize = 65_536;

/// Root pointer to a finished tree, as recorded in the file trailer.
#[derive(Copy, Clone, Debug, Default)]
pub struct Root {
    pub offset: u64,
    pub shift: u8,
}

/// Everything the file trailer needs to know about one finished column.
pub struct ColumnSummary {
    pub rows: u64,
    pub value_index_root: Root,
    pub row_index_root: Root,
    pub filter_index_root: Option<Root>,
}

#[derive(Default)]
struct RowLevel {
    builder: RowIndexBuilder,
    first_row: Option<u64>,
}

#[derive(Default)]
struct ValueLevel {
    builder: ValueIndexBuilder,
    first_row: Option<u64>,
    first_value: Option<Vec<u8>>,
    last_value: Option<Vec<u8>>,
}

#[derive(Default)]
struct FilterIndexLevel {
    builder: FilterIndexBuilder,
    first_row: Option<u64>,
    first_value: Option<Vec<u8>>,
    last_value: Option<Vec<u8>>,
}

struct FilterAccumulator {
    bpk: f32,
    hashes: Vec<u64>,
    first_row: Option<u64>,
    first_value: Option<Vec<u8>>,
    last_value: Option<Vec<u8>>,
}

fn block_pointer(
    io: &dyn BlockIo,
    kind: BlockKind,
    flags: u8,
    payload: &[u8],
    first_row: u64,
    is_index: bool,
) -> Result<ChildPointer> {
    let shift = Header::shift_for_payload(payload.len())?;
    let offset = block::write_block_with_flags(io, kind, flags, payload)?;
    Ok(ChildPointer {
        child_offset: offset.0,
        child_shift: shift,
        is_index,
        first_row,
    })
}

fn promote_row(io: &dyn BlockIo, levels: &mut Vec<RowLevel>, level: usize, pointer: ChildPointer) -> Result<()> {
    if levels.len() == level {
        levels.push(RowLevel::default());
    }

    if levels[level].first_row.is_none() {
        levels[level].first_row = Some(pointer.first_row);
    }

    match levels[level].builder.push(pointer)? {
        Push::Pushed => Ok(()),
        Push::Full => {
            let finished = std::mem::take(&mut levels[level]);
            let first_row = finished
                .first_row
                .ok_or(Error::InvariantViolated("row index level committed with no entries"))?;
            let body = finished.builder.finish();
            let child = block_pointer(io, BlockKind::RowIndex, 0, &body, first_row, true)?;
            promote_row(io, levels, level + 1, child)?;

            levels[level].first_row = Some(pointer.first_row);
            match levels[level].builder.push(pointer)? {
                Push::Pushed => Ok(()),
                Push::Full => Err(Error::InvariantViolated("row index entry does not fit an empty block")),
            }
        }
    }
}

fn finish_row_levels(io: &dyn BlockIo, mut levels: Vec<RowLevel>) -> Result<Root> {
    if levels.is_empty() {
        return Err(Error::InvariantViolated("row index has no levels to finish"));
    }

    for level in 0..levels.len() {
        if levels[level].builder.is_empty() {
            continue;
        }

        let finished = std::mem::take(&mut levels[level]);
        let first_row = finished
            .first_row
            .ok_or(Error::InvariantViolated("row index level committed with no entries"))?;
        let body = finished.builder.finish();
        let child = block_pointer(io, BlockKind::RowIndex, 0, &body, first_row, true)?;

        if level + 1 == levels.len() {
            return Ok(Root {
                offset: child.child_offset,
                shift: child.child_shift,
            });
        }
        promote_row(io, &mut levels, level + 1, child)?;
    }

    // Every level above the lowest non-empty one collapsed into its parent;
    // the root is whatever ended up furthest up the stack.
    for level in levels.into_iter().rev() {
        if !level.builder.is_empty() {
            let first_row = level.first_row.expect("non-empty level has a first row");
            let body = level.builder.finish();
            let child = block_pointer(io, BlockKind::RowIndex, 0, &body, first_row, true)?;
            return Ok(Root {
                offset: child.child_offset,
                shift: child.child_shift,
            });
        }
    }

    Err(Error::InvariantViolated("row index produced no root"))
}

fn promote_value(
    io: &dyn BlockIo,
    levels: &mut Vec<ValueLevel>,
    level: usize,
    pointer: ChildPointer,
    first_value: Vec<u8>,
    last_value: Vec<u8>,
) -> Result<()> {
    if levels.len() == level {
        levels.push(ValueLevel::default());
    }

    if levels[level].first_row.is_none() {
        levels[level].first_row = Some(pointer.first_row);
        levels[level].first_value = Some(first_value.clone());
    }
    levels[level].last_value = Some(last_value.clone());

    let entry = value_index::PendingEntry {
        pointer,
        filter_pointer: None,
        first_value: first_value.clone(),
        last_value: last_value.clone(),
    };

    match levels[level].builder.push(&entry)? {
        Push::Pushed => Ok(()),
        Push::Full => {
            let finished = std::mem::take(&mut levels[level]);
            let finished_first_row = finished
                .first_row
                .ok_or(Error::InvariantViolated("value index level committed with no entries"))?;
            let finished_first_value = finished
                .first_value
                .ok_or(Error::InvariantViolated("value index level committed with no entries"))?;
            let finished_last_value = finished
                .last_value
                .ok_or(Error::InvariantViolated("value index level committed with no entries"))?;
            let body = finished.builder.finish();
            let child = block_pointer(io, BlockKind::ValueIndex, 0, &body, finished_first_row, true)?;
            promote_value(io, levels, level + 1, child, finished_first_value, finished_last_value)?;

            levels[level].first_row = Some(pointer.first_row);
            levels[level].first_value = Some(first_value);
            levels[level].last_value = Some(last_value);
            match levels[level].builder.push(&entry)? {
                Push::Pushed => Ok(()),
                Push::Full => Err(Error::InvariantViolated("value index entry does not fit an empty block")),
            }
        }
    }
}

fn finish_value_levels(io: &dyn BlockIo, mut levels: Vec<ValueLevel>) -> Result<Root> {
    if levels.is_empty() {
        return Err(Error::InvariantViolated("value index has no levels to finish"));
    }

    for level in 0..levels.len() {
        if levels[level].builder.is_empty() {
            continue;
        }

        let finished = std::mem::take(&mut levels[level]);
        let first_row = finished
            .first_row
            .ok_or(Error::InvariantViolated("value index level committed with no entries"))?;
        let first_value = finished
            .first_value
            .ok_or(Error::InvariantViolated("value index level committed with no entries"))?;
        let last_value = finished
            .last_value
            .ok_or(Error::InvariantViolated("value index level committed with no entries"))?;
        let body = finished.builder.finish();
        let child = block_pointer(io, BlockKind::ValueIndex, 0, &body, first_row, true)?;

        if level + 1 == levels.len() {
            return Ok(Root {
                offset: child.child_offset,
                shift: child.child_shift,
            });
        }
        promote_value(io, &mut levels, level + 1, child, first_value, last_value)?;
    }

    for level in levels.into_iter().rev() {
        if !level.builder.is_empty() {
            let first_row = level.first_row.expect("non-empty level has a first row");
            let body = level.builder.finish();
            let child = block_pointer(io, BlockKind::ValueIndex, 0, &body, first_row, true)?;
            return Ok(Root {
                offset: child.child_offset,
                shift: child.child_shift,
            });
        }
    }

    Err(Error::InvariantViolated("value index produced no root"))
}

fn promote_filter_index(
    io: &dyn BlockIo,
    levels: &mut Vec<FilterIndexLevel>,
    level: usize,
    pointer: ChildPointer,
    first_value: Vec<u8>,
    last_value: Vec<u8>,
) -> Result<()> {
    if levels.len() == level {
        levels.push(FilterIndexLevel::default());
    }

    if levels[level].first_row.is_none() {
        levels[level].first_row = Some(pointer.first_row);
        levels[level].first_value = Some(first_value.clone());
    }
    levels[level].last_value = Some(last_value.clone());

    let entry = filter_index::PendingEntry {
        pointer,
        first_value: first_value.clone(),
        last_value: last_value.clone(),
    };

    match levels[level].builder.push(&entry)? {
        Push::Pushed => Ok(()),
        Push::Full => {
            let finished = std::mem::take(&mut levels[level]);
            let finished_first_row = finished
                .first_row
                .ok_or(Error::InvariantViolated("filter index level committed with no entries"))?;
            let finished_first_value = finished
                .first_value
                .ok_or(Error::InvariantViolated("filter index level committed with no entries"))?;
            let finished_last_value = finished
                .last_value
                .ok_or(Error::InvariantViolated("filter index level committed with no entries"))?;
            let body = finished.builder.finish();
            let child = block_pointer(io, BlockKind::FilterIndex, 0, &body, finished_first_row, true)?;
            promote_filter_index(io, levels, level + 1, child, finished_first_value, finished_last_value)?;

            levels[level].first_row = Some(pointer.first_row);
            levels[level].first_value = Some(first_value);
            levels[level].last_value = Some(last_value);
            match levels[level].builder.push(&entry)? {
                Push::Pushed => Ok(()),
                Push::Full => Err(Error::InvariantViolated("filter index entry does not fit an empty block")),
            }
        }
    }
}

fn finish_filter_index_levels(io: &dyn BlockIo, mut levels: Vec<FilterIndexLevel>) -> Result<Option<Root>> {
    if levels.is_empty() {
        return Ok(None);
    }

    for level in 0..levels.len() {
        if levels[level].builder.is_empty() {
            continue;
        }

        let finished = std::mem::take(&mut levels[level]);
        let first_row = finished
            .first_row
            .ok_or(Error::InvariantViolated("filter index level committed with no entries"))?;
        let first_value = finished
            .first_value
            .ok_or(Error::InvariantViolated("filter index level committed with no entries"))?;
        let last_value = finished
            .last_value
            .ok_or(Error::InvariantViolated("filter index level committed with no entries"))?;
        let body = finished.builder.finish();
        let child = block_pointer(io, BlockKind::FilterIndex, 0, &body, first_row, true)?;

        if level + 1 == levels.len() {
            return Ok(Some(Root {
                offset: child.child_offset,
                shift: child.child_shift,
            }));
        }
        promote_filter_index(io, &mut levels, level + 1, child, first_value, last_value)?;
    }

    for level in levels.into_iter().rev() {
        if !level.builder.is_empty() {
            let first_row = level.first_row.expect("non-empty level has a first row");
            let body = level.builder.finish();
            let child = block_pointer(io, BlockKind::FilterIndex, 0, &body, first_row, true)?;
            return Ok(Some(Root {
                offset: child.child_offset,
                shift: child.child_shift,
            }));
        }
    }

    Ok(None)
}

/// Streams values for one column into a layer file.
pub struct ColumnWriter<'a, C: ValueCodec> {
    io: &'a dyn BlockIo,
    has_row_ranges: bool,

    data_builder: DataBlockBuilder<C>,
    block_first_row: Option<u64>,
    block_first_value: Option<Vec<u8>>,
    block_last_value: Option<Vec<u8>>,
    last_value: Option<Vec<u8>>,

    row_levels: Vec<RowLevel>,
    value_levels: Vec<ValueLevel>,

    filter_acc: Option<FilterAccumulator>,
    filter_index_levels: Vec<FilterIndexLevel>,

    rows_written: u64,
}

impl<'a, C: ValueCodec> ColumnWriter<'a, C> {
    /// Creates a writer for a column. `has_row_ranges` must be `true` for
    /// every column except the last. `filter_bpk`, if set, enables a
    /// parallel filter tree at that many bits per key.
    #[must_use]
    pub fn new(io: &'a dyn BlockIo, has_row_ranges: bool, filter_bpk: Option<f32>) -> Self {
        Self {
            io,
            has_row_ranges,
            data_builder: DataBlockBuilder::new(has_row_ranges),
            block_first_row: None,
            block_first_value: None,
            block_last_value: None,
            last_value: None,
            row_levels: Vec::new(),
            value_levels: Vec::new(),
            filter_acc: filter_bpk.map(|bpk| FilterAccumulator {
                bpk,
                hashes: Vec::new(),
                first_row: None,
                first_value: None,
                last_value: None,
            }),
            filter_index_levels: Vec::new(),
            rows_written: 0,
        }
    }

    /// Appends the next value in sorted order. `tail_range` must be `Some`
    /// unless this is the last column.
    pub fn push(&mut self, value: &C::Value, tail_range: Option<(u64, u64)>) -> Result<()> {
        debug_assert_eq!(tail_range.is_some(), self.has_row_ranges);

        let row = self.rows_written;
        let mut scratch = Vec::new();
        C::serialize(value, &mut scratch);

        if let Some(last) = &self.last_value {
            if C::view(&scratch, 0) < C::view(last, 0) {
                return Err(Error::OutOfOrder);
            }
        }

        if self.data_builder.is_empty() {
            self.block_first_row = Some(row);
            self.block_first_value = Some(scratch.clone());
        }

        match self.data_builder.push(value, tail_range)? {
            data_block::Push::Pushed => {}
            data_block::Push::Full => {
                self.commit_data_block()?;
                self.block_first_row = Some(row);
                self.block_first_value = Some(scratch.clone());
                match self.data_builder.push(value, tail_range)? {
                    data_block::Push::Pushed => {}
                    data_block::Push::Full => {
                        return Err(Error::InvariantViolated("value does not fit an empty data block"))
                    }
                }
            }
        }

        self.block_last_value = Some(scratch.clone());
        self.last_value = Some(scratch.clone());

        if let Some(acc) = &mut self.filter_acc {
            if acc.first_row.is_none() {
                acc.first_row = Some(row);
                acc.first_value = Some(scratch.clone());
            }
            acc.last_value = Some(scratch.clone());
            acc.hashes.push(filter::hash_value(&scratch));

            if acc.hashes.len() >= FILTER_BLOCK_VALUES {
                self.commit_filter_block()?;
            }
        }

        self.rows_written += 1;
        Ok(())
    }

    fn commit_data_block(&mut self) -> Result<()> {
        if self.data_builder.is_empty() {
            return Ok(());
        }

        let first_row = self
            .block_first_row
            .take()
            .ok_or(Error::InvariantViolated("data block committed with no first row"))?;
        let first_value = self
            .block_first_value
            .take()
            .ok_or(Error::InvariantViolated("data block committed with no first value"))?;
        let last_value = self
            .block_last_value
            .take()
            .ok_or(Error::InvariantViolated("data block committed with no last value"))?;

        let builder = std::mem::replace(&mut self.data_builder, DataBlockBuilder::new(self.has_row_ranges));
        let (flags, body) = builder.finish();
        let pointer = block_pointer(self.io, BlockKind::Data, flags, &body, first_row, false)?;

        log::trace!(
            "flushed data block at offset={} shift={} first_row={first_row}",
            pointer.child_offset,
            pointer.child_shift,
        );

        promote_row(
            self.io,
            &mut self.row_levels,
            0,
            pointer,
        )?;
        promote_value(self.io, &mut self.value_levels, 0, pointer, first_value, last_value)?;

        log::trace!("promoted data block at first_row={first_row} into row/value index levels");

        Ok(())
    }

    fn commit_filter_block(&mut self) -> Result<()> {
        let Some(acc) = self.filter_acc.take() else {
            return Ok(());
        };
        if acc.hashes.is_empty() {
            self.filter_acc = Some(FilterAccumulator {
                bpk: acc.bpk,
                hashes: Vec::new(),
                first_row: None,
                first_value: None,
                last_value: None,
            });
            return Ok(());
        }

        let first_row = acc
            .first_row
            .ok_or(Error::InvariantViolated("filter block committed with no first row"))?;
        let first_value = acc
            .first_value
            .clone()
            .ok_or(Error::InvariantViolated("filter block committed with no first value"))?;
        let last_value = acc
            .last_value
            .clone()
            .ok_or(Error::InvariantViolated("filter block committed with no last value"))?;

        let mut builder = FilterBuilder::with_bpk(acc.hashes.len(), acc.bpk);
        for hash in &acc.hashes {
            builder.set_with_hash(*hash);
        }
        let payload = builder.finish();
        let pointer = block_pointer(self.io, BlockKind::Filter, 0, &payload, first_row, false)?;

        log::trace!(
            "flushed filter block at offset={} covering {} values",
            pointer.child_offset,
            acc.hashes.len(),
        );

        promote_filter_index(self.io, &mut self.filter_index_levels, 0, pointer, first_value, last_value)?;

        self.filter_acc = Some(FilterAccumulator {
            bpk: acc.bpk,
            hashes: Vec::new(),
            first_row: None,
            first_value: None,
            last_value: None,
        });

        Ok(())
    }

    /// Seals the column, returning the pointers the file trailer needs.
    pub fn finish(mut self) -> Result<ColumnSummary> {
        self.commit_data_block()?;
        self.commit_filter_block()?;

        let rows = self.rows_written;

        if self.row_levels.is_empty() {
            // No rows were ever pushed: write a single empty root block so
            // the trailer always has something to point at.
            let body = RowIndexBuilder::new().finish();
            let pointer = block_pointer(self.io, BlockKind::RowIndex, 0, &body, 0, true)?;
            let row_index_root = Root {
                offset: pointer.child_offset,
                shift: pointer.child_shift,
            };

            let body = ValueIndexBuilder::new().finish();
            let pointer = block_pointer(self.io, BlockKind::ValueIndex, 0, &body, 0, true)?;
            let value_index_root = Root {
                offset: pointer.child_offset,
                shift: pointer.child_shift,
            };

            log::debug!("sealed empty column, 0 rows");

            return Ok(ColumnSummary {
                rows,
                value_index_root,
                row_index_root,
                filter_index_root: None,
            });
        }

        let row_index_root = finish_row_levels(self.io, self.row_levels)?;
        let value_index_root = finish_value_levels(self.io, self.value_levels)?;
        let filter_index_root = finish_filter_index_levels(self.io, self.filter_index_levels)?;

        log::debug!(
            "sealed column: {rows} rows, row_index_root={row_index_root:?}, value_index_root={value_index_root:?}, has_filter={}",
            filter_index_root.is_some(),
        );

        Ok(ColumnSummary {
            rows,
            value_index_root,
            row_index_root,
            filter_index_root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_block::DataBlockReader;
    use crate::index_block::row_index::RowIndexReader;
    use crate::io::StdFileIo;
    use crate::schema::FixedU64Codec;
    use test_log::test;

    #[test]
    fn writes_a_single_block_column() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(Error::Io)?;

        let mut writer = ColumnWriter::<FixedU64Codec>::new(&io, false, None);
        for i in 0..10u64 {
            writer.push(&i, None)?;
        }
        let summary = writer.finish()?;
        assert_eq!(summary.rows, 10);
        assert!(summary.filter_index_root.is_none());

        let (kind, flags, body) = block::read_block(&io, block::BlockOffset(0))?;
        assert_eq!(kind, BlockKind::Data);
        let reader = DataBlockReader::new(&body, flags)?;
        assert_eq!(reader.len(), 10);

        Ok(())
    }

    #[test]
    fn spills_multiple_data_blocks_and_builds_row_index() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(Error::Io)?;

        let mut writer = ColumnWriter::<crate::schema::BytesCodec>::new(&io, false, None);
        let value = vec![0u8; 512];
        for _ in 0..2_000 {
            writer.push(&value, None)?;
        }
        let summary = writer.finish()?;
        assert_eq!(summary.rows, 2_000);

        let (kind, _, body) = block::read_block(
            &io,
            block::BlockOffset(summary.row_index_root.offset),
        )?;
        assert_eq!(kind, BlockKind::RowIndex);
        let reader = RowIndexReader::new(&body)?;
        assert!(reader.len() >= 1);

        Ok(())
    }

    #[test]
    fn builds_filter_tree_when_enabled() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(Error::Io)?;

        let mut writer = ColumnWriter::<FixedU64Codec>::new(&io, false, Some(10.0));
        for i in 0..1_000u64 {
            writer.push(&i, None)?;
        }
        let summary = writer.finish()?;
        assert!(summary.filter_index_root.is_some());

        Ok(())
    }

    #[test]
    fn rejects_out_of_order_push() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(Error::Io)?;

        let mut writer = ColumnWriter::<FixedU64Codec>::new(&io, false, None);
        writer.push(&10u64, None)?;
        writer.push(&20u64, None)?;
        assert!(matches!(writer.push(&5u64, None), Err(Error::OutOfOrder)));

        Ok(())
    }
}
