// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The cursor: the read-time state machine positioned on a row within one
//! column's row-group range.
//!
//! Descent always starts from a tree root (always an index block, never a
//! leaf — even an empty column's root is a zero-entry index block) and
//! walks down via one binary search per level, the way
//! [`crate::index_block`]'s readers are built to support. Only the current
//! data block's body is held onto between calls; everything above it is
//! re-read per descent; a [`crate::buffer_pool::BufferPool`] hands those
//! repeat reads back without touching the I/O collaborator.

use crate::block::{self, BlockKind, BlockOffset};
use crate::buffer_pool::{BufferPool, FileId};
use crate::column_writer::Root;
use crate::data_block::DataBlockReader;
use crate::file_reader::ColumnRoots;
use crate::filter::FilterReader;
use crate::filter_index::FilterIndexReader;
use crate::index_block::row_index::RowIndexReader;
use crate::index_block::value_index::ValueIndexReader;
use crate::index_block::ChildPointer;
use crate::io::BlockIo;
use crate::schema::ValueCodec;
use crate::{Error, Result, Slice};

/// Which way a seek or step moves through sort order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Ascending: `seekValue` finds the least row `>= v`, `next` increments.
    Forward,
    /// Descending: `seekValue` finds the greatest row `<= v`, `next` decrements.
    Backward,
}

/// The cursor's position within its row-group range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    /// Before the first row of the range.
    Before,
    /// Positioned at a specific row.
    At(u64),
    /// Past the last row of the range.
    After,
}

struct LoadedBlock {
    first_row: u64,
    flags: u8,
    body: Slice,
    position: usize,
}

/// A read-time cursor over one column, scoped to the row-group range
/// `[row_lo, row_hi)`.
pub struct Cursor<'a, C: ValueCodec> {
    io: &'a dyn BlockIo,
    pool: Option<(&'a BufferPool, FileId)>,

    row_lo: u64,
    row_hi: u64,

    value_index_root: Root,
    row_index_root: Root,
    filter_index_root: Option<Root>,

    state: State,
    current: Option<LoadedBlock>,

    _codec: std::marker::PhantomData<C>,
}

impl<'a, C: ValueCodec> Cursor<'a, C> {
    /// Creates a cursor over the given roots, scoped to `[row_lo, row_hi)`,
    /// positioned `Before` its first row.
    #[must_use]
    pub fn new(
        io: &'a dyn BlockIo,
        row_lo: u64,
        row_hi: u64,
        value_index_root: Root,
        row_index_root: Root,
        filter_index_root: Option<Root>,
    ) -> Self {
        Self {
            io,
            pool: None,
            row_lo,
            row_hi,
            value_index_root,
            row_index_root,
            filter_index_root,
            state: State::Before,
            current: None,
            _codec: std::marker::PhantomData,
        }
    }

    /// Creates a cursor over an entire column, using the roots recorded for
    /// it in a file's trailer.
    #[must_use]
    pub fn for_column(io: &'a dyn BlockIo, roots: ColumnRoots) -> Self {
        Self::new(
            io,
            0,
            roots.rows,
            roots.value_index_root,
            roots.row_index_root,
            roots.filter_index_root,
        )
    }

    /// Routes block reads through `pool`, keyed under `file`.
    #[must_use]
    pub fn with_buffer_pool(mut self, pool: &'a BufferPool, file: FileId) -> Self {
        self.pool = Some((pool, file));
        self
    }

    fn read_block(&self, offset: u64) -> Result<(BlockKind, u8, Slice)> {
        match self.pool {
            Some((pool, file)) => pool.get_or_read(self.io, file, BlockOffset(offset)),
            None => block::read_block(self.io, BlockOffset(offset)),
        }
    }

    /// The cursor's current state.
    #[must_use]
    pub fn state(&self) -> State {
        self.state
    }

    /// The row the cursor is positioned at, or `None` in `Before`/`After`.
    #[must_use]
    pub fn row_number(&self) -> Option<u64> {
        match self.state {
            State::At(row) => Some(row),
            _ => None,
        }
    }

    /// The value at the current row, or `None` in `Before`/`After`.
    pub fn value(&self) -> Result<Option<C::Archived<'_>>> {
        let Some(current) = &self.current else {
            return Ok(None);
        };
        if !matches!(self.state, State::At(_)) {
            return Ok(None);
        }
        let reader = DataBlockReader::new(&current.body, current.flags)?;
        Ok(Some(reader.value::<C>(current.position)?))
    }

    /// The `[rowStart, rowEnd)` range the current row spans in the next
    /// column, or `None` if this is the last column or the cursor isn't
    /// positioned on a row.
    pub fn child_range(&self) -> Result<Option<(u64, u64)>> {
        let Some(current) = &self.current else {
            return Ok(None);
        };
        if !matches!(self.state, State::At(_)) {
            return Ok(None);
        }
        let reader = DataBlockReader::new(&current.body, current.flags)?;
        Ok(reader.entry(current.position)?.row_range)
    }

    fn load_data_block(&mut self, offset: u64, first_row: u64, position: usize) -> Result<()> {
        let (kind, flags, body) = self.read_block(offset)?;
        if kind != BlockKind::Data {
            return Err(Error::InvariantViolated("descent landed on a non-data block"));
        }
        self.current = Some(LoadedBlock {
            first_row,
            flags,
            body,
            position,
        });
        Ok(())
    }

    fn descend_row_index(&self, row: u64) -> Result<Option<ChildPointer>> {
        let mut offset = self.row_index_root.offset;
        loop {
            let (kind, _flags, body) = self.read_block(offset)?;
            if kind != BlockKind::RowIndex {
                return Err(Error::InvariantViolated("row index descent hit a non-row-index block"));
            }
            let reader = RowIndexReader::new(&body)?;
            if reader.is_empty() {
                return Ok(None);
            }
            let pointer = reader.entry(reader.search(row)?)?;
            if pointer.is_index {
                offset = pointer.child_offset;
                continue;
            }
            return Ok(Some(pointer));
        }
    }

    /// Positions to row `row`, or `Before`/`After` if it falls outside
    /// `[row_lo, row_hi)`.
    pub fn seek_row(&mut self, row: u64) -> Result<()> {
        if row < self.row_lo {
            self.state = State::Before;
            self.current = None;
            return Ok(());
        }
        if row >= self.row_hi {
            self.state = State::After;
            self.current = None;
            return Ok(());
        }

        let Some(pointer) = self.descend_row_index(row)? else {
            self.state = State::Before;
            self.current = None;
            return Ok(());
        };

        let position = (row - pointer.first_row) as usize;
        self.load_data_block(pointer.child_offset, pointer.first_row, position)?;
        self.state = State::At(row);
        Ok(())
    }

    fn floor_entry_index(reader: &ValueIndexReader<'_>, needle: &C::Archived<'_>) -> Result<Option<usize>> {
        let mut left = 0usize;
        let mut right = reader.len();
        while left < right {
            let mid = left + (right - left) / 2;
            let entry = reader.entry(mid)?;
            let first_value = C::view(entry.first_value, 0);
            if first_value <= *needle {
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        Ok(if left == 0 { None } else { Some(left - 1) })
    }

    fn descend_value_index(&self, needle: &C::Archived<'_>, forward: bool) -> Result<Option<ChildPointer>> {
        let mut offset = self.value_index_root.offset;
        loop {
            let (kind, _flags, body) = self.read_block(offset)?;
            if kind != BlockKind::ValueIndex {
                return Err(Error::InvariantViolated("value index descent hit a non-value-index block"));
            }
            let reader = ValueIndexReader::new(&body)?;
            if reader.is_empty() {
                return Ok(None);
            }

            let idx = if forward {
                let idx = reader.lower_bound::<C>(needle)?;
                if idx >= reader.len() {
                    return Ok(None);
                }
                idx
            } else {
                let Some(idx) = Self::floor_entry_index(&reader, needle)? else {
                    return Ok(None);
                };
                idx
            };

            let entry = reader.entry(idx)?;
            if entry.pointer.is_index {
                offset = entry.pointer.child_offset;
                continue;
            }
            return Ok(Some(entry.pointer));
        }
    }

    fn floor_position_in_block(reader: &DataBlockReader<'_>, needle: &C::Archived<'_>) -> Result<Option<usize>> {
        let pos = reader.lower_bound::<C>(needle);
        if pos < reader.len() && reader.value::<C>(pos)? == *needle {
            return Ok(Some(pos));
        }
        Ok(if pos == 0 { None } else { Some(pos - 1) })
    }

    /// Positions to the least row (`Direction::Forward`) or greatest row
    /// (`Direction::Backward`) in range whose value is `>= value` or
    /// `<= value` respectively.
    pub fn seek_value(&mut self, value: &C::Value, direction: Direction) -> Result<()> {
        let forward = direction == Direction::Forward;
        let mut scratch = Vec::new();
        C::serialize(value, &mut scratch);
        let needle = C::view(&scratch, 0);

        let Some(pointer) = self.descend_value_index(&needle, forward)? else {
            self.state = if forward { State::After } else { State::Before };
            self.current = None;
            return Ok(());
        };

        let (kind, flags, body) = self.read_block(pointer.child_offset)?;
        if kind != BlockKind::Data {
            return Err(Error::InvariantViolated("value index descent landed on a non-data block"));
        }
        let reader = DataBlockReader::new(&body, flags)?;

        let position = if forward {
            let pos = reader.lower_bound::<C>(&needle);
            if pos >= reader.len() {
                None
            } else {
                Some(pos)
            }
        } else {
            Self::floor_position_in_block(&reader, &needle)?
        };

        let Some(position) = position else {
            self.state = if forward { State::After } else { State::Before };
            self.current = None;
            return Ok(());
        };

        let row = pointer.first_row + position as u64;
        if row < self.row_lo || row >= self.row_hi {
            self.state = if forward { State::After } else { State::Before };
            self.current = None;
            return Ok(());
        }

        self.current = Some(LoadedBlock {
            first_row: pointer.first_row,
            flags,
            body,
            position,
        });
        self.state = State::At(row);
        Ok(())
    }

    fn step(&mut self, delta: i64) -> Result<()> {
        match self.state {
            State::Before => {
                if delta > 0 {
                    self.seek_row(self.row_lo)?;
                }
            }
            State::After => {
                if delta < 0 && self.row_hi > self.row_lo {
                    self.seek_row(self.row_hi - 1)?;
                }
            }
            State::At(row) => {
                let target = if delta > 0 { row.checked_add(1) } else { row.checked_sub(1) };
                match target {
                    Some(r) if r >= self.row_lo && r < self.row_hi => self.seek_row(r)?,
                    _ => {
                        self.state = if delta > 0 { State::After } else { State::Before };
                        self.current = None;
                    }
                }
            }
        }
        Ok(())
    }

    /// Advances one row in `direction`, or reaches `Before`/`After` if the
    /// range is exhausted. Terminal states never auto-wrap.
    pub fn next(&mut self, direction: Direction) -> Result<()> {
        self.step(if direction == Direction::Forward { 1 } else { -1 })
    }

    /// Steps one row opposite to `direction`.
    pub fn prev(&mut self, direction: Direction) -> Result<()> {
        self.step(if direction == Direction::Forward { -1 } else { 1 })
    }

    /// A cursor over the next column, scoped to the current row's
    /// `childRange`. `None` if this column carries no row ranges (it's the
    /// last one) or the cursor isn't positioned on a row.
    pub fn enter_child<D: ValueCodec>(
        &self,
        child: ColumnRoots,
        io: &'a dyn BlockIo,
    ) -> Result<Option<Cursor<'a, D>>> {
        let Some((row_lo, row_hi)) = self.child_range()? else {
            return Ok(None);
        };
        Ok(Some(Cursor::new(
            io,
            row_lo,
            row_hi,
            child.value_index_root,
            child.row_index_root,
            child.filter_index_root,
        )))
    }

    fn locate_filter_block(&self, root: Root, needle: &C::Archived<'_>) -> Result<Option<ChildPointer>> {
        let mut offset = root.offset;
        loop {
            let (kind, _flags, body) = self.read_block(offset)?;
            if kind != BlockKind::FilterIndex {
                return Err(Error::InvariantViolated("filter index descent hit a non-filter-index block"));
            }
            let reader = FilterIndexReader::new(&body)?;
            let Some(idx) = reader.locate::<C>(needle)? else {
                return Ok(None);
            };
            let entry = reader.entry(idx)?;
            if entry.pointer.is_index {
                offset = entry.pointer.child_offset;
                continue;
            }
            return Ok(Some(entry.pointer));
        }
    }

    /// Approximate membership query: if a filter covers the subtree the
    /// value would fall into, consults it; otherwise falls back to
    /// `seekValue` plus an equality check. Never false-negative, but a
    /// `true` result doesn't guarantee the value is present.
    pub fn contains_approx(&mut self, value: &C::Value) -> Result<bool> {
        let mut scratch = Vec::new();
        C::serialize(value, &mut scratch);
        let needle = C::view(&scratch, 0);

        if let Some(filter_root) = self.filter_index_root {
            if let Some(pointer) = self.locate_filter_block(filter_root, &needle)? {
                let (kind, _flags, body) = self.read_block(pointer.child_offset)?;
                if kind != BlockKind::Filter {
                    return Err(Error::InvariantViolated("filter index points at a non-filter block"));
                }
                let reader = FilterReader::new(&body)?;
                return Ok(reader.contains(&scratch));
            }
        }

        self.seek_value(value, Direction::Forward)?;
        let found = self.value()?.map(|v| v == needle).unwrap_or(false);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column_writer::ColumnWriter;
    use crate::io::StdFileIo;
    use crate::schema::FixedU64Codec;
    use test_log::test;

    fn build_single_column(rows: u64, filter_bpk: Option<f32>) -> Result<(tempfile::TempDir, StdFileIo, crate::column_writer::ColumnSummary)> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(Error::Io)?;
        let mut writer = ColumnWriter::<FixedU64Codec>::new(&io, false, filter_bpk);
        for i in 0..rows {
            writer.push(&i, None)?;
        }
        let summary = writer.finish()?;
        Ok((dir, io, summary))
    }

    #[test]
    fn seek_row_lands_on_exact_value() -> Result<()> {
        let (_dir, io, summary) = build_single_column(1_000, None)?;
        let mut cursor = Cursor::<FixedU64Codec>::new(
            &io,
            0,
            summary.rows,
            summary.value_index_root,
            summary.row_index_root,
            summary.filter_index_root,
        );

        cursor.seek_row(500)?;
        assert_eq!(cursor.row_number(), Some(500));
        assert_eq!(cursor.value()?, Some(500));

        Ok(())
    }

    #[test]
    fn seek_value_finds_least_row_and_next_reaches_after() -> Result<()> {
        let (_dir, io, summary) = build_single_column(1_000, None)?;
        let mut cursor = Cursor::<FixedU64Codec>::new(
            &io,
            0,
            summary.rows,
            summary.value_index_root,
            summary.row_index_root,
            summary.filter_index_root,
        );

        cursor.seek_value(&500u64, Direction::Forward)?;
        assert_eq!(cursor.row_number(), Some(500));

        cursor.seek_value(&999u64, Direction::Forward)?;
        assert_eq!(cursor.row_number(), Some(999));
        cursor.next(Direction::Forward)?;
        assert_eq!(cursor.state(), State::After);

        Ok(())
    }

    #[test]
    fn seek_value_backward_finds_floor() -> Result<()> {
        let (_dir, io, summary) = build_single_column(1_000, None)?;
        let mut cursor = Cursor::<FixedU64Codec>::new(
            &io,
            0,
            summary.rows,
            summary.value_index_root,
            summary.row_index_root,
            summary.filter_index_root,
        );

        cursor.seek_value(&0u64, Direction::Backward)?;
        assert_eq!(cursor.state(), State::Before);

        Ok(())
    }

    #[test]
    fn empty_column_seeks_land_before() -> Result<()> {
        let (_dir, io, summary) = build_single_column(0, None)?;
        let mut cursor = Cursor::<FixedU64Codec>::new(
            &io,
            0,
            summary.rows,
            summary.value_index_root,
            summary.row_index_root,
            summary.filter_index_root,
        );

        cursor.seek_row(0)?;
        assert_eq!(cursor.state(), State::After);
        cursor.seek_value(&0u64, Direction::Forward)?;
        assert_eq!(cursor.state(), State::After);

        Ok(())
    }

    #[test]
    fn contains_approx_never_false_negatives() -> Result<()> {
        let (_dir, io, summary) = build_single_column(2_000, Some(10.0))?;
        let mut cursor = Cursor::<FixedU64Codec>::new(
            &io,
            0,
            summary.rows,
            summary.value_index_root,
            summary.row_index_root,
            summary.filter_index_root,
        );

        for i in 0..2_000u64 {
            assert!(cursor.contains_approx(&i)?);
        }

        Ok(())
    }
}
