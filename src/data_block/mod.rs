// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Data blocks: the leaves of a column's value tree.
//!
//! A data block packs independently serialized values at the front of its
//! body and a fixed-width trailer at the tail: `valueCount:u16` as the very
//! last two bytes, preceded by one entry per value (`rootOff:u16`, plus
//! `rowStart:u48`/`rowEnd:u48` when the column is not the last one). Placing
//! the trailer at the true tail of the block (not merely the tail of the
//! written content) means the reader can always find it from the block size
//! alone, with no separate length field in the block header.

use crate::block::header::{BASE_BLOCK_SIZE, MAX_SIZE_SHIFT, PREFIX_LEN};
use crate::coding::{read_u48, write_u48};
use crate::schema::ValueCodec;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Bit in the block header's flags byte marking that every trailer entry
/// carries a `[rowStart, rowEnd)` range into the next column.
pub const FLAG_HAS_ROW_RANGES: u8 = 1 << 0;

const FOOTER_LEN: usize = 2;
const ENTRY_LEN_NO_RANGE: usize = 2;
const ENTRY_LEN_WITH_RANGE: usize = 2 + 6 + 6;

/// Largest number of values a single data block may hold — bounded by the
/// trailer's `u16` value count.
pub const MAX_VALUES_PER_BLOCK: usize = u16::MAX as usize;

fn entry_len(has_row_ranges: bool) -> usize {
    if has_row_ranges {
        ENTRY_LEN_WITH_RANGE
    } else {
        ENTRY_LEN_NO_RANGE
    }
}

fn body_capacity(shift: u8) -> usize {
    (BASE_BLOCK_SIZE << shift) - PREFIX_LEN
}

/// Accumulates values for one data block.
///
/// Grows its target block size (doubling, floor 8 KiB) when an empty block
/// can't hold even its first value; once the block holds at least one
/// value, a push that would overflow the current budget instead reports
/// that the block is full via [`Push::Full`], without mutating the builder.
pub struct DataBlockBuilder<C: ValueCodec> {
    has_row_ranges: bool,
    shift: u8,
    values: Vec<u8>,
    entries: Vec<(u16, Option<(u64, u64)>)>,
    _codec: std::marker::PhantomData<C>,
}

/// Outcome of [`DataBlockBuilder::push`].
pub enum Push {
    /// The value was appended to the block.
    Pushed,
    /// The block cannot hold the value; the caller must [`DataBlockBuilder::finish`]
    /// the current block and retry against a fresh builder.
    Full,
}

impl<C: ValueCodec> DataBlockBuilder<C> {
    /// Creates an empty builder. `has_row_ranges` must be `true` for every
    /// column except the last.
    #[must_use]
    pub fn new(has_row_ranges: bool) -> Self {
        Self {
            has_row_ranges,
            shift: 1, // 8 KiB floor
            values: Vec::new(),
            entries: Vec::new(),
            _codec: std::marker::PhantomData,
        }
    }

    /// Returns whether any value has been pushed since the last `finish`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of values currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Attempts to append `value` (with its row range, iff `has_row_ranges`).
    pub fn push(&mut self, value: &C::Value, row_range: Option<(u64, u64)>) -> Result<Push> {
        debug_assert_eq!(row_range.is_some(), self.has_row_ranges);

        if self.entries.len() >= MAX_VALUES_PER_BLOCK {
            return Ok(Push::Full);
        }

        let mut scratch = Vec::new();
        C::serialize(value, &mut scratch);

        let align = C::ALIGN.max(1);
        let cur_len = self.values.len();
        let padding = (align - (cur_len % align)) % align;
        let root_offset = cur_len + padding;
        let new_values_len = root_offset + scratch.len();

        if root_offset > u16::MAX as usize {
            // Offsets beyond the first entry must fit in u16; the block is full.
            return Ok(Push::Full);
        }

        let trailer_len = (self.entries.len() + 1) * entry_len(self.has_row_ranges) + FOOTER_LEN;
        let mut capacity = body_capacity(self.shift);

        if new_values_len + trailer_len > capacity {
            if !self.entries.is_empty() {
                return Ok(Push::Full);
            }

            // Empty block: grow until the first value fits, or give up.
            while new_values_len + trailer_len > capacity {
                if self.shift >= MAX_SIZE_SHIFT {
                    return Err(Error::BoundsExceeded("data block size"));
                }
                self.shift += 1;
                capacity = body_capacity(self.shift);
            }
        }

        self.values.resize(root_offset, 0);
        self.values.extend_from_slice(&scratch);

        let root_offset =
            u16::try_from(root_offset).map_err(|_| Error::BoundsExceeded("data block root offset"))?;
        self.entries.push((root_offset, row_range));

        Ok(Push::Pushed)
    }

    /// Seals the block: pads the body to its final power-of-two size,
    /// writes the trailer at the true tail, and returns the finished
    /// payload plus the flags byte the caller must pass to the block layer.
    #[must_use]
    pub fn finish(self) -> (u8, Vec<u8>) {
        let capacity = body_capacity(self.shift);
        let mut body = vec![0u8; capacity];
        body[..self.values.len()].copy_from_slice(&self.values);

        let trailer_len = self.entries.len() * entry_len(self.has_row_ranges) + FOOTER_LEN;
        let trailer_start = capacity - trailer_len;
        let mut cursor = &mut body[trailer_start..];

        for (root_offset, row_range) in &self.entries {
            cursor.write_u16::<LittleEndian>(*root_offset).expect("sized buffer");
            if let Some((row_start, row_end)) = row_range {
                write_u48(&mut cursor, *row_start).expect("sized buffer");
                write_u48(&mut cursor, *row_end).expect("sized buffer");
            }
        }
        cursor
            .write_u16::<LittleEndian>(self.entries.len() as u16)
            .expect("sized buffer");

        let flags = if self.has_row_ranges { FLAG_HAS_ROW_RANGES } else { 0 };
        (flags, body)
    }
}

/// A trailer entry as seen by the reader.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrailerEntry {
    pub root_offset: u16,
    pub row_range: Option<(u64, u64)>,
}

/// Reads a sealed data block body.
pub struct DataBlockReader<'a> {
    body: &'a [u8],
    has_row_ranges: bool,
    value_count: u16,
    trailer_start: usize,
}

impl<'a> DataBlockReader<'a> {
    /// Wraps `body` (the full block body returned by the block layer) for
    /// reading. `flags` is the byte the block header stored alongside it.
    pub fn new(body: &'a [u8], flags: u8) -> Result<Self> {
        if body.len() < FOOTER_LEN {
            return Err(Error::InvariantViolated("data block body shorter than footer"));
        }

        let has_row_ranges = flags & FLAG_HAS_ROW_RANGES != 0;
        let mut footer = &body[body.len() - FOOTER_LEN..];
        let value_count = footer.read_u16::<LittleEndian>().map_err(Error::Io)?;

        let trailer_len = value_count as usize * entry_len(has_row_ranges) + FOOTER_LEN;
        if trailer_len > body.len() {
            return Err(Error::InvariantViolated("data block trailer longer than body"));
        }
        let trailer_start = body.len() - trailer_len;

        Ok(Self {
            body,
            has_row_ranges,
            value_count,
            trailer_start,
        })
    }

    /// Number of values in this block.
    #[must_use]
    pub fn len(&self) -> usize {
        self.value_count as usize
    }

    /// Returns whether the block holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value_count == 0
    }

    /// Returns the trailer entry for value `index`.
    pub fn entry(&self, index: usize) -> Result<TrailerEntry> {
        if index >= self.len() {
            return Err(Error::BoundsExceeded("data block value index"));
        }

        let stride = entry_len(self.has_row_ranges);
        let start = self.trailer_start + index * stride;
        let mut cursor = &self.body[start..start + stride];

        let root_offset = cursor.read_u16::<LittleEndian>().map_err(Error::Io)?;
        let row_range = if self.has_row_ranges {
            let row_start = read_u48(&mut cursor).map_err(Error::Io)?;
            let row_end = read_u48(&mut cursor).map_err(Error::Io)?;
            Some((row_start, row_end))
        } else {
            None
        };

        Ok(TrailerEntry {
            root_offset,
            row_range,
        })
    }

    /// Views the value at `index` using `C`.
    pub fn value<C: ValueCodec>(&self, index: usize) -> Result<C::Archived<'a>> {
        let entry = self.entry(index)?;
        Ok(C::view(self.body, entry.root_offset as usize))
    }

    /// Returns the least index whose value is `>= needle` (`self.len()` if
    /// every value sorts before `needle`).
    pub fn lower_bound<C: ValueCodec>(&self, needle: &C::Archived<'a>) -> usize {
        let mut left = 0;
        let mut right = self.len();

        while left < right {
            let mid = left + (right - left) / 2;
            let entry = self.entry(mid).expect("mid is in range");
            let value = C::view(self.body, entry.root_offset as usize);

            if value < *needle {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BytesCodec, FixedU64Codec};
    use test_log::test;

    #[test]
    fn builds_and_reads_back_fixed_values() {
        let mut builder = DataBlockBuilder::<FixedU64Codec>::new(true);
        for i in 0..100u64 {
            let outcome = builder.push(&i, Some((i * 2, i * 2 + 2))).unwrap();
            assert!(matches!(outcome, Push::Pushed));
        }

        let (flags, body) = builder.finish();
        let reader = DataBlockReader::new(&body, flags).unwrap();
        assert_eq!(reader.len(), 100);

        for i in 0..100u64 {
            let value = reader.value::<FixedU64Codec>(i as usize).unwrap();
            assert_eq!(value, i);

            let entry = reader.entry(i as usize).unwrap();
            assert_eq!(entry.row_range, Some((i * 2, i * 2 + 2)));
        }
    }

    #[test]
    fn last_column_has_no_row_ranges() {
        let mut builder = DataBlockBuilder::<BytesCodec>::new(false);
        builder.push(b"alpha", None).unwrap();
        builder.push(b"beta", None).unwrap();

        let (flags, body) = builder.finish();
        assert_eq!(flags, 0);

        let reader = DataBlockReader::new(&body, flags).unwrap();
        assert_eq!(reader.value::<BytesCodec>(0).unwrap(), b"alpha");
        assert_eq!(reader.value::<BytesCodec>(1).unwrap(), b"beta");
        assert_eq!(reader.entry(0).unwrap().row_range, None);
    }

    #[test]
    fn oversized_value_grows_the_block() {
        let mut builder = DataBlockBuilder::<BytesCodec>::new(false);
        let blob = vec![9u8; 32 * 1024];
        let outcome = builder.push(&blob, None).unwrap();
        assert!(matches!(outcome, Push::Pushed));

        let (_, body) = builder.finish();
        assert!(body.len() >= 64 * 1024);
        assert!(body.len().is_power_of_two());
    }

    #[test]
    fn commit_reports_full_on_overflow() {
        let mut builder = DataBlockBuilder::<BytesCodec>::new(false);
        let value = vec![0u8; 512];
        let mut pushed = 0;
        loop {
            match builder.push(&value, None).unwrap() {
                Push::Pushed => pushed += 1,
                Push::Full => break,
            }
        }
        assert!(pushed > 0);

        let (_, body) = builder.finish();
        let reader = DataBlockReader::new(&body, 0).unwrap();
        assert_eq!(reader.len(), pushed);
    }
}
