// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{pack_shift_kind, unpack_shift_kind, ChildPointer, Push, MIN_BRANCHING_FACTOR};
use crate::block::header::{BASE_BLOCK_SIZE, MAX_SIZE_SHIFT, PREFIX_LEN};
use crate::coding::{read_u40, read_u48, write_u40, write_u48};
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// Fixed width of a row-index entry: `firstRow:u48 + childOff:u40 + shift/kind:u8`.
pub const ENTRY_LEN: usize = 12;
const FOOTER_LEN: usize = 2;

/// Largest number of entries a single row-index block may hold.
pub const MAX_ENTRIES_PER_BLOCK: usize = u16::MAX as usize;

fn body_capacity(shift: u8) -> usize {
    (BASE_BLOCK_SIZE << shift) - PREFIX_LEN
}

/// Accumulates fixed-width entries for a row-index block.
pub struct RowIndexBuilder {
    shift: u8,
    entries: Vec<u8>,
    count: usize,
}

impl Default for RowIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RowIndexBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shift: 1,
            entries: Vec::new(),
            count: 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn push(&mut self, pointer: ChildPointer) -> Result<Push> {
        if self.count >= MAX_ENTRIES_PER_BLOCK {
            return Ok(Push::Full);
        }

        let new_len = self.entries.len() + ENTRY_LEN;
        let mut capacity = body_capacity(self.shift);

        if new_len + FOOTER_LEN > capacity {
            if self.count >= MIN_BRANCHING_FACTOR {
                return Ok(Push::Full);
            }

            while new_len + FOOTER_LEN > capacity {
                if self.shift >= MAX_SIZE_SHIFT {
                    return Err(Error::BoundsExceeded("row index block size"));
                }
                self.shift += 1;
                capacity = body_capacity(self.shift);
            }
        }

        write_u48(&mut self.entries, pointer.first_row).map_err(Error::Io)?;
        write_u40(&mut self.entries, pointer.child_offset).map_err(Error::Io)?;
        self.entries
            .push(pack_shift_kind(pointer.child_shift, pointer.is_index, false));
        self.count += 1;

        Ok(Push::Pushed)
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let capacity = body_capacity(self.shift);
        let mut body = vec![0u8; capacity];
        body[..self.entries.len()].copy_from_slice(&self.entries);

        let mut footer = &mut body[capacity - FOOTER_LEN..];
        footer
            .write_u16::<LittleEndian>(self.count as u16)
            .expect("sized buffer");

        body
    }
}

/// Reads a sealed row-index block body.
pub struct RowIndexReader<'a> {
    body: &'a [u8],
    count: u16,
}

impl<'a> RowIndexReader<'a> {
    pub fn new(body: &'a [u8]) -> Result<Self> {
        if body.len() < FOOTER_LEN {
            return Err(Error::InvariantViolated("row index body shorter than footer"));
        }

        let mut footer = &body[body.len() - FOOTER_LEN..];
        let count = footer.read_u16::<LittleEndian>().map_err(Error::Io)?;

        Ok(Self { body, count })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn entry(&self, index: usize) -> Result<ChildPointer> {
        if index >= self.len() {
            return Err(Error::BoundsExceeded("row index entry"));
        }

        let start = index * ENTRY_LEN;
        let mut cursor = &self.body[start..start + ENTRY_LEN];

        let first_row = read_u48(&mut cursor).map_err(Error::Io)?;
        let child_offset = read_u40(&mut cursor).map_err(Error::Io)?;
        let byte = cursor.read_u8().map_err(Error::Io)?;
        let (child_shift, is_index, _pad) = unpack_shift_kind(byte);

        Ok(ChildPointer {
            child_offset,
            child_shift,
            is_index,
            first_row,
        })
    }

    /// Returns the index of the entry whose subtree contains row `row`
    /// (the entry with the greatest `firstRow <= row`).
    pub fn search(&self, row: u64) -> Result<usize> {
        let mut left = 0;
        let mut right = self.len();

        while left < right {
            let mid = left + (right - left) / 2;
            if self.entry(mid)?.first_row <= row {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        Ok(left.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn builds_and_reads_back() {
        let mut builder = RowIndexBuilder::new();
        for i in 0..40u64 {
            let outcome = builder
                .push(ChildPointer {
                    child_offset: i * 4096,
                    child_shift: 0,
                    is_index: false,
                    first_row: i * 10,
                })
                .unwrap();
            assert!(matches!(outcome, Push::Pushed));
        }

        let body = builder.finish();
        let reader = RowIndexReader::new(&body).unwrap();
        assert_eq!(reader.len(), 40);

        for i in 0..40u64 {
            let entry = reader.entry(i as usize).unwrap();
            assert_eq!(entry.first_row, i * 10);
            assert_eq!(entry.child_offset, i * 4096);
        }
    }

    #[test]
    fn search_finds_owning_entry() {
        let mut builder = RowIndexBuilder::new();
        for i in 0..10u64 {
            builder
                .push(ChildPointer {
                    child_offset: i,
                    child_shift: 0,
                    is_index: false,
                    first_row: i * 100,
                })
                .unwrap();
        }
        let body = builder.finish();
        let reader = RowIndexReader::new(&body).unwrap();

        assert_eq!(reader.search(0).unwrap(), 0);
        assert_eq!(reader.search(150).unwrap(), 1);
        assert_eq!(reader.search(999).unwrap(), 9);
    }
}
