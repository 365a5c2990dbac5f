// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The filter index: a small tree over a column's completed filter blocks,
//! keyed the same way the value index is (`firstValue`, `lastValue`,
//! `firstRow`), so a point query can rule out a value without touching the
//! data tree at all.
//!
//! Entries share the value index's variable-length shape minus the
//! filter-pointer field (a filter-index entry points at a filter block or
//! at another filter-index block, never at a further filter).

use crate::block::header::{BASE_BLOCK_SIZE, MAX_SIZE_SHIFT, PREFIX_LEN};
use crate::coding::{read_u40, read_u48, write_u40, write_u48};
use crate::index_block::{pack_shift_kind, unpack_shift_kind, ChildPointer, Push, MIN_BRANCHING_FACTOR};
use crate::schema::ValueCodec;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use varint_rs::{VarintReader, VarintWriter};

const OFFSET_MAP_ENTRY_LEN: usize = 2;
const FOOTER_LEN: usize = 2;

/// Largest number of entries a single filter-index block may hold.
pub const MAX_ENTRIES_PER_BLOCK: usize = u16::MAX as usize;

fn body_capacity(shift: u8) -> usize {
    (BASE_BLOCK_SIZE << shift) - PREFIX_LEN
}

/// One filter-index entry as supplied by the column writer.
pub struct PendingEntry {
    pub pointer: ChildPointer,
    pub first_value: Vec<u8>,
    pub last_value: Vec<u8>,
}

fn encode_entry(entry: &PendingEntry, out: &mut Vec<u8>) -> Result<()> {
    write_u48(out, entry.pointer.first_row).map_err(Error::Io)?;
    write_u40(out, entry.pointer.child_offset).map_err(Error::Io)?;
    out.push(pack_shift_kind(entry.pointer.child_shift, entry.pointer.is_index, false));
    out.write_usize_varint(entry.first_value.len()).map_err(Error::Io)?;
    out.extend_from_slice(&entry.first_value);
    out.write_usize_varint(entry.last_value.len()).map_err(Error::Io)?;
    out.extend_from_slice(&entry.last_value);
    Ok(())
}

/// Accumulates variable-length entries for a filter-index block.
pub struct FilterIndexBuilder {
    shift: u8,
    entries: Vec<u8>,
    starts: Vec<u16>,
}

impl Default for FilterIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterIndexBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shift: 1,
            entries: Vec::new(),
            starts: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn push(&mut self, entry: &PendingEntry) -> Result<Push> {
        if self.starts.len() >= MAX_ENTRIES_PER_BLOCK {
            return Ok(Push::Full);
        }

        let mut scratch = Vec::new();
        encode_entry(entry, &mut scratch)?;

        let start = self.entries.len();
        if start > u16::MAX as usize {
            return Ok(Push::Full);
        }

        let new_entries_len = start + scratch.len();
        let offset_map_len = (self.starts.len() + 1) * OFFSET_MAP_ENTRY_LEN;
        let mut capacity = body_capacity(self.shift);

        if new_entries_len + offset_map_len + FOOTER_LEN > capacity {
            if self.starts.len() >= MIN_BRANCHING_FACTOR {
                return Ok(Push::Full);
            }

            while new_entries_len + offset_map_len + FOOTER_LEN > capacity {
                if self.shift >= MAX_SIZE_SHIFT {
                    return Err(Error::BoundsExceeded("filter index block size"));
                }
                self.shift += 1;
                capacity = body_capacity(self.shift);
            }
        }

        self.starts.push(start as u16);
        self.entries.extend_from_slice(&scratch);

        Ok(Push::Pushed)
    }

    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let capacity = body_capacity(self.shift);
        let mut body = vec![0u8; capacity];
        body[..self.entries.len()].copy_from_slice(&self.entries);

        let trailer_len = self.starts.len() * OFFSET_MAP_ENTRY_LEN + FOOTER_LEN;
        let trailer_start = capacity - trailer_len;
        let mut cursor = &mut body[trailer_start..];

        for start in &self.starts {
            cursor.write_u16::<LittleEndian>(*start).expect("sized buffer");
        }
        cursor
            .write_u16::<LittleEndian>(self.starts.len() as u16)
            .expect("sized buffer");

        body
    }
}

/// A decoded filter-index entry.
#[derive(Debug)]
pub struct DecodedEntry<'a> {
    pub pointer: ChildPointer,
    pub first_value: &'a [u8],
    pub last_value: &'a [u8],
}

/// Reads a sealed filter-index block body.
pub struct FilterIndexReader<'a> {
    body: &'a [u8],
    count: u16,
    offset_map_start: usize,
}

impl<'a> FilterIndexReader<'a> {
    pub fn new(body: &'a [u8]) -> Result<Self> {
        if body.len() < FOOTER_LEN {
            return Err(Error::InvariantViolated("filter index body shorter than footer"));
        }

        let mut footer = &body[body.len() - FOOTER_LEN..];
        let count = footer.read_u16::<LittleEndian>().map_err(Error::Io)?;

        let trailer_len = count as usize * OFFSET_MAP_ENTRY_LEN + FOOTER_LEN;
        if trailer_len > body.len() {
            return Err(Error::InvariantViolated("filter index trailer longer than body"));
        }
        let offset_map_start = body.len() - trailer_len;

        Ok(Self {
            body,
            count,
            offset_map_start,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count as usize
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn entry_start(&self, index: usize) -> Result<usize> {
        if index >= self.len() {
            return Err(Error::BoundsExceeded("filter index entry"));
        }
        let pos = self.offset_map_start + index * OFFSET_MAP_ENTRY_LEN;
        let mut cursor = &self.body[pos..pos + OFFSET_MAP_ENTRY_LEN];
        Ok(cursor.read_u16::<LittleEndian>().map_err(Error::Io)? as usize)
    }

    pub fn entry(&self, index: usize) -> Result<DecodedEntry<'a>> {
        let start = self.entry_start(index)?;
        let mut cursor = &self.body[start..];

        let first_row = read_u48(&mut cursor).map_err(Error::Io)?;
        let child_offset = read_u40(&mut cursor).map_err(Error::Io)?;
        let byte = cursor.read_u8().map_err(Error::Io)?;
        let (child_shift, is_index, _pad) = unpack_shift_kind(byte);

        let first_len = cursor.read_usize_varint().map_err(Error::Io)?;
        let first_value = &cursor[..first_len];
        cursor = &cursor[first_len..];

        let last_len = cursor.read_usize_varint().map_err(Error::Io)?;
        let last_value = &cursor[..last_len];

        Ok(DecodedEntry {
            pointer: ChildPointer {
                child_offset,
                child_shift,
                is_index,
                first_row,
            },
            first_value,
            last_value,
        })
    }

    /// Returns the index of the leaf filter block whose `[firstValue,
    /// lastValue]` range may contain `needle`, or `None` if it falls
    /// outside every entry's range.
    pub fn locate<C: ValueCodec>(&self, needle: &C::Archived<'a>) -> Result<Option<usize>> {
        let mut left = 0;
        let mut right = self.len();

        while left < right {
            let mid = left + (right - left) / 2;
            let entry = self.entry(mid)?;
            let last_value = C::view(entry.last_value, 0);

            if last_value < *needle {
                left = mid + 1;
            } else {
                right = mid;
            }
        }

        if left >= self.len() {
            return Ok(None);
        }

        let entry = self.entry(left)?;
        let first_value = C::view(entry.first_value, 0);
        if first_value > *needle {
            return Ok(None);
        }

        Ok(Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FixedU64Codec;
    use test_log::test;

    fn serialize_u64(v: u64) -> Vec<u8> {
        let mut out = vec![];
        FixedU64Codec::serialize(&v, &mut out);
        out
    }

    #[test]
    fn builds_and_locates() {
        let mut builder = FilterIndexBuilder::new();
        for i in 0..20u64 {
            let entry = PendingEntry {
                pointer: ChildPointer {
                    child_offset: i * 4096,
                    child_shift: 0,
                    is_index: false,
                    first_row: i * 65_536,
                },
                first_value: serialize_u64(i * 100),
                last_value: serialize_u64(i * 100 + 99),
            };
            builder.push(&entry).unwrap();
        }

        let body = builder.finish();
        let reader = FilterIndexReader::new(&body).unwrap();
        assert_eq!(reader.len(), 20);

        let needle = 550u64; // within block 5's [500, 599]
        let idx = reader.locate::<FixedU64Codec>(&needle).unwrap();
        assert_eq!(idx, Some(5));

        let outside = 5_000u64;
        assert_eq!(reader.locate::<FixedU64Codec>(&outside).unwrap(), None);
    }
}
