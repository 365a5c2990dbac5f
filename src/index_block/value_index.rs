// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{pack_shift_kind, unpack_shift_kind, ChildPointer, Push, MIN_BRANCHING_FACTOR};
use crate::block::header::{BASE_BLOCK_SIZE, MAX_SIZE_SHIFT, PREFIX_LEN};
use crate::coding::{read_u40, read_u48, write_u40, write_u48};
use crate::schema::ValueCodec;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use varint_rs::{VarintReader, VarintWriter};

const OFFSET_MAP_ENTRY_LEN: usize = 2;
const FOOTER_LEN: usize = 2;

/// Largest number of entries a single value-index block may hold.
pub const MAX_ENTRIES_PER_BLOCK: usize = u16::MAX as usize;

fn body_capacity(shift: u8) -> usize {
    (BASE_BLOCK_SIZE << shift) - PREFIX_LEN
}

/// One value-index entry as supplied by the column writer: a pointer to a
/// completed child plus the first and last value of its subtree, already
/// in their codec-serialized form.
pub struct PendingEntry {
    pub pointer: ChildPointer,
    pub filter_pointer: Option<u64>,
    pub first_value: Vec<u8>,
    pub last_value: Vec<u8>,
}

fn encode_entry(entry: &PendingEntry, out: &mut Vec<u8>) -> Result<()> {
    write_u48(out, entry.pointer.first_row).map_err(Error::Io)?;
    write_u40(out, entry.pointer.child_offset).map_err(Error::Io)?;
    out.push(pack_shift_kind(
        entry.pointer.child_shift,
        entry.pointer.is_index,
        entry.filter_pointer.is_some(),
    ));
    if let Some(filter_offset) = entry.filter_pointer {
        write_u48(out, filter_offset).map_err(Error::Io)?;
    }
    out.write_usize_varint(entry.first_value.len()).map_err(Error::Io)?;
    out.extend_from_slice(&entry.first_value);
    out.write_usize_varint(entry.last_value.len()).map_err(Error::Io)?;
    out.extend_from_slice(&entry.last_value);
    Ok(())
}

/// Accumulates variable-length entries for a value-index block.
pub struct ValueIndexBuilder {
    shift: u8,
    entries: Vec<u8>,
    /// Byte offset, within `entries`, that each pushed entry starts at.
    starts: Vec<u16>,
}

impl Default for ValueIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueIndexBuilder {
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
                    return Err(Error::BoundsExceeded("value index block size"));
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

/// A decoded value-index entry.
#[derive(Debug)]
pub struct DecodedEntry<'a> {
    pub pointer: ChildPointer,
    pub filter_pointer: Option<u64>,
    pub first_value: &'a [u8],
    pub last_value: &'a [u8],
}

/// Reads a sealed value-index block body.
pub struct ValueIndexReader<'a> {
    body: &'a [u8],
    count: u16,
    offset_map_start: usize,
}

impl<'a> ValueIndexReader<'a> {
    pub fn new(body: &'a [u8]) -> Result<Self> {
        if body.len() < FOOTER_LEN {
            return Err(Error::InvariantViolated("value index body shorter than footer"));
        }

        let mut footer = &body[body.len() - FOOTER_LEN..];
        let count = footer.read_u16::<LittleEndian>().map_err(Error::Io)?;

        let trailer_len = count as usize * OFFSET_MAP_ENTRY_LEN + FOOTER_LEN;
        if trailer_len > body.len() {
            return Err(Error::InvariantViolated("value index trailer longer than body"));
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
            return Err(Error::BoundsExceeded("value index entry"));
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
        let (child_shift, is_index, has_filter) = unpack_shift_kind(byte);

        let filter_pointer = if has_filter {
            Some(read_u48(&mut cursor).map_err(Error::Io)?)
        } else {
            None
        };

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
            filter_pointer,
            first_value,
            last_value,
        })
    }

    /// Returns the index of the least entry whose `last_value >= needle`
    /// under `C`'s order, or `self.len()` if every entry sorts before it.
    pub fn lower_bound<C: ValueCodec>(&self, needle: &C::Archived<'a>) -> Result<usize> {
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

        Ok(left)
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
    fn builds_and_reads_back() {
        let mut builder = ValueIndexBuilder::new();
        for i in 0..50u64 {
            let entry = PendingEntry {
                pointer: ChildPointer {
                    child_offset: i * 8192,
                    child_shift: 1,
                    is_index: false,
                    first_row: i * 10,
                },
                filter_pointer: Some(i * 2),
                first_value: serialize_u64(i * 10),
                last_value: serialize_u64(i * 10 + 9),
            };
            assert!(matches!(builder.push(&entry).unwrap(), Push::Pushed));
        }

        let body = builder.finish();
        let reader = ValueIndexReader::new(&body).unwrap();
        assert_eq!(reader.len(), 50);

        for i in 0..50u64 {
            let decoded = reader.entry(i as usize).unwrap();
            assert_eq!(decoded.pointer.first_row, i * 10);
            assert_eq!(decoded.filter_pointer, Some(i * 2));
            assert_eq!(FixedU64Codec::view(decoded.first_value, 0), i * 10);
            assert_eq!(FixedU64Codec::view(decoded.last_value, 0), i * 10 + 9);
        }
    }

    #[test]
    fn lower_bound_descends_correctly() {
        let mut builder = ValueIndexBuilder::new();
        for i in 0..10u64 {
            let entry = PendingEntry {
                pointer: ChildPointer {
                    child_offset: i,
                    child_shift: 1,
                    is_index: false,
                    first_row: i * 10,
                },
                filter_pointer: None,
                first_value: serialize_u64(i * 10),
                last_value: serialize_u64(i * 10 + 9),
            };
            builder.push(&entry).unwrap();
        }
        let body = builder.finish();
        let reader = ValueIndexReader::new(&body).unwrap();

        let needle = 35u64;
        let idx = reader.lower_bound::<FixedU64Codec>(&needle).unwrap();
        assert_eq!(idx, 3); // block 3 covers [30, 39]
    }
}
