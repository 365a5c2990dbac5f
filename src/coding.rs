// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Error;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Trait to serialize a type into a byte stream.
pub trait Encode {
    /// Serializes into a writer.
    fn encode_into<W: Write>(&self, writer: &mut W) -> std::io::Result<()>;

    /// Serializes into a freshly allocated vector.
    fn encode_into_vec(&self) -> Vec<u8> {
        let mut v = vec![];
        self.encode_into(&mut v).expect("writing to a Vec cannot fail");
        v
    }
}

/// Trait to deserialize a type from a byte stream.
pub trait Decode {
    /// Deserializes from a reader.
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, Error>
    where
        Self: Sized;
}

/// Writes the low 40 bits of `value` as 5 little-endian bytes.
///
/// Used for the data block trailer's packed `(rootOffset, rowStart, rowEnd)`
/// fields, which never need the full 64-bit range.
pub fn write_u40<W: Write>(writer: &mut W, value: u64) -> std::io::Result<()> {
    debug_assert!(value < (1 << 40), "value does not fit in 40 bits");
    let bytes = value.to_le_bytes();
    writer.write_all(&bytes[..5])
}

/// Reads 5 little-endian bytes as a 40-bit unsigned integer.
pub fn read_u40<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes[..5])?;
    Ok(u64::from_le_bytes(bytes))
}

/// Writes the low 48 bits of `value` as 6 little-endian bytes.
///
/// Used for row positions and child offsets in index entries.
pub fn write_u48<W: Write>(writer: &mut W, value: u64) -> std::io::Result<()> {
    debug_assert!(value < (1 << 48), "value does not fit in 48 bits");
    let bytes = value.to_le_bytes();
    writer.write_all(&bytes[..6])
}

/// Reads 6 little-endian bytes as a 48-bit unsigned integer.
pub fn read_u48<R: Read>(reader: &mut R) -> std::io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes[..6])?;
    Ok(u64::from_le_bytes(bytes))
}

/// Writes a `u16` in little-endian order. Thin wrapper kept for symmetry
/// with the other packed-field helpers above.
pub fn write_u16<W: Write>(writer: &mut W, value: u16) -> std::io::Result<()> {
    writer.write_u16::<LittleEndian>(value)
}

/// Reads a little-endian `u16`.
pub fn read_u16<R: Read>(reader: &mut R) -> std::io::Result<u16> {
    reader.read_u16::<LittleEndian>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn u40_roundtrip() {
        for value in [0u64, 1, 255, 1 << 20, (1 << 40) - 1] {
            let mut buf = vec![];
            write_u40(&mut buf, value).unwrap();
            assert_eq!(buf.len(), 5);
            assert_eq!(read_u40(&mut &buf[..]).unwrap(), value);
        }
    }

    #[test]
    fn u48_roundtrip() {
        for value in [0u64, 1, 65535, 1 << 30, (1 << 48) - 1] {
            let mut buf = vec![];
            write_u48(&mut buf, value).unwrap();
            assert_eq!(buf.len(), 6);
            assert_eq!(read_u48(&mut &buf[..]).unwrap(), value);
        }
    }
}
