// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::kind::BlockKind;
use crate::checksum::Checksum;
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// The fixed 16-byte prefix every block starts with: a type magic, a
/// power-of-two size shift with flag bits, and an xxh3-64 checksum over
/// everything that follows the prefix.
pub const PREFIX_LEN: usize = 16;

/// The smallest block body size, before the `2^k` size-shift is applied.
pub const BASE_BLOCK_SIZE: usize = 4 * 1024;

/// Largest size shift a block prefix can encode.
pub const MAX_SIZE_SHIFT: u8 = 36;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub kind: BlockKind,
    pub size_shift: u8,
    pub flags: u8,
    pub checksum: Checksum,
}

impl Header {
    /// Returns the smallest shift `k` such that `4 KiB * 2^k >= PREFIX_LEN + payload_len`.
    pub fn shift_for_payload(payload_len: usize) -> Result<u8> {
        let needed = PREFIX_LEN + payload_len;
        let mut shift = 0u8;
        while (BASE_BLOCK_SIZE << shift) < needed {
            shift += 1;
            if shift > MAX_SIZE_SHIFT {
                return Err(Error::BoundsExceeded("block size shift"));
            }
        }
        Ok(shift)
    }

    /// Total on-disk size of a block with this header's size shift.
    #[must_use]
    pub fn block_size(&self) -> usize {
        BASE_BLOCK_SIZE << self.size_shift
    }

    pub fn encode_into<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_u32::<LittleEndian>(self.kind.into())?;
        writer.write_u8(self.size_shift)?;
        writer.write_u8(self.flags)?;
        writer.write_u16::<LittleEndian>(0)?; // reserved
        writer.write_u64::<LittleEndian>(self.checksum.into_u64())?;
        Ok(())
    }

    pub fn decode_from<R: std::io::Read>(reader: &mut R) -> Result<Self> {
        let magic = reader.read_u32::<LittleEndian>()?;
        let kind = BlockKind::try_from(magic)
            .map_err(|()| Error::InvariantViolated("unrecognized block type magic"))?;
        let size_shift = reader.read_u8()?;
        if size_shift > MAX_SIZE_SHIFT {
            return Err(Error::InvariantViolated("block size shift out of range"));
        }
        let flags = reader.read_u8()?;
        let _reserved = reader.read_u16::<LittleEndian>()?;
        let checksum = Checksum::from_raw(reader.read_u64::<LittleEndian>()?);

        Ok(Self {
            kind,
            size_shift,
            flags,
            checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = Header {
            kind: BlockKind::Data,
            size_shift: 3,
            flags: 0,
            checksum: Checksum::of(b"payload"),
        };

        let mut buf = vec![];
        header.encode_into(&mut buf).unwrap();
        assert_eq!(buf.len(), PREFIX_LEN);

        let decoded = Header::decode_from(&mut &buf[..]).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn shift_for_payload_grows_with_size() {
        assert_eq!(Header::shift_for_payload(0).unwrap(), 0);
        assert_eq!(Header::shift_for_payload(BASE_BLOCK_SIZE).unwrap(), 1);
        assert_eq!(Header::shift_for_payload(BASE_BLOCK_SIZE * 3).unwrap(), 2);
    }

    #[test]
    fn rejects_corrupt_magic() {
        let mut buf = vec![0u8; PREFIX_LEN];
        buf[0..4].copy_from_slice(&0xdead_beefu32.to_le_bytes());
        assert!(Header::decode_from(&mut &buf[..]).is_err());
    }
}
