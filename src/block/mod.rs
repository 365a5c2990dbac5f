// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The block layer: the self-describing, checksummed unit every other part
//! of a layer file is built from.
//!
//! A block on disk is a 16-byte [`Header`] (see [`header`]) followed by a
//! body of `4 KiB * 2^k` minus the header size, zero-padded. Callers supply
//! and parse their own body layout (data blocks, index blocks, filter
//! blocks); the block layer only guarantees the body's integrity via its
//! checksum.

pub mod header;
pub mod kind;
pub mod offset;

pub use header::Header;
pub use kind::BlockKind;
pub use offset::BlockOffset;

use crate::checksum::Checksum;
use crate::io::BlockIo;
use crate::{Error, Result, Slice};
use header::{BASE_BLOCK_SIZE, PREFIX_LEN};

/// Writes `payload` as a block of kind `kind`, padded up to the next
/// power-of-two body size, and returns the offset it was written at.
pub fn write_block(io: &dyn BlockIo, kind: BlockKind, payload: &[u8]) -> Result<BlockOffset> {
    write_block_with_flags(io, kind, 0, payload)
}

/// Like [`write_block`], but lets the caller stash a byte of block-local
/// metadata (e.g. the data block's "has row ranges" bit) in the header.
///
/// If `payload.len()` already equals a legal body size for some shift `k`
/// (as produced by a caller that pre-pads its own footer to the block
/// boundary), the block is written at exactly that size with no further
/// padding.
pub fn write_block_with_flags(
    io: &dyn BlockIo,
    kind: BlockKind,
    flags: u8,
    payload: &[u8],
) -> Result<BlockOffset> {
    let size_shift = Header::shift_for_payload(payload.len())?;
    let block_size = BASE_BLOCK_SIZE << size_shift;

    let mut buf = vec![0u8; block_size];
    buf[PREFIX_LEN..PREFIX_LEN + payload.len()].copy_from_slice(payload);

    let checksum = Checksum::of(&buf[PREFIX_LEN..]);
    let header = Header {
        kind,
        size_shift,
        flags,
        checksum,
    };
    let mut prefix_slice = &mut buf[..PREFIX_LEN];
    header
        .encode_into(&mut prefix_slice)
        .map_err(Error::WriteFailed)?;

    let offset = io.append(&buf).map_err(Error::WriteFailed)?;
    Ok(BlockOffset(offset))
}

/// Reads the block at `offset`, verifies its checksum, and returns its
/// kind, flags, and body (including any trailing zero padding — the
/// caller's own layout determines where real content ends).
pub fn read_block(io: &dyn BlockIo, offset: BlockOffset) -> Result<(BlockKind, u8, Slice)> {
    let prefix = io.read_exact(offset.0, PREFIX_LEN)?;
    let header = Header::decode_from(&mut &*prefix)?;

    let body_len = header.block_size() - PREFIX_LEN;
    let body = io.read_exact(offset.0 + PREFIX_LEN as u64, body_len)?;

    let got = Checksum::of(&body);
    if got != header.checksum {
        return Err(Error::CorruptBlock {
            offset: offset.0,
            got,
            expected: header.checksum,
        });
    }

    Ok((header.kind, header.flags, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::StdFileIo;
    use test_log::test;

    #[test]
    fn write_then_read_block_roundtrip() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(Error::Io)?;

        let payload = b"hello block layer";
        let offset = write_block(&io, BlockKind::Data, payload)?;
        assert_eq!(offset, BlockOffset(0));

        let (kind, flags, body) = read_block(&io, offset)?;
        assert_eq!(kind, BlockKind::Data);
        assert_eq!(flags, 0);
        assert_eq!(&body[..payload.len()], payload);
        assert!(body[payload.len()..].iter().all(|&b| b == 0));

        Ok(())
    }

    #[test]
    fn detects_corruption() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let path = dir.path().join("f.bin");
        let io = StdFileIo::create_new(&path).map_err(Error::Io)?;

        let offset = write_block(&io, BlockKind::Data, b"abc")?;
        drop(io);

        // Flip a byte in the body.
        use std::io::{Read, Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new().write(true).read(true).open(&path).map_err(Error::Io)?;
        file.seek(SeekFrom::Start(offset.0 + PREFIX_LEN as u64)).map_err(Error::Io)?;
        let mut byte = [0u8; 1];
        file.read_exact(&mut byte).map_err(Error::Io)?;
        file.seek(SeekFrom::Start(offset.0 + PREFIX_LEN as u64)).map_err(Error::Io)?;
        file.write_all(&[byte[0] ^ 0xff]).map_err(Error::Io)?;
        drop(file);

        let io = StdFileIo::open(&path).map_err(Error::Io)?;
        assert!(matches!(
            read_block(&io, offset),
            Err(Error::CorruptBlock { .. })
        ));

        Ok(())
    }

    #[test]
    fn grows_with_oversized_payload() -> Result<()> {
        let dir = tempfile::tempdir().map_err(Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(Error::Io)?;

        let payload = vec![7u8; BASE_BLOCK_SIZE * 2];
        let offset = write_block(&io, BlockKind::Filter, &payload)?;
        let (kind, _flags, body) = read_block(&io, offset)?;
        assert_eq!(kind, BlockKind::Filter);
        assert_eq!(&body[..payload.len()], &payload[..]);

        Ok(())
    }
}
