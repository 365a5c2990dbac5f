// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The schema collaborator: the only place this crate knows how a value is
//! serialized.
//!
//! The core never decodes a value to compare or copy it; it only asks a
//! [`ValueCodec`] for an [`ValueCodec::Archived`] view rooted at a byte
//! offset inside a block. Two reference codecs ship with the crate —
//! [`FixedU64Codec`] and [`BytesCodec`] — enough to make the crate's own
//! tests self-contained without requiring a generated schema toolchain.

use varint_rs::{VarintReader, VarintWriter};

/// Serializes and views values of one archived type.
///
/// `serialize` appends a value's position-independent encoding to `out`;
/// `view` re-derives an [`Ord`]-able handle to that encoding given only the
/// block's bytes and the root offset recorded in the data block trailer.
/// Implementors never frame more than one value per `serialize` call — the
/// data block is responsible for delimiting values.
pub trait ValueCodec {
    /// Alignment the root of a serialized value must start at. Must be a
    /// power of two no greater than 64.
    const ALIGN: usize;

    /// The unarchived, caller-facing representation fed to `serialize`.
    type Value: ?Sized;

    /// A zero-copy, totally ordered view over a serialized value.
    type Archived<'a>: Ord
    where
        Self: 'a;

    /// Appends `value`'s serialized form to `out`. Callers are responsible
    /// for inserting alignment padding before calling this.
    fn serialize(value: &Self::Value, out: &mut Vec<u8>);

    /// Re-derives a view of the value rooted at `root_offset` within
    /// `bytes`.
    fn view(bytes: &[u8], root_offset: usize) -> Self::Archived<'_>;
}

/// Reference codec for fixed-width `u64` keys, stored little-endian at
/// 8-byte alignment.
#[derive(Copy, Clone, Debug, Default)]
pub struct FixedU64Codec;

impl ValueCodec for FixedU64Codec {
    const ALIGN: usize = 8;

    type Value = u64;
    type Archived<'a> = u64;

    fn serialize(value: &u64, out: &mut Vec<u8>) {
        out.extend_from_slice(&value.to_le_bytes());
    }

    fn view(bytes: &[u8], root_offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[root_offset..root_offset + 8]);
        u64::from_le_bytes(buf)
    }
}

/// Reference codec for arbitrary opaque byte strings, length-prefixed with
/// a varint and stored at 1-byte alignment.
#[derive(Copy, Clone, Debug, Default)]
pub struct BytesCodec;

impl ValueCodec for BytesCodec {
    const ALIGN: usize = 1;

    type Value = [u8];
    type Archived<'a> = &'a [u8];

    fn serialize(value: &[u8], out: &mut Vec<u8>) {
        out.write_usize_varint(value.len()).expect("writing to a Vec cannot fail");
        out.extend_from_slice(value);
    }

    fn view(bytes: &[u8], root_offset: usize) -> &[u8] {
        let mut cursor = &bytes[root_offset..];
        let len = cursor.read_usize_varint().expect("well-formed length prefix");
        let data_start = bytes.len() - cursor.len();
        &bytes[data_start..data_start + len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_u64_roundtrip() {
        let mut buf = vec![0u8; 4];
        FixedU64Codec::serialize(&0xdead_beefu64, &mut buf);
        assert_eq!(FixedU64Codec::view(&buf, 4), 0xdead_beef);
    }

    #[test]
    fn bytes_codec_roundtrip() {
        let mut buf = vec![];
        BytesCodec::serialize(b"hello", &mut buf);
        BytesCodec::serialize(b"world!", &mut buf);

        let first = BytesCodec::view(&buf, 0);
        assert_eq!(first, b"hello");

        let second = BytesCodec::view(&buf, 1 + 5);
        assert_eq!(second, b"world!");
    }

    #[test]
    fn bytes_codec_orders_like_slices() {
        assert!(b"abc".as_slice() < b"abd".as_slice());
    }
}
