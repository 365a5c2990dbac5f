// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Identifies the contents of a block, recorded in its 16-byte prefix.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum BlockKind {
    /// A data block: independently serialized values plus a row trailer.
    Data = 0,

    /// A value-index block: descends a column by value order.
    ValueIndex = 1,

    /// A row-index block: descends a column by row position.
    RowIndex = 2,

    /// An approximate-membership-query filter block.
    Filter = 3,

    /// A filter-index block, pointing at filter blocks by value range.
    FilterIndex = 4,

    /// The file header block: magic, format version, column count, metadata.
    Header = 5,

    /// The file trailer block: per-column roots and row counts.
    Trailer = 6,
}

impl BlockKind {
    const fn magic(self) -> u32 {
        match self {
            Self::Data => u32::from_le_bytes(*b"LFDA"),
            Self::ValueIndex => u32::from_le_bytes(*b"LFVI"),
            Self::RowIndex => u32::from_le_bytes(*b"LFRI"),
            Self::Filter => u32::from_le_bytes(*b"LFFL"),
            Self::FilterIndex => u32::from_le_bytes(*b"LFFX"),
            Self::Header => u32::from_le_bytes(*b"LFHD"),
            Self::Trailer => u32::from_le_bytes(*b"LFTR"),
        }
    }
}

impl From<BlockKind> for u32 {
    fn from(value: BlockKind) -> Self {
        value.magic()
    }
}

impl TryFrom<u32> for BlockKind {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        for kind in [
            Self::Data,
            Self::ValueIndex,
            Self::RowIndex,
            Self::Filter,
            Self::FilterIndex,
            Self::Header,
            Self::Trailer,
        ] {
            if kind.magic() == value {
                return Ok(kind);
            }
        }
        Err(())
    }
}

#[cfg(test)]
mod tests {
    use super::BlockKind;

    #[test]
    fn magic_roundtrip() {
        for kind in [
            BlockKind::Data,
            BlockKind::ValueIndex,
            BlockKind::RowIndex,
            BlockKind::Filter,
            BlockKind::FilterIndex,
            BlockKind::Header,
            BlockKind::Trailer,
        ] {
            let magic: u32 = kind.into();
            assert_eq!(BlockKind::try_from(magic), Ok(kind));
        }
    }

    #[test]
    fn rejects_unknown_magic() {
        assert!(BlockKind::try_from(0xdead_beef).is_err());
    }
}
