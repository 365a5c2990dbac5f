// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// A 64-bit xxh3 checksum over a byte range.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Checksum(u64);

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Checksum {
    /// Wraps a raw 64-bit checksum value.
    #[must_use]
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw 64-bit integer.
    #[must_use]
    pub fn into_u64(self) -> u64 {
        self.0
    }

    /// Hashes `bytes` with the same algorithm blocks are checksummed with.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_64(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::Checksum;

    #[test]
    fn checksum_of_is_deterministic() {
        assert_eq!(Checksum::of(b"hello world"), Checksum::of(b"hello world"));
        assert_ne!(Checksum::of(b"hello world"), Checksum::of(b"hello worlD"));
    }

    #[test]
    fn checksum_display_is_hex() {
        let sum = Checksum::from_raw(0xdead_beef);
        assert_eq!(format!("{sum}"), "00000000deadbeef");
    }
}
