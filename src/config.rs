// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Writer- and reader-side tuning knobs.

use crate::index_block::MIN_BRANCHING_FACTOR;

/// How aggressively (if at all) a column builds a filter tree alongside its
/// value index.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum FilterPolicy {
    /// No filter tree; point queries always descend the value index.
    #[default]
    None,
    /// 8 bits per key, trading a higher false-positive rate for a smaller
    /// filter tree.
    Bits8,
    /// 16 bits per key, trading a larger filter tree for a lower
    /// false-positive rate.
    Bits16,
}

impl FilterPolicy {
    /// The bits-per-key value a [`crate::column_writer::ColumnWriter`]
    /// should pass as `filter_bpk`, or `None` if filtering is disabled.
    #[must_use]
    pub fn bits_per_key(self) -> Option<f32> {
        match self {
            Self::None => None,
            Self::Bits8 => Some(8.0),
            Self::Bits16 => Some(16.0),
        }
    }
}

/// Checksum algorithm recorded in the file header.
///
/// Only one variant exists today; the enum exists so a future format
/// version can add one without breaking the header's on-disk shape.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum ChecksumAlgorithm {
    /// xxh3-64, the only algorithm this crate currently writes or reads.
    #[default]
    Xxh3,
}

/// Tuning knobs for [`crate::column_writer::ColumnWriter`] /
/// [`crate::file_writer::FileWriter`].
#[derive(Copy, Clone, Debug)]
pub struct WriterConfig {
    /// Per-column filter policy.
    pub filter_policy: FilterPolicy,
    /// Checksum algorithm to record in the header. Writers only ever
    /// produce [`ChecksumAlgorithm::Xxh3`] today; this field documents the
    /// intent rather than changing behavior.
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            filter_policy: FilterPolicy::default(),
            checksum_algorithm: ChecksumAlgorithm::default(),
        }
    }
}

impl WriterConfig {
    /// Builder-style setter for the filter policy.
    #[must_use]
    pub fn with_filter_policy(mut self, policy: FilterPolicy) -> Self {
        self.filter_policy = policy;
        self
    }

    /// The branching factor floor every index builder is grounded on;
    /// exposed so callers can reason about expected tree depth.
    #[must_use]
    pub fn min_branching_factor(&self) -> usize {
        MIN_BRANCHING_FACTOR
    }
}

/// Tuning knobs for reading a layer file through a
/// [`crate::buffer_pool::BufferPool`]-backed [`crate::cursor::Cursor`].
#[derive(Copy, Clone, Debug)]
pub struct ReaderConfig {
    /// Capacity, in bytes, of the shared buffer pool a reader should be
    /// opened against. `0` disables caching entirely.
    pub buffer_pool_capacity_bytes: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_pool_capacity_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ReaderConfig {
    /// Builder-style setter for the buffer pool capacity.
    #[must_use]
    pub fn with_buffer_pool_capacity_bytes(mut self, bytes: u64) -> Self {
        self.buffer_pool_capacity_bytes = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn filter_policy_maps_to_bits_per_key() {
        assert_eq!(FilterPolicy::None.bits_per_key(), None);
        assert_eq!(FilterPolicy::Bits8.bits_per_key(), Some(8.0));
        assert_eq!(FilterPolicy::Bits16.bits_per_key(), Some(16.0));
    }

    #[test]
    fn writer_config_defaults_to_no_filter() {
        let config = WriterConfig::default();
        assert_eq!(config.filter_policy, FilterPolicy::None);
        assert_eq!(config.min_branching_factor(), 32);
    }

    #[test]
    fn reader_config_default_capacity_is_nonzero() {
        assert!(ReaderConfig::default().buffer_pool_capacity_bytes > 0);
    }
}
