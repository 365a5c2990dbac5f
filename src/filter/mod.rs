// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Approximate-membership filter blocks.
//!
//! Each filter block is a standalone double-hashed bloom filter over the
//! hashes of the values in one value-index subtree. The block body is just
//! `m:u64` (bit count), `k:u64` (hash round count), then the bit array —
//! there is no length field for the bit array because its size is always
//! `m` bits, padded out to the block's power-of-two body by zero bits that
//! are never addressed (every probed index is `< m`).

pub mod bit_array;

use bit_array::{BitArray, BitArrayView};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::f32::consts::LN_2;

const HEADER_LEN: usize = 16;

fn secondary_hash(h1: u64) -> u64 {
    h1.wrapping_shr(32).wrapping_mul(0x51_7c_c1_b7_27_22_0a_95)
}

/// Accumulates key hashes before the filter's size is known.
#[derive(Debug)]
pub struct FilterBuilder {
    inner: BitArray,
    m: usize,
    k: usize,
}

impl FilterBuilder {
    /// Builds a filter sized for `n` values at `bpk` bits per key.
    #[must_use]
    pub fn with_bpk(n: usize, bpk: f32) -> Self {
        assert!(n > 0, "filter must cover at least one value");
        assert!(bpk > 0.0, "bits per key must be positive");

        let m = n * (bpk as usize).max(1);
        let k = ((bpk * LN_2) as usize).max(1);
        let bytes = (m as f32 / 8.0).ceil() as usize;

        Self {
            inner: BitArray::with_capacity(bytes),
            m: bytes * 8,
            k,
        }
    }

    /// Adds a value's hash to the filter.
    pub fn set_with_hash(&mut self, mut h1: u64) {
        let mut h2 = secondary_hash(h1);

        for i in 1..=(self.k as u64) {
            let idx = (h1 % (self.m as u64)) as usize;
            self.inner.enable_bit(idx);

            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_mul(i);
        }
    }

    /// Serializes the filter as a block payload.
    #[must_use]
    pub fn finish(self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.inner.bytes().len());
        out.write_u64::<LittleEndian>(self.m as u64).expect("vec write");
        out.write_u64::<LittleEndian>(self.k as u64).expect("vec write");
        out.extend_from_slice(self.inner.bytes());
        out
    }
}

/// Hashes a value for filter insertion or lookup.
#[must_use]
pub fn hash_value(bytes: &[u8]) -> u64 {
    crate::hash::hash64(bytes)
}

/// Reads a sealed filter block body.
pub struct FilterReader<'a> {
    inner: BitArrayView<'a>,
    m: usize,
    k: usize,
}

impl<'a> FilterReader<'a> {
    pub fn new(body: &'a [u8]) -> crate::Result<Self> {
        if body.len() < HEADER_LEN {
            return Err(crate::Error::InvariantViolated("filter block body shorter than header"));
        }

        let mut cursor = &body[..HEADER_LEN];
        let m = cursor.read_u64::<LittleEndian>().map_err(crate::Error::Io)? as usize;
        let k = cursor.read_u64::<LittleEndian>().map_err(crate::Error::Io)? as usize;

        Ok(Self {
            inner: BitArrayView::new(&body[HEADER_LEN..]),
            m,
            k,
        })
    }

    /// Returns `true` if the hash may be present. Never false-negative.
    #[must_use]
    pub fn contains_hash(&self, mut h1: u64) -> bool {
        let mut h2 = secondary_hash(h1);

        for i in 1..=(self.k as u64) {
            let idx = (h1 % (self.m as u64)) as usize;
            if !self.inner.get(idx) {
                return false;
            }

            h1 = h1.wrapping_add(h2);
            h2 = h2.wrapping_mul(i);
        }

        true
    }

    /// Returns `true` if the value may be present. Never false-negative.
    #[must_use]
    pub fn contains(&self, value_bytes: &[u8]) -> bool {
        self.contains_hash(hash_value(value_bytes))
    }
}
