// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The buffer pool: an in-memory, byte-weighted cache of block bodies,
//! shared across however many [`crate::cursor::Cursor`]s are open against
//! however many layer files.
//!
//! A cursor asks the pool for a block by `(FileId, BlockOffset)` before
//! falling back to [`crate::block::read_block`]; a hit skips the I/O
//! collaborator entirely.

use crate::block::{self, BlockKind, BlockOffset};
use crate::io::BlockIo;
use crate::{Result, Slice};
use quick_cache::sync::{Cache, DefaultLifecycle};
use quick_cache::Weighter;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FILE_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies one open layer file's blocks within a shared buffer pool.
///
/// Layer files have no on-disk identity of their own (two copies of the
/// same file are indistinguishable once opened), so a `FileId` is minted
/// fresh for every [`crate::file_reader::FileReader::open`] call rather
/// than derived from the file's contents or path.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FileId(u64);

impl FileId {
    /// Mints a new, process-unique file id.
    #[must_use]
    pub fn new() -> Self {
        Self(NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for FileId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash)]
struct CacheKey(FileId, u64);

type CachedBlock = (BlockKind, u8, Slice);

#[derive(Clone)]
struct BlockWeighter;

impl Weighter<CacheKey, CachedBlock> for BlockWeighter {
    fn weight(&self, _key: &CacheKey, block: &CachedBlock) -> u64 {
        block.2.len() as u64
    }
}

/// Shared, byte-weighted cache of block bodies, keyed by file and offset.
pub struct BufferPool {
    data: Cache<CacheKey, CachedBlock, BlockWeighter, rustc_hash::FxBuildHasher>,
    capacity: u64,
}

impl BufferPool {
    /// Creates a pool holding roughly `bytes` worth of block bodies. `0`
    /// disables caching: [`Self::get_or_read`] always falls through to the
    /// I/O collaborator and nothing is retained.
    #[must_use]
    pub fn with_capacity_bytes(bytes: u64) -> Self {
        let cache = Cache::with(
            1_000_000,
            bytes,
            BlockWeighter,
            rustc_hash::FxBuildHasher,
            DefaultLifecycle::default(),
        );
        Self {
            data: cache,
            capacity: bytes,
        }
    }

    /// Bytes currently held in the pool.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.weight()
    }

    /// Configured capacity, in bytes.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Number of cached block bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the pool currently holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the block body at `(file, offset)`, reading and verifying it
    /// via `io` on a miss. A hit trusts the copy cached from a prior
    /// verified read and performs no I/O at all.
    pub fn get_or_read(
        &self,
        io: &dyn BlockIo,
        file: FileId,
        offset: BlockOffset,
    ) -> Result<(BlockKind, u8, Slice)> {
        let key = CacheKey(file, offset.0);

        if let Some((kind, flags, body)) = self.data.get(&key) {
            return Ok((kind, flags, body));
        }

        let (kind, flags, body) = block::read_block(io, offset)?;
        if self.capacity > 0 {
            self.data.insert(key, (kind, flags, body.clone()));
        }
        Ok((kind, flags, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockKind as Kind;
    use crate::io::StdFileIo;
    use test_log::test;

    #[test]
    fn caches_across_repeated_reads() -> Result<()> {
        let dir = tempfile::tempdir().map_err(crate::Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(crate::Error::Io)?;
        let offset = block::write_block(&io, Kind::Data, b"hello pool")?;

        let pool = BufferPool::with_capacity_bytes(1024 * 1024);
        let file = FileId::new();

        assert!(pool.is_empty());
        let (kind, _flags, body) = pool.get_or_read(&io, file, offset)?;
        assert_eq!(kind, Kind::Data);
        assert_eq!(&body[..10], b"hello pool");
        assert_eq!(pool.len(), 1);

        let (_, _, body2) = pool.get_or_read(&io, file, offset)?;
        assert_eq!(&body2[..10], b"hello pool");
        assert_eq!(pool.len(), 1);

        Ok(())
    }

    #[test]
    fn zero_capacity_disables_caching() -> Result<()> {
        let dir = tempfile::tempdir().map_err(crate::Error::Io)?;
        let io = StdFileIo::create_new(&dir.path().join("f.bin")).map_err(crate::Error::Io)?;
        let offset = block::write_block(&io, Kind::Data, b"abc")?;

        let pool = BufferPool::with_capacity_bytes(0);
        let file = FileId::new();
        pool.get_or_read(&io, file, offset)?;
        assert!(pool.is_empty());

        Ok(())
    }
}
