// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The I/O collaborator: the only place this crate touches a filesystem.
//!
//! Everything above [`BlockIo`] only ever asks for byte ranges, appends, and
//! a handful of durability primitives. Swapping [`StdFileIo`] for an
//! in-memory or network-backed implementation should not require touching
//! any other module.

use crate::Slice;
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Abstracts the durable storage a layer file is read from and written to.
pub trait BlockIo: Send + Sync {
    /// Reads exactly `size` bytes starting at `offset`.
    fn read_exact(&self, offset: u64, size: usize) -> std::io::Result<Slice>;

    /// Appends `buf` to the end of the file, returning the offset it was
    /// written at.
    fn append(&self, buf: &[u8]) -> std::io::Result<u64>;

    /// Flushes buffered writes and fsyncs the file to durable storage.
    fn fsync(&self) -> std::io::Result<()>;

    /// Hints that the range `[offset, offset + size)` will likely be read
    /// soon. The default implementation does nothing; backends that can
    /// issue a real readahead should override it.
    fn prefetch(&self, offset: u64, size: usize) -> std::io::Result<()> {
        let _ = (offset, size);
        Ok(())
    }

    /// Returns the current length of the file.
    fn len(&self) -> std::io::Result<u64>;

    /// Returns whether the file is currently empty.
    fn is_empty(&self) -> std::io::Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// `std::fs`-backed [`BlockIo`] implementation.
///
/// Reads use positioned I/O (`pread` on Unix, `seek_read` on Windows) so
/// concurrent cursors never need to coordinate a shared file position.
/// Appends are serialized through a mutex, matching the single-writer
/// assumption of [`crate::file_writer`].
pub struct StdFileIo {
    file: File,
    write_pos: Mutex<u64>,
}

impl StdFileIo {
    /// Opens `path` for reading only.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            write_pos: Mutex::new(len),
        })
    }

    /// Creates a new file at `path`, failing if one already exists.
    pub fn create_new(path: &Path) -> std::io::Result<Self> {
        let file = File::create_new(path)?;
        Ok(Self {
            file,
            write_pos: Mutex::new(0),
        })
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(&self.file, buf, offset)
    }

    #[cfg(unix)]
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        std::os::unix::fs::FileExt::write_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn write_at(&self, buf: &[u8], offset: u64) -> std::io::Result<usize> {
        std::os::windows::fs::FileExt::seek_write(&self.file, buf, offset)
    }
}

impl BlockIo for StdFileIo {
    fn read_exact(&self, offset: u64, size: usize) -> std::io::Result<Slice> {
        #[expect(
            unsafe_code,
            reason = "buffer is fully written by read_at before being frozen, or discarded on error"
        )]
        let mut builder = unsafe { Slice::builder_unzeroed(size) };

        let bytes_read = self.read_at(&mut builder, offset)?;
        if bytes_read != size {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read_exact({bytes_read}) at {offset} did not read enough bytes ({size} requested)"),
            ));
        }

        Ok(builder.freeze().into())
    }

    fn append(&self, buf: &[u8]) -> std::io::Result<u64> {
        let mut pos = self.write_pos.lock().expect("mutex poisoned");
        let offset = *pos;
        let mut written = 0;
        while written < buf.len() {
            written += self.write_at(&buf[written..], offset + written as u64)?;
        }
        *pos += buf.len() as u64;
        Ok(offset)
    }

    fn fsync(&self) -> std::io::Result<()> {
        self.file.sync_all()
    }

    fn len(&self) -> std::io::Result<u64> {
        Ok(*self.write_pos.lock().expect("mutex poisoned"))
    }
}

/// Atomically replaces the contents of `path` with `content`.
///
/// Writes to a named temporary file in the same directory, fsyncs it, then
/// renames it over `path`; on POSIX this rename is atomic, so readers never
/// observe a partially written file.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let folder = path
        .parent()
        .expect("layer file path should have a parent directory");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;

    #[cfg(not(target_os = "windows"))]
    fsync_directory(folder)?;

    Ok(())
}

/// Fsyncs a directory so a prior rename or create within it is durable.
///
/// This is a no-op on Windows, which has no directory fsync primitive.
#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Returns the absolute form of `path` without requiring the path to exist.
pub fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    std::path::absolute(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn std_file_io_append_and_read() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.bin");
        let io = StdFileIo::create_new(&path)?;

        let off_a = io.append(b"hello ")?;
        let off_b = io.append(b"world")?;
        assert_eq!(off_a, 0);
        assert_eq!(off_b, 6);
        assert_eq!(io.len()?, 11);

        io.fsync()?;

        let io = StdFileIo::open(&path)?;
        assert_eq!(&*io.read_exact(0, 6)?, b"hello ");
        assert_eq!(&*io.read_exact(6, 5)?, b"world");

        Ok(())
    }

    #[test]
    fn atomic_rewrite() -> std::io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("test.txt");
        std::fs::write(&path, b"asdasdasdasdasd")?;

        rewrite_atomic(&path, b"newcontent")?;

        assert_eq!(std::fs::read_to_string(&path)?, "newcontent");

        Ok(())
    }
}
