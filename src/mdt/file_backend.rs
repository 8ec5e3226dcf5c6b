// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

use std::{fs::OpenOptions, os::unix::fs::FileExt, path::Path};

/// Positioned file I/O used by the metadata layer.
///
/// Implementations must be safe for concurrent calls on non-overlapping
/// regions of the file.
#[allow(clippy::len_without_is_empty)]
#[cfg_attr(test, mockall::automock)]
pub trait FileBackend: Send + Sync {
    /// Opens a file at the given path with the specified options and tries to
    /// acquire a file lock.
    fn open(path: &Path, options: OpenOptions) -> std::io::Result<Self>
    where
        Self: Sized;

    /// Fills the entire `buf` with data read from the file starting at `offset`.
    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()>;

    /// Writes the entire content of `buf` starting at `offset`.
    fn write_all_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()>;

    /// Truncates or extends the underlying file to `len` bytes.
    fn set_len(&self, len: u64) -> std::io::Result<()>;

    /// Returns the size of this file in bytes.
    fn len(&self) -> std::io::Result<u64>;

    /// Flushes all changes to disk.
    fn flush(&self) -> std::io::Result<()>;
}

/// A [`FileBackend`] built on the Unix `pread`/`pwrite` calls, which do not
/// touch the file offset and therefore need no cursor management. The
/// open-time lock keeps two handles from driving the same metadata file.
pub struct UnixFile(std::fs::File);

impl FileBackend for UnixFile {
    fn open(path: &Path, options: OpenOptions) -> std::io::Result<Self>
    where
        Self: Sized,
    {
        let file = options.open(path)?;
        file.try_lock()?;
        Ok(UnixFile(file))
    }

    fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
        self.0.read_exact_at(buf, offset)
    }

    fn write_all_at(&self, buf: &[u8], offset: u64) -> std::io::Result<()> {
        self.0.write_all_at(buf, offset)
    }

    fn set_len(&self, len: u64) -> std::io::Result<()> {
        self.0.set_len(len)
    }

    fn len(&self) -> std::io::Result<u64> {
        self.0.metadata().map(|m| m.len())
    }

    fn flush(&self) -> std::io::Result<()> {
        self.0.sync_all()
    }
}
