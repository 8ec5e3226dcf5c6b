// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

use thiserror::Error;

/// The error type for checkpoint file operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The addressed checkpoint, snapshot or block does not exist.
    #[error("no such checkpoint")]
    NotFound,
    /// The checkpoint number is outside the valid range or names a dead entry.
    #[error("invalid checkpoint")]
    InvalidCheckpoint,
    /// A checkpoint range with `start == 0` or `start > end`.
    #[error("invalid checkpoint range")]
    InvalidRange,
    /// The checkpoint entry size does not fit the block geometry.
    #[error("unsupported checkpoint entry size")]
    InvalidEntrySize,
    /// The checkpoint is pinned: a snapshot cannot be deleted, and a mounted
    /// checkpoint cannot be demoted to a plain checkpoint.
    #[error("checkpoint is in use")]
    Busy,
    /// The on-disk state contradicts itself. Not retried.
    #[error("checkpoint metadata corruption")]
    Corruption,
    /// Write access on a read-only filesystem.
    #[error("read-only filesystem")]
    ReadOnly,
    #[error("I/O error in metadata store: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The negative POSIX error code of this error, for callers bridging to
    /// FUSE or an FFI boundary.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NotFound => -2,          // ENOENT
            Error::InvalidCheckpoint | Error::InvalidRange | Error::InvalidEntrySize => -22, // EINVAL
            Error::Busy => -16,             // EBUSY
            Error::Corruption => -5,        // EIO
            Error::ReadOnly => -30,         // EROFS
            Error::Io(_) => -5,             // EIO
        }
    }
}
