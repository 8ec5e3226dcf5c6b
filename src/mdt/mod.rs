// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

//! Metadata-inode layer: block-addressed I/O against sparse metadata files.
//!
//! The checkpoint file addresses its backing store through the
//! [`MetadataStore`] trait. Blocks are allocated lazily on first write into
//! their range; an offset that was never written (or whose block was
//! reclaimed) is a hole and reads as [`Error::NotFound`]. Mutated blocks stay
//! buffered in memory until the segment writer flushes them.

mod file_backend;
mod memory_store;
mod metadata_file;

#[cfg(test)]
pub use file_backend::MockFileBackend;
pub use file_backend::{FileBackend, UnixFile};
pub use memory_store::MemoryStore;
pub use metadata_file::MetadataFile;

use crate::error::Error;

/// Access mode of a metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn read_only(self) -> bool {
        matches!(self, AccessMode::ReadOnly)
    }
}

/// Contract the checkpoint file consumes from the metadata layer.
///
/// Block contents travel by value: a getter hands out a copy, and a mutation
/// is a read-modify-write round trip through [`MetadataStore::write_block`],
/// which also marks the block dirty for the next flush. Because every
/// mutation re-reads current content, updates that land in the same block
/// through different logical handles compose correctly.
#[cfg_attr(test, mockall::automock)]
pub trait MetadataStore: Send + Sync {
    /// The monotone "next checkpoint number" counter. Checkpoint numbers below
    /// this value are eligible for lookup; the host advances it once a
    /// checkpoint has been written out.
    fn next_cno(&self) -> u64;

    fn block_size(&self) -> usize;

    fn read_only(&self) -> bool;

    /// Returns a copy of the block at `blkoff`, or [`Error::NotFound`] for a
    /// hole.
    fn get_block(&self, blkoff: u64) -> Result<Vec<u8>, Error>;

    /// Like [`MetadataStore::get_block`], but allocates the block when it does
    /// not exist. The flag reports a fresh allocation; a fresh block is
    /// zero-filled and the caller is expected to format it before use.
    fn get_or_create_block(&self, blkoff: u64) -> Result<(Vec<u8>, bool), Error>;

    /// Finds the first existing block in `start..=end` and returns its offset
    /// and content, or [`Error::NotFound`] when the whole range is holes.
    fn find_block(&self, start: u64, end: u64) -> Result<(u64, Vec<u8>), Error>;

    /// Replaces the content of an existing block and marks it dirty.
    fn write_block(&self, blkoff: u64, data: &[u8]) -> Result<(), Error>;

    /// Turns the block at `blkoff` back into a hole.
    fn delete_block(&self, blkoff: u64) -> Result<(), Error>;

    /// Marks the owning inode dirty so the next flush rewrites its record.
    fn mark_dirty(&self);
}
