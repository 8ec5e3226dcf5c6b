// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

use std::{
    collections::BTreeSet,
    fs::{self, OpenOptions},
    path::{Path, PathBuf},
};

use dashmap::DashMap;
use zerocopy::{
    FromBytes, Immutable, IntoBytes,
    little_endian::{U32, U64},
};

use crate::{
    error::Error,
    mdt::{AccessMode, FileBackend, MetadataStore},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// Geometry and counters persisted alongside the block data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable)]
struct MetaRecord {
    block_size: U32,
    pad: U32,
    next_cno: U64,
}

impl MetaRecord {
    /// Reads the record from `path`, initializing the file on a fresh
    /// writable store. A fresh read-only store is refused: a store without
    /// its meta record is not a store.
    fn read_or_init(path: &Path, block_size: usize, mode: AccessMode) -> Result<Self, Error> {
        if !fs::exists(path)? {
            if mode.read_only() {
                return Err(Error::Corruption);
            }
            let record = MetaRecord {
                block_size: U32::new(block_size as u32),
                pad: U32::new(0),
                next_cno: U64::new(1),
            };
            fs::write(path, record.as_bytes())?;
            return Ok(record);
        }
        let bytes = fs::read(path)?;
        MetaRecord::read_from_bytes(&bytes).map_err(|_| Error::Corruption)
    }

    fn write(&self, path: &Path) -> Result<(), Error> {
        fs::write(path, self.as_bytes())?;
        Ok(())
    }
}

struct BufferedBlock {
    data: Vec<u8>,
    dirty: bool,
}

/// A file-backed [`MetadataStore`].
///
/// The store lives in a directory holding three files: the dense block data,
/// the allocation table (which block offsets are not holes), and the meta
/// record. Mutations accumulate in an in-memory buffer until [`flush`]
/// writes them out; the flush stands in for the segment writer of the
/// surrounding filesystem, which persists dirty blocks in bulk.
///
/// [`flush`]: MetadataFile::flush
pub struct MetadataFile<F: FileBackend> {
    dir: PathBuf,
    blocks: F,
    block_size: usize,
    mode: AccessMode,
    /// Blocks paged in for reads plus everything touched since the last flush.
    buffer: DashMap<u64, BufferedBlock>,
    allocated: Mutex<BTreeSet<u64>>,
    next_cno: AtomicU64,
    inode_dirty: AtomicBool,
}

impl<F: FileBackend> MetadataFile<F> {
    pub const BLOCKS_FILE: &'static str = "blocks.bin";
    pub const ALLOCATION_FILE: &'static str = "allocated.bin";
    pub const META_FILE: &'static str = "meta.bin";

    /// Opens the store in `dir`, creating and initializing the files on a
    /// fresh writable store. Existing files are verified against the given
    /// block size.
    pub fn open(dir: &Path, block_size: usize, mode: AccessMode) -> Result<Self, Error> {
        if !mode.read_only() {
            fs::create_dir_all(dir)?;
        }

        let meta = MetaRecord::read_or_init(&dir.join(Self::META_FILE), block_size, mode)?;
        if meta.block_size.get() as usize != block_size {
            return Err(Error::Corruption);
        }

        let mut options = OpenOptions::new();
        options.read(true);
        if !mode.read_only() {
            options.create(true).truncate(false).write(true);
        }
        let blocks = F::open(&dir.join(Self::BLOCKS_FILE), options)?;
        let len = blocks.len()?;
        if len % block_size as u64 != 0 {
            return Err(Error::Corruption);
        }

        let mut allocated = BTreeSet::new();
        let allocation_path = dir.join(Self::ALLOCATION_FILE);
        if fs::exists(&allocation_path)? {
            let bytes = fs::read(&allocation_path)?;
            if bytes.len() % size_of::<u64>() != 0 {
                return Err(Error::Corruption);
            }
            for chunk in bytes.chunks_exact(size_of::<u64>()) {
                // chunks are exactly 8 bytes
                allocated.insert(u64::from_le_bytes(chunk.try_into().unwrap()));
            }
        }
        // Every allocated block must have been flushed into the data file.
        if let Some(&max) = allocated.iter().next_back() {
            if (max + 1) * block_size as u64 > len {
                return Err(Error::Corruption);
            }
        }

        Ok(MetadataFile {
            dir: dir.to_path_buf(),
            blocks,
            block_size,
            mode,
            buffer: DashMap::new(),
            allocated: Mutex::new(allocated),
            next_cno: AtomicU64::new(meta.next_cno.get()),
            inode_dirty: AtomicBool::new(false),
        })
    }

    /// Advances the "next checkpoint number" counter. Called by the host once
    /// a checkpoint has been written out, making it visible to lookups.
    pub fn advance_cno(&self) {
        self.next_cno.fetch_add(1, Ordering::Relaxed);
        self.inode_dirty.store(true, Ordering::Relaxed);
    }

    pub fn inode_dirty(&self) -> bool {
        self.inode_dirty.load(Ordering::Relaxed)
    }

    /// Writes all dirty blocks, the allocation table and the meta record to
    /// disk. A no-op on a read-only store.
    pub fn flush(&self) -> Result<(), Error> {
        if self.mode.read_only() {
            return Ok(());
        }

        for mut entry in self.buffer.iter_mut() {
            if !entry.dirty {
                continue;
            }
            let offset = *entry.key() * self.block_size as u64;
            self.blocks.write_all_at(&entry.data, offset)?;
            entry.dirty = false;
        }

        let words: Vec<U64> = self
            .allocated
            .lock()
            .unwrap()
            .iter()
            .map(|&blkoff| U64::new(blkoff))
            .collect();
        fs::write(self.dir.join(Self::ALLOCATION_FILE), words.as_slice().as_bytes())?;

        let meta = MetaRecord {
            block_size: U32::new(self.block_size as u32),
            pad: U32::new(0),
            next_cno: U64::new(self.next_cno.load(Ordering::Relaxed)),
        };
        meta.write(&self.dir.join(Self::META_FILE))?;

        self.blocks.flush()?;
        self.inode_dirty.store(false, Ordering::Relaxed);
        Ok(())
    }
}

impl<F: FileBackend> MetadataStore for MetadataFile<F> {
    fn next_cno(&self) -> u64 {
        self.next_cno.load(Ordering::Relaxed)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_only(&self) -> bool {
        self.mode.read_only()
    }

    fn get_block(&self, blkoff: u64) -> Result<Vec<u8>, Error> {
        if let Some(buffered) = self.buffer.get(&blkoff) {
            return Ok(buffered.data.clone());
        }
        if !self.allocated.lock().unwrap().contains(&blkoff) {
            return Err(Error::NotFound);
        }
        let mut data = vec![0; self.block_size];
        self.blocks
            .read_exact_at(&mut data, blkoff * self.block_size as u64)?;
        self.buffer.entry(blkoff).or_insert_with(|| BufferedBlock {
            data: data.clone(),
            dirty: false,
        });
        Ok(data)
    }

    fn get_or_create_block(&self, blkoff: u64) -> Result<(Vec<u8>, bool), Error> {
        match self.get_block(blkoff) {
            Ok(data) => Ok((data, false)),
            Err(Error::NotFound) => {
                if self.mode.read_only() {
                    return Err(Error::ReadOnly);
                }
                self.allocated.lock().unwrap().insert(blkoff);
                let data = vec![0; self.block_size];
                self.buffer.insert(
                    blkoff,
                    BufferedBlock {
                        data: data.clone(),
                        dirty: true,
                    },
                );
                self.inode_dirty.store(true, Ordering::Relaxed);
                Ok((data, true))
            }
            Err(e) => Err(e),
        }
    }

    fn find_block(&self, start: u64, end: u64) -> Result<(u64, Vec<u8>), Error> {
        if start > end {
            return Err(Error::NotFound);
        }
        let found = self
            .allocated
            .lock()
            .unwrap()
            .range(start..=end)
            .next()
            .copied();
        match found {
            Some(blkoff) => Ok((blkoff, self.get_block(blkoff)?)),
            None => Err(Error::NotFound),
        }
    }

    fn write_block(&self, blkoff: u64, data: &[u8]) -> Result<(), Error> {
        if self.mode.read_only() {
            return Err(Error::ReadOnly);
        }
        debug_assert_eq!(data.len(), self.block_size);
        if !self.allocated.lock().unwrap().contains(&blkoff) {
            return Err(Error::NotFound);
        }
        self.buffer.insert(
            blkoff,
            BufferedBlock {
                data: data.to_vec(),
                dirty: true,
            },
        );
        Ok(())
    }

    fn delete_block(&self, blkoff: u64) -> Result<(), Error> {
        if self.mode.read_only() {
            return Err(Error::ReadOnly);
        }
        if !self.allocated.lock().unwrap().remove(&blkoff) {
            return Err(Error::NotFound);
        }
        self.buffer.remove(&blkoff);
        self.inode_dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn mark_dirty(&self) {
        self.inode_dirty.store(true, Ordering::Relaxed);
    }
}

impl<F: FileBackend> Drop for MetadataFile<F> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::mdt::{MockFileBackend, UnixFile};

    const BS: usize = 512;

    fn store_over_mock(dir: &Path, blocks: MockFileBackend) -> MetadataFile<MockFileBackend> {
        let store = MetadataFile {
            dir: dir.to_path_buf(),
            blocks,
            block_size: BS,
            mode: AccessMode::ReadWrite,
            buffer: DashMap::new(),
            allocated: Mutex::new(BTreeSet::from([1])),
            next_cno: AtomicU64::new(1),
            inode_dirty: AtomicBool::new(true),
        };
        store.buffer.insert(
            1,
            BufferedBlock {
                data: vec![9; BS],
                dirty: true,
            },
        );
        store
    }

    #[test]
    fn flush_writes_dirty_blocks_at_their_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = MockFileBackend::new();
        blocks
            .expect_write_all_at()
            .with(eq([9u8; BS]), eq(BS as u64))
            .times(1)
            .returning(|_, _| Ok(()));
        blocks.expect_flush().returning(|| Ok(()));

        let store = store_over_mock(dir.path(), blocks);
        store.flush().unwrap();
        assert!(!store.inode_dirty());
        // a second flush finds nothing dirty; times(1) above verifies it
        store.flush().unwrap();
    }

    #[test]
    fn flush_propagates_backend_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mut blocks = MockFileBackend::new();
        blocks
            .expect_write_all_at()
            .returning(|_, _| Err(std::io::Error::other("device gone")));

        let store = store_over_mock(dir.path(), blocks);
        assert!(matches!(store.flush(), Err(Error::Io(_))));
        // the block stays dirty for the next attempt
        assert!(store.buffer.get(&1).unwrap().dirty);
    }

    fn open_rw(dir: &Path) -> MetadataFile<UnixFile> {
        MetadataFile::open(dir, BS, AccessMode::ReadWrite).unwrap()
    }

    #[test]
    fn open_initializes_fresh_store() {
        let dir = tempfile::tempdir().unwrap();

        let store = open_rw(dir.path());
        assert_eq!(store.next_cno(), 1);
        assert_eq!(store.block_size(), BS);
        assert!(!store.read_only());
        assert!(fs::exists(dir.path().join(MetadataFile::<UnixFile>::META_FILE)).unwrap());
    }

    #[test]
    fn open_read_only_fails_on_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let result = MetadataFile::<UnixFile>::open(dir.path(), BS, AccessMode::ReadOnly);
        assert!(matches!(result, Err(Error::Corruption)));
    }

    #[test]
    fn open_rejects_block_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        drop(open_rw(dir.path()));

        let result = MetadataFile::<UnixFile>::open(dir.path(), BS * 2, AccessMode::ReadWrite);
        assert!(matches!(result, Err(Error::Corruption)));
    }

    #[test]
    fn open_rejects_truncated_meta_record() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MetadataFile::<UnixFile>::META_FILE), [0; 3]).unwrap();

        let result = MetadataFile::<UnixFile>::open(dir.path(), BS, AccessMode::ReadWrite);
        assert!(matches!(result, Err(Error::Corruption)));
    }

    #[test]
    fn open_rejects_odd_allocation_table() {
        let dir = tempfile::tempdir().unwrap();
        drop(open_rw(dir.path()));
        fs::write(
            dir.path().join(MetadataFile::<UnixFile>::ALLOCATION_FILE),
            [0; 12],
        )
        .unwrap();

        let result = MetadataFile::<UnixFile>::open(dir.path(), BS, AccessMode::ReadWrite);
        assert!(matches!(result, Err(Error::Corruption)));
    }

    #[test]
    fn get_block_returns_not_found_for_hole() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_rw(dir.path());
        assert!(matches!(store.get_block(3), Err(Error::NotFound)));
    }

    #[test]
    fn created_blocks_are_zero_filled_and_reported_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_rw(dir.path());

        let (data, created) = store.get_or_create_block(2).unwrap();
        assert!(created);
        assert_eq!(data, vec![0; BS]);

        let (_, created) = store.get_or_create_block(2).unwrap();
        assert!(!created);
    }

    #[test]
    fn writes_survive_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_rw(dir.path());
            store.get_or_create_block(0).unwrap();
            store.get_or_create_block(5).unwrap();
            store.write_block(5, &[9; BS]).unwrap();
            store.advance_cno();
            store.advance_cno();
            store.flush().unwrap();
        }

        let store = open_rw(dir.path());
        assert_eq!(store.next_cno(), 3);
        assert_eq!(store.get_block(0).unwrap(), vec![0; BS]);
        assert_eq!(store.get_block(5).unwrap(), vec![9; BS]);
        assert!(matches!(store.get_block(3), Err(Error::NotFound)));
    }

    #[test]
    fn drop_flushes_pending_changes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_rw(dir.path());
            store.get_or_create_block(1).unwrap();
            store.write_block(1, &[4; BS]).unwrap();
        }

        let store = open_rw(dir.path());
        assert_eq!(store.get_block(1).unwrap(), vec![4; BS]);
    }

    #[test]
    fn find_block_skips_holes() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_rw(dir.path());
        store.get_or_create_block(4).unwrap();
        store.get_or_create_block(9).unwrap();

        let (blkoff, _) = store.find_block(0, 20).unwrap();
        assert_eq!(blkoff, 4);
        let (blkoff, _) = store.find_block(5, 20).unwrap();
        assert_eq!(blkoff, 9);
        assert!(matches!(store.find_block(10, 20), Err(Error::NotFound)));
        assert!(matches!(store.find_block(5, 3), Err(Error::NotFound)));
    }

    #[test]
    fn delete_block_turns_block_into_hole() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_rw(dir.path());
            store.get_or_create_block(2).unwrap();
            store.delete_block(2).unwrap();
            assert!(matches!(store.get_block(2), Err(Error::NotFound)));
            assert!(matches!(store.delete_block(2), Err(Error::NotFound)));
            store.flush().unwrap();
        }

        let store = open_rw(dir.path());
        assert!(matches!(store.get_block(2), Err(Error::NotFound)));
    }

    #[test]
    fn write_block_requires_allocation() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_rw(dir.path());
        assert!(matches!(
            store.write_block(7, &[0; BS]),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn read_only_store_refuses_mutation() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_rw(dir.path());
            store.get_or_create_block(0).unwrap();
            store.flush().unwrap();
        }

        let store = MetadataFile::<UnixFile>::open(dir.path(), BS, AccessMode::ReadOnly).unwrap();
        assert!(store.read_only());
        assert!(store.get_block(0).is_ok());
        assert!(matches!(
            store.write_block(0, &[1; BS]),
            Err(Error::ReadOnly)
        ));
        assert!(matches!(store.get_or_create_block(1), Err(Error::ReadOnly)));
        assert!(matches!(store.delete_block(0), Err(Error::ReadOnly)));
    }

    #[test]
    fn mark_dirty_is_cleared_by_flush() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_rw(dir.path());
        assert!(!store.inode_dirty());
        store.mark_dirty();
        assert!(store.inode_dirty());
        store.flush().unwrap();
        assert!(!store.inode_dirty());
    }
}
