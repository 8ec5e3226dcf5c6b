// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    error::Error,
    mdt::MetadataStore,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

/// An in-memory [`MetadataStore`].
///
/// Useful for hosts that want checkpoint bookkeeping without persistence, and
/// as the store of choice in tests: it tracks which blocks were marked dirty
/// since the last [`MemoryStore::take_dirty`], so tests can assert the
/// dirty-marking discipline of an operation.
pub struct MemoryStore {
    blocks: Mutex<BTreeMap<u64, Vec<u8>>>,
    dirty: Mutex<BTreeSet<u64>>,
    block_size: usize,
    read_only: AtomicBool,
    next_cno: AtomicU64,
    inode_dirty: AtomicBool,
}

impl MemoryStore {
    pub fn new(block_size: usize) -> Self {
        MemoryStore {
            blocks: Mutex::new(BTreeMap::new()),
            dirty: Mutex::new(BTreeSet::new()),
            block_size,
            read_only: AtomicBool::new(false),
            next_cno: AtomicU64::new(1),
            inode_dirty: AtomicBool::new(false),
        }
    }

    /// Advances the "next checkpoint number" counter by one.
    pub fn advance_cno(&self) {
        self.next_cno.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_next_cno(&self, cno: u64) {
        self.next_cno.store(cno, Ordering::Relaxed);
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::Relaxed);
    }

    pub fn has_block(&self, blkoff: u64) -> bool {
        self.blocks.lock().unwrap().contains_key(&blkoff)
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().unwrap().len()
    }

    /// The offsets of all existing blocks, in ascending order.
    pub fn block_offsets(&self) -> Vec<u64> {
        self.blocks.lock().unwrap().keys().copied().collect()
    }

    /// Returns the set of blocks dirtied since the last call and clears it.
    pub fn take_dirty(&self) -> Vec<u64> {
        let mut dirty = self.dirty.lock().unwrap();
        let taken: Vec<u64> = dirty.iter().copied().collect();
        dirty.clear();
        taken
    }

    pub fn inode_dirty(&self) -> bool {
        self.inode_dirty.load(Ordering::Relaxed)
    }

    pub fn clear_inode_dirty(&self) {
        self.inode_dirty.store(false, Ordering::Relaxed);
    }
}

impl MetadataStore for MemoryStore {
    fn next_cno(&self) -> u64 {
        self.next_cno.load(Ordering::Relaxed)
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn read_only(&self) -> bool {
        self.read_only.load(Ordering::Relaxed)
    }

    fn get_block(&self, blkoff: u64) -> Result<Vec<u8>, Error> {
        self.blocks
            .lock()
            .unwrap()
            .get(&blkoff)
            .cloned()
            .ok_or(Error::NotFound)
    }

    fn get_or_create_block(&self, blkoff: u64) -> Result<(Vec<u8>, bool), Error> {
        let mut blocks = self.blocks.lock().unwrap();
        if let Some(data) = blocks.get(&blkoff) {
            return Ok((data.clone(), false));
        }
        if self.read_only() {
            return Err(Error::ReadOnly);
        }
        let data = vec![0; self.block_size];
        blocks.insert(blkoff, data.clone());
        self.dirty.lock().unwrap().insert(blkoff);
        self.inode_dirty.store(true, Ordering::Relaxed);
        Ok((data, true))
    }

    fn find_block(&self, start: u64, end: u64) -> Result<(u64, Vec<u8>), Error> {
        if start > end {
            return Err(Error::NotFound);
        }
        let blocks = self.blocks.lock().unwrap();
        match blocks.range(start..=end).next() {
            Some((&blkoff, data)) => Ok((blkoff, data.clone())),
            None => Err(Error::NotFound),
        }
    }

    fn write_block(&self, blkoff: u64, data: &[u8]) -> Result<(), Error> {
        if self.read_only() {
            return Err(Error::ReadOnly);
        }
        debug_assert_eq!(data.len(), self.block_size);
        let mut blocks = self.blocks.lock().unwrap();
        if !blocks.contains_key(&blkoff) {
            return Err(Error::NotFound);
        }
        blocks.insert(blkoff, data.to_vec());
        self.dirty.lock().unwrap().insert(blkoff);
        Ok(())
    }

    fn delete_block(&self, blkoff: u64) -> Result<(), Error> {
        if self.read_only() {
            return Err(Error::ReadOnly);
        }
        if self.blocks.lock().unwrap().remove(&blkoff).is_none() {
            return Err(Error::NotFound);
        }
        self.dirty.lock().unwrap().remove(&blkoff);
        self.inode_dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn mark_dirty(&self) {
        self.inode_dirty.store(true, Ordering::Relaxed);
    }
}
