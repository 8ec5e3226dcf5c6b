// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

use crate::{
    inode::Ifile,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

/// Root object of a mounted checkpoint.
///
/// The inode and block counters are published with 64-bit atomic stores:
/// other filesystem paths read them without taking the checkpoint file lock.
#[derive(Debug)]
pub struct FsRoot {
    inodes_count: AtomicU64,
    blocks_count: AtomicU64,
    ifile: Mutex<Option<Arc<Ifile>>>,
}

impl FsRoot {
    pub fn new() -> Self {
        FsRoot {
            inodes_count: AtomicU64::new(0),
            blocks_count: AtomicU64::new(0),
            ifile: Mutex::new(None),
        }
    }

    pub fn set_counts(&self, inodes: u64, blocks: u64) {
        self.inodes_count.store(inodes, Ordering::Relaxed);
        self.blocks_count.store(blocks, Ordering::Relaxed);
    }

    pub fn inodes_count(&self) -> u64 {
        self.inodes_count.load(Ordering::Relaxed)
    }

    pub fn blocks_count(&self) -> u64 {
        self.blocks_count.load(Ordering::Relaxed)
    }

    pub fn attach_ifile(&self, ifile: Arc<Ifile>) {
        *self.ifile.lock().unwrap() = Some(ifile);
    }

    pub fn ifile(&self) -> Option<Arc<Ifile>> {
        self.ifile.lock().unwrap().clone()
    }
}

impl Default for FsRoot {
    fn default() -> Self {
        Self::new()
    }
}
