// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

use zerocopy::{
    FromBytes, Immutable, IntoBytes,
    little_endian::{U16, U32, U64},
};

use crate::{error::Error, sync::Mutex};

/// Raw on-disk inode record, 128 bytes, little-endian.
///
/// Checkpoint entries embed one of these to preserve the root descriptor of
/// the inode file captured by the checkpoint.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable)]
pub struct DiskInode {
    pub blocks: U64,
    pub size: U64,
    pub ctime: U64,
    pub mtime: U64,
    pub ctime_nsec: U32,
    pub mtime_nsec: U32,
    pub uid: U32,
    pub gid: U32,
    pub mode: U16,
    pub links_count: U16,
    pub flags: U32,
    /// Root of the block mapping, direct and indirect pointers.
    pub bmap: [U64; 7],
    pub xattr: U64,
    pub generation: U32,
    pub pad: U32,
}

impl DiskInode {
    /// A minimal live regular-file inode, the shape a freshly formatted
    /// metadata file starts out with.
    pub fn new_regular() -> Self {
        DiskInode {
            mode: U16::new(0o100644),
            links_count: U16::new(1),
            ..DiskInode::default()
        }
    }

    /// Checks that the record ever held a live inode. A zero mode or link
    /// count means the bytes never left their formatted state.
    pub fn validate(&self) -> Result<(), Error> {
        if self.mode.get() == 0 || self.links_count.get() == 0 {
            return Err(Error::Corruption);
        }
        Ok(())
    }
}

/// In-memory handle of an inode file root.
///
/// The checkpoint file deserializes the embedded [`DiskInode`] of a checkpoint
/// into one of these on read, and serializes it back when a checkpoint is
/// finalized.
#[derive(Debug)]
pub struct Ifile {
    raw: Mutex<DiskInode>,
}

impl Ifile {
    pub fn new() -> Self {
        Ifile {
            raw: Mutex::new(DiskInode::new_regular()),
        }
    }

    /// Restores the handle from a raw on-disk inode.
    pub fn load(&self, raw: &DiskInode) -> Result<(), Error> {
        raw.validate()?;
        *self.raw.lock().unwrap() = *raw;
        Ok(())
    }

    /// Serializes the handle into a raw on-disk inode.
    pub fn store(&self, raw: &mut DiskInode) {
        *raw = *self.raw.lock().unwrap();
    }

    /// A copy of the current raw inode.
    pub fn raw(&self) -> DiskInode {
        *self.raw.lock().unwrap()
    }
}

impl Default for Ifile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_inode_is_128_bytes() {
        assert_eq!(size_of::<DiskInode>(), 128);
    }

    #[test]
    fn validate_rejects_dead_records() {
        assert!(DiskInode::default().validate().is_err());

        let no_links = DiskInode {
            mode: U16::new(0o100644),
            ..DiskInode::default()
        };
        assert!(no_links.validate().is_err());

        assert!(DiskInode::new_regular().validate().is_ok());
    }

    #[test]
    fn load_rejects_invalid_inode() {
        let ifile = Ifile::new();
        assert!(matches!(
            ifile.load(&DiskInode::default()),
            Err(Error::Corruption)
        ));
    }

    #[test]
    fn store_returns_what_load_took() {
        let mut raw = DiskInode::new_regular();
        raw.size = U64::new(4096);
        raw.blocks = U64::new(17);
        raw.bmap[0] = U64::new(42);

        let ifile = Ifile::new();
        ifile.load(&raw).unwrap();

        let mut out = DiskInode::default();
        ifile.store(&mut out);
        assert_eq!(out, raw);
    }
}
