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
    little_endian::{U32, U64},
};

use crate::inode::DiskInode;

/// The entry never held, or no longer holds, a live checkpoint.
pub(crate) const FLAG_INVALID: u32 = 1 << 0;
/// The checkpoint is promoted to a snapshot and threaded on the snapshot list.
pub(crate) const FLAG_SNAPSHOT: u32 = 1 << 1;
/// The checkpoint was created by a minor (data-only) write-out.
pub(crate) const FLAG_MINOR: u32 = 1 << 2;

/// Lower bound on the configurable checkpoint entry size: an entry must at
/// least hold its fixed fields.
pub const MIN_CHECKPOINT_SIZE: usize = size_of::<DiskCheckpoint>();

/// On-disk links threading an entry onto the snapshot list. A value of zero
/// means the neighbor is the header sentinel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable)]
pub(crate) struct SnapshotLink {
    pub next: U64,
    pub prev: U64,
}

/// On-disk checkpoint entry, 192 bytes of fixed fields, little-endian. The
/// configured entry size may pad entries beyond this.
///
/// `checkpoints_count` carries the per-block census and is only meaningful in
/// the entry occupying the first slot of a block other than block 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable)]
pub(crate) struct DiskCheckpoint {
    pub flags: U32,
    pub checkpoints_count: U32,
    pub snapshot_list: SnapshotLink,
    pub cno: U64,
    pub create_time: U64,
    pub nblk_inc: U64,
    pub inodes_count: U64,
    pub blocks_count: U64,
    pub ifile_inode: DiskInode,
}

impl DiskCheckpoint {
    pub fn is_invalid(&self) -> bool {
        self.flags.get() & FLAG_INVALID != 0
    }

    pub fn set_invalid(&mut self) {
        self.flags.set(self.flags.get() | FLAG_INVALID);
    }

    pub fn clear_invalid(&mut self) {
        self.flags.set(self.flags.get() & !FLAG_INVALID);
    }

    pub fn is_snapshot(&self) -> bool {
        self.flags.get() & FLAG_SNAPSHOT != 0
    }

    pub fn set_snapshot(&mut self) {
        self.flags.set(self.flags.get() | FLAG_SNAPSHOT);
    }

    pub fn clear_snapshot(&mut self) {
        self.flags.set(self.flags.get() & !FLAG_SNAPSHOT);
    }

    pub fn set_minor(&mut self) {
        self.flags.set(self.flags.get() | FLAG_MINOR);
    }

    pub fn clear_minor(&mut self) {
        self.flags.set(self.flags.get() & !FLAG_MINOR);
    }
}

/// Header entry in slot 0 of block 0: aggregate counters plus the sentinel of
/// the snapshot list.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable)]
pub(crate) struct DiskHeader {
    pub ncheckpoints: U64,
    pub nsnapshots: U64,
    pub snapshot_list: SnapshotLink,
}

// The accessors below copy records in and out of block buffers. Offsets come
// from Layout, which guarantees a full record fits at every slot offset.

pub(crate) fn checkpoint_at(block: &[u8], offset: usize) -> DiskCheckpoint {
    DiskCheckpoint::read_from_bytes(&block[offset..offset + size_of::<DiskCheckpoint>()]).unwrap()
}

pub(crate) fn write_checkpoint_at(block: &mut [u8], offset: usize, cp: &DiskCheckpoint) {
    block[offset..offset + size_of::<DiskCheckpoint>()].copy_from_slice(cp.as_bytes());
}

pub(crate) fn header_from(block: &[u8]) -> DiskHeader {
    DiskHeader::read_from_bytes(&block[..size_of::<DiskHeader>()]).unwrap()
}

pub(crate) fn write_header(block: &mut [u8], header: &DiskHeader) {
    block[..size_of::<DiskHeader>()].copy_from_slice(header.as_bytes());
}

pub(crate) fn link_at(block: &[u8], offset: usize) -> SnapshotLink {
    SnapshotLink::read_from_bytes(&block[offset..offset + size_of::<SnapshotLink>()]).unwrap()
}

pub(crate) fn write_link_at(block: &mut [u8], offset: usize, link: &SnapshotLink) {
    block[offset..offset + size_of::<SnapshotLink>()].copy_from_slice(link.as_bytes());
}

#[cfg(test)]
mod tests {
    use std::mem::offset_of;

    use super::*;

    #[test]
    fn on_disk_sizes_are_pinned() {
        assert_eq!(size_of::<SnapshotLink>(), 16);
        assert_eq!(size_of::<DiskCheckpoint>(), 192);
        assert_eq!(size_of::<DiskHeader>(), 32);
        assert_eq!(MIN_CHECKPOINT_SIZE, 192);
    }

    #[test]
    fn on_disk_offsets_are_pinned() {
        assert_eq!(offset_of!(DiskCheckpoint, flags), 0);
        assert_eq!(offset_of!(DiskCheckpoint, checkpoints_count), 4);
        assert_eq!(offset_of!(DiskCheckpoint, snapshot_list), 8);
        assert_eq!(offset_of!(DiskCheckpoint, cno), 24);
        assert_eq!(offset_of!(DiskCheckpoint, ifile_inode), 64);
        assert_eq!(offset_of!(DiskHeader, snapshot_list), 16);
    }

    #[test]
    fn fields_are_little_endian_on_disk() {
        let mut cp = DiskCheckpoint::default();
        cp.cno.set(0x0102030405060708);
        let bytes = cp.as_bytes();
        assert_eq!(
            &bytes[24..32],
            &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn flag_bits_are_independent() {
        let mut cp = DiskCheckpoint::default();
        assert!(!cp.is_invalid());
        assert!(!cp.is_snapshot());

        cp.set_invalid();
        cp.set_snapshot();
        cp.set_minor();
        assert_eq!(cp.flags.get(), FLAG_INVALID | FLAG_SNAPSHOT | FLAG_MINOR);

        cp.clear_invalid();
        assert!(!cp.is_invalid());
        assert!(cp.is_snapshot());

        cp.clear_snapshot();
        cp.clear_minor();
        assert_eq!(cp.flags.get(), 0);
    }

    #[test]
    fn block_accessors_round_trip() {
        let mut block = vec![0u8; 768];

        let mut cp = DiskCheckpoint::default();
        cp.cno.set(5);
        cp.create_time.set(12345);
        cp.set_snapshot();
        write_checkpoint_at(&mut block, 384, &cp);
        assert_eq!(checkpoint_at(&block, 384), cp);

        let mut header = DiskHeader::default();
        header.ncheckpoints.set(9);
        header.snapshot_list.next.set(5);
        write_header(&mut block, &header);
        assert_eq!(header_from(&block), header);

        let link = SnapshotLink {
            next: 7.into(),
            prev: 3.into(),
        };
        write_link_at(&mut block, 384 + offset_of!(DiskCheckpoint, snapshot_list), &link);
        assert_eq!(
            link_at(&block, 384 + offset_of!(DiskCheckpoint, snapshot_list)),
            link
        );
        // the link write landed inside the entry's snapshot_list field
        assert_eq!(checkpoint_at(&block, 384).snapshot_list, link);
    }
}
