// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

//! The snapshot list: a doubly-linked list threaded through checkpoint
//! entries, keyed by checkpoint number in ascending order, with the header
//! entry acting as sentinel on both ends.

use std::mem::offset_of;

use crate::{
    cpfile::{
        entry::{self, DiskCheckpoint, DiskHeader, SnapshotLink},
        layout::Layout,
    },
    error::Error,
    mdt::MetadataStore,
};

/// A node on the snapshot list: the header sentinel or a checkpoint entry.
/// On disk the sentinel is encoded as checkpoint number 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListNode {
    Header,
    Entry(u64),
}

impl ListNode {
    pub fn from_cno(cno: u64) -> Self {
        if cno == 0 {
            ListNode::Header
        } else {
            ListNode::Entry(cno)
        }
    }

    /// The on-disk encoding of this node as a link value.
    pub fn cno(&self) -> u64 {
        match self {
            ListNode::Header => 0,
            ListNode::Entry(cno) => *cno,
        }
    }
}

/// Block offset and in-block byte offset of a node's [`SnapshotLink`].
fn link_location(layout: &Layout, node: ListNode) -> (u64, usize) {
    match node {
        ListNode::Header => (0, offset_of!(DiskHeader, snapshot_list)),
        ListNode::Entry(cno) => (
            layout.blkoff(cno),
            layout.entry_offset(cno) + offset_of!(DiskCheckpoint, snapshot_list),
        ),
    }
}

pub(crate) fn read_link<S: MetadataStore>(
    store: &S,
    layout: &Layout,
    node: ListNode,
) -> Result<SnapshotLink, Error> {
    let (blkoff, offset) = link_location(layout, node);
    let block = store.get_block(blkoff)?;
    Ok(entry::link_at(&block, offset))
}

/// Patches a node's link with a read-modify-write round trip. Always reads
/// the current block content, so earlier patches to the same block are kept.
pub(crate) fn update_link<S: MetadataStore>(
    store: &S,
    layout: &Layout,
    node: ListNode,
    patch: impl FnOnce(&mut SnapshotLink),
) -> Result<(), Error> {
    let (blkoff, offset) = link_location(layout, node);
    let mut block = store.get_block(blkoff)?;
    let mut link = entry::link_at(&block, offset);
    patch(&mut link);
    entry::write_link_at(&mut block, offset, &link);
    store.write_block(blkoff, &block)
}

/// Finds where `cno` belongs on the list by walking backward from the tail:
/// returns `(curr, prev)` with `prev <= cno < curr`, where `curr` may be the
/// header sentinel (insertion at the tail) and `prev` may be 0 (insertion at
/// the head). Snapshots are usually promoted in ascending order, so the walk
/// is short in the common case.
pub(crate) fn find_insert_position<S: MetadataStore>(
    store: &S,
    layout: &Layout,
    header_block: &[u8],
    cno: u64,
) -> Result<(ListNode, u64), Error> {
    let mut curr = ListNode::Header;
    let mut prev = entry::header_from(header_block).snapshot_list.prev.get();
    while prev > cno {
        curr = ListNode::Entry(prev);
        prev = read_link(store, layout, curr)?.prev.get();
    }
    Ok((curr, prev))
}
