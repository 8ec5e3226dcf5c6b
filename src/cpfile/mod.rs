// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

//! The checkpoint file: a dense, block-addressable table of checkpoint
//! entries with an embedded snapshot list.
//!
//! Checkpoints are addressed by their 64-bit checkpoint number. The table is
//! a packed array for O(1) lookup, with block 0 leading with a header entry
//! that carries the aggregate counters and the snapshot-list sentinel. Every
//! other block stores the count of its live entries in its first slot; a
//! block whose count drops to zero is reclaimed and becomes a hole.

mod entry;
mod layout;
mod snapshot_list;

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, warn};

pub use entry::MIN_CHECKPOINT_SIZE;

use crate::{
    cpfile::{
        entry::{DiskHeader, FLAG_MINOR, FLAG_SNAPSHOT, SnapshotLink},
        layout::Layout,
        snapshot_list::ListNode,
    },
    error::Error,
    inode::{DiskInode, Ifile},
    mdt::MetadataStore,
    root::FsRoot,
    sync::{
        Arc, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

/// Well-known inode number of the checkpoint file.
pub const CPFILE_INO: u64 = 6;

/// Mode of a checkpoint entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpMode {
    /// A plain checkpoint, reclaimable by the cleaner.
    Checkpoint,
    /// A checkpoint pinned as a persistent snapshot.
    Snapshot,
}

/// Summary of one checkpoint entry, as reported by [`CpFile::get_cpinfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpInfo {
    pub cno: u64,
    pub create_time: u64,
    pub nblk_inc: u64,
    pub inodes_count: u64,
    pub blocks_count: u64,
    pub flags: u32,
    /// Checkpoint number of the next snapshot on the list, 0 at the tail.
    /// Only meaningful for snapshots.
    pub next: u64,
}

impl CpInfo {
    pub fn is_snapshot(&self) -> bool {
        self.flags & FLAG_SNAPSHOT != 0
    }

    pub fn is_minor(&self) -> bool {
        self.flags & FLAG_MINOR != 0
    }

    fn from_entry(cp: &entry::DiskCheckpoint) -> Self {
        CpInfo {
            cno: cp.cno.get(),
            create_time: cp.create_time.get(),
            nblk_inc: cp.nblk_inc.get(),
            inodes_count: cp.inodes_count.get(),
            blocks_count: cp.blocks_count.get(),
            flags: cp.flags.get(),
            next: cp.snapshot_list.next.get(),
        }
    }
}

/// Aggregate checkpoint statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpStat {
    /// The next checkpoint number.
    pub cno: u64,
    /// Number of live checkpoint entries.
    pub ncheckpoints: u64,
    /// Number of snapshots.
    pub nsnapshots: u64,
}

/// Tells the checkpoint file which checkpoints are currently mounted.
#[cfg_attr(test, mockall::automock)]
pub trait MountTable: Send + Sync {
    fn is_mounted(&self, cno: u64) -> bool;
}

/// The checkpoint file.
///
/// All operations take the per-file reader/writer semaphore; lookups and
/// enumeration share it, mutations hold it exclusively. The store itself is
/// only reached through that lock, except for the host-facing handle returned
/// by [`CpFile::store`].
pub struct CpFile<S> {
    store: S,
    sem: RwLock<()>,
    layout: Layout,
    ino: u64,
    inode: DiskInode,
    /// Unix time of the last corruption diagnostic, for rate limiting.
    last_report: AtomicU64,
}

impl<S: MetadataStore> CpFile<S> {
    /// Binds a checkpoint file handle to its on-disk inode record.
    ///
    /// Validates the configured entry size against the store's block geometry
    /// and the raw inode itself. A fresh writable store is formatted with an
    /// empty header block; a fresh read-only store is refused as corrupt.
    pub fn read(store: S, entry_size: usize, raw_inode: &DiskInode) -> Result<Self, Error> {
        let block_size = store.block_size();
        if entry_size < MIN_CHECKPOINT_SIZE || entry_size > block_size {
            error!(entry_size, block_size, "unsupported checkpoint entry size");
            return Err(Error::InvalidEntrySize);
        }
        raw_inode.validate()?;

        let cpfile = CpFile {
            store,
            sem: RwLock::new(()),
            layout: Layout::new(entry_size, block_size, size_of::<DiskHeader>()),
            ino: CPFILE_INO,
            inode: *raw_inode,
            last_report: AtomicU64::new(0),
        };
        cpfile.materialize_header()?;
        Ok(cpfile)
    }

    /// The store this file operates on, for host-side flushing and counter
    /// maintenance.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// A copy of the raw on-disk inode this handle was bound to.
    pub fn raw_inode(&self) -> DiskInode {
        self.inode
    }

    /// Creates the checkpoint entry numbered `cno`.
    ///
    /// If the entry already exists from a past failed attempt it is reused
    /// without an error. In either case the entry's block and the file's
    /// inode are marked dirty for the next write-out.
    pub fn create_checkpoint(&self, cno: u64) -> Result<(), Error> {
        if cno < 1 {
            self.report_corruption(Some(cno), "checkpoint creation with number 0");
            return Err(Error::Corruption);
        }
        if self.store.read_only() {
            return Err(Error::ReadOnly);
        }
        let _guard = self.sem.write().unwrap();

        // A missing header block means the file is corrupt; fail before
        // allocating anything.
        self.get_header_block()?;

        let (blkoff, mut block) = self.get_cp_block(cno, true)?;
        let offset = self.layout.entry_offset(cno);
        let mut cp = entry::checkpoint_at(&block, offset);
        let fresh = cp.is_invalid();
        if fresh {
            cp.clear_invalid();
            entry::write_checkpoint_at(&mut block, offset, &cp);
            if !self.layout.in_first_block(cno) {
                self.add_valid_checkpoints(&mut block, 1);
            }
        }
        self.store.write_block(blkoff, &block)?;

        if fresh {
            // The header may share the entry's block; re-read it to keep both
            // updates.
            let mut header_block = self.get_header_block()?;
            let mut header = entry::header_from(&header_block);
            header.ncheckpoints.set(header.ncheckpoints.get() + 1);
            entry::write_header(&mut header_block, &header);
            self.store.write_block(0, &header_block)?;
        }
        self.store.mark_dirty();
        Ok(())
    }

    /// Fills in the checkpoint entry numbered `cno` with the state captured
    /// at write-out time.
    ///
    /// The entry must have been created beforehand; a hole or a dead entry
    /// here means the metadata is corrupt.
    pub fn finalize_checkpoint(
        &self,
        cno: u64,
        root: &FsRoot,
        blkinc: u64,
        ctime: u64,
        minor: bool,
    ) -> Result<(), Error> {
        if cno < 1 {
            self.report_corruption(Some(cno), "checkpoint finalization with number 0");
            return Err(Error::Corruption);
        }
        if self.store.read_only() {
            return Err(Error::ReadOnly);
        }
        let _guard = self.sem.write().unwrap();

        let (blkoff, mut block) = match self.get_cp_block(cno, false) {
            Err(Error::NotFound) => {
                // the create step established this block; absence means
                // corruption
                self.report_corruption(
                    Some(cno),
                    "checkpoint finalization failed due to metadata corruption",
                );
                return Err(Error::Corruption);
            }
            other => other?,
        };
        let offset = self.layout.entry_offset(cno);
        let mut cp = entry::checkpoint_at(&block, offset);
        if cp.is_invalid() {
            self.report_corruption(
                Some(cno),
                "checkpoint finalization failed due to metadata corruption",
            );
            return Err(Error::Corruption);
        }

        cp.snapshot_list = SnapshotLink::default();
        cp.inodes_count.set(root.inodes_count());
        cp.blocks_count.set(root.blocks_count());
        cp.nblk_inc.set(blkinc);
        cp.create_time.set(ctime);
        cp.cno.set(cno);
        if minor {
            cp.set_minor();
        } else {
            cp.clear_minor();
        }

        let Some(ifile) = root.ifile() else {
            self.report_corruption(Some(cno), "checkpoint finalization without an ifile");
            return Err(Error::Corruption);
        };
        ifile.store(&mut cp.ifile_inode);

        entry::write_checkpoint_at(&mut block, offset, &cp);
        self.store.write_block(blkoff, &block)?;
        Ok(())
    }

    /// Deletes the plain checkpoints in `start..end`.
    ///
    /// Holes in the range are skipped; snapshots are left untouched. When the
    /// range contained snapshots the deletions of the plain checkpoints still
    /// go through and the call reports [`Error::Busy`] afterwards. A block
    /// whose last live entry is deleted is reclaimed.
    pub fn delete_checkpoints(&self, start: u64, end: u64) -> Result<(), Error> {
        if start == 0 || start > end {
            error!(
                ino = self.ino,
                start, end, "cannot delete checkpoints: invalid range"
            );
            return Err(Error::InvalidRange);
        }
        if self.store.read_only() {
            return Err(Error::ReadOnly);
        }
        let _guard = self.sem.write().unwrap();

        self.get_header_block()?;

        let mut total_deleted: u64 = 0;
        let mut snapshots_seen: u64 = 0;
        let mut fatal = None;
        let mut cno = start;
        while cno < end {
            let ncps = self.layout.entries_in_range(cno, end);
            let (blkoff, mut block) = match self.get_cp_block(cno, false) {
                Err(Error::NotFound) => {
                    // skip hole
                    cno += ncps;
                    continue;
                }
                Err(e) => {
                    fatal = Some(e);
                    break;
                }
                Ok(found) => found,
            };

            let base = self.layout.entry_offset(cno);
            let mut deleted: u32 = 0;
            for i in 0..ncps as usize {
                let offset = base + i * self.layout.entry_size();
                let mut cp = entry::checkpoint_at(&block, offset);
                if cp.is_snapshot() {
                    snapshots_seen += 1;
                } else if !cp.is_invalid() {
                    cp.set_invalid();
                    entry::write_checkpoint_at(&mut block, offset, &cp);
                    deleted += 1;
                }
            }
            if deleted == 0 {
                cno += ncps;
                continue;
            }
            total_deleted += u64::from(deleted);

            let mut reclaim = false;
            if !self.layout.in_first_block(cno) {
                reclaim = self.sub_valid_checkpoints(&mut block, deleted) == 0;
            }
            if let Err(e) = self.store.write_block(blkoff, &block) {
                fatal = Some(e);
                break;
            }
            self.store.mark_dirty();

            if reclaim {
                // no live entries left in this block
                if let Err(e) = self.delete_cp_block(cno) {
                    error!(ino = self.ino, cno, "error deleting checkpoint block");
                    fatal = Some(e);
                    break;
                }
            }
            cno += ncps;
        }

        // Reconcile the header with whatever was deleted, even when the walk
        // stopped early.
        if total_deleted > 0 {
            let mut header_block = self.get_header_block()?;
            let mut header = entry::header_from(&header_block);
            header
                .ncheckpoints
                .set(header.ncheckpoints.get().saturating_sub(total_deleted));
            entry::write_header(&mut header_block, &header);
            self.store.write_block(0, &header_block)?;
            self.store.mark_dirty();
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        if snapshots_seen > 0 {
            return Err(Error::Busy);
        }
        Ok(())
    }

    /// Deletes the single checkpoint numbered `cno`.
    pub fn delete_checkpoint(&self, cno: u64) -> Result<(), Error> {
        let mut probe_cno = cno;
        let found = self.get_checkpoint_info(&mut probe_cno, 1)?;
        match found.first() {
            None => Err(Error::NotFound),
            Some(info) if info.cno != cno => Err(Error::NotFound),
            Some(info) if info.is_snapshot() => Err(Error::Busy),
            Some(_) => self.delete_checkpoints(cno, cno + 1),
        }
    }

    /// Imports the checkpoint numbered `cno`: restores its ifile root into
    /// `ifile`, publishes the inode and block counts on `root` and attaches
    /// the ifile to it.
    pub fn read_checkpoint(&self, cno: u64, root: &FsRoot, ifile: &Arc<Ifile>) -> Result<(), Error> {
        if cno < 1 || cno >= self.store.next_cno() {
            return Err(Error::InvalidCheckpoint);
        }
        let _guard = self.sem.read().unwrap();

        let (_, block) = match self.get_cp_block(cno, false) {
            Err(Error::NotFound) => return Err(Error::InvalidCheckpoint),
            other => other?,
        };
        let cp = entry::checkpoint_at(&block, self.layout.entry_offset(cno));
        if cp.is_invalid() {
            return Err(Error::InvalidCheckpoint);
        }

        if ifile.load(&cp.ifile_inode).is_err() {
            // a live checkpoint must carry a readable ifile inode
            self.report_corruption(Some(cno), "ifile inode corrupted");
            return Err(Error::Corruption);
        }

        root.set_counts(cp.inodes_count.get(), cp.blocks_count.get());
        root.attach_ifile(ifile.clone());
        Ok(())
    }

    /// Enumerates checkpoints starting at `*cno`.
    ///
    /// In [`CpMode::Checkpoint`] mode all live entries from `*cno` up to the
    /// last written-out checkpoint are reported, skipping holes; afterwards
    /// `*cno` points past the last reported entry. In [`CpMode::Snapshot`]
    /// mode the snapshot list is traversed from `*cno` (0 starts at the head);
    /// at the end of the list `*cno` becomes the `u64::MAX` terminator, on
    /// which further calls report nothing.
    ///
    /// At most `max` entries are returned per call.
    pub fn get_cpinfo(&self, cno: &mut u64, mode: CpMode, max: usize) -> Result<Vec<CpInfo>, Error> {
        match mode {
            CpMode::Checkpoint => self.get_checkpoint_info(cno, max),
            CpMode::Snapshot => self.get_snapshot_info(cno, max),
        }
    }

    /// Changes the mode of the checkpoint numbered `cno`. Demoting a mounted
    /// snapshot is refused: the mount relies on the snapshot pin to keep the
    /// checkpoint from being reclaimed.
    pub fn change_cpmode(
        &self,
        cno: u64,
        mode: CpMode,
        mounts: &dyn MountTable,
    ) -> Result<(), Error> {
        match mode {
            CpMode::Checkpoint => {
                if mounts.is_mounted(cno) {
                    return Err(Error::Busy);
                }
                self.clear_snapshot(cno)
            }
            CpMode::Snapshot => self.set_snapshot(cno),
        }
    }

    /// Whether the checkpoint numbered `cno` is a snapshot.
    pub fn is_snapshot(&self, cno: u64) -> Result<bool, Error> {
        // invalid if zero or beyond the largest written-out checkpoint
        if cno == 0 || cno >= self.store.next_cno() {
            return Err(Error::NotFound);
        }
        let _guard = self.sem.read().unwrap();

        let (_, block) = self.get_cp_block(cno, false)?;
        let cp = entry::checkpoint_at(&block, self.layout.entry_offset(cno));
        if cp.is_invalid() {
            return Err(Error::NotFound);
        }
        Ok(cp.is_snapshot())
    }

    /// Reads the aggregate checkpoint statistics.
    pub fn get_stat(&self) -> Result<CpStat, Error> {
        let _guard = self.sem.read().unwrap();
        let header_block = self.get_header_block()?;
        let header = entry::header_from(&header_block);
        Ok(CpStat {
            cno: self.store.next_cno(),
            ncheckpoints: header.ncheckpoints.get(),
            nsnapshots: header.nsnapshots.get(),
        })
    }

    fn get_checkpoint_info(&self, cnop: &mut u64, max: usize) -> Result<Vec<CpInfo>, Error> {
        if *cnop == 0 {
            // checkpoint number 0 is invalid
            return Err(Error::NotFound);
        }
        let _guard = self.sem.read().unwrap();

        let cur_cno = self.store.next_cno();
        let mut out = Vec::new();
        let mut cno = *cnop;
        while out.len() < max {
            let (found_cno, block) = match self.find_cp_block(cno, cur_cno.saturating_sub(1)) {
                Err(Error::NotFound) => break,
                other => other?,
            };
            cno = found_cno;

            let ncps = self.layout.entries_in_range(cno, cur_cno);
            let base = self.layout.entry_offset(cno);
            for i in 0..ncps as usize {
                if out.len() >= max {
                    break;
                }
                let cp = entry::checkpoint_at(&block, base + i * self.layout.entry_size());
                if !cp.is_invalid() {
                    out.push(CpInfo::from_entry(&cp));
                }
            }
            cno += ncps;
        }

        if let Some(last) = out.last() {
            *cnop = last.cno + 1;
        }
        Ok(out)
    }

    fn get_snapshot_info(&self, cnop: &mut u64, max: usize) -> Result<Vec<CpInfo>, Error> {
        let _guard = self.sem.read().unwrap();

        let mut out = Vec::new();
        let mut curr = *cnop;
        if curr == 0 {
            let header_block = self.get_header_block()?;
            curr = entry::header_from(&header_block).snapshot_list.next.get();
            if curr == 0 {
                // empty list
                return Ok(out);
            }
        } else if curr == u64::MAX {
            // terminator from an earlier traversal
            return Ok(out);
        }

        let mut curr_blkoff = self.layout.blkoff(curr);
        let mut block = match self.store.get_block(curr_blkoff) {
            // no snapshots: the walk started at a hole
            Err(Error::NotFound) => return Ok(out),
            other => other?,
        };
        while out.len() < max {
            let cp = entry::checkpoint_at(&block, self.layout.entry_offset(curr));
            if cp.is_invalid() || !cp.is_snapshot() {
                // a dead or plain entry ends the traversal
                curr = u64::MAX;
                break;
            }
            out.push(CpInfo::from_entry(&cp));

            let next = cp.snapshot_list.next.get();
            if next == 0 {
                // reached the end of the snapshot list
                curr = u64::MAX;
                break;
            }

            let next_blkoff = self.layout.blkoff(next);
            if next_blkoff != curr_blkoff {
                block = match self.store.get_block(next_blkoff) {
                    Err(Error::NotFound) => {
                        // A hole reached through the list is a bug in whoever
                        // rewired it, not a reason to fail the reader.
                        warn!(
                            ino = self.ino,
                            cno = next,
                            "snapshot list points into a hole"
                        );
                        return Ok(out);
                    }
                    other => other?,
                };
                curr_blkoff = next_blkoff;
            }
            curr = next;
        }

        *cnop = curr;
        Ok(out)
    }

    fn set_snapshot(&self, cno: u64) -> Result<(), Error> {
        if cno == 0 {
            return Err(Error::NotFound);
        }
        if self.store.read_only() {
            return Err(Error::ReadOnly);
        }
        let _guard = self.sem.write().unwrap();

        let header_block = self.get_header_block()?;
        let (_, block) = self.get_cp_block(cno, false)?;
        let cp = entry::checkpoint_at(&block, self.layout.entry_offset(cno));
        if cp.is_invalid() {
            return Err(Error::NotFound);
        }
        if cp.is_snapshot() {
            return Ok(());
        }

        let (curr, prev) =
            snapshot_list::find_insert_position(&self.store, &self.layout, &header_block, cno)?;

        // Resolve both neighbors before any link is rewritten, so a missing
        // block cannot leave the list half-patched.
        if let ListNode::Entry(neighbor) = curr {
            self.get_cp_block(neighbor, false)?;
        }
        if prev != 0 {
            self.get_cp_block(prev, false)?;
        }

        // The next neighbor's backward link.
        snapshot_list::update_link(&self.store, &self.layout, curr, |link| link.prev.set(cno))?;

        // The entry itself.
        {
            let (blkoff, mut block) = self.get_cp_block(cno, false)?;
            let offset = self.layout.entry_offset(cno);
            let mut cp = entry::checkpoint_at(&block, offset);
            cp.snapshot_list.next.set(curr.cno());
            cp.snapshot_list.prev.set(prev);
            cp.set_snapshot();
            entry::write_checkpoint_at(&mut block, offset, &cp);
            self.store.write_block(blkoff, &block)?;
        }

        // The previous neighbor's forward link.
        snapshot_list::update_link(
            &self.store,
            &self.layout,
            ListNode::from_cno(prev),
            |link| link.next.set(cno),
        )?;

        // The header statistics.
        {
            let mut header_block = self.get_header_block()?;
            let mut header = entry::header_from(&header_block);
            header.nsnapshots.set(header.nsnapshots.get() + 1);
            entry::write_header(&mut header_block, &header);
            self.store.write_block(0, &header_block)?;
        }

        self.store.mark_dirty();
        Ok(())
    }

    fn clear_snapshot(&self, cno: u64) -> Result<(), Error> {
        if cno == 0 {
            return Err(Error::NotFound);
        }
        if self.store.read_only() {
            return Err(Error::ReadOnly);
        }
        let _guard = self.sem.write().unwrap();

        self.get_header_block()?;
        let (_, block) = self.get_cp_block(cno, false)?;
        let cp = entry::checkpoint_at(&block, self.layout.entry_offset(cno));
        if cp.is_invalid() {
            return Err(Error::NotFound);
        }
        if !cp.is_snapshot() {
            return Ok(());
        }

        let next = cp.snapshot_list.next.get();
        let prev = cp.snapshot_list.prev.get();

        // Resolve both neighbors before any link is rewritten.
        if next != 0 {
            self.get_cp_block(next, false)?;
        }
        if prev != 0 {
            self.get_cp_block(prev, false)?;
        }

        // The next neighbor's backward link.
        snapshot_list::update_link(
            &self.store,
            &self.layout,
            ListNode::from_cno(next),
            |link| link.prev.set(prev),
        )?;

        // The previous neighbor's forward link.
        snapshot_list::update_link(
            &self.store,
            &self.layout,
            ListNode::from_cno(prev),
            |link| link.next.set(next),
        )?;

        // The entry itself.
        {
            let (blkoff, mut block) = self.get_cp_block(cno, false)?;
            let offset = self.layout.entry_offset(cno);
            let mut cp = entry::checkpoint_at(&block, offset);
            cp.snapshot_list = SnapshotLink::default();
            cp.clear_snapshot();
            entry::write_checkpoint_at(&mut block, offset, &cp);
            self.store.write_block(blkoff, &block)?;
        }

        // The header statistics.
        {
            let mut header_block = self.get_header_block()?;
            let mut header = entry::header_from(&header_block);
            header.nsnapshots.set(header.nsnapshots.get().saturating_sub(1));
            entry::write_header(&mut header_block, &header);
            self.store.write_block(0, &header_block)?;
        }

        self.store.mark_dirty();
        Ok(())
    }

    /// Formats block 0 with a zeroed header on a fresh store. A store that
    /// holds checkpoint blocks but no header lost it to corruption.
    fn materialize_header(&self) -> Result<(), Error> {
        match self.store.get_block(0) {
            Ok(_) => return Ok(()),
            Err(Error::NotFound) => (),
            Err(e) => return Err(e),
        }
        match self.store.find_block(0, u64::MAX) {
            Err(Error::NotFound) if !self.store.read_only() => {
                let (mut block, fresh) = self.store.get_or_create_block(0)?;
                if fresh {
                    self.format_block(&mut block);
                    entry::write_header(&mut block, &DiskHeader::default());
                    self.store.write_block(0, &block)?;
                    self.store.mark_dirty();
                }
                Ok(())
            }
            Err(Error::NotFound) | Ok(_) => {
                self.report_corruption(None, "missing header block in checkpoint metadata");
                Err(Error::Corruption)
            }
            Err(e) => Err(e),
        }
    }

    fn get_header_block(&self) -> Result<Vec<u8>, Error> {
        match self.store.get_block(0) {
            Err(Error::NotFound) => {
                self.report_corruption(None, "missing header block in checkpoint metadata");
                Err(Error::Corruption)
            }
            other => other,
        }
    }

    /// Fetches the block holding `cno`, optionally allocating it. A fresh
    /// block is formatted with every slot invalid before anyone can see it.
    fn get_cp_block(&self, cno: u64, create: bool) -> Result<(u64, Vec<u8>), Error> {
        let blkoff = self.layout.blkoff(cno);
        if !create {
            return Ok((blkoff, self.store.get_block(blkoff)?));
        }
        let (mut block, fresh) = self.store.get_or_create_block(blkoff)?;
        if fresh {
            self.format_block(&mut block);
            self.store.write_block(blkoff, &block)?;
        }
        Ok((blkoff, block))
    }

    /// Finds the first existing checkpoint block in `start_cno..=end_cno` and
    /// reports the first checkpoint number it may hold.
    fn find_cp_block(&self, start_cno: u64, end_cno: u64) -> Result<(u64, Vec<u8>), Error> {
        if start_cno > end_cno {
            return Err(Error::NotFound);
        }
        let start = self.layout.blkoff(start_cno);
        let end = self.layout.blkoff(end_cno);
        let (blkoff, block) = self.store.find_block(start, end)?;
        let cno = if blkoff == start {
            start_cno
        } else {
            self.layout.first_cno_in_block(blkoff)
        };
        Ok((cno, block))
    }

    fn delete_cp_block(&self, cno: u64) -> Result<(), Error> {
        self.store.delete_block(self.layout.blkoff(cno))
    }

    fn format_block(&self, block: &mut [u8]) {
        let entry_size = self.layout.entry_size();
        for slot in 0..self.layout.entries_per_block() as usize {
            let offset = slot * entry_size;
            let mut cp = entry::checkpoint_at(block, offset);
            cp.set_invalid();
            entry::write_checkpoint_at(block, offset, &cp);
        }
    }

    /// Adjusts the per-block census stored in the block's first slot. Never
    /// called for block 0, which has no census.
    fn add_valid_checkpoints(&self, block: &mut [u8], n: u32) -> u32 {
        let mut first = entry::checkpoint_at(block, 0);
        let count = first.checkpoints_count.get() + n;
        first.checkpoints_count.set(count);
        entry::write_checkpoint_at(block, 0, &first);
        count
    }

    fn sub_valid_checkpoints(&self, block: &mut [u8], n: u32) -> u32 {
        let mut first = entry::checkpoint_at(block, 0);
        let have = first.checkpoints_count.get();
        if have < n {
            warn!(ino = self.ino, "checkpoint census underflow");
        }
        let count = have.saturating_sub(n);
        first.checkpoints_count.set(count);
        entry::write_checkpoint_at(block, 0, &first);
        count
    }

    /// Emits a corruption diagnostic, at most one per second per handle.
    fn report_corruption(&self, cno: Option<u64>, msg: &str) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let last = self.last_report.swap(now, Ordering::Relaxed);
        if now != last {
            error!(ino = self.ino, cno, "{}", msg);
        }
    }
}
