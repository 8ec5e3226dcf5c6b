// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

//! The checkpoint file (cpfile) of a log-structured copy-on-write filesystem.
//!
//! Every write-out of the filesystem produces a checkpoint: a consistent
//! on-disk state addressed by a monotonically increasing 64-bit checkpoint
//! number. The cpfile records one fixed-size entry per checkpoint in a dense,
//! block-addressable table, tracks which checkpoints were promoted to
//! persistent snapshots, and threads all snapshots onto an on-disk
//! doubly-linked list in ascending checkpoint-number order.
//!
//! [`CpFile`] implements the table and its operations on top of a
//! [`mdt::MetadataStore`], the seam to the metadata-inode layer that provides
//! lazy block allocation and block-addressed I/O. [`mdt::MetadataFile`] is
//! the file-backed store; [`mdt::MemoryStore`] keeps everything in memory.
//!
//! ```no_run
//! use cpfile::{CpFile, DiskInode, FsRoot, Ifile, MIN_CHECKPOINT_SIZE};
//! use cpfile::mdt::{AccessMode, MetadataFile, MetadataStore, UnixFile};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), cpfile::Error> {
//! let store = MetadataFile::<UnixFile>::open(
//!     "fs/cpfile".as_ref(),
//!     4096,
//!     AccessMode::ReadWrite,
//! )?;
//! let cpfile = CpFile::read(store, MIN_CHECKPOINT_SIZE, &DiskInode::new_regular())?;
//!
//! let root = FsRoot::new();
//! root.attach_ifile(Arc::new(Ifile::new()));
//! let cno = cpfile.store().next_cno();
//! cpfile.create_checkpoint(cno)?;
//! cpfile.finalize_checkpoint(cno, &root, 0, 0, false)?;
//! cpfile.store().advance_cno();
//! cpfile.store().flush()?;
//! # Ok(())
//! # }
//! ```

mod cpfile;
mod error;
mod inode;
pub mod mdt;
mod root;
mod sync;

pub use cpfile::{
    CPFILE_INO, CpFile, CpInfo, CpMode, CpStat, MIN_CHECKPOINT_SIZE, MountTable,
};
pub use error::Error;
pub use inode::{DiskInode, Ifile};
pub use root::FsRoot;
