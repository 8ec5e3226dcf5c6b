// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

//! Lists the checkpoints or snapshots recorded in a checkpoint file.

use std::path::PathBuf;

use clap::Parser;
use cpfile::{
    CpFile, CpInfo, CpMode, DiskInode, MIN_CHECKPOINT_SIZE,
    mdt::{AccessMode, MetadataFile, UnixFile},
};

#[derive(Parser)]
#[command(about = "List checkpoints or snapshots of a checkpoint file")]
struct Args {
    /// Directory holding the checkpoint metadata store.
    dir: PathBuf,
    /// List only snapshots, in snapshot-list order.
    #[arg(short, long)]
    snapshots: bool,
    /// Block size the store was created with.
    #[arg(long, default_value_t = 4096)]
    block_size: usize,
    /// Checkpoint entry size recorded at format time.
    #[arg(long, default_value_t = MIN_CHECKPOINT_SIZE)]
    entry_size: usize,
}

fn print_info(info: &CpInfo) {
    let mode = if info.is_snapshot() { "ss" } else { "cp" };
    let minor = if info.is_minor() { "minor" } else { "-" };
    println!(
        "{:>20}  {}  {:>12}  {:>8}  {:>12}  {:>12}  {}",
        info.cno, mode, info.create_time, info.nblk_inc, info.inodes_count, info.blocks_count, minor
    );
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let store =
        MetadataFile::<UnixFile>::open(&args.dir, args.block_size, AccessMode::ReadOnly)?;
    let cpfile = CpFile::read(store, args.entry_size, &DiskInode::new_regular())?;

    let stat = cpfile.get_stat()?;
    println!(
        "next cno {}, {} checkpoints, {} snapshots",
        stat.cno, stat.ncheckpoints, stat.nsnapshots
    );
    println!(
        "{:>20}  {}  {:>12}  {:>8}  {:>12}  {:>12}  {}",
        "CNO", "TY", "CREATED", "NBLKINC", "INODES", "BLOCKS", "FLAGS"
    );

    let (mode, mut cursor) = if args.snapshots {
        (CpMode::Snapshot, 0)
    } else {
        (CpMode::Checkpoint, 1)
    };
    loop {
        let infos = cpfile.get_cpinfo(&mut cursor, mode, 512)?;
        if infos.is_empty() {
            break;
        }
        for info in &infos {
            print_info(info);
        }
    }
    Ok(())
}
