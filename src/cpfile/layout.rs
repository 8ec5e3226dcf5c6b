// Copyright (c) 2025 Sonic Operations Ltd
//
// Use of this software is governed by the Business Source License included
// in the LICENSE file and at soniclabs.com/bsl11.
//
// Change Date: 2028-4-16
//
// On the date above, in accordance with the Business Source License, use of
// this software will be governed by the GNU Lesser General Public License v3.

/// Geometry of the checkpoint table: maps checkpoint numbers to block offsets
/// and positions inside blocks.
///
/// Slot 0 of block 0 is reserved for the header entry, so checkpoint `cno`
/// lives `first_entry_offset` slots past the position a plain packed array
/// would give it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Layout {
    entry_size: usize,
    entries_per_block: u64,
    first_entry_offset: u64,
}

impl Layout {
    pub fn new(entry_size: usize, block_size: usize, header_bytes: usize) -> Self {
        let entries_per_block = (block_size / entry_size) as u64;
        let first_entry_offset = (header_bytes as u64).div_ceil(entry_size as u64);
        Layout {
            entry_size,
            entries_per_block,
            first_entry_offset,
        }
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn entries_per_block(&self) -> u64 {
        self.entries_per_block
    }

    /// Block offset of the block holding `cno`, counted from the beginning of
    /// the file.
    pub fn blkoff(&self, cno: u64) -> u64 {
        (cno + self.first_entry_offset - 1) / self.entries_per_block
    }

    /// Slot index of `cno` inside its block.
    pub fn slot(&self, cno: u64) -> u64 {
        (cno + self.first_entry_offset - 1) % self.entries_per_block
    }

    /// Byte offset of the entry for `cno` inside its block.
    pub fn entry_offset(&self, cno: u64) -> usize {
        self.slot(cno) as usize * self.entry_size
    }

    /// The checkpoint number mapped to the first slot of the given block.
    pub fn first_cno_in_block(&self, blkoff: u64) -> u64 {
        self.entries_per_block * blkoff + 1 - self.first_entry_offset
    }

    /// Number of entries from `cno` to whichever comes first: the end of its
    /// block, or `max` (exclusive).
    pub fn entries_in_range(&self, cno: u64, max: u64) -> u64 {
        (self.entries_per_block - self.slot(cno)).min(max - cno)
    }

    /// Whether `cno` shares its block with the header entry. Block 0 carries
    /// no per-block census and is never reclaimed.
    pub fn in_first_block(&self, cno: u64) -> bool {
        self.blkoff(cno) == 0
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use rstest_reuse::{self, *};

    use super::*;

    const ENTRY: usize = 192;

    fn small() -> Layout {
        // four entries per block, slot 0 of block 0 is the header
        Layout::new(ENTRY, 4 * ENTRY, 32)
    }

    #[template]
    #[rstest]
    #[case::four_per_block(ENTRY, 4 * ENTRY)]
    #[case::full_page(ENTRY, 4096)]
    #[case::padded_entries(256, 4096)]
    fn geometries(#[case] entry_size: usize, #[case] block_size: usize) {}

    #[test]
    fn header_reserves_the_first_slot() {
        let layout = small();
        assert_eq!(layout.entries_per_block(), 4);
        assert_eq!(layout.blkoff(1), 0);
        assert_eq!(layout.slot(1), 1);
        assert_eq!(layout.entry_offset(1), ENTRY);
    }

    #[test]
    fn blocks_after_the_first_are_fully_packed() {
        let layout = small();
        // block 1 holds checkpoints 4..=7
        for cno in 4..=7 {
            assert_eq!(layout.blkoff(cno), 1);
        }
        assert_eq!(layout.slot(4), 0);
        assert_eq!(layout.slot(7), 3);
        assert_eq!(layout.blkoff(8), 2);
        assert_eq!(layout.first_cno_in_block(1), 4);
        assert_eq!(layout.first_cno_in_block(2), 8);
    }

    #[apply(geometries)]
    fn blkoff_and_slot_are_consistent(#[case] entry_size: usize, #[case] block_size: usize) {
        let layout = Layout::new(entry_size, block_size, 32);
        let per_block = layout.entries_per_block();
        for cno in 1..per_block * 3 {
            assert_eq!(
                layout.blkoff(cno) * per_block + layout.slot(cno),
                cno + layout.first_entry_offset - 1
            );
            assert!(layout.slot(cno) < per_block);
            assert_eq!(
                layout.entry_offset(cno),
                layout.slot(cno) as usize * entry_size
            );
        }
    }

    #[apply(geometries)]
    fn first_cno_in_block_inverts_blkoff(#[case] entry_size: usize, #[case] block_size: usize) {
        let layout = Layout::new(entry_size, block_size, 32);
        for blkoff in 1..5 {
            let first = layout.first_cno_in_block(blkoff);
            assert_eq!(layout.blkoff(first), blkoff);
            assert_eq!(layout.slot(first), 0);
            assert_eq!(layout.blkoff(first - 1), blkoff - 1);
        }
    }

    #[test]
    fn entries_in_range_is_capped_by_block_and_max() {
        let layout = small();
        // from cno 4 the block has 4 slots left
        assert_eq!(layout.entries_in_range(4, 100), 4);
        // from cno 5 only 3 remain in the block
        assert_eq!(layout.entries_in_range(5, 100), 3);
        // a closer max wins
        assert_eq!(layout.entries_in_range(4, 6), 2);
        assert_eq!(layout.entries_in_range(4, 5), 1);
    }

    #[test]
    fn only_the_header_block_is_first() {
        let layout = small();
        assert!(layout.in_first_block(1));
        assert!(layout.in_first_block(3));
        assert!(!layout.in_first_block(4));
        assert!(!layout.in_first_block(100));
    }
}
