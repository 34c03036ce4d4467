#![forbid(unsafe_code)]
//! Inode management.
//!
//! An [`Inode`] records which blocks hold a file's bytes: up to
//! `direct_blocks` entries in the direct list, then indirect groups of up to
//! `direct_blocks` entries each. [`Inode::translate`] is the single
//! addressing law used by every read and write.
//!
//! The [`InodeTable`] owns all inodes, counts the directory entries that
//! refer to each one, and returns an inode's blocks to the
//! [`FreeExtentList`] when its last link goes away.

use sfs_alloc::{FreeExtent, FreeExtentList, coalesce_blocks};
use sfs_error::{Result, SfsError};
use sfs_types::{BlockNumber, ByteOffset, Geometry, InodeNumber};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Per-file block map and usage counters.
///
/// Invariants:
/// - `blocks_used == data_blocks.len() + sum(group.len())`
/// - `size <= blocks_used * block_size`
/// - indirect group `i` is only non-empty once the direct list and groups
///   `0..i` are full.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inode {
    size: u64,
    blocks_used: u64,
    data_blocks: Vec<BlockNumber>,
    indirect_groups: Vec<Vec<BlockNumber>>,
}

impl Inode {
    /// An empty, zero-size inode holding no blocks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn blocks_used(&self) -> u64 {
        self.blocks_used
    }

    #[must_use]
    pub fn data_blocks(&self) -> &[BlockNumber] {
        &self.data_blocks
    }

    #[must_use]
    pub fn indirect_groups(&self) -> &[Vec<BlockNumber>] {
        &self.indirect_groups
    }

    /// Record a new logical size. Must not exceed the allocated capacity.
    pub fn set_size(&mut self, geo: &Geometry, size: u64) -> Result<()> {
        let capacity = self.blocks_used * geo.block_size_u64();
        if size > capacity {
            return Err(SfsError::Corruption {
                block: 0,
                detail: format!("inode size {size} exceeds allocated capacity {capacity}"),
            });
        }
        self.size = size;
        Ok(())
    }

    /// Ensure enough indirect groups exist to hold `new_block_count` blocks.
    ///
    /// Appends empty groups until `ceil((new_block_count - direct) / direct)`
    /// groups are present. No-op while the count fits in the direct list.
    pub fn grow_to(&mut self, geo: &Geometry, new_block_count: u64) {
        let direct = geo.direct_blocks_u64();
        if new_block_count <= direct {
            return;
        }
        let wanted = (new_block_count - direct).div_ceil(direct);
        while (self.indirect_groups.len() as u64) < wanted {
            self.indirect_groups.push(Vec::new());
        }
    }

    /// Append freshly allocated chunks to the block map in address order.
    ///
    /// Blocks fill the direct list first, then indirect groups in order.
    /// [`Inode::grow_to`] must have been called for the final block count;
    /// a missing group or a map beyond the per-inode maximum is corruption.
    pub fn attach(&mut self, geo: &Geometry, chunks: &[FreeExtent]) -> Result<()> {
        let direct = geo.direct_blocks_u64();
        let incoming: u64 = chunks.iter().map(|c| c.count).sum();
        let final_count = self.blocks_used + incoming;
        if final_count > geo.max_blocks_per_inode() {
            return Err(SfsError::Corruption {
                block: chunks.first().map_or(0, |c| c.start.0),
                detail: format!(
                    "block map of {final_count} exceeds per-inode maximum {}",
                    geo.max_blocks_per_inode()
                ),
            });
        }
        let needed_groups = final_count.saturating_sub(direct).div_ceil(direct);
        if (self.indirect_groups.len() as u64) < needed_groups {
            return Err(SfsError::Corruption {
                block: chunks.first().map_or(0, |c| c.start.0),
                detail: format!(
                    "indirect groups not grown: have {} need {needed_groups}",
                    self.indirect_groups.len()
                ),
            });
        }

        for block in chunks.iter().flat_map(FreeExtent::blocks) {
            if self.blocks_used < direct {
                self.data_blocks.push(block);
            } else {
                let group = (self.blocks_used - direct) / direct;
                // Bounded by needed_groups, which was checked above.
                #[expect(clippy::cast_possible_truncation)]
                self.indirect_groups[group as usize].push(block);
            }
            self.blocks_used += 1;
        }
        Ok(())
    }

    /// Translate a file byte offset to the physical byte address on the store.
    ///
    /// With `dbytes = direct_blocks * block_size`:
    /// - `off < dbytes`: block `data_blocks[off / block_size]`
    /// - otherwise, with `rel = off - dbytes`: block
    ///   `indirect_groups[rel / (direct_blocks * block_size)][(rel / block_size) % direct_blocks]`
    ///
    /// The result is that block's start address plus `off % block_size`.
    pub fn translate(&self, geo: &Geometry, byte_offset: u64) -> Result<ByteOffset> {
        let bs = geo.block_size_u64();
        let direct = geo.direct_blocks_u64();
        let dbytes = geo.direct_bytes();

        let block = if byte_offset < dbytes {
            usize::try_from(byte_offset / bs)
                .ok()
                .and_then(|idx| self.data_blocks.get(idx))
        } else {
            let rel = byte_offset - dbytes;
            let i = rel / (direct * bs);
            let j = (rel / bs) % direct;
            usize::try_from(i)
                .ok()
                .and_then(|i| self.indirect_groups.get(i))
                .and_then(|group| usize::try_from(j).ok().and_then(|j| group.get(j)))
        };

        let block = block.ok_or_else(|| SfsError::Corruption {
            block: 0,
            detail: format!("no block mapped for byte offset {byte_offset}"),
        })?;
        let base = geo.block_to_byte(*block);
        Ok(ByteOffset(base.0 + geo.offset_in_block(byte_offset)))
    }

    /// Every block the inode holds: direct list, then each indirect group.
    #[must_use]
    pub fn held_blocks(&self) -> Vec<BlockNumber> {
        self.data_blocks
            .iter()
            .chain(self.indirect_groups.iter().flatten())
            .copied()
            .collect()
    }

    /// Return every held block to `free`, merged into maximal extents.
    ///
    /// Returns the number of blocks released.
    pub fn release_blocks(self, free: &mut FreeExtentList) -> Result<u64> {
        let released = self.blocks_used;
        for extent in coalesce_blocks(self.held_blocks()) {
            free.release(extent.start, extent.count)?;
        }
        Ok(released)
    }
}

/// Split `[offset, offset + len)` into runs that never cross a block boundary.
///
/// Yields `(file_offset, run_len)` pairs in order.
#[derive(Debug, Clone)]
pub struct BlockRuns {
    pos: u64,
    end: u64,
    block_size: u64,
}

impl BlockRuns {
    #[must_use]
    pub fn new(geo: &Geometry, offset: u64, len: u64) -> Self {
        Self {
            pos: offset,
            end: offset.saturating_add(len),
            block_size: geo.block_size_u64(),
        }
    }
}

impl Iterator for BlockRuns {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let room = self.block_size - self.pos % self.block_size;
        let run = room.min(self.end - self.pos);
        let item = (self.pos, run);
        self.pos += run;
        Some(item)
    }
}

#[derive(Debug)]
struct InodeSlot {
    inode: Inode,
    links: u32,
}

/// All live inodes, with the number of directory entries referring to each.
#[derive(Debug, Default)]
pub struct InodeTable {
    slots: BTreeMap<InodeNumber, InodeSlot>,
    next_ino: u64,
}

impl InodeTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh zero-size inode with one link.
    pub fn create(&mut self) -> InodeNumber {
        let ino = InodeNumber(self.next_ino);
        self.next_ino += 1;
        self.slots.insert(
            ino,
            InodeSlot {
                inode: Inode::new(),
                links: 1,
            },
        );
        trace!(ino = ino.0, "inode_create");
        ino
    }

    fn slot(&self, ino: InodeNumber) -> Result<&InodeSlot> {
        self.slots.get(&ino).ok_or_else(|| dangling(ino))
    }

    pub fn get(&self, ino: InodeNumber) -> Result<&Inode> {
        self.slot(ino).map(|slot| &slot.inode)
    }

    pub fn get_mut(&mut self, ino: InodeNumber) -> Result<&mut Inode> {
        self.slots
            .get_mut(&ino)
            .map(|slot| &mut slot.inode)
            .ok_or_else(|| dangling(ino))
    }

    /// Number of directory entries sharing this inode.
    pub fn links(&self, ino: InodeNumber) -> Result<u32> {
        self.slot(ino).map(|slot| slot.links)
    }

    /// Record one more directory entry referring to `ino`.
    pub fn link(&mut self, ino: InodeNumber) -> Result<u32> {
        let slot = self.slots.get_mut(&ino).ok_or_else(|| dangling(ino))?;
        slot.links += 1;
        trace!(ino = ino.0, links = slot.links, "inode_link");
        Ok(slot.links)
    }

    /// Drop one directory entry's reference to `ino`.
    ///
    /// When the last link goes, the inode is destroyed and its blocks are
    /// released into `free`. Returns the number of blocks reclaimed (zero
    /// while other links remain).
    pub fn unlink(&mut self, ino: InodeNumber, free: &mut FreeExtentList) -> Result<u64> {
        let slot = self.slots.get_mut(&ino).ok_or_else(|| dangling(ino))?;
        slot.links = slot.links.saturating_sub(1);
        if slot.links > 0 {
            trace!(ino = ino.0, links = slot.links, "inode_unlink");
            return Ok(0);
        }

        let slot = self.slots.remove(&ino).ok_or_else(|| dangling(ino))?;
        let reclaimed = slot.inode.release_blocks(free)?;
        debug!(
            ino = ino.0,
            reclaimed,
            free_blocks = free.free_blocks(),
            "inode_reclaim"
        );
        Ok(reclaimed)
    }

    /// Number of live inodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Total blocks held across all live inodes.
    #[must_use]
    pub fn blocks_held(&self) -> u64 {
        self.slots.values().map(|slot| slot.inode.blocks_used()).sum()
    }
}

fn dangling(ino: InodeNumber) -> SfsError {
    SfsError::Corruption {
        block: 0,
        detail: format!("dangling inode reference {ino}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn geo() -> Geometry {
        // 16-byte blocks, 4 direct slots: max 20 blocks / 320 bytes per file.
        Geometry::new(16 * 64, 16, 4).unwrap()
    }

    fn blocks(range: std::ops::Range<u64>) -> Vec<FreeExtent> {
        vec![FreeExtent::new(BlockNumber(range.start), range.end - range.start)]
    }

    fn filled(geo: &Geometry, count: u64) -> Inode {
        let mut inode = Inode::new();
        inode.grow_to(geo, count);
        inode.attach(geo, &blocks(100..100 + count)).unwrap();
        inode
    }

    #[test]
    fn grow_to_adds_groups_only_past_direct_capacity() {
        let geo = geo();
        let mut inode = Inode::new();
        inode.grow_to(&geo, 4);
        assert!(inode.indirect_groups().is_empty());
        inode.grow_to(&geo, 5);
        assert_eq!(inode.indirect_groups().len(), 1);
        inode.grow_to(&geo, 8);
        assert_eq!(inode.indirect_groups().len(), 1);
        inode.grow_to(&geo, 9);
        assert_eq!(inode.indirect_groups().len(), 2);
        inode.grow_to(&geo, 3);
        assert_eq!(inode.indirect_groups().len(), 2);
    }

    #[test]
    fn attach_fills_direct_then_groups() {
        let geo = geo();
        let inode = filled(&geo, 10);
        assert_eq!(inode.blocks_used(), 10);
        assert_eq!(inode.data_blocks(), &[100, 101, 102, 103].map(BlockNumber));
        assert_eq!(
            inode.indirect_groups(),
            &[
                vec![104, 105, 106, 107].into_iter().map(BlockNumber).collect::<Vec<_>>(),
                vec![BlockNumber(108), BlockNumber(109)],
            ]
        );
    }

    #[test]
    fn attach_without_grow_is_rejected() {
        let geo = geo();
        let mut inode = Inode::new();
        let err = inode.attach(&geo, &blocks(0..5)).unwrap_err();
        assert!(matches!(err, SfsError::Corruption { .. }));
        assert_eq!(inode, Inode::new());
    }

    #[test]
    fn attach_beyond_maximum_is_rejected() {
        let geo = geo();
        let mut inode = filled(&geo, 20);
        inode.grow_to(&geo, 21);
        assert!(inode.attach(&geo, &blocks(200..201)).is_err());
        assert_eq!(inode.blocks_used(), 20);
    }

    #[test]
    fn translate_direct_and_boundary() {
        let geo = geo();
        let inode = filled(&geo, 6);
        // Offset 0 -> block 100 (byte 1600).
        assert_eq!(inode.translate(&geo, 0).unwrap(), ByteOffset(1600));
        assert_eq!(inode.translate(&geo, 17).unwrap(), ByteOffset(101 * 16 + 1));
        // Last direct byte: direct_blocks * block_size - 1 = 63.
        assert_eq!(inode.translate(&geo, 63).unwrap(), ByteOffset(103 * 16 + 15));
        // First indirect byte.
        assert_eq!(inode.translate(&geo, 64).unwrap(), ByteOffset(104 * 16));
    }

    #[test]
    fn translate_indirect_group_one_slot_two() {
        let geo = geo();
        let inode = filled(&geo, 12);
        // rel = 1 * (4 * 16) + 2 * 16 = 96, offset = 64 + 96 = 160.
        let addr = inode.translate(&geo, 160 + 5).unwrap();
        assert_eq!(inode.indirect_groups()[1][2], BlockNumber(110));
        assert_eq!(addr, ByteOffset(110 * 16 + 5));
    }

    #[test]
    fn translate_unmapped_offset_is_corruption() {
        let geo = geo();
        let inode = filled(&geo, 2);
        assert!(inode.translate(&geo, 32).is_err());
        assert!(inode.translate(&geo, 64).is_err());
    }

    #[test]
    fn set_size_respects_capacity() {
        let geo = geo();
        let mut inode = filled(&geo, 2);
        inode.set_size(&geo, 32).unwrap();
        assert_eq!(inode.size(), 32);
        assert!(inode.set_size(&geo, 33).is_err());
        assert_eq!(inode.size(), 32);
    }

    #[test]
    fn block_runs_split_at_boundaries() {
        let geo = geo();
        let runs: Vec<_> = BlockRuns::new(&geo, 10, 30).collect();
        assert_eq!(runs, vec![(10, 6), (16, 16), (32, 8)]);
        assert_eq!(BlockRuns::new(&geo, 5, 0).count(), 0);
        let aligned: Vec<_> = BlockRuns::new(&geo, 32, 16).collect();
        assert_eq!(aligned, vec![(32, 16)]);
    }

    #[test]
    fn release_blocks_merges_scattered_map() {
        let geo = geo();
        let mut free = FreeExtentList::new(64);
        let all = free.allocate(64).unwrap();
        assert_eq!(all.len(), 1);

        let mut inode = Inode::new();
        inode.grow_to(&geo, 6);
        let chunks = vec![
            FreeExtent::new(BlockNumber(40), 2),
            FreeExtent::new(BlockNumber(10), 3),
            FreeExtent::new(BlockNumber(42), 1),
        ];
        inode.attach(&geo, &chunks).unwrap();

        assert_eq!(inode.release_blocks(&mut free).unwrap(), 6);
        assert_eq!(
            free.extents(),
            &[
                FreeExtent::new(BlockNumber(10), 3),
                FreeExtent::new(BlockNumber(40), 3)
            ]
        );
    }

    #[test]
    fn translate_follows_scattered_chunks_in_discovery_order() {
        let geo = geo();
        let mut inode = Inode::new();
        inode.grow_to(&geo, 10);
        let chunks = vec![
            FreeExtent::new(BlockNumber(40), 2),
            FreeExtent::new(BlockNumber(10), 3),
            FreeExtent::new(BlockNumber(60), 1),
            FreeExtent::new(BlockNumber(3), 4),
        ];
        inode.attach(&geo, &chunks).unwrap();

        // Logical blocks 0..4 direct, 4..8 group 0, 8..10 group 1.
        let expected = [40, 41, 10, 11, 12, 60, 3, 4, 5, 6];
        for (logical, &physical) in (0_u64..).zip(expected.iter()) {
            let offset = logical * 16 + 7;
            assert_eq!(
                inode.translate(&geo, offset).unwrap(),
                ByteOffset(physical * 16 + 7),
                "logical block {logical}"
            );
        }
        assert_eq!(inode.indirect_groups()[1], vec![BlockNumber(5), BlockNumber(6)]);
        assert!(inode.translate(&geo, 10 * 16).is_err());
    }

    #[test]
    fn table_reclaims_only_on_last_unlink() {
        let geo = geo();
        let mut free = FreeExtentList::new(64);
        let mut table = InodeTable::new();
        let ino = table.create();

        let chunks = free.allocate(5).unwrap();
        let inode = table.get_mut(ino).unwrap();
        inode.grow_to(&geo, 5);
        inode.attach(&geo, &chunks).unwrap();
        assert_eq!(table.blocks_held(), 5);

        assert_eq!(table.link(ino).unwrap(), 2);
        assert_eq!(table.unlink(ino, &mut free).unwrap(), 0);
        assert_eq!(free.free_blocks(), 59);
        assert_eq!(table.links(ino).unwrap(), 1);

        assert_eq!(table.unlink(ino, &mut free).unwrap(), 5);
        assert_eq!(free.free_blocks(), 64);
        assert!(table.is_empty());
        assert!(matches!(table.get(ino), Err(SfsError::Corruption { .. })));
    }

    #[test]
    fn table_numbers_are_not_reused() {
        let mut free = FreeExtentList::new(8);
        let mut table = InodeTable::new();
        let a = table.create();
        table.unlink(a, &mut free).unwrap();
        let b = table.create();
        assert_ne!(a, b);
        assert_eq!(table.len(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn proptest_translate_matches_logical_block_order(
            count in 1_u64..=20,
            offset_seed in any::<u64>(),
        ) {
            let geo = geo();
            let inode = filled(&geo, count);
            let held = inode.held_blocks();
            prop_assert_eq!(held.len() as u64, inode.blocks_used());

            let offset = offset_seed % (count * 16);
            let addr = inode.translate(&geo, offset).unwrap();
            // Blocks were attached in order, so logical block k maps to held[k].
            let logical = offset / 16;
            let expected = held[logical as usize].0 * 16 + offset % 16;
            prop_assert_eq!(addr, ByteOffset(expected));
        }
    }
}
