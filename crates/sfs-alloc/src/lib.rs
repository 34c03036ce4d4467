#![forbid(unsafe_code)]
//! Free-extent block allocation.
//!
//! ## Design
//!
//! Free space is a list of [`FreeExtent`]s kept sorted by start block.
//! Two invariants hold after every public call:
//!
//! 1. Extents never overlap.
//! 2. No two extents are adjacent (`a.start + a.count == b.start`); a
//!    release that would create adjacency merges instead, on both sides if
//!    needed.
//!
//! Allocation is first fit in list order. The request is served from as
//! many extents as it takes: an extent that covers the remainder is shrunk
//! in place, any other extent is consumed whole. A request that cannot be
//! satisfied leaves the list untouched.

use serde::{Deserialize, Serialize};
use sfs_error::{Result, SfsError};
use sfs_types::BlockNumber;
use tracing::{debug, trace};

/// A contiguous run of blocks: `count` blocks starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeExtent {
    pub start: BlockNumber,
    pub count: u64,
}

impl FreeExtent {
    #[must_use]
    pub fn new(start: BlockNumber, count: u64) -> Self {
        Self { start, count }
    }

    /// One past the last block of the extent.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.start.0 + self.count
    }

    /// Iterate the block numbers covered by this extent.
    pub fn blocks(&self) -> impl Iterator<Item = BlockNumber> + use<> {
        let start = self.start.0;
        (start..start + self.count).map(BlockNumber)
    }
}

/// Ordered list of free extents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeExtentList {
    extents: Vec<FreeExtent>,
    total_blocks: u64,
}

impl FreeExtentList {
    /// A list covering blocks `0..num_blocks`, all free.
    #[must_use]
    pub fn new(num_blocks: u64) -> Self {
        let extents = if num_blocks == 0 {
            Vec::new()
        } else {
            vec![FreeExtent::new(BlockNumber(0), num_blocks)]
        };
        Self {
            extents,
            total_blocks: num_blocks,
        }
    }

    /// Number of blocks managed by this list, free or not.
    #[must_use]
    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Sum of all free extent lengths.
    #[must_use]
    pub fn free_blocks(&self) -> u64 {
        self.extents.iter().map(|e| e.count).sum()
    }

    /// Free extents in address order.
    #[must_use]
    pub fn extents(&self) -> &[FreeExtent] {
        &self.extents
    }

    /// Largest single free extent, in blocks.
    #[must_use]
    pub fn largest_extent(&self) -> u64 {
        self.extents.iter().map(|e| e.count).max().unwrap_or(0)
    }

    /// Reserve `n_blocks` blocks.
    ///
    /// Returns the chunks in the order they were taken; the caller assigns
    /// them to inode slots in that order. Fails with
    /// [`SfsError::OutOfSpace`] without modifying the list if not enough
    /// free blocks exist.
    pub fn allocate(&mut self, n_blocks: u64) -> Result<Vec<FreeExtent>> {
        if n_blocks == 0 {
            return Ok(Vec::new());
        }
        let free = self.free_blocks();
        if free < n_blocks {
            debug!(requested = n_blocks, free, "alloc_out_of_space");
            return Err(SfsError::OutOfSpace);
        }

        let mut chunks = Vec::new();
        let mut remaining = n_blocks;
        let mut consumed = 0_usize;
        for extent in &mut self.extents {
            if extent.count > remaining {
                chunks.push(FreeExtent::new(extent.start, remaining));
                extent.start = BlockNumber(extent.start.0 + remaining);
                extent.count -= remaining;
                remaining = 0;
                break;
            }
            chunks.push(*extent);
            remaining -= extent.count;
            consumed += 1;
            if remaining == 0 {
                break;
            }
        }
        // Fully consumed extents are always a prefix of the list.
        self.extents.drain(..consumed);

        debug_assert_eq!(remaining, 0, "free count was checked up front");
        trace!(
            requested = n_blocks,
            chunks = chunks.len(),
            first_block = chunks.first().map_or(0, |c| c.start.0),
            "alloc_blocks"
        );
        Ok(chunks)
    }

    /// Return `count` blocks starting at `start` to the free list.
    ///
    /// Merges with the preceding and/or following extent when contiguous.
    /// Releasing blocks that are already free, or that lie outside the
    /// managed range, is reported as [`SfsError::Corruption`] and leaves the
    /// list unchanged.
    pub fn release(&mut self, start: BlockNumber, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let end = start.0.checked_add(count).ok_or_else(|| SfsError::Corruption {
            block: start.0,
            detail: "release range overflows".into(),
        })?;
        if end > self.total_blocks {
            return Err(SfsError::Corruption {
                block: start.0,
                detail: format!(
                    "release beyond store: end={end} total_blocks={}",
                    self.total_blocks
                ),
            });
        }

        let pos = self.extents.partition_point(|e| e.start.0 < start.0);
        if let Some(prev) = pos.checked_sub(1).map(|i| self.extents[i]) {
            if prev.end() > start.0 {
                return Err(double_release(start));
            }
        }
        if let Some(next) = self.extents.get(pos) {
            if next.start.0 < end {
                return Err(double_release(next.start));
            }
        }

        let merges_prev = pos > 0 && self.extents[pos - 1].end() == start.0;
        let merges_next = self.extents.get(pos).is_some_and(|next| next.start.0 == end);

        match (merges_prev, merges_next) {
            (true, true) => {
                let next = self.extents.remove(pos);
                self.extents[pos - 1].count += count + next.count;
            }
            (true, false) => self.extents[pos - 1].count += count,
            (false, true) => {
                let next = &mut self.extents[pos];
                next.start = start;
                next.count += count;
            }
            (false, false) => self.extents.insert(pos, FreeExtent::new(start, count)),
        }

        trace!(
            start = start.0,
            count,
            merges_prev,
            merges_next,
            extents = self.extents.len(),
            "release_blocks"
        );
        Ok(())
    }
}

fn double_release(block: BlockNumber) -> SfsError {
    SfsError::Corruption {
        block: block.0,
        detail: "release of a block that is already free".into(),
    }
}

/// Group a set of held blocks into maximal contiguous extents.
///
/// The blocks are sorted first; consecutive block numbers collapse into one
/// extent. A single block skips the sort.
#[must_use]
pub fn coalesce_blocks(mut blocks: Vec<BlockNumber>) -> Vec<FreeExtent> {
    match blocks.len() {
        0 => return Vec::new(),
        1 => return vec![FreeExtent::new(blocks[0], 1)],
        _ => {}
    }
    blocks.sort_unstable();

    let mut runs = Vec::new();
    let mut run = FreeExtent::new(blocks[0], 1);
    for &block in &blocks[1..] {
        if block.0 == run.end() {
            run.count += 1;
        } else {
            runs.push(run);
            run = FreeExtent::new(block, 1);
        }
    }
    runs.push(run);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn ext(start: u64, count: u64) -> FreeExtent {
        FreeExtent::new(BlockNumber(start), count)
    }

    fn assert_invariants(list: &FreeExtentList) {
        for pair in list.extents().windows(2) {
            assert!(
                pair[0].end() < pair[1].start.0,
                "extents overlap or touch: {:?} {:?}",
                pair[0],
                pair[1]
            );
        }
        assert!(list.extents().iter().all(|e| e.count > 0));
        assert!(list.free_blocks() <= list.total_blocks());
    }

    #[test]
    fn fresh_list_is_one_extent() {
        let list = FreeExtentList::new(64);
        assert_eq!(list.extents(), &[ext(0, 64)]);
        assert_eq!(list.free_blocks(), 64);
        assert_eq!(list.largest_extent(), 64);
    }

    #[test]
    fn allocate_splits_first_extent_in_place() {
        let mut list = FreeExtentList::new(64);
        let chunks = list.allocate(10).unwrap();
        assert_eq!(chunks, vec![ext(0, 10)]);
        assert_eq!(list.extents(), &[ext(10, 54)]);
    }

    #[test]
    fn allocate_spans_multiple_extents_in_list_order() {
        let mut list = FreeExtentList::new(0);
        list.total_blocks = 100;
        list.release(BlockNumber(90), 4).unwrap();
        list.release(BlockNumber(10), 2).unwrap();
        list.release(BlockNumber(40), 5).unwrap();

        let chunks = list.allocate(9).unwrap();
        assert_eq!(chunks, vec![ext(10, 2), ext(40, 5), ext(90, 2)]);
        assert_eq!(list.extents(), &[ext(92, 2)]);
        assert_invariants(&list);
    }

    #[test]
    fn allocate_exact_fit_removes_extent() {
        let mut list = FreeExtentList::new(8);
        let chunks = list.allocate(8).unwrap();
        assert_eq!(chunks, vec![ext(0, 8)]);
        assert!(list.extents().is_empty());
        assert_eq!(list.free_blocks(), 0);
    }

    #[test]
    fn allocate_zero_is_a_noop() {
        let mut list = FreeExtentList::new(8);
        assert!(list.allocate(0).unwrap().is_empty());
        assert_eq!(list.free_blocks(), 8);
    }

    #[test]
    fn out_of_space_leaves_list_untouched() {
        let mut list = FreeExtentList::new(20);
        list.allocate(12).unwrap();
        list.release(BlockNumber(2), 3).unwrap();
        let before = list.clone();

        let err = list.allocate(12).unwrap_err();
        assert!(matches!(err, SfsError::OutOfSpace));
        assert_eq!(list, before);
    }

    #[test]
    fn release_merges_with_following_extent() {
        let mut list = FreeExtentList::new(200);
        list.allocate(200).unwrap();
        list.release(BlockNumber(105), 3).unwrap();
        list.release(BlockNumber(100), 5).unwrap();
        assert_eq!(list.extents(), &[ext(100, 8)]);
    }

    #[test]
    fn release_adjacent_extents_allow_single_chunk_allocation() {
        let mut list = FreeExtentList::new(200);
        list.allocate(200).unwrap();
        list.release(BlockNumber(100), 5).unwrap();
        list.release(BlockNumber(105), 3).unwrap();
        assert_eq!(list.extents(), &[ext(100, 8)]);

        let chunks = list.allocate(8).unwrap();
        assert_eq!(chunks, vec![ext(100, 8)]);
    }

    #[test]
    fn release_bridging_gap_merges_both_sides() {
        let mut list = FreeExtentList::new(30);
        list.allocate(30).unwrap();
        list.release(BlockNumber(0), 10).unwrap();
        list.release(BlockNumber(20), 10).unwrap();
        assert_eq!(list.extents().len(), 2);

        list.release(BlockNumber(10), 10).unwrap();
        assert_eq!(list.extents(), &[ext(0, 30)]);
    }

    #[test]
    fn release_detects_double_free() {
        let mut list = FreeExtentList::new(30);
        list.allocate(10).unwrap();
        list.release(BlockNumber(0), 5).unwrap();
        let before = list.clone();

        assert!(list.release(BlockNumber(3), 2).is_err());
        assert!(list.release(BlockNumber(4), 10).is_err());
        assert!(list.release(BlockNumber(8), 3).is_err());
        assert_eq!(list, before);
    }

    #[test]
    fn release_rejects_blocks_outside_store() {
        let mut list = FreeExtentList::new(10);
        list.allocate(10).unwrap();
        assert!(list.release(BlockNumber(8), 3).is_err());
        assert!(list.release(BlockNumber(u64::MAX), 2).is_err());
    }

    #[test]
    fn coalesce_sorts_and_merges_runs() {
        let blocks = [7, 3, 4, 9, 5, 8, 12].map(BlockNumber).to_vec();
        assert_eq!(
            coalesce_blocks(blocks),
            vec![ext(3, 3), ext(7, 3), ext(12, 1)]
        );
        assert_eq!(coalesce_blocks(vec![BlockNumber(6)]), vec![ext(6, 1)]);
        assert!(coalesce_blocks(Vec::new()).is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn proptest_free_count_tracks_live_allocations(
            ops in proptest::collection::vec((any::<bool>(), 1_u64..24, any::<prop::sample::Index>()), 1..120),
        ) {
            let total = 256_u64;
            let mut list = FreeExtentList::new(total);
            let mut held: Vec<FreeExtent> = Vec::new();

            for (is_alloc, n, pick) in ops {
                if is_alloc || held.is_empty() {
                    match list.allocate(n) {
                        Ok(chunks) => {
                            prop_assert_eq!(chunks.iter().map(|c| c.count).sum::<u64>(), n);
                            held.extend(chunks);
                        }
                        Err(SfsError::OutOfSpace) => {
                            prop_assert!(list.free_blocks() < n);
                        }
                        Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                    }
                } else {
                    let chunk = held.swap_remove(pick.index(held.len()));
                    list.release(chunk.start, chunk.count).unwrap();
                }

                let held_blocks: u64 = held.iter().map(|c| c.count).sum();
                prop_assert_eq!(list.free_blocks(), total - held_blocks);
                assert_invariants(&list);

                let mut seen = BTreeSet::new();
                for chunk in &held {
                    for block in chunk.blocks() {
                        prop_assert!(seen.insert(block), "block {block} handed out twice");
                    }
                }
            }
        }
    }
}
