//! Benchmark: free-extent allocation on a fresh vs. fragmented list.
//!
//! Fragmentation is produced by allocating single blocks and releasing
//! every other one, which is the worst case for first-fit scanning.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use sfs_alloc::{FreeExtentList, coalesce_blocks};
use sfs_types::BlockNumber;

const TOTAL_BLOCKS: u64 = 16_384;

fn fragmented() -> FreeExtentList {
    let mut list = FreeExtentList::new(TOTAL_BLOCKS);
    let held = list.allocate(TOTAL_BLOCKS).expect("fill");
    assert_eq!(held.len(), 1);
    for block in (0..TOTAL_BLOCKS).step_by(2) {
        list.release(BlockNumber(block), 1).expect("release");
    }
    list
}

fn bench_allocate(c: &mut Criterion) {
    let fresh = FreeExtentList::new(TOTAL_BLOCKS);
    let frag = fragmented();

    let mut group = c.benchmark_group("allocate_64");

    group.bench_function("fresh", |b| {
        b.iter(|| {
            let mut list = fresh.clone();
            black_box(list.allocate(black_box(64)).expect("alloc"))
        });
    });

    group.bench_function("fragmented", |b| {
        b.iter(|| {
            let mut list = frag.clone();
            black_box(list.allocate(black_box(64)).expect("alloc"))
        });
    });

    group.finish();
}

fn bench_release_coalesce(c: &mut Criterion) {
    let frag = fragmented();
    let odd: Vec<BlockNumber> = (1..TOTAL_BLOCKS).step_by(2).map(BlockNumber).collect();

    c.bench_function("release_fill_gaps", |b| {
        b.iter(|| {
            let mut list = frag.clone();
            for extent in coalesce_blocks(odd.clone()) {
                list.release(extent.start, extent.count).expect("release");
            }
            black_box(list.extents().len())
        });
    });
}

criterion_group!(benches, bench_allocate, bench_release_coalesce);
criterion_main!(benches);
