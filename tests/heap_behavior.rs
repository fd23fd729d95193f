//! Integration tests replaying the literal boundary scenarios and
//! quantified invariants of spec.md §8 against a
//! [`tagheap::raw::RawAllocator`] backed by a `std`-only
//! [`tagheap::region::VecRegion`].
//!
//! Built in the teacher crate's own test style: plain `#[test]` functions,
//! direct `assert_eq!`/`assert!`, one independent heap per test.

use tagheap::raw::RawAllocator;
use tagheap::region::VecRegion;

const WORD: usize = core::mem::size_of::<usize>();

fn fresh_heap(capacity: usize) -> RawAllocator<VecRegion> {
    let mut alloc = RawAllocator::new(VecRegion::with_capacity(capacity));
    alloc.init().expect("initial heap extension must succeed");
    alloc
}

#[cfg(feature = "checked")]
fn assert_consistent(alloc: &RawAllocator<VecRegion>) {
    if let Err(violation) = tagheap::checker::check(alloc) {
        panic!("heap consistency violation: {violation:?}");
    }
}

#[cfg(not(feature = "checked"))]
fn assert_consistent(_alloc: &RawAllocator<VecRegion>) {}

// Scenario 1: init; allocate(0) = NULL; allocate(1) = p1; free(p1);
// allocate(1) = p2. Address reuse is permitted and expected.
#[test]
fn scenario_allocate_zero_then_reuse_after_free() {
    let mut alloc = fresh_heap(1 << 16);

    assert!(alloc.allocate(0).is_none());

    let p1 = alloc.allocate(1).expect("allocate(1) must succeed");
    alloc.free(Some(p1)).expect("freeing a live block must succeed");
    let p2 = alloc.allocate(1).expect("allocate(1) must succeed again");

    assert_eq!(p1, p2, "address reuse is expected for the first allocation");
    assert_consistent(&alloc);
}

// Scenario 2: two allocations, free both; the merged free block must exist
// and no two adjacent free blocks may remain.
#[test]
fn scenario_two_frees_coalesce_into_one_block() {
    let mut alloc = fresh_heap(1 << 16);

    let a = alloc.allocate(16).unwrap();
    let b = alloc.allocate(16).unwrap();
    alloc.free(Some(a)).unwrap();
    alloc.free(Some(b)).unwrap();

    assert_consistent(&alloc);

    // `a` is now the head of the merged free block (it absorbed `b` and
    // whatever free space followed them both), so its own header already
    // reports the combined size.
    let merged_size = unsafe { tagheap::tag::size_of_block(a.as_ptr()) };
    assert!(merged_size >= 2 * (16 + 2 * WORD), "coalesced block must cover both originals");
}

// Scenario 3: allocate(4096); reallocate(a, 8192). Either the same address
// (in-place grow) or a different one with the first 4096 bytes preserved.
#[test]
fn scenario_realloc_grow_preserves_prefix() {
    let mut alloc = fresh_heap(1 << 20);

    let a = alloc.allocate(4096).unwrap();
    unsafe { a.as_ptr().write_bytes(0x5A, 4096) };

    let grown = alloc.reallocate(Some(a), 8192).expect("grow must succeed");
    for i in 0..4096 {
        assert_eq!(unsafe { *grown.as_ptr().add(i) }, 0x5A, "prefix byte {i} must survive growth");
    }
    assert_consistent(&alloc);
}

// Scenario 4: alternating allocate(24)/allocate(24), free every second
// block, then allocate(24) again must reuse a freed block without growing
// the heap.
#[test]
fn scenario_alternating_allocs_reuse_freed_slot_without_growth() {
    let mut alloc = fresh_heap(1 << 16);

    let mut blocks = Vec::new();
    for _ in 0..8 {
        blocks.push(alloc.allocate(24).unwrap());
    }
    for (i, bp) in blocks.iter().enumerate() {
        if i % 2 == 0 {
            alloc.free(Some(*bp)).unwrap();
        }
    }

    let extent_before = alloc.extent();
    let reused = alloc.allocate(24).unwrap();
    let extent_after = alloc.extent();

    assert_eq!(extent_before, extent_after, "reuse must not extend the heap");
    assert!(
        blocks.iter().any(|bp| *bp == reused),
        "the new allocation must reuse one of the freed blocks"
    );
    assert_consistent(&alloc);
}

// Scenario 5: allocate(128) then allocate(256) (a multiple of 128, != 128):
// the second block is overprovisioned by 128 bytes per §4.3.
#[test]
fn scenario_multiple_of_128_is_overprovisioned() {
    let mut alloc = fresh_heap(1 << 16);

    let _a = alloc.allocate(128).unwrap();
    let b = alloc.allocate(256).unwrap();

    let dword = 2 * WORD;
    let expected = dword + 256 + 128;
    assert_eq!(unsafe { tagheap::tag::size_of_block(b.as_ptr()) }, expected);
    assert_consistent(&alloc);
}

// Scenario 6: allocate(4092): the block is W + CHUNKSIZE bytes per §4.3.
#[test]
fn scenario_4092_gets_chunksize_patch() {
    let mut alloc = fresh_heap(1 << 16);

    let a = alloc.allocate(4092).unwrap();
    let expected = WORD + tagheap::raw::CHUNKSIZE;
    assert_eq!(unsafe { tagheap::tag::size_of_block(a.as_ptr()) }, expected);
    assert_consistent(&alloc);
}

// reallocate(p, size(p)) must be a no-op returning the same pointer with
// content preserved.
#[test]
fn realloc_to_same_size_is_identity() {
    let mut alloc = fresh_heap(1 << 16);

    let a = alloc.allocate(100).unwrap();
    unsafe { a.as_ptr().write_bytes(0x77, 100) };

    let asize = unsafe { tagheap::tag::size_of_block(a.as_ptr()) };
    let payload_for_same_asize = asize - 2 * WORD;
    let same = alloc.reallocate(Some(a), payload_for_same_asize).unwrap();

    assert_eq!(a, same, "requesting the already-adjusted size must be a no-op");
    for i in 0..100 {
        assert_eq!(unsafe { *same.as_ptr().add(i) }, 0x77);
    }
}

// reallocate(p, 0) behaves as free; reallocate(NULL, s) behaves as
// allocate(s).
#[test]
fn realloc_zero_is_free_and_realloc_null_is_allocate() {
    let mut alloc = fresh_heap(1 << 16);

    let a = alloc.allocate(64).unwrap();
    assert!(alloc.reallocate(Some(a), 0).is_none());
    assert_consistent(&alloc);

    let b = alloc.reallocate(None, 64).expect("realloc(NULL, s) must allocate");
    assert_ne!(b.as_ptr(), core::ptr::null_mut());
    assert_consistent(&alloc);
}

// Every payload address handed back by allocate must be word-aligned, and
// shrinking a realloc must split off a usable residue when large enough.
#[test]
fn shrink_splits_off_a_reusable_residue() {
    let mut alloc = fresh_heap(1 << 16);

    let a = alloc.allocate(512).unwrap();
    let shrunk = alloc.reallocate(Some(a), 16).unwrap();
    assert_eq!(a, shrunk, "shrink happens in place");
    assert_consistent(&alloc);

    // The split residue must be available for a subsequent allocation
    // without growing the heap.
    let extent_before = alloc.extent();
    let reuse = alloc.allocate(200);
    assert!(reuse.is_some());
    assert_eq!(alloc.extent(), extent_before);
}

#[test]
fn every_allocation_is_word_aligned() {
    let mut alloc = fresh_heap(1 << 16);
    for size in [1, 2, 3, 7, 8, 9, 63, 64, 65, 4095, 4096, 4097] {
        let bp = alloc.allocate(size).expect("allocation must succeed");
        assert_eq!(
            bp.as_ptr() as usize % WORD,
            0,
            "payload address for size {size} must be word-aligned"
        );
    }
    assert_consistent(&alloc);
}

#[test]
fn heap_exhaustion_returns_none_and_leaves_heap_usable() {
    // A tiny region: enough for init's own CHUNKSIZE extension, but not
    // for a further huge request.
    let mut alloc = fresh_heap(8192);

    assert!(alloc.allocate(usize::MAX / 2).is_none());

    // The allocator must remain usable after the failed request.
    let bp = alloc.allocate(32);
    assert!(bp.is_some());
    assert_consistent(&alloc);
}
