//! Whole-heap consistency audit (spec §4.7), compiled only with the
//! `checked` feature.
//!
//! Grounded on `original_source/mm.c`'s `checkheap`/`checkblock`/
//! `verifyfreeblock`, but returning a [`CheckReport`] describing the first
//! violation found instead of `printf`-and-`exit`. Intended for tests and
//! for callers who want to audit the heap between operations, not for the
//! allocation fast path.

use core::ptr::NonNull;

use crate::freelist::{self, bin_index};
use crate::raw::RawAllocator;
use crate::region::RegionProvider;
use crate::tag::{self, alloc_of_block, ftrp, hdrp, next_block, size_of_block, WORD};

/// The first consistency violation a [`check`] pass found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A payload pointer was not aligned to a double word.
    Misaligned { bp: usize },
    /// A block's header and footer disagree.
    HeaderFooterMismatch { bp: usize },
    /// A block's size is not a multiple of the word size, or is smaller
    /// than the minimum block size.
    BadSize { bp: usize, size: usize },
    /// Two physically adjacent blocks are both free (a missed coalesce).
    UncoalescedNeighbors { bp: usize },
    /// A block reachable by walking the free list is marked allocated.
    FreeListAllocatedBlock { bp: usize },
    /// A block's size does not belong to the bin it was found in.
    WrongBin { bp: usize, bin: usize },
    /// A free block's forward/back links are not mutual inverses.
    AsymmetricLink { bp: usize },
    /// A block reachable by walking the heap with its allocated bit clear
    /// was not also reachable by walking the free lists (or vice versa).
    FreeListHeapMismatch { bp: usize },
}

/// The outcome of a [`check`] pass: either `Ok`, or the first
/// [`Violation`] encountered, in heap-traversal order.
pub type CheckReport = Result<(), Violation>;

/// Walks the entire heap, from the prologue to the epilogue, verifying
/// every per-block invariant, then cross-checks the free lists against
/// what that walk found.
pub fn check<R: RegionProvider>(alloc: &RawAllocator<R>) -> CheckReport {
    let Some(heap_base) = alloc.heap_base() else {
        return Ok(());
    };

    let mut free_in_heap = 0usize;
    let mut bp = heap_base.as_ptr();
    loop {
        check_block(bp)?;

        // SAFETY: `bp` is reached by walking from a known-valid prologue,
        // one live block at a time.
        let size = unsafe { size_of_block(bp) };
        if size == 0 {
            break; // Epilogue.
        }
        // SAFETY: `bp`'s header is valid.
        if !unsafe { alloc_of_block(bp) } {
            free_in_heap += 1;
            check_not_coalesced_with_next(bp)?;
        }
        // SAFETY: `bp` is a live block with an in-bounds successor (the
        // epilogue always terminates the chain).
        bp = unsafe { next_block(bp) };
    }

    let free_in_lists = check_free_lists(alloc.free_list())?;
    if free_in_heap != free_in_lists {
        return Err(Violation::FreeListHeapMismatch {
            bp: heap_base.as_ptr() as usize,
        });
    }

    Ok(())
}

/// Verifies one block's header/footer/size/alignment invariants.
///
/// # Safety-adjacent
/// `bp` must be a payload pointer produced by walking the heap from the
/// prologue; this function performs only reads.
fn check_block(bp: *mut u8) -> CheckReport {
    if (bp as usize) % (2 * WORD) != 0 {
        return Err(Violation::Misaligned { bp: bp as usize });
    }
    // SAFETY: `bp` is a live block pointer reached via heap traversal.
    let size = unsafe { size_of_block(bp) };
    if size != 0 && (size % WORD != 0 || size < tag::MIN_BLOCK) {
        return Err(Violation::BadSize {
            bp: bp as usize,
            size,
        });
    }
    if size != 0 {
        // SAFETY: `bp`'s footer lies within the block, whose size we just
        // validated.
        let header = unsafe { tag::read_tag(hdrp(bp)) };
        let footer = unsafe { tag::read_tag(ftrp(bp)) };
        if header != footer {
            return Err(Violation::HeaderFooterMismatch { bp: bp as usize });
        }
    }
    Ok(())
}

/// Verifies that a free block's immediate successor is not also free
/// (would indicate a missed coalesce).
fn check_not_coalesced_with_next(bp: *mut u8) -> CheckReport {
    // SAFETY: `bp` is a live free block; its successor's header is always
    // in bounds.
    let next = unsafe { next_block(bp) };
    // SAFETY: `next`'s header is valid (every block up to the epilogue
    // has one).
    let next_size = unsafe { size_of_block(next) };
    if next_size != 0 && !unsafe { alloc_of_block(next) } {
        return Err(Violation::UncoalescedNeighbors { bp: bp as usize });
    }
    Ok(())
}

/// Walks every bin of `list`, checking bin placement, allocated-bit
/// consistency, and link symmetry. Returns the total count of free blocks
/// found.
fn check_free_lists(list: &crate::freelist::FreeList) -> Result<usize, Violation> {
    let mut count = 0usize;
    for (bin, mut head) in list.bin_heads().iter().copied().enumerate() {
        let mut prev: Option<NonNull<u8>> = None;
        while let Some(bp) = head {
            // SAFETY: `bp` is a block currently linked into this bin.
            if unsafe { alloc_of_block(bp.as_ptr()) } {
                return Err(Violation::FreeListAllocatedBlock {
                    bp: bp.as_ptr() as usize,
                });
            }
            // SAFETY: `bp`'s header is valid.
            let size = unsafe { size_of_block(bp.as_ptr()) };
            if bin_index(size) != bin {
                return Err(Violation::WrongBin {
                    bp: bp.as_ptr() as usize,
                    bin,
                });
            }
            // SAFETY: `bp` is a linked free block.
            let back = unsafe { freelist::prev_link(bp) };
            if back != prev {
                return Err(Violation::AsymmetricLink {
                    bp: bp.as_ptr() as usize,
                });
            }
            count += 1;
            prev = Some(bp);
            // SAFETY: `bp` is a linked free block.
            head = unsafe { freelist::next_link(bp) };
            if head.is_some() && head == Some(bp) {
                // Defensive cycle guard: a self-loop would otherwise spin
                // forever. Every real free list is acyclic by construction.
                break;
            }
        }
    }
    Ok(count)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::raw::RawAllocator;
    use crate::region::VecRegion;

    fn fresh(capacity: usize) -> RawAllocator<VecRegion> {
        let mut alloc = RawAllocator::new(VecRegion::with_capacity(capacity));
        alloc.init().unwrap();
        alloc
    }

    #[test]
    fn freshly_initialized_heap_is_consistent() {
        let alloc = fresh(1 << 14);
        assert_eq!(check(&alloc), Ok(()));
    }

    #[test]
    fn heap_after_allocs_and_frees_stays_consistent() {
        let mut alloc = fresh(1 << 14);
        let mut live = Vec::new();
        for size in [16, 32, 48, 2000, 64, 4092] {
            live.push(alloc.allocate(size).unwrap());
        }
        for (i, bp) in live.iter().enumerate() {
            if i % 2 == 0 {
                alloc.free(Some(*bp)).unwrap();
            }
        }
        assert_eq!(check(&alloc), Ok(()));
    }

    #[test]
    fn heap_after_realloc_round_trip_stays_consistent() {
        let mut alloc = fresh(1 << 16);
        let a = alloc.allocate(200).unwrap();
        let a = alloc.reallocate(Some(a), 4000).unwrap();
        let _b = alloc.reallocate(Some(a), 50).unwrap();
        assert_eq!(check(&alloc), Ok(()));
    }
}
