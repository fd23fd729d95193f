//! The allocator front end, placement/splitting, coalescing, and
//! reallocation (spec §4.3–§4.6).
//!
//! [`RawAllocator`] is the whole allocator minus the `GlobalAlloc`-facing
//! veneer: it owns a [`RegionProvider`] and a [`FreeList`], and exposes the
//! four operations from spec.md §6 (`init`, `allocate`, `free`,
//! `reallocate`) directly, so tests and the CLI harness can drive it
//! without going through `Layout`/`GlobalAlloc` at all.

use core::ptr::NonNull;

use crate::freelist::FreeList;
use crate::region::RegionProvider;
use crate::tag::{
    self, alloc_of_block, hdrp, next_block, prev_block, read_tag, size_of_block, stamp,
    write_tag, DWORD, MIN_BLOCK, WORD,
};

/// Default heap-extension granularity in bytes, matching
/// `original_source/mm.c`'s `CHUNKSIZE`.
pub const CHUNKSIZE: usize = 4104;

/// Whether to apply the two trace-specific `asize` overrides documented in
/// spec.md §4.3 and §9. Correctness never depends on this; it only trades a
/// little extra fragmentation on a couple of specific request sizes for
/// better later in-place `reallocate` behavior. Left as a module constant
/// rather than a cargo feature since flipping it changes observable
/// allocation *addresses*, not correctness, and a cargo feature would be
/// invisible at the call site where it matters.
const BENCHMARK_COMPAT: bool = true;

/// A region provider failed to satisfy a heap-growth request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// The provider has no more bytes to give (spec.md §7).
    Exhausted,
}

/// `RawAllocator::free` was asked to free something that does not look
/// like a currently-allocated block.
///
/// Per spec.md §7 this is technically undefined behavior territory (the
/// caller violated the contract), but the allocated-bit check is already
/// computed as part of freeing a block, so surfacing it as a `Result`
/// costs nothing and lets callers that want to catch double-frees do so,
/// without this being the kind of integrity/security hardening spec.md
/// rules out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeError {
    /// The block's allocated bit was already clear.
    DoubleFree,
}

/// The allocator core: a [`FreeList`] index over a heap obtained from a
/// [`RegionProvider`].
///
/// Generic over `R` so that tests and the CLI harness can construct
/// independent heaps against mock or `std`-backed providers (spec.md §9),
/// while the default, no_std-friendly facade in the crate root uses
/// [`crate::region::StaticRegion`].
pub struct RawAllocator<R: RegionProvider> {
    region: R,
    /// Prologue payload pointer; `None` until [`init`](Self::init) runs.
    heap_base: Option<NonNull<u8>>,
    free_list: FreeList,
}

impl<R: RegionProvider> RawAllocator<R> {
    /// Builds an allocator over `region`, not yet initialized.
    pub const fn new(region: R) -> Self {
        Self {
            region,
            heap_base: None,
            free_list: FreeList::new(),
        }
    }

    /// Whether [`init`](Self::init) has already run successfully.
    pub fn is_initialized(&self) -> bool {
        self.heap_base.is_some()
    }

    /// Total bytes handed out so far by the backing region provider,
    /// i.e. the current size of the managed heap including the
    /// prologue/epilogue overhead. Useful for callers (the CLI harness,
    /// tests) that want to observe whether an operation grew the heap.
    pub fn extent(&self) -> usize {
        self.region.extent()
    }

    /// The prologue's payload pointer, for the consistency checker.
    #[cfg(feature = "checked")]
    pub(crate) fn heap_base(&self) -> Option<NonNull<u8>> {
        self.heap_base
    }

    #[cfg(feature = "checked")]
    pub(crate) fn free_list(&self) -> &FreeList {
        &self.free_list
    }

    /// Establishes the prologue, epilogue, and pre-extends the heap by
    /// [`CHUNKSIZE`] bytes. Must be called exactly once before any other
    /// operation (spec.md §6).
    pub fn init(&mut self) -> Result<(), RegionError> {
        // Padding word + prologue header + prologue footer + epilogue
        // header, exactly as `original_source/mm.c`'s `mm_init` (minus the
        // bin-head table it prefixes onto the same allocation — see
        // DESIGN.md Open Question 1).
        //
        // SAFETY: the region provider contract guarantees the returned
        // address is valid for `4 * WORD` bytes.
        let base = unsafe { self.region.request_bytes(4 * WORD) }.ok_or(RegionError::Exhausted)?;
        let base = base.as_ptr();
        // SAFETY: `base..base + 4*WORD` was just granted by the region
        // provider and is exclusively owned by this allocator.
        unsafe {
            write_tag(base, 0, true); // alignment padding word
            write_tag(base.add(WORD), DWORD, true); // prologue header
            write_tag(base.add(2 * WORD), DWORD, true); // prologue footer
            write_tag(base.add(3 * WORD), 0, true); // epilogue header
        }
        // The prologue footer and the prologue's (zero-length) payload
        // pointer coincide, since `FTRP(bp) = bp + size - DWORD = bp` for
        // a `DWORD`-sized block.
        // SAFETY: `base + 2*WORD` is in bounds of the just-granted region.
        let heap_base = NonNull::new(unsafe { base.add(2 * WORD) }).unwrap();
        self.heap_base = Some(heap_base);

        self.extend(CHUNKSIZE / WORD)?;
        Ok(())
    }

    /// Allocate a block with at least `size` bytes of payload. Returns
    /// `None` if `size` is zero or the heap could not be extended enough
    /// to satisfy the request (spec.md §4.3, §6).
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let asize = Self::adjusted_size(size);

        // SAFETY: every block currently linked into `self.free_list` is a
        // valid free block (allocator-maintained invariant).
        if let Some(bp) = unsafe { self.free_list.first_fit(asize) } {
            return Some(self.place(bp, asize));
        }

        let extend_words = tag::round_up(core::cmp::max(asize, CHUNKSIZE), WORD) / WORD;
        let bp = self.extend(extend_words).ok()?;
        Some(self.place(bp, asize))
    }

    /// Frees a previously allocated block. `None` is a no-op.
    pub fn free(&mut self, bp: Option<NonNull<u8>>) -> Result<(), FreeError> {
        let Some(bp) = bp else {
            return Ok(());
        };
        // SAFETY: caller contract (spec.md §6): `bp` is a currently
        // allocated block.
        if !unsafe { alloc_of_block(bp.as_ptr()) } {
            return Err(FreeError::DoubleFree);
        }
        let size = unsafe { size_of_block(bp.as_ptr()) };
        // SAFETY: `bp` addresses a live block of `size` bytes owned by
        // this allocator.
        unsafe { stamp(bp.as_ptr(), size, false) };
        // SAFETY: `bp` is now a free block of `size` bytes, not yet linked
        // into any bin.
        unsafe { self.free_list.insert(bp, size) };
        self.coalesce(bp);
        Ok(())
    }

    /// Reallocates `bp` to hold at least `size` bytes, per the contract in
    /// spec.md §4.6.
    pub fn reallocate(&mut self, bp: Option<NonNull<u8>>, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            let _ = self.free(bp);
            return None;
        }
        let Some(bp) = bp else {
            return self.allocate(size);
        };

        let asize = DWORD + tag::round_up(size, WORD);
        // SAFETY: `bp` is a currently allocated block (caller contract).
        let old_size = unsafe { size_of_block(bp.as_ptr()) };

        if asize == old_size {
            return Some(bp);
        }

        if old_size > asize {
            // Shrink.
            let residue = old_size - asize;
            if residue >= 2 * DWORD {
                // SAFETY: `bp` is `old_size` bytes, large enough to split
                // into an `asize`-byte allocated head and a free tail.
                unsafe {
                    stamp(bp.as_ptr(), asize, true);
                    let tail = next_block(bp.as_ptr());
                    stamp(tail, residue, false);
                    let tail = NonNull::new(tail).unwrap();
                    self.free_list.insert(tail, residue);
                    self.coalesce(tail);
                }
                return Some(bp);
            }
            // Residue too small to stand alone: leave the block as is.
            return Some(bp);
        }

        // Grow: see whether the successor is free and big enough to
        // absorb, in whole or in part, before falling back to copying.
        let needed = asize - old_size;
        // SAFETY: `bp` is a live block; its successor's header is always
        // in bounds (the epilogue terminates the chain).
        let next = unsafe { next_block(bp.as_ptr()) };
        let next_free = !unsafe { alloc_of_block(next) };
        if next_free {
            let next_size = unsafe { size_of_block(next) };
            if next_size >= needed + 2 * DWORD {
                // Absorb part of the successor, leaving a free residue.
                let next_ptr = NonNull::new(next).unwrap();
                // SAFETY: `next_ptr` is a free block currently linked into
                // `self.free_list`.
                unsafe { self.free_list.delete(next_ptr, next_size) };
                // SAFETY: `bp` together with the absorbed prefix of `next`
                // forms a valid `asize`-byte allocated block.
                unsafe { stamp(bp.as_ptr(), asize, true) };
                let residue_size = next_size - needed;
                // SAFETY: the unabsorbed suffix of `next` is a valid free
                // block of `residue_size` bytes.
                unsafe {
                    let residue = next_block(bp.as_ptr());
                    stamp(residue, residue_size, false);
                    let residue = NonNull::new(residue).unwrap();
                    self.free_list.insert(residue, residue_size);
                    self.coalesce(residue);
                }
                return Some(bp);
            } else if next_size >= needed {
                // Absorb the whole successor; no residue large enough to
                // stand on its own.
                let next_ptr = NonNull::new(next).unwrap();
                // SAFETY: `next_ptr` is a free block currently linked into
                // `self.free_list`.
                unsafe { self.free_list.delete(next_ptr, next_size) };
                // SAFETY: `bp` combined with all of `next` forms a single
                // valid allocated block.
                unsafe { stamp(bp.as_ptr(), old_size + next_size, true) };
                return Some(bp);
            }
        }

        // Fallback: allocate, copy, free. The original block is left
        // untouched if the new allocation fails.
        let new_bp = self.allocate(size)?;
        let copy_len = core::cmp::min(size, old_size);
        // SAFETY: `bp` and `new_bp` are both valid, non-overlapping
        // allocations of at least `copy_len` bytes.
        unsafe {
            core::ptr::copy_nonoverlapping(bp.as_ptr(), new_bp.as_ptr(), copy_len);
        }
        let _ = self.free(Some(bp));
        Some(new_bp)
    }

    /// Computes the adjusted block size for a payload request of `s`
    /// bytes (spec.md §4.3), including the two trace-specific
    /// overprovisioning rules when [`BENCHMARK_COMPAT`] is enabled.
    fn adjusted_size(s: usize) -> usize {
        let mut asize = if s <= DWORD {
            MIN_BLOCK
        } else {
            DWORD + tag::round_up(s, WORD)
        };
        if BENCHMARK_COMPAT {
            if s != 0 && s % 128 == 0 && s != 128 {
                asize = DWORD + s + 128;
            }
            if s == 4092 {
                asize = WORD + CHUNKSIZE;
            }
        }
        asize
    }

    /// Extends the heap by `words` words (rounded up to an even word count
    /// to preserve double-word alignment, as `extend_heap` does in
    /// `original_source/mm.c`), links the new block in, and coalesces it
    /// with a possible free predecessor. Returns the (possibly coalesced)
    /// new block's payload pointer.
    fn extend(&mut self, words: usize) -> Result<NonNull<u8>, RegionError> {
        let size = if words % 2 != 0 {
            (words + 1) * WORD
        } else {
            words * WORD
        };

        // SAFETY: the region provider contract guarantees the returned
        // address is valid for `size` bytes and immediately follows the
        // heap's previous end -- i.e. exactly where the old epilogue
        // header used to sit.
        let bp = unsafe { self.region.request_bytes(size) }.ok_or(RegionError::Exhausted)?;
        let bp_ptr = bp.as_ptr();
        // SAFETY: `bp_ptr - WORD` is the slot the old epilogue header
        // occupied (now reused as this new free block's header); the
        // region provider guarantees `size` bytes starting at `bp_ptr` are
        // ours to write.
        unsafe {
            stamp(bp_ptr, size, false);
            write_tag(bp_ptr.add(size - WORD), 0, true); // new epilogue header
        }
        // SAFETY: `bp` is a fresh free block of `size` bytes, not yet
        // linked into any bin.
        unsafe { self.free_list.insert(bp, size) };
        Ok(self.coalesce(bp))
    }

    /// Places a block of `asize` bytes at the start of the free block
    /// `bp`, splitting off the residue into a new free block when the
    /// residue would itself be a valid minimum-sized block (spec.md
    /// §4.4).
    fn place(&mut self, bp: NonNull<u8>, asize: usize) -> NonNull<u8> {
        // SAFETY: `bp` is a block returned by `FreeList::first_fit` or
        // `extend`, both of which only ever hand back valid free blocks.
        let csize = unsafe { size_of_block(bp.as_ptr()) };
        // SAFETY: `bp` is currently linked into `self.free_list`.
        unsafe { self.free_list.delete(bp, csize) };

        if csize - asize >= MIN_BLOCK {
            // SAFETY: `bp` is `csize` bytes, large enough to carve off an
            // `asize`-byte allocated head and a free tail of at least
            // `MIN_BLOCK` bytes.
            unsafe {
                stamp(bp.as_ptr(), asize, true);
                let tail = next_block(bp.as_ptr());
                let tail_size = csize - asize;
                stamp(tail, tail_size, false);
                let tail = NonNull::new(tail).unwrap();
                self.free_list.insert(tail, tail_size);
            }
        } else {
            // SAFETY: `bp` is `csize` bytes; the whole block becomes the
            // allocation, since the residue would be too small to stand
            // on its own.
            unsafe { stamp(bp.as_ptr(), csize, true) };
        }
        bp
    }

    /// Boundary-tag coalescing on the newly-freed (or newly-extended)
    /// block `bp`, merging with up to two free neighbors (spec.md §4.5).
    /// Returns the payload pointer of the (possibly merged) resulting
    /// block.
    fn coalesce(&mut self, bp: NonNull<u8>) -> NonNull<u8> {
        let bp_ptr = bp.as_ptr();
        // SAFETY: `bp` is a live block; the prologue sentinel guarantees
        // there is always a valid footer before it to read.
        let prev_alloc = unsafe {
            let (_, alloc) = read_tag(prev_footer(bp_ptr));
            alloc
        };
        // SAFETY: `bp` is a live block; the epilogue sentinel guarantees
        // there is always a valid header after it to read.
        let next_alloc = unsafe { alloc_of_block(next_block(bp_ptr)) };
        let size = unsafe { size_of_block(bp_ptr) };

        match (prev_alloc, next_alloc) {
            (true, true) => bp, // Case 1: nothing to merge.
            (true, false) => {
                // Case 2: merge with the following free block.
                let next = unsafe { next_block(bp_ptr) };
                let next_nn = NonNull::new(next).unwrap();
                let next_size = unsafe { size_of_block(next) };
                // SAFETY: both `bp` and `next_nn` are currently linked
                // free blocks.
                unsafe {
                    self.free_list.delete(bp, size);
                    self.free_list.delete(next_nn, next_size);
                }
                let new_size = size + next_size;
                // SAFETY: `bp..bp+new_size` is the union of two adjacent,
                // allocator-owned free blocks.
                unsafe {
                    stamp(bp_ptr, new_size, false);
                    self.free_list.insert(bp, new_size);
                }
                bp
            }
            (false, true) => {
                // Case 3: merge with the preceding free block.
                let prev = unsafe { prev_block(bp_ptr) };
                let prev_nn = NonNull::new(prev).unwrap();
                let prev_size = unsafe { size_of_block(prev) };
                // SAFETY: both `bp` and `prev_nn` are currently linked
                // free blocks.
                unsafe {
                    self.free_list.delete(bp, size);
                    self.free_list.delete(prev_nn, prev_size);
                }
                let new_size = size + prev_size;
                // SAFETY: `prev..prev+new_size` is the union of two
                // adjacent, allocator-owned free blocks.
                unsafe {
                    stamp(prev, new_size, false);
                    self.free_list.insert(prev_nn, new_size);
                }
                prev_nn
            }
            (false, false) => {
                // Case 4: merge with both neighbors.
                let prev = unsafe { prev_block(bp_ptr) };
                let next = unsafe { next_block(bp_ptr) };
                let prev_nn = NonNull::new(prev).unwrap();
                let next_nn = NonNull::new(next).unwrap();
                let prev_size = unsafe { size_of_block(prev) };
                let next_size = unsafe { size_of_block(next) };
                // SAFETY: `bp`, `prev_nn`, and `next_nn` are all currently
                // linked free blocks.
                unsafe {
                    self.free_list.delete(bp, size);
                    self.free_list.delete(next_nn, next_size);
                    self.free_list.delete(prev_nn, prev_size);
                }
                let new_size = prev_size + size + next_size;
                // SAFETY: `prev..prev+new_size` is the union of three
                // adjacent, allocator-owned free blocks.
                unsafe {
                    stamp(prev, new_size, false);
                    self.free_list.insert(prev_nn, new_size);
                }
                prev_nn
            }
        }
    }
}


/// Computes the address of the footer belonging to the block preceding
/// `bp`, i.e. the word immediately before `bp`'s own header.
///
/// # Safety
/// `bp - DWORD` must hold a valid tag word (true for every block after
/// the prologue, which is exactly every block this is ever called on).
#[inline]
unsafe fn prev_footer(bp: *mut u8) -> *mut u8 {
    // SAFETY: forwarded to the caller.
    unsafe { hdrp(bp).sub(WORD) }
}
