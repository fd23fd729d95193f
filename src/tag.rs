//! Heap layout & boundary tags (spec §4.1).
//!
//! Every block is bracketed by a header word and a footer word, each
//! encoding the block's total size OR'd with a one-bit allocated flag in
//! the low bit. Because every block size is a multiple of [`WORD`], the
//! low bits of the size are always zero, so packing the alloc flag into
//! bit 0 never loses information. The footer is a byte-for-byte copy of
//! the header and exists purely so that `prev_block` can be computed in
//! O(1) without walking from the start of the heap.
//!
//! ```text
//!          header            payload                  footer
//!        +--------+--------------------------------+--------+
//!   ...  | size|a |                                 | size|a |  ...
//!        +--------+--------------------------------+--------+
//!        ^
//!        bp - WORD                                  bp + size - 2*WORD
//! ```
//!
//! All functions here are thin, documented `unsafe fn`s over raw pointers;
//! they carry no policy (no coalescing, no list membership) and are the
//! single place that understands the packed-word convention described in
//! spec.md §4.1 and §9 ("Block tagging without a type").

use core::mem::size_of;

/// The allocator's atomic metadata unit: the natural pointer width of the
/// target. All block sizes are multiples of this, and all payload
/// addresses are aligned to it.
pub const WORD: usize = size_of::<usize>();
/// Two words: header + footer overhead for a zero-payload block.
pub const DWORD: usize = 2 * WORD;
/// The minimum possible block size: header, footer, and two free-list
/// link words.
pub const MIN_BLOCK: usize = 4 * WORD;

/// Packs a `size` and `alloc` bit into a single tag word.
#[inline]
const fn pack(size: usize, alloc: bool) -> usize {
    size | (alloc as usize)
}

/// Extracts the size field from a tag word.
#[inline]
const fn unpack_size(word: usize) -> usize {
    word & !(WORD - 1)
}

/// Extracts the allocated bit from a tag word.
#[inline]
const fn unpack_alloc(word: usize) -> bool {
    word & 1 != 0
}

/// Reads the word at `p`.
///
/// # Safety
/// `p` must be valid for reads of `WORD` bytes and suitably aligned.
#[inline]
unsafe fn read_word(p: *mut u8) -> usize {
    // SAFETY: forwarded to the caller.
    unsafe { p.cast::<usize>().read() }
}

/// Writes `val` to the word at `p`.
///
/// # Safety
/// `p` must be valid for writes of `WORD` bytes and suitably aligned.
#[inline]
unsafe fn write_word(p: *mut u8, val: usize) {
    // SAFETY: forwarded to the caller.
    unsafe { p.cast::<usize>().write(val) }
}

/// Writes a raw `(size, alloc)` tag word at `p`, with no assumption that
/// `p` is a block's header (used for the prologue/epilogue sentinels,
/// which are addressed directly rather than through a payload pointer).
///
/// # Safety
/// `p` must be valid for a `WORD`-byte write and suitably aligned.
#[inline]
pub(crate) unsafe fn write_tag(p: *mut u8, size: usize, alloc: bool) {
    // SAFETY: forwarded to the caller.
    unsafe { write_word(p, pack(size, alloc)) }
}

/// Reads a raw `(size, alloc)` tag word at `p`. Counterpart to
/// [`write_tag`].
///
/// # Safety
/// `p` must be valid for a `WORD`-byte read and suitably aligned.
#[inline]
pub(crate) unsafe fn read_tag(p: *mut u8) -> (usize, bool) {
    // SAFETY: forwarded to the caller.
    let word = unsafe { read_word(p) };
    (unpack_size(word), unpack_alloc(word))
}

/// Computes the header address for the block with payload pointer `bp`.
#[inline]
pub fn hdrp(bp: *mut u8) -> *mut u8 {
    // SAFETY: callers always hold a `bp` at least `WORD` bytes into its
    // block, since every block has a header immediately before its payload.
    unsafe { bp.sub(WORD) }
}

/// Computes the footer address for the block with payload pointer `bp`.
///
/// # Safety
/// `hdrp(bp)` must hold a valid tag word (i.e. `bp` must be a live block
/// pointer).
#[inline]
pub unsafe fn ftrp(bp: *mut u8) -> *mut u8 {
    let size = unsafe { size_of_block(bp) };
    // SAFETY: `size` is the block's total size, so `bp + size - DWORD` is
    // the footer slot, which lies within the block.
    unsafe { bp.add(size - DWORD) }
}

/// Reads the total size of the block with payload pointer `bp`, from its
/// header.
///
/// # Safety
/// `hdrp(bp)` must hold a valid tag word.
#[inline]
pub unsafe fn size_of_block(bp: *mut u8) -> usize {
    unsafe { unpack_size(read_word(hdrp(bp))) }
}

/// Reads the allocated flag of the block with payload pointer `bp`, from
/// its header.
///
/// # Safety
/// `hdrp(bp)` must hold a valid tag word.
#[inline]
pub unsafe fn alloc_of_block(bp: *mut u8) -> bool {
    unsafe { unpack_alloc(read_word(hdrp(bp))) }
}

/// Stamps both the header and the footer of the block with payload
/// pointer `bp` with `(size, alloc)`.
///
/// Per spec.md §5, the footer is always updated alongside the header, even
/// in call sites where only the header would strictly be needed, to keep
/// the header-equals-footer invariant globally true at every quiescent
/// point.
///
/// # Safety
/// `bp` must address a block of at least `size` bytes, fully owned by the
/// allocator.
pub unsafe fn stamp(bp: *mut u8, size: usize, alloc: bool) {
    let word = pack(size, alloc);
    // SAFETY: the header sits at `bp - WORD`, within the block.
    unsafe { write_word(hdrp(bp), word) };
    // The footer address depends on `size`, which we already have, so
    // compute it directly rather than re-reading the header we just wrote.
    let footer = bp.wrapping_add(size - DWORD);
    // SAFETY: `footer` is the last word of a `size`-byte block starting at
    // `bp - WORD`, which the caller guarantees is owned by the allocator.
    unsafe { write_word(footer, word) };
}

/// Computes the payload pointer of the block immediately following `bp`.
///
/// # Safety
/// `hdrp(bp)` must hold a valid tag word, and the following block's header
/// must be in bounds (true for every block up to and including the
/// epilogue).
#[inline]
pub unsafe fn next_block(bp: *mut u8) -> *mut u8 {
    let size = unsafe { size_of_block(bp) };
    // SAFETY: blocks are laid out contiguously with no gaps (spec.md §3),
    // so `bp + size` is exactly the next block's payload pointer.
    unsafe { bp.add(size) }
}

/// Computes the payload pointer of the block immediately preceding `bp`,
/// by reading that block's size out of its footer (the word just before
/// `bp`'s own header).
///
/// # Safety
/// The word at `bp - DWORD` must be a valid footer tag (true for every
/// block after the prologue).
#[inline]
pub unsafe fn prev_block(bp: *mut u8) -> *mut u8 {
    // SAFETY: forwarded to the caller; `bp - DWORD` is the previous
    // block's footer slot.
    let prev_size = unsafe { unpack_size(read_word(bp.sub(DWORD))) };
    // SAFETY: blocks are contiguous, so subtracting the previous block's
    // size from `bp` lands exactly on its payload pointer.
    unsafe { bp.sub(prev_size) }
}

/// Rounds `value` up to the next multiple of `to` (`to` need not be a
/// power of two; §4.3's word-size rounding is the only user of this).
#[inline]
pub const fn round_up(value: usize, to: usize) -> usize {
    ((value + to - 1) / to) * to
}
