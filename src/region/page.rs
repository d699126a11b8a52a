//! Page layout constants and per-page bookkeeping.
//!
//! The mapped region is divided into fixed 4096-byte pages. Each page is
//! either a whole unit of an item's chain, or formatted for one of seven
//! power-of-two block classes (64B..4096B) and carved into blocks.

use std::sync::atomic::AtomicU32;

/// Physical page size in bytes. Every allocation is built from these.
pub const PAGE_SIZE: usize = 4096;

/// Smallest block class: 1 << 6 = 64 bytes.
pub const MIN_BLOCK_SHIFT: u32 = 6;

/// Largest block class: 1 << 12 = 4096 bytes (a whole page).
pub const MAX_BLOCK_SHIFT: u32 = 12;

/// Number of block classes (64B, 128B, ..., 4096B).
pub const CLASS_COUNT: usize = (MAX_BLOCK_SHIFT - MIN_BLOCK_SHIFT + 1) as usize;

/// Sentinel page index for "no page" in free lists and chains.
pub const NIL_PAGE: u32 = u32::MAX;

/// Smallest block class shift that fits `size` bytes.
///
/// Sizes below 64 bytes round up to the 64-byte class; sizes above one page
/// are a caller bug (the tail of an item never exceeds a page).
pub fn class_for_size(size: usize) -> u32 {
    debug_assert!(size <= PAGE_SIZE);
    let size = size.max(1 << MIN_BLOCK_SHIFT);
    usize::BITS - (size - 1).leading_zeros()
}

/// Index of a block class in per-class tables.
pub fn class_index(shift: u32) -> usize {
    debug_assert!((MIN_BLOCK_SHIFT..=MAX_BLOCK_SHIFT).contains(&shift));
    (shift - MIN_BLOCK_SHIFT) as usize
}

/// Number of blocks a page of the given class holds (1..=64).
pub fn blocks_per_page(shift: u32) -> u32 {
    (PAGE_SIZE >> shift) as u32
}

/// Bitmap with one set bit per free block for a freshly formatted page.
pub fn full_bitmap(shift: u32) -> u64 {
    let blocks = blocks_per_page(shift);
    if blocks == 64 {
        u64::MAX
    } else {
        (1u64 << blocks) - 1
    }
}

/// Lock-free side of per-page metadata.
///
/// Readers traverse item chains without taking the mutation lock, so the
/// chain link and the remaining-page count live in atomic cells. For a page
/// on a free list `next` links the list instead; the two uses are mutually
/// exclusive over the page's lifetime.
#[derive(Debug)]
pub struct PageLink {
    /// Next page in the item's chain, or next page in a free list.
    pub next: AtomicU32,
    /// For a chain member: remaining full pages including this one.
    pub count: AtomicU32,
}

impl PageLink {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(NIL_PAGE),
            count: AtomicU32::new(0),
        }
    }
}

impl Default for PageLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer-side page format, guarded by the engine's mutation lock.
///
/// `block_shift == 0` means the page is not formatted for a block class
/// (it is free, or a whole unit of some item's chain).
#[derive(Debug, Clone, Copy, Default)]
pub struct PageFormat {
    pub block_shift: u8,
    /// Bit `i` set means block `i` is free. Width scales with the class.
    pub free_bitmap: u64,
}
