//! Region allocator: free-list bookkeeping over the mapped pages.
//!
//! One global free-page list plus one free list per block class, each linked
//! intrusively through the per-page `next` field. Block allocation is O(1)
//! from the class head; a page leaves its class list once its bitmap fills
//! and keeps its class until every block in it frees, bounding waste to at
//! most one partial page per class currently in use.
//!
//! The allocator only runs under the engine's mutation lock; it stores into
//! the shared [`PageLink`] cells with relaxed ordering because publication
//! to readers happens through the index, not through these fields.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

use super::page::{
    blocks_per_page, class_index, full_bitmap, PageFormat, PageLink, CLASS_COUNT, NIL_PAGE,
};

/// A single allocated block: page index plus block index within the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRef {
    pub page: u32,
    pub index: u32,
}

/// Free-list allocator for the mapped region.
pub struct RegionAllocator {
    links: Arc<[PageLink]>,
    formats: Vec<PageFormat>,
    /// Head of the free list of pages holding >= 1 free block, per class.
    class_heads: [u32; CLASS_COUNT],
    /// Head of the global free-page list.
    free_head: u32,
    free_pages: u64,
    page_total: u32,
}

impl RegionAllocator {
    /// Fresh allocator with every page on the global free list.
    pub fn new(page_total: u32, links: Arc<[PageLink]>) -> Self {
        debug_assert_eq!(links.len(), page_total as usize);
        let mut allocator = Self {
            links,
            formats: vec![PageFormat::default(); page_total as usize],
            class_heads: [NIL_PAGE; CLASS_COUNT],
            free_head: NIL_PAGE,
            free_pages: 0,
            page_total,
        };
        for page in (0..page_total).rev() {
            allocator.push_free(page);
        }
        allocator
    }

    /// Rebuild allocator state from reconstructed page ownership.
    ///
    /// `chain_claimed[p]` marks pages that are whole units of an item chain;
    /// `shifts[p] != 0` marks class pages with the given block shift and the
    /// free bits left in `bitmaps[p]`. Everything else goes back on the
    /// global free list.
    pub fn rebuild(
        page_total: u32,
        links: Arc<[PageLink]>,
        chain_claimed: &[bool],
        shifts: &[u8],
        bitmaps: &[u64],
    ) -> Self {
        let mut allocator = Self {
            links,
            formats: vec![PageFormat::default(); page_total as usize],
            class_heads: [NIL_PAGE; CLASS_COUNT],
            free_head: NIL_PAGE,
            free_pages: 0,
            page_total,
        };
        for page in (0..page_total).rev() {
            let p = page as usize;
            if shifts[p] != 0 {
                allocator.formats[p] = PageFormat {
                    block_shift: shifts[p],
                    free_bitmap: bitmaps[p],
                };
                if bitmaps[p] != 0 {
                    let ci = class_index(shifts[p] as u32);
                    allocator.links[p]
                        .next
                        .store(allocator.class_heads[ci], Ordering::Relaxed);
                    allocator.class_heads[ci] = page;
                }
            } else if !chain_claimed[p] {
                allocator.push_free(page);
            }
        }
        allocator
    }

    pub fn page_total(&self) -> u32 {
        self.page_total
    }

    pub fn free_pages(&self) -> u64 {
        self.free_pages
    }

    /// Whether a class currently has a page with at least one free block.
    pub fn class_has_free(&self, class: usize) -> bool {
        self.class_heads[class] != NIL_PAGE
    }

    /// Block shift a page is currently formatted for (0 if unformatted).
    pub fn block_shift(&self, page: u32) -> u32 {
        self.formats[page as usize].block_shift as u32
    }

    fn push_free(&mut self, page: u32) {
        self.links[page as usize]
            .next
            .store(self.free_head, Ordering::Relaxed);
        self.links[page as usize].count.store(0, Ordering::Relaxed);
        self.formats[page as usize] = PageFormat::default();
        self.free_head = page;
        self.free_pages += 1;
    }

    /// Take a whole page off the global free list.
    pub fn allocate_page(&mut self) -> Option<u32> {
        let page = self.free_head;
        if page == NIL_PAGE {
            return None;
        }
        self.free_head = self.links[page as usize].next.load(Ordering::Relaxed);
        self.free_pages -= 1;
        self.formats[page as usize] = PageFormat::default();
        Some(page)
    }

    /// Return a whole page to the global free list. The page must not be
    /// formatted for a class.
    pub fn free_page(&mut self, page: u32) {
        debug_assert_eq!(self.formats[page as usize].block_shift, 0);
        self.push_free(page);
    }

    /// Allocate one block of the given class, formatting a fresh page for
    /// the class if its free list is empty.
    pub fn allocate_block(&mut self, shift: u32) -> Option<BlockRef> {
        let ci = class_index(shift);
        let mut page = self.class_heads[ci];
        if page == NIL_PAGE {
            page = self.allocate_page()?;
            self.formats[page as usize] = PageFormat {
                block_shift: shift as u8,
                free_bitmap: full_bitmap(shift),
            };
            self.links[page as usize]
                .next
                .store(NIL_PAGE, Ordering::Relaxed);
            self.class_heads[ci] = page;
            debug!(page, shift, "formatted page for block class");
        }

        let format = &mut self.formats[page as usize];
        debug_assert_eq!(format.block_shift as u32, shift);
        debug_assert_ne!(format.free_bitmap, 0);
        let index = format.free_bitmap.trailing_zeros();
        format.free_bitmap &= !(1u64 << index);
        if format.free_bitmap == 0 {
            // Page is full: drop it from the class list.
            self.class_heads[ci] = self.links[page as usize].next.load(Ordering::Relaxed);
        }
        Some(BlockRef { page, index })
    }

    /// Mark a block free again. A previously full page rejoins its class
    /// list; fully free pages are released in bulk by
    /// [`release_empty_pages`](Self::release_empty_pages).
    pub fn free_block(&mut self, page: u32, index: u32) {
        let format = &mut self.formats[page as usize];
        let shift = format.block_shift as u32;
        debug_assert_ne!(shift, 0, "free_block on an unformatted page");
        debug_assert!(index < blocks_per_page(shift));
        debug_assert_eq!(format.free_bitmap & (1u64 << index), 0);

        let was_full = format.free_bitmap == 0;
        format.free_bitmap |= 1u64 << index;
        if was_full {
            let ci = class_index(shift);
            self.links[page as usize]
                .next
                .store(self.class_heads[ci], Ordering::Relaxed);
            self.class_heads[ci] = page;
        }
    }

    /// Sweep every class list, returning pages whose blocks all freed back
    /// to the global page pool.
    pub fn release_empty_pages(&mut self) {
        for ci in 0..CLASS_COUNT {
            let mut prev = NIL_PAGE;
            let mut cur = self.class_heads[ci];
            while cur != NIL_PAGE {
                let next = self.links[cur as usize].next.load(Ordering::Relaxed);
                let format = self.formats[cur as usize];
                if format.free_bitmap == full_bitmap(format.block_shift as u32) {
                    if prev == NIL_PAGE {
                        self.class_heads[ci] = next;
                    } else {
                        self.links[prev as usize].next.store(next, Ordering::Relaxed);
                    }
                    self.formats[cur as usize] = PageFormat::default();
                    self.push_free(cur);
                } else {
                    prev = cur;
                }
                cur = next;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::page::MIN_BLOCK_SHIFT;

    fn links(pages: u32) -> Arc<[PageLink]> {
        (0..pages).map(|_| PageLink::new()).collect()
    }

    #[test]
    fn test_fresh_allocator_has_all_pages_free() {
        let allocator = RegionAllocator::new(8, links(8));
        assert_eq!(allocator.free_pages(), 8);
        assert_eq!(allocator.page_total(), 8);
    }

    #[test]
    fn test_allocate_and_free_pages() {
        let mut allocator = RegionAllocator::new(4, links(4));
        let a = allocator.allocate_page().unwrap();
        let b = allocator.allocate_page().unwrap();
        assert_ne!(a, b);
        assert_eq!(allocator.free_pages(), 2);

        allocator.free_page(a);
        assert_eq!(allocator.free_pages(), 3);
        // Most recently freed page is reused first.
        assert_eq!(allocator.allocate_page().unwrap(), a);
    }

    #[test]
    fn test_page_exhaustion() {
        let mut allocator = RegionAllocator::new(2, links(2));
        assert!(allocator.allocate_page().is_some());
        assert!(allocator.allocate_page().is_some());
        assert!(allocator.allocate_page().is_none());
    }

    #[test]
    fn test_blocks_share_a_page_until_full() {
        let mut allocator = RegionAllocator::new(2, links(2));
        // 64 blocks of 64B fit one page.
        let first = allocator.allocate_block(MIN_BLOCK_SHIFT).unwrap();
        for _ in 1..64 {
            let block = allocator.allocate_block(MIN_BLOCK_SHIFT).unwrap();
            assert_eq!(block.page, first.page);
        }
        assert_eq!(allocator.free_pages(), 1);

        // 65th block formats a second page.
        let overflow = allocator.allocate_block(MIN_BLOCK_SHIFT).unwrap();
        assert_ne!(overflow.page, first.page);
        assert_eq!(allocator.free_pages(), 0);
    }

    #[test]
    fn test_full_page_rejoins_class_on_free() {
        let mut allocator = RegionAllocator::new(1, links(1));
        let block = allocator.allocate_block(12).unwrap();
        assert!(allocator.allocate_block(12).is_none());
        allocator.free_block(block.page, block.index);
        assert!(allocator.allocate_block(12).is_some());
    }

    #[test]
    fn test_release_empty_pages_returns_to_pool() {
        let mut allocator = RegionAllocator::new(2, links(2));
        let a = allocator.allocate_block(MIN_BLOCK_SHIFT).unwrap();
        let b = allocator.allocate_block(MIN_BLOCK_SHIFT).unwrap();
        assert_eq!(a.page, b.page);
        assert_eq!(allocator.free_pages(), 1);

        allocator.free_block(a.page, a.index);
        allocator.free_block(b.page, b.index);
        // Page keeps its class until swept.
        assert_eq!(allocator.free_pages(), 1);
        allocator.release_empty_pages();
        assert_eq!(allocator.free_pages(), 2);
        assert!(!allocator.class_has_free(class_index(MIN_BLOCK_SHIFT)));
    }

    #[test]
    fn test_rebuild_restores_free_lists() {
        let shared = links(4);
        let chain_claimed = vec![false, true, false, false];
        // Page 2 formatted for 64B blocks with block 0 taken.
        let mut shifts = vec![0u8; 4];
        shifts[2] = MIN_BLOCK_SHIFT as u8;
        let mut bitmaps = vec![0u64; 4];
        bitmaps[2] = full_bitmap(MIN_BLOCK_SHIFT) & !1;

        let mut allocator = RegionAllocator::rebuild(4, shared, &chain_claimed, &shifts, &bitmaps);
        // Pages 0 and 3 are free; page 1 is chain-claimed; page 2 is a
        // partial class page.
        assert_eq!(allocator.free_pages(), 2);
        assert!(allocator.class_has_free(class_index(MIN_BLOCK_SHIFT)));
        let block = allocator.allocate_block(MIN_BLOCK_SHIFT).unwrap();
        assert_eq!(block.page, 2);
        assert_ne!(block.index, 0);
    }
}
