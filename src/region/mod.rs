//! Mapped-region storage: pages, block classes, and free-list bookkeeping.
//!
//! # Architecture
//!
//! ```text
//! Region (memory-mapped data file, N x 4096B pages)
//!   ├─→ global free-page list        → [7, 3, 12, ...]
//!   ├─→ class free list (64B)        → pages with >= 1 free 64B block
//!   ├─→ class free list (128B)       → ...
//!   └─→ item chains                  → head ─→ full page ─→ tail page
//!
//! RegionAllocator owns the lists; Region owns the bytes.
//! ```

pub mod allocator;
pub mod mapping;
pub mod page;

pub use allocator::{BlockRef, RegionAllocator};
pub use mapping::Region;
pub use page::{
    blocks_per_page, class_for_size, class_index, full_bitmap, PageFormat, PageLink, CLASS_COUNT,
    MAX_BLOCK_SHIFT, MIN_BLOCK_SHIFT, NIL_PAGE, PAGE_SIZE,
};
