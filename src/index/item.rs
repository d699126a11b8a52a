//! Packed 64-bit item descriptor.
//!
//! Every resident blob is described by a single word so the generation
//! field can be bumped with one atomic compare-and-swap while readers race:
//!
//! ```text
//! bit 63..61  (unused)
//! bit 60      valid
//! bit 59      large (first_page heads a chain instead of holding the tail)
//! bit 58..46  tail size in bytes (0..=4096)
//! bit 45..40  tail block index within its page
//! bit 39..32  generation
//! bit 31..0   first page index
//! ```

use crate::region::{class_for_size, PAGE_SIZE};

const GENERATION_SHIFT: u32 = 32;
const TAIL_INDEX_SHIFT: u32 = 40;
const TAIL_SIZE_SHIFT: u32 = 46;
const LARGE_BIT: u64 = 1 << 59;
const VALID_BIT: u64 = 1 << 60;

const FIRST_PAGE_MASK: u64 = 0xffff_ffff;
const GENERATION_MASK: u64 = 0xff << GENERATION_SHIFT;
const TAIL_INDEX_MASK: u64 = 0x3f;
const TAIL_SIZE_MASK: u64 = 0x1fff;

/// Descriptor for one resident item, packed into an atomically updatable
/// word.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ItemDescriptor(u64);

impl ItemDescriptor {
    /// The empty descriptor stored in vacant index slots.
    pub const EMPTY: ItemDescriptor = ItemDescriptor(0);

    pub fn new(
        first_page: u32,
        generation: u8,
        tail_index: u32,
        tail_size: u32,
        is_large: bool,
    ) -> Self {
        debug_assert!(u64::from(tail_index) <= TAIL_INDEX_MASK);
        debug_assert!(tail_size as usize <= PAGE_SIZE);
        let mut raw = VALID_BIT
            | u64::from(first_page)
            | (u64::from(generation) << GENERATION_SHIFT)
            | (u64::from(tail_index) << TAIL_INDEX_SHIFT)
            | (u64::from(tail_size) << TAIL_SIZE_SHIFT);
        if is_large {
            raw |= LARGE_BIT;
        }
        Self(raw)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    /// Tail page for small items; chain head for large items.
    pub fn first_page(self) -> u32 {
        (self.0 & FIRST_PAGE_MASK) as u32
    }

    pub fn generation(self) -> u8 {
        ((self.0 & GENERATION_MASK) >> GENERATION_SHIFT) as u8
    }

    pub fn tail_index(self) -> u32 {
        ((self.0 >> TAIL_INDEX_SHIFT) & TAIL_INDEX_MASK) as u32
    }

    pub fn tail_size(self) -> u32 {
        ((self.0 >> TAIL_SIZE_SHIFT) & TAIL_SIZE_MASK) as u32
    }

    pub fn is_large(self) -> bool {
        self.0 & LARGE_BIT != 0
    }

    pub fn is_valid(self) -> bool {
        self.0 & VALID_BIT != 0
    }

    /// Block class of the item's tail. Derived from the tail size, exactly
    /// mirroring the class picked at insert.
    pub fn tail_shift(self) -> u32 {
        class_for_size(self.tail_size() as usize)
    }

    /// Same descriptor with the generation field replaced. The only field
    /// ever mutated in place after insert.
    pub fn with_generation(self, generation: u8) -> Self {
        Self((self.0 & !GENERATION_MASK) | (u64::from(generation) << GENERATION_SHIFT))
    }

    /// Total payload length given the number of full chain pages.
    pub fn len(self, page_count: u32) -> u64 {
        u64::from(page_count) * PAGE_SIZE as u64 + u64::from(self.tail_size())
    }
}

impl std::fmt::Debug for ItemDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemDescriptor")
            .field("first_page", &self.first_page())
            .field("generation", &self.generation())
            .field("tail_index", &self.tail_index())
            .field("tail_size", &self.tail_size())
            .field("is_large", &self.is_large())
            .field("is_valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        let item = ItemDescriptor::new(0xdead_beef, 42, 63, 4096, true);
        assert_eq!(item.first_page(), 0xdead_beef);
        assert_eq!(item.generation(), 42);
        assert_eq!(item.tail_index(), 63);
        assert_eq!(item.tail_size(), 4096);
        assert!(item.is_large());
        assert!(item.is_valid());
    }

    #[test]
    fn test_empty_is_invalid() {
        assert!(!ItemDescriptor::EMPTY.is_valid());
    }

    #[test]
    fn test_with_generation_touches_only_generation() {
        let item = ItemDescriptor::new(7, 0, 3, 100, false);
        let bumped = item.with_generation(255);
        assert_eq!(bumped.generation(), 255);
        assert_eq!(bumped.first_page(), item.first_page());
        assert_eq!(bumped.tail_index(), item.tail_index());
        assert_eq!(bumped.tail_size(), item.tail_size());
        assert_eq!(bumped.is_large(), item.is_large());
        assert!(bumped.is_valid());
    }

    #[test]
    fn test_tail_shift_matches_insert_class() {
        assert_eq!(ItemDescriptor::new(0, 0, 0, 0, false).tail_shift(), 6);
        assert_eq!(ItemDescriptor::new(0, 0, 0, 64, false).tail_shift(), 6);
        assert_eq!(ItemDescriptor::new(0, 0, 0, 65, false).tail_shift(), 7);
        assert_eq!(ItemDescriptor::new(0, 0, 0, 4096, false).tail_shift(), 12);
    }

    #[test]
    fn test_len() {
        let item = ItemDescriptor::new(0, 0, 0, 1808, true);
        assert_eq!(item.len(2), 2 * 4096 + 1808);
        let small = ItemDescriptor::new(0, 0, 0, 17, false);
        assert_eq!(small.len(0), 17);
    }

    #[test]
    fn test_raw_round_trip() {
        let item = ItemDescriptor::new(123, 9, 5, 500, false);
        assert_eq!(ItemDescriptor::from_raw(item.raw()), item);
    }
}
