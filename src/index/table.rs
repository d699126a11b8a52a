//! Open-addressed hash index with Robin Hood probing.
//!
//! Maps content hash -> packed item descriptor over parallel arrays of
//! atomic words: three key words and one item word per slot. Lookup and the
//! generation-field update are lock-free; insertion is serialized by the
//! engine's mutation lock. The table is fixed-capacity (~1.4x the item
//! budget, rounded to a power of two) and never resizes - `add` simply
//! fails once full, which the engine reports as a dropped insert.
//!
//! The Robin Hood invariant: every occupied slot's probe distance is >= the
//! probe distance of any slot it displaced, which lets `find` stop as soon
//! as it probes a slot whose own distance is shorter than the accumulated
//! search distance.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::item::ItemDescriptor;
use super::key::CacheKey;

/// 2^64 / phi, the usual multiplicative-hash constant.
const FIBONACCI_MULTIPLIER: u64 = 0x9e37_79b9_7f4a_7c15;

const KEY_WORDS: usize = 3;

/// Fixed-capacity Robin Hood hash index.
pub struct HashIndex {
    /// `KEY_WORDS` words per slot; an all-zero key marks an empty slot.
    keys: Box<[AtomicU64]>,
    items: Box<[AtomicU64]>,
    len: AtomicUsize,
    mask: usize,
    shift: u32,
}

impl HashIndex {
    /// Table sized for `max_items` entries: ~1.4x capacity, power of two.
    pub fn for_max_items(max_items: u32) -> Self {
        let capacity = (max_items as usize * 7 / 5).max(2).next_power_of_two();
        let keys = (0..capacity * KEY_WORDS).map(|_| AtomicU64::new(0)).collect();
        let items = (0..capacity).map(|_| AtomicU64::new(0)).collect();
        Self {
            keys,
            items,
            len: AtomicUsize::new(0),
            mask: capacity - 1,
            shift: 64 - capacity.trailing_zeros(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Preferred slot: high bits of `hash * fibonacci`, mod table size.
    fn start_slot(&self, key: &CacheKey) -> usize {
        (key.probe_seed().wrapping_mul(FIBONACCI_MULTIPLIER) >> self.shift) as usize
    }

    /// How far `key` sits (or would sit) from its preferred slot.
    fn probe_distance(&self, slot: usize, key: &CacheKey) -> usize {
        slot.wrapping_sub(self.start_slot(key)) & self.mask
    }

    pub fn key_at(&self, slot: usize) -> CacheKey {
        let base = slot * KEY_WORDS;
        CacheKey::from_words([
            self.keys[base].load(Ordering::Acquire),
            self.keys[base + 1].load(Ordering::Acquire),
            self.keys[base + 2].load(Ordering::Acquire),
        ])
    }

    fn store_key(&self, slot: usize, key: &CacheKey) {
        let words = key.to_words();
        let base = slot * KEY_WORDS;
        self.keys[base].store(words[0], Ordering::Release);
        self.keys[base + 1].store(words[1], Ordering::Release);
        self.keys[base + 2].store(words[2], Ordering::Release);
    }

    pub fn item_at(&self, slot: usize) -> ItemDescriptor {
        ItemDescriptor::from_raw(self.items[slot].load(Ordering::Acquire))
    }

    /// Atomically swap the item word if it still matches `expected`.
    /// Lock-free; used by readers to bump the generation field.
    pub fn try_update(
        &self,
        slot: usize,
        expected: ItemDescriptor,
        updated: ItemDescriptor,
    ) -> bool {
        self.items[slot]
            .compare_exchange(
                expected.raw(),
                updated.raw(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Lock-free lookup. Returns the slot holding `key`, or `None`.
    pub fn find(&self, key: &CacheKey) -> Option<usize> {
        if key.is_zero() {
            return None;
        }
        let mut slot = self.start_slot(key);
        let mut distance = 0usize;
        loop {
            let resident = self.key_at(slot);
            if resident.is_zero() {
                return None;
            }
            if resident == *key {
                // A slot mid-displacement briefly carries an invalid item;
                // treat it as a miss, the cache is advisory.
                return self.item_at(slot).is_valid().then_some(slot);
            }
            if self.probe_distance(slot, &resident) < distance {
                // Robin Hood invariant: `key` would have displaced this
                // resident, so it cannot be further along.
                return None;
            }
            slot = (slot + 1) & self.mask;
            distance += 1;
            if distance > self.mask {
                return None;
            }
        }
    }

    /// Insert a new entry, displacing shorter-probe residents Robin Hood
    /// style. Fails on a duplicate key, a zero key, or a full table.
    /// Writer-only (callers hold the mutation lock).
    pub fn add(&self, key: CacheKey, item: ItemDescriptor) -> bool {
        if key.is_zero() || !item.is_valid() {
            return false;
        }
        if self.len() >= self.capacity() {
            return false;
        }

        let mut cur_key = key;
        let mut cur_item = item;
        let mut slot = self.start_slot(&cur_key);
        let mut distance = 0usize;
        loop {
            let resident = self.key_at(slot);
            if resident.is_zero() {
                // Key first, item last with Release: a concurrent reader
                // only sees a valid item after the key it belongs to.
                self.store_key(slot, &cur_key);
                self.items[slot].store(cur_item.raw(), Ordering::Release);
                self.len.fetch_add(1, Ordering::Relaxed);
                return true;
            }
            if resident == cur_key {
                return false;
            }
            let resident_distance = self.probe_distance(slot, &resident);
            if resident_distance < distance {
                // Take the slot from the richer resident and keep walking
                // with the displaced entry. Invalidate the item word before
                // the key changes so readers never pair the old key with
                // the new item.
                let resident_item = self.item_at(slot);
                self.items[slot].store(0, Ordering::Release);
                self.store_key(slot, &cur_key);
                self.items[slot].store(cur_item.raw(), Ordering::Release);
                cur_key = resident;
                cur_item = resident_item;
                distance = resident_distance;
            }
            slot = (slot + 1) & self.mask;
            distance += 1;
            if distance > self.mask {
                return false;
            }
        }
    }

    /// All live entries, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (CacheKey, ItemDescriptor)> + '_ {
        (0..=self.mask).filter_map(move |slot| {
            let key = self.key_at(slot);
            if key.is_zero() {
                return None;
            }
            let item = self.item_at(slot);
            item.is_valid().then_some((key, item))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::key::KEY_LEN;

    fn key(tag: u8) -> CacheKey {
        let mut bytes = [0u8; KEY_LEN];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = tag.wrapping_mul(31).wrapping_add(i as u8).wrapping_add(1);
        }
        CacheKey::new(bytes)
    }

    fn item(page: u32) -> ItemDescriptor {
        ItemDescriptor::new(page, 0, 0, 100, false)
    }

    #[test]
    fn test_capacity_sizing() {
        // 1.4x max items, rounded up to a power of two.
        assert_eq!(HashIndex::for_max_items(4).capacity(), 8);
        assert_eq!(HashIndex::for_max_items(100).capacity(), 256);
        assert!(HashIndex::for_max_items(1).capacity() >= 2);
    }

    #[test]
    fn test_add_and_find() {
        let index = HashIndex::for_max_items(16);
        assert!(index.add(key(1), item(10)));
        assert!(index.add(key(2), item(20)));

        let slot = index.find(&key(1)).unwrap();
        assert_eq!(index.item_at(slot).first_page(), 10);
        assert_eq!(index.key_at(slot), key(1));
        assert!(index.find(&key(3)).is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn test_duplicate_add_fails() {
        let index = HashIndex::for_max_items(16);
        assert!(index.add(key(1), item(10)));
        assert!(!index.add(key(1), item(11)));
        assert_eq!(index.len(), 1);
        let slot = index.find(&key(1)).unwrap();
        assert_eq!(index.item_at(slot).first_page(), 10);
    }

    #[test]
    fn test_zero_key_rejected() {
        let index = HashIndex::for_max_items(16);
        assert!(!index.add(CacheKey::ZERO, item(1)));
        assert!(index.find(&CacheKey::ZERO).is_none());
    }

    #[test]
    fn test_fills_to_physical_capacity_then_fails() {
        let index = HashIndex::for_max_items(4);
        let capacity = index.capacity();
        let mut added = 0;
        for tag in 1..=capacity as u8 {
            assert!(index.add(key(tag), item(tag as u32)));
            added += 1;
        }
        assert_eq!(added, capacity);
        assert!(!index.add(key(200), item(0)));
        // Everything inserted is still findable at full load.
        for tag in 1..=capacity as u8 {
            let slot = index.find(&key(tag)).unwrap();
            assert_eq!(index.item_at(slot).first_page(), tag as u32);
        }
    }

    #[test]
    fn test_try_update_generation() {
        let index = HashIndex::for_max_items(16);
        index.add(key(1), item(10));
        let slot = index.find(&key(1)).unwrap();
        let current = index.item_at(slot);

        let bumped = current.with_generation(7);
        assert!(index.try_update(slot, current, bumped));
        assert_eq!(index.item_at(slot).generation(), 7);

        // Stale expectation loses the race.
        assert!(!index.try_update(slot, current, current.with_generation(9)));
        assert_eq!(index.item_at(slot).generation(), 7);
    }

    #[test]
    fn test_iter_yields_all_entries() {
        let index = HashIndex::for_max_items(16);
        for tag in 1..=10u8 {
            index.add(key(tag), item(tag as u32));
        }
        let mut pages: Vec<u32> = index.iter().map(|(_, i)| i.first_page()).collect();
        pages.sort_unstable();
        assert_eq!(pages, (1..=10).collect::<Vec<u32>>());
    }

    #[test]
    fn test_probe_lengths_stay_bounded() {
        // With Robin Hood displacement every entry stays findable even when
        // many keys contend for neighbouring slots.
        let index = HashIndex::for_max_items(64);
        for tag in 1..=64u8 {
            assert!(index.add(key(tag), item(tag as u32)));
        }
        for tag in 1..=64u8 {
            assert!(index.find(&key(tag)).is_some(), "lost key {}", tag);
        }
    }
}
