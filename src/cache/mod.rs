//! Cache engine: orchestrates the region allocator, the hash index, the
//! generation clock, and the persistence layer.
//!
//! # Architecture
//!
//! ```text
//! Cache
//!   ├─→ Region          memory-mapped data file (pages, no header)
//!   ├─→ HashIndex       hash → packed item, swapped wholesale by trim
//!   ├─→ PageLink[]      lock-free chain links / free-list links
//!   ├─→ generation      wrapping u8 clock, advanced by volume only
//!   ├─→ gen_bytes[256]  resident bytes per generation
//!   └─→ Mutex           single mutation lock: insert, trim, view counting
//!
//! insert:  allocate tail block + full pages → copy bytes → publish item
//! read:    find → copy/borrow bytes → CAS-bump generation
//! trim:    Computing (lock) → Saving (no lock) → Reclaiming (lock)
//! ```

mod persist;
mod view;

pub use view::CacheView;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::index::{CacheKey, HashIndex, ItemDescriptor};
use crate::region::{
    blocks_per_page, class_for_size, class_index, full_bitmap, PageLink, Region, RegionAllocator,
    PAGE_SIZE,
};
use persist::{IndexEntry, IndexHeader, IndexSnapshot};

/// Number of generations tracked by the wrapping u8 clock.
const GENERATION_COUNT: usize = 256;

/// Resident bytes per generation. Updated lock-free by readers bumping item
/// generations, so the ledger is eventually consistent: the bucket sum
/// tracks total resident bytes but may transiently disagree.
struct GenerationBytes {
    buckets: Box<[AtomicU64]>,
}

impl GenerationBytes {
    fn new() -> Self {
        Self {
            buckets: (0..GENERATION_COUNT).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Add bytes to a generation bucket, returning the new bucket total.
    fn add(&self, generation: u8, bytes: u64) -> u64 {
        self.buckets[generation as usize].fetch_add(bytes, Ordering::Relaxed) + bytes
    }

    fn sub(&self, generation: u8, bytes: u64) {
        self.buckets[generation as usize].fetch_sub(bytes, Ordering::Relaxed);
    }

    fn get(&self, generation: u8) -> u64 {
        self.buckets[generation as usize].load(Ordering::Relaxed)
    }
}

/// Mutable engine state guarded by the mutation lock.
struct EngineState {
    allocator: RegionAllocator,
    item_count: u32,
    total_bytes: u64,
    /// Bytes rounded up to whole blocks, i.e. the footprint actually
    /// reserved in the region.
    rounded_bytes: u64,
    /// Open read leases; trim refuses to run while any exist.
    readers: u32,
}

/// Point-in-time counters, see [`Cache::stats`].
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub item_count: u32,
    pub total_bytes: u64,
    pub rounded_bytes: u64,
    pub free_pages: u64,
    pub generation: u8,
}

/// Persistent, capacity-bounded, content-addressed blob cache.
///
/// One instance per index/data file pair; multiple independent caches are
/// safely constructible (no ambient state). Inserts are serialized by an
/// internal mutation lock, reads run lock-free under a [`CacheView`], and
/// eviction is generational via [`trim`](Self::trim).
pub struct Cache {
    index_path: PathBuf,
    data_path: PathBuf,
    max_items: u32,
    max_size: u64,
    /// A generation bucket exceeding this advances the clock: max_size/256.
    generation_quota: u64,
    region: Region,
    links: Arc<[PageLink]>,
    index: ArcSwap<HashIndex>,
    generation: AtomicU8,
    gen_bytes: GenerationBytes,
    state: Mutex<EngineState>,
}

impl Cache {
    /// Create a fresh cache: preallocates the data file (rounded down to a
    /// page multiple) and writes an empty index file.
    pub fn create_new<P: AsRef<Path>, Q: AsRef<Path>>(
        index_path: P,
        data_path: Q,
        max_items: u32,
        max_size: u64,
    ) -> Result<Self> {
        if max_items == 0 {
            return Err(Error::Storage("max_items must be non-zero".to_string()));
        }
        let region = Region::create(data_path.as_ref(), max_size)?;
        check_page_total(region.page_total())?;

        let page_total = region.page_total();
        let links: Arc<[PageLink]> = (0..page_total).map(|_| PageLink::new()).collect();
        let allocator = RegionAllocator::new(page_total, Arc::clone(&links));

        let cache = Self {
            index_path: index_path.as_ref().to_path_buf(),
            data_path: data_path.as_ref().to_path_buf(),
            max_items,
            max_size,
            generation_quota: max_size / GENERATION_COUNT as u64,
            region,
            links,
            index: ArcSwap::from_pointee(HashIndex::for_max_items(max_items)),
            generation: AtomicU8::new(0),
            gen_bytes: GenerationBytes::new(),
            state: Mutex::new(EngineState {
                allocator,
                item_count: 0,
                total_bytes: 0,
                rounded_bytes: 0,
                readers: 0,
            }),
        };
        cache.save()?;
        info!(
            index = ?cache.index_path,
            data = ?cache.data_path,
            max_items,
            max_size,
            pages = page_total,
            "created cache"
        );
        Ok(cache)
    }

    /// Open an existing cache; fails if the index or data file is missing.
    /// A staged `.tr` index left by an interrupted save is promoted first.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(index_path: P, data_path: Q) -> Result<Self> {
        let index_path = index_path.as_ref();
        let bytes = persist::read_or_recover(index_path)?.ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("index file not found: {}", index_path.display()),
            ))
        })?;
        let snapshot = persist::decode(&bytes)?;
        Self::load(index_path, data_path.as_ref(), snapshot)
    }

    /// Like [`open`](Self::open) but `Ok(None)` when the cache does not
    /// exist on disk yet.
    pub fn try_open<P: AsRef<Path>, Q: AsRef<Path>>(
        index_path: P,
        data_path: Q,
    ) -> Result<Option<Self>> {
        let index_path = index_path.as_ref();
        let data_path = data_path.as_ref();
        let bytes = match persist::read_or_recover(index_path)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        if !data_path.exists() {
            return Ok(None);
        }
        let snapshot = persist::decode(&bytes)?;
        Self::load(index_path, data_path, snapshot).map(Some)
    }

    /// Open a cache, rebuilding it with new capacity parameters if they
    /// differ from the stored ones. The rebuild goes through a temporary
    /// file pair; items that no longer fit are dropped.
    ///
    /// The old index file is deleted before either rename, so a crash
    /// mid-swap can lose the cache (it reads as absent and gets recreated)
    /// but can never pair an index with the wrong data file.
    pub fn open_and_modify<P: AsRef<Path>, Q: AsRef<Path>>(
        index_path: P,
        data_path: Q,
        new_max_items: u32,
        new_max_size: u64,
    ) -> Result<Self> {
        let index_path = index_path.as_ref();
        let data_path = data_path.as_ref();

        let existing = Self::open(index_path, data_path)?;
        if existing.max_items == new_max_items && existing.max_size == new_max_size {
            return Ok(existing);
        }

        let staged_index = persist::sibling(index_path, ".new");
        let staged_data = persist::sibling(data_path, ".new");
        {
            let rebuilt =
                Self::create_new(&staged_index, &staged_data, new_max_items, new_max_size)?;
            let view = existing.lock_view();
            let keys: Vec<CacheKey> =
                existing.index.load().iter().map(|(key, _)| key).collect();
            for key in keys {
                if let Some(bytes) = view.read(&key) {
                    rebuilt.insert(key, &bytes);
                }
            }
            drop(view);
            rebuilt.save()?;
        }
        drop(existing);

        // Invalidate the old index before touching the data file: every
        // crash point from here reads as a missing cache, never as the old
        // index over the new data. A stale staged index would be promoted
        // on reopen, so it goes too.
        let _ = fs::remove_file(persist::sibling(index_path, ".tr"));
        fs::remove_file(index_path)?;
        fs::rename(&staged_data, data_path)?;
        fs::rename(&staged_index, index_path)?;
        info!(
            index = ?index_path,
            new_max_items,
            new_max_size,
            "rebuilt cache with new capacity"
        );
        Self::open(index_path, data_path)
    }

    fn load(index_path: &Path, data_path: &Path, snapshot: IndexSnapshot) -> Result<Self> {
        let header = &snapshot.header;
        let region = Region::open(data_path, header.max_size)?;
        check_page_total(region.page_total())?;
        let page_total = region.page_total();

        if snapshot.entries.len() > header.max_items as usize {
            return Err(Error::DataFormat(
                "index file holds more items than its capacity".to_string(),
            ));
        }

        let links: Arc<[PageLink]> = (0..page_total).map(|_| PageLink::new()).collect();
        let index = HashIndex::for_max_items(header.max_items);
        let gen_bytes = GenerationBytes::new();

        // Reconstruct page ownership from the items: which pages are whole
        // chain units, which are class pages, and which blocks are taken.
        let mut chain_claimed = vec![false; page_total as usize];
        let mut shifts = vec![0u8; page_total as usize];
        let mut bitmaps = vec![0u64; page_total as usize];
        let mut total_bytes = 0u64;
        let mut rounded_bytes = 0u64;

        for entry in &snapshot.entries {
            let item = entry.item;
            let shift = item.tail_shift();
            let mut tail_page = item.first_page();
            let page_count = entry.chain.len() as u32;

            if item.is_large() {
                if entry.chain.is_empty() {
                    return Err(Error::DataFormat(
                        "large item without chain links".to_string(),
                    ));
                }
                let mut cur = item.first_page();
                for (pos, &next) in entry.chain.iter().enumerate() {
                    check_page(cur, page_total)?;
                    let p = cur as usize;
                    if chain_claimed[p] || shifts[p] != 0 {
                        return Err(Error::DataFormat("page claimed twice".to_string()));
                    }
                    chain_claimed[p] = true;
                    self_link(&links, cur, next, page_count - pos as u32);
                    cur = next;
                }
                tail_page = cur;
            }

            check_page(tail_page, page_total)?;
            let tp = tail_page as usize;
            if chain_claimed[tp] {
                return Err(Error::DataFormat("tail block on a chain page".to_string()));
            }
            if shifts[tp] == 0 {
                shifts[tp] = shift as u8;
                bitmaps[tp] = full_bitmap(shift);
            } else if shifts[tp] != shift as u8 {
                return Err(Error::DataFormat("tail block class mismatch".to_string()));
            }
            if item.tail_index() >= blocks_per_page(shift) {
                return Err(Error::DataFormat("tail block out of range".to_string()));
            }
            let bit = 1u64 << item.tail_index();
            if bitmaps[tp] & bit == 0 {
                return Err(Error::DataFormat("tail block claimed twice".to_string()));
            }
            bitmaps[tp] &= !bit;

            if !index.add(entry.key, item) {
                return Err(Error::DataFormat("duplicate hash in index file".to_string()));
            }

            let len = item.len(page_count);
            total_bytes += len;
            rounded_bytes += u64::from(page_count) * PAGE_SIZE as u64 + (1u64 << shift);
            gen_bytes.add(item.generation(), len);
        }

        let allocator = RegionAllocator::rebuild(
            page_total,
            Arc::clone(&links),
            &chain_claimed,
            &shifts,
            &bitmaps,
        );

        let item_count = snapshot.entries.len() as u32;
        info!(
            index = ?index_path,
            items = item_count,
            total_bytes,
            generation = header.generation,
            "opened cache"
        );
        Ok(Self {
            index_path: index_path.to_path_buf(),
            data_path: data_path.to_path_buf(),
            max_items: header.max_items,
            max_size: header.max_size,
            generation_quota: header.max_size / GENERATION_COUNT as u64,
            region,
            links,
            index: ArcSwap::from_pointee(index),
            generation: AtomicU8::new(header.generation),
            gen_bytes,
            state: Mutex::new(EngineState {
                allocator,
                item_count,
                total_bytes,
                rounded_bytes,
                readers: 0,
            }),
        })
    }

    /// Configured item budget.
    pub fn max_items(&self) -> u32 {
        self.max_items
    }

    /// Configured byte budget (before page rounding).
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Number of resident items.
    pub fn item_count(&self) -> usize {
        self.index.load().len()
    }

    /// Total resident payload bytes.
    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    /// Cheap index probe without opening a view.
    pub fn contains(&self, hash: &CacheKey) -> bool {
        self.index.load().find(hash).is_some()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            item_count: state.item_count,
            total_bytes: state.total_bytes,
            rounded_bytes: state.rounded_bytes,
            free_pages: state.allocator.free_pages(),
            generation: self.generation.load(Ordering::Relaxed),
        }
    }

    /// Store a blob under its content hash.
    ///
    /// Silent no-op (the cache is advisory, a miss is a safe fallback) when
    /// the item budget is reached, the hash is already present, the hash is
    /// the reserved zero sentinel, or too few free pages remain. Returns
    /// the hash either way.
    pub fn insert(&self, hash: CacheKey, data: &[u8]) -> CacheKey {
        if hash.is_zero() {
            warn!("dropping insert with all-zero content hash (reserved sentinel)");
            return hash;
        }

        let mut state = self.state.lock();
        if state.item_count >= self.max_items {
            debug!(%hash, "dropping insert: item budget reached");
            return hash;
        }
        let index = self.index.load();
        if index.find(&hash).is_some() {
            return hash;
        }

        let full_pages = data.len().saturating_sub(1) / PAGE_SIZE;
        let tail_size = data.len() - full_pages * PAGE_SIZE;
        let shift = class_for_size(tail_size);

        // Worst case we need one fresh page per full slice plus one for the
        // tail; checking up front means allocation below cannot fail.
        let tail_needs_page = !state.allocator.class_has_free(class_index(shift));
        let needed = full_pages as u64 + u64::from(tail_needs_page);
        if needed > state.allocator.free_pages() {
            debug!(%hash, len = data.len(), "dropping insert: insufficient free pages");
            return hash;
        }

        let mut pages = Vec::with_capacity(full_pages);
        for _ in 0..full_pages {
            match state.allocator.allocate_page() {
                Some(page) => pages.push(page),
                None => {
                    for page in pages {
                        state.allocator.free_page(page);
                    }
                    return hash;
                }
            }
        }
        let tail = match state.allocator.allocate_block(shift) {
            Some(tail) => tail,
            None => {
                for page in pages {
                    state.allocator.free_page(page);
                }
                return hash;
            }
        };

        self.region
            .write_block(tail.page, shift, tail.index, &data[full_pages * PAGE_SIZE..]);
        for (slice, &page) in pages.iter().enumerate() {
            let next = pages.get(slice + 1).copied().unwrap_or(tail.page);
            self_link(&self.links, page, next, (full_pages - slice) as u32);
            self.region
                .write_page(page, &data[slice * PAGE_SIZE..(slice + 1) * PAGE_SIZE]);
        }

        let generation = self.generation.load(Ordering::Relaxed);
        let item = ItemDescriptor::new(
            pages.first().copied().unwrap_or(tail.page),
            generation,
            tail.index,
            tail_size as u32,
            full_pages > 0,
        );
        let added = index.add(hash, item);
        debug_assert!(added, "index add failed under the mutation lock");

        state.item_count += 1;
        state.total_bytes += data.len() as u64;
        state.rounded_bytes += full_pages as u64 * PAGE_SIZE as u64 + (1u64 << shift);
        drop(state);

        self.account(generation, data.len() as u64);
        debug!(%hash, len = data.len(), full_pages, "inserted blob");
        hash
    }

    /// Open a read lease. Cheap: bumps a reader count under the mutation
    /// lock. Trim refuses to run while any lease is open.
    pub fn lock_view(&self) -> CacheView<'_> {
        self.state.lock().readers += 1;
        CacheView { cache: self }
    }

    pub(crate) fn release_view(&self) {
        let mut state = self.state.lock();
        debug_assert!(state.readers > 0);
        state.readers -= 1;
    }

    /// Lock-free read; only reachable through a live [`CacheView`].
    pub(crate) fn read_pinned(&self, hash: &CacheKey) -> Option<Cow<'_, [u8]>> {
        let index = self.index.load();
        let slot = index.find(hash)?;
        let item = index.item_at(slot);
        if !item.is_valid() {
            return None;
        }

        let shift = item.tail_shift();
        let tail_size = item.tail_size() as usize;
        let mut page_count = 0u32;
        let bytes = if item.is_large() {
            let mut page = item.first_page();
            page_count = self.links[page as usize].count.load(Ordering::Acquire);
            let mut buf = Vec::with_capacity(page_count as usize * PAGE_SIZE + tail_size);
            for _ in 0..page_count {
                buf.extend_from_slice(self.region.page(page));
                page = self.links[page as usize].next.load(Ordering::Acquire);
            }
            buf.extend_from_slice(self.region.block(page, shift, item.tail_index(), tail_size));
            Cow::Owned(buf)
        } else {
            Cow::Borrowed(
                self.region
                    .block(item.first_page(), shift, item.tail_index(), tail_size),
            )
        };

        self.touch(&index, slot, item, item.len(page_count));
        Some(bytes)
    }

    /// Lazily bump an item's generation to the current one, re-accounting
    /// the byte buckets. Lock-free CAS loop; losing a race just retries
    /// against the fresher descriptor.
    fn touch(&self, index: &HashIndex, slot: usize, mut item: ItemDescriptor, len: u64) {
        let current = self.generation.load(Ordering::Relaxed);
        loop {
            if !item.is_valid() || item.generation() == current {
                return;
            }
            let updated = item.with_generation(current);
            if index.try_update(slot, item, updated) {
                self.gen_bytes.sub(item.generation(), len);
                self.account(current, len);
                return;
            }
            item = index.item_at(slot);
        }
    }

    /// Add bytes to a generation bucket and advance the clock when the
    /// bucket exceeds its quota. The CAS advances at most one step even
    /// when several threads cross the quota together.
    fn account(&self, generation: u8, bytes: u64) {
        let total = self.gen_bytes.add(generation, bytes);
        if total > self.generation_quota {
            let _ = self.generation.compare_exchange(
                generation,
                generation.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            );
        }
    }

    /// Force a generation boundary. Deterministic hook for tests and
    /// debugging; production advancement is volume-driven via inserts and
    /// reads.
    pub fn next_generation(&self) {
        self.generation.fetch_add(1, Ordering::Relaxed);
    }

    /// Evict whole generations, oldest first, until at most roughly
    /// `target_size` bytes remain. The current generation is always
    /// retained in full.
    ///
    /// Returns `Ok(false)` without touching anything if a read lease is
    /// open. Once eviction is computed, the shrunken index is persisted
    /// *before* pages are reclaimed, so a crash in between leaks pages
    /// until the next trim but never resurrects evicted items.
    pub fn trim(&self, target_size: u64) -> Result<bool> {
        let evicted;
        let payload;
        {
            let mut state = self.state.lock();
            if state.readers > 0 {
                debug!(readers = state.readers, "trim refused: read leases open");
                return Ok(false);
            }

            // Walk generations newest-first, fixing how many to retain.
            let generation = self.generation.load(Ordering::Relaxed);
            let mut retained_bytes = self.gen_bytes.get(generation);
            let mut keep = 1u32;
            while keep < GENERATION_COUNT as u32 {
                let bucket = self.gen_bytes.get(generation.wrapping_sub(keep as u8));
                if retained_bytes + bucket > target_size {
                    break;
                }
                retained_bytes += bucket;
                keep += 1;
            }

            let old = self.index.load();
            let fresh = HashIndex::for_max_items(self.max_items);
            let mut dropped = Vec::new();
            for (key, item) in old.iter() {
                let age = u32::from(generation.wrapping_sub(item.generation()));
                if age < keep {
                    let added = fresh.add(key, item);
                    debug_assert!(added);
                } else {
                    dropped.push(item);
                }
            }
            state.item_count = fresh.len() as u32;
            self.index.store(Arc::new(fresh));
            payload = self.encode_index();
            evicted = dropped;
            debug!(
                keep_generations = keep,
                retained_bytes,
                evicted = evicted.len(),
                "trim computed eviction set"
            );
        }

        // Persist the shrunken index outside the lock; reads and inserts
        // proceed against the already-swapped index meanwhile.
        persist::write_atomic(&self.index_path, &payload)?;

        let mut state = self.state.lock();
        for item in &evicted {
            self.release_item(&mut state, *item);
        }
        state.allocator.release_empty_pages();
        info!(
            evicted = evicted.len(),
            items = state.item_count,
            total_bytes = state.total_bytes,
            "trim complete"
        );
        Ok(true)
    }

    /// Return an evicted item's pages and tail block to the allocator and
    /// roll its bytes out of the counters.
    fn release_item(&self, state: &mut EngineState, item: ItemDescriptor) {
        let mut page = item.first_page();
        let mut page_count = 0u32;
        if item.is_large() {
            page_count = self.links[page as usize].count.load(Ordering::Relaxed);
            for _ in 0..page_count {
                let next = self.links[page as usize].next.load(Ordering::Relaxed);
                state.allocator.free_page(page);
                page = next;
            }
        }
        state.allocator.free_block(page, item.tail_index());

        let len = item.len(page_count);
        state.total_bytes -= len;
        state.rounded_bytes -=
            u64::from(page_count) * PAGE_SIZE as u64 + (1u64 << item.tail_shift());
        self.gen_bytes.sub(item.generation(), len);
    }

    /// Persist the index file. Blob bytes live in the mapped region (the
    /// mapping is flushed here too); only the index needs the atomic-rename
    /// protocol.
    pub fn save(&self) -> Result<()> {
        let payload = {
            let _state = self.state.lock();
            self.encode_index()
        };
        self.region.flush()?;
        persist::write_atomic(&self.index_path, &payload)
    }

    /// Serialize the live index. Caller must hold the mutation lock so the
    /// chain links cannot shift mid-snapshot.
    fn encode_index(&self) -> Vec<u8> {
        let index = self.index.load();
        let mut entries = Vec::with_capacity(index.len());
        for (key, item) in index.iter() {
            let chain = if item.is_large() {
                let mut page = item.first_page();
                let count = self.links[page as usize].count.load(Ordering::Relaxed);
                let mut chain = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let next = self.links[page as usize].next.load(Ordering::Relaxed);
                    chain.push(next);
                    page = next;
                }
                chain
            } else {
                Vec::new()
            };
            entries.push(IndexEntry { key, item, chain });
        }
        persist::encode(&IndexSnapshot {
            header: IndexHeader {
                max_items: self.max_items,
                max_size: self.max_size,
                generation: self.generation.load(Ordering::Relaxed),
            },
            entries,
        })
    }
}

/// Chain links are serialized as i32 with the top bit as a continuation
/// flag, so page indices must stay below 2^31.
fn check_page_total(page_total: u32) -> Result<()> {
    if page_total > i32::MAX as u32 {
        return Err(Error::Storage(format!(
            "region of {} pages exceeds the index file's page addressing",
            page_total
        )));
    }
    Ok(())
}

fn check_page(page: u32, page_total: u32) -> Result<()> {
    if page >= page_total {
        return Err(Error::DataFormat(format!(
            "page index {} out of range ({} pages)",
            page, page_total
        )));
    }
    Ok(())
}

fn self_link(links: &Arc<[PageLink]>, page: u32, next: u32, count: u32) {
    links[page as usize].next.store(next, Ordering::Relaxed);
    links[page as usize].count.store(count, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::KEY_LEN;
    use std::path::PathBuf;

    fn scratch(name: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("blobcache_engine_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        (dir.join("cache.idx"), dir.join("cache.dat"))
    }

    fn key(tag: u8) -> CacheKey {
        CacheKey::new([tag; KEY_LEN])
    }

    #[test]
    fn test_create_rejects_zero_items() {
        let (index, data) = scratch("zero_items");
        assert!(Cache::create_new(&index, &data, 0, 1 << 20).is_err());
    }

    #[test]
    fn test_zero_hash_insert_is_dropped() -> Result<()> {
        let (index, data) = scratch("zero_hash");
        let cache = Cache::create_new(&index, &data, 8, 1 << 20)?;
        cache.insert(CacheKey::ZERO, b"payload");
        assert_eq!(cache.item_count(), 0);
        assert!(!cache.contains(&CacheKey::ZERO));
        Ok(())
    }

    #[test]
    fn test_fresh_cache_stats() -> Result<()> {
        let (index, data) = scratch("fresh_stats");
        let cache = Cache::create_new(&index, &data, 8, 8 * 4096)?;
        let stats = cache.stats();
        assert_eq!(stats.item_count, 0);
        assert_eq!(stats.total_bytes, 0);
        assert_eq!(stats.free_pages, 8);
        assert_eq!(stats.generation, 0);
        Ok(())
    }

    #[test]
    fn test_insert_accounts_block_rounding() -> Result<()> {
        let (index, data) = scratch("rounding");
        let cache = Cache::create_new(&index, &data, 8, 1 << 20)?;
        cache.insert(key(1), &[7u8; 100]);
        let stats = cache.stats();
        assert_eq!(stats.total_bytes, 100);
        // 100 bytes rounds up to a 128B block.
        assert_eq!(stats.rounded_bytes, 128);
        Ok(())
    }
}
