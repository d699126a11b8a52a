//! Scoped read lease.

use std::borrow::Cow;

use super::Cache;
use crate::index::CacheKey;

/// A scoped read handle pinning the cache against trim while reads are
/// outstanding.
///
/// Opening and closing a view adjusts a reader count under the mutation
/// lock (cheap); the reads themselves are lock-free. Zero-copy slices
/// returned by [`read`](Self::read) borrow the mapped region and are valid
/// only for the view's lifetime, which is exactly what makes them safe:
/// trim never reclaims pages while any view is open.
pub struct CacheView<'a> {
    pub(crate) cache: &'a Cache,
}

impl CacheView<'_> {
    /// Look up a blob by content hash.
    ///
    /// Small items are returned as zero-copy slices into the mapped region;
    /// large items are reassembled from their page chain into a fresh
    /// buffer. Reading lazily bumps the item's generation to the current
    /// one, which is what approximates LRU for eviction.
    pub fn read(&self, hash: &CacheKey) -> Option<Cow<'_, [u8]>> {
        self.cache.read_pinned(hash)
    }
}

impl Drop for CacheView<'_> {
    fn drop(&mut self) {
        self.cache.release_view();
    }
}
