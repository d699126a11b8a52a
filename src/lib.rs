//! blobcache - a persistent, capacity-bounded, content-addressed blob cache.
//!
//! Byte blobs are stored and retrieved by content hash, backed by a
//! fixed-size memory-mapped data file. Reads are lock-free and run under a
//! scoped [`CacheView`] lease, inserts are serialized by a single mutation
//! lock, and eviction is generational and crash-safe: the index is persisted
//! with a write-temp-then-atomic-rename protocol so the on-disk state and
//! the in-memory state never diverge across restarts.
//!
//! A miss is always a safe fallback (the caller recomputes), so capacity
//! exhaustion degrades performance, never correctness.

#![warn(rust_2018_idioms)]

pub mod cache;
pub mod index;
pub mod region;

// Re-exports for convenience
pub use cache::{Cache, CacheStats, CacheView};
pub use index::{CacheKey, KEY_LEN};

/// Cache error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        #[error("Data format error: {0}")]
        DataFormat(String),

        #[error("Storage error: {0}")]
        Storage(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}
