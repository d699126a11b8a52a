//! Index-file serialization and crash-safe replacement.
//!
//! The index file is the only persisted metadata; blob bytes live in the
//! mapped data file. Layout, little-endian:
//!
//! ```text
//! version:u8  max_items:i32  max_size:i64  generation:u8  item_count:i32
//! then per item:
//!   hash (20 bytes)  item:i64
//!   large items only: i32 chain links, top bit set = more links follow,
//!   terminated by a non-negative link (the tail page)
//! ```
//!
//! Replacement protocol: write `<index>.tr`, fsync, rename over `<index>`.
//! On open, a missing canonical file with `.tr` present promotes the staged
//! file - the sole crash-recovery path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::index::{CacheKey, ItemDescriptor, KEY_LEN};

pub(crate) const FORMAT_VERSION: u8 = 1;

/// Top bit of a chain link: more links follow.
const MORE_LINKS_BIT: u32 = 1 << 31;

pub(crate) struct IndexHeader {
    pub max_items: u32,
    pub max_size: u64,
    pub generation: u8,
}

pub(crate) struct IndexEntry {
    pub key: CacheKey,
    pub item: ItemDescriptor,
    /// For large items: successive `next` pointers starting at the chain
    /// head's; the final link is the tail page. Empty for small items.
    pub chain: Vec<u32>,
}

pub(crate) struct IndexSnapshot {
    pub header: IndexHeader,
    pub entries: Vec<IndexEntry>,
}

pub(crate) fn encode(snapshot: &IndexSnapshot) -> Vec<u8> {
    let header = &snapshot.header;
    let mut out = Vec::with_capacity(18 + snapshot.entries.len() * (KEY_LEN + 8));
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&(header.max_items as i32).to_le_bytes());
    out.extend_from_slice(&(header.max_size as i64).to_le_bytes());
    out.push(header.generation);
    out.extend_from_slice(&(snapshot.entries.len() as i32).to_le_bytes());

    for entry in &snapshot.entries {
        out.extend_from_slice(entry.key.as_bytes());
        out.extend_from_slice(&(entry.item.raw() as i64).to_le_bytes());
        if entry.item.is_large() {
            debug_assert!(!entry.chain.is_empty());
            for (pos, &link) in entry.chain.iter().enumerate() {
                let more = pos + 1 < entry.chain.len();
                let word = if more { link | MORE_LINKS_BIT } else { link };
                out.extend_from_slice(&(word as i32).to_le_bytes());
            }
        }
    }
    out
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buf.len() {
            return Err(Error::DataFormat("truncated index file".to_string()));
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }
}

pub(crate) fn decode(bytes: &[u8]) -> Result<IndexSnapshot> {
    let mut reader = Reader::new(bytes);

    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(Error::DataFormat(format!(
            "unrecognized index file version {} (expected {})",
            version, FORMAT_VERSION
        )));
    }

    let max_items = reader.i32()?;
    let max_size = reader.i64()?;
    let generation = reader.u8()?;
    let item_count = reader.i32()?;
    if max_items <= 0 || max_size <= 0 || item_count < 0 {
        return Err(Error::DataFormat("corrupt index file header".to_string()));
    }
    // Every entry takes at least a key and an item word, so a count the
    // remaining bytes cannot hold is corruption; checking here keeps the
    // pre-reservation below bounded by the file size.
    let min_entry = (KEY_LEN + 8) as u64;
    if item_count as u64 * min_entry > reader.remaining() as u64 {
        return Err(Error::DataFormat(format!(
            "item count {} exceeds index file size",
            item_count
        )));
    }

    let mut entries = Vec::with_capacity(item_count as usize);
    for _ in 0..item_count {
        let key = CacheKey::from_slice(reader.take(KEY_LEN)?)
            .ok_or_else(|| Error::DataFormat("bad key width".to_string()))?;
        if key.is_zero() {
            return Err(Error::DataFormat("zero hash in index file".to_string()));
        }
        let item = ItemDescriptor::from_raw(reader.i64()? as u64);
        if !item.is_valid() {
            return Err(Error::DataFormat("invalid item in index file".to_string()));
        }
        let mut chain = Vec::new();
        if item.is_large() {
            loop {
                let word = reader.i32()?;
                let more = word < 0;
                chain.push(word as u32 & !MORE_LINKS_BIT);
                if !more {
                    break;
                }
            }
        }
        entries.push(IndexEntry { key, item, chain });
    }

    Ok(IndexSnapshot {
        header: IndexHeader {
            max_items: max_items as u32,
            max_size: max_size as u64,
            generation,
        },
        entries,
    })
}

/// Sibling path with `suffix` appended to the file name.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    path.with_file_name(name)
}

fn staging_path(path: &Path) -> PathBuf {
    sibling(path, ".tr")
}

/// Write the payload to `<path>.tr`, fsync, then atomically rename it over
/// the canonical file.
pub(crate) fn write_atomic(path: &Path, payload: &[u8]) -> Result<()> {
    let staging = staging_path(path);
    let mut file = fs::File::create(&staging)?;
    file.write_all(payload)?;
    file.sync_all()?;
    drop(file);
    fs::rename(&staging, path)?;
    debug!(path = ?path, bytes = payload.len(), "wrote index file");
    Ok(())
}

/// Read the canonical index file, promoting a staged `.tr` file if a crash
/// interrupted the rename. `Ok(None)` when neither exists.
pub(crate) fn read_or_recover(path: &Path) -> Result<Option<Vec<u8>>> {
    if path.exists() {
        return Ok(Some(fs::read(path)?));
    }
    let staging = staging_path(path);
    if staging.exists() {
        warn!(path = ?path, "promoting staged index file left by an interrupted save");
        fs::rename(&staging, path)?;
        return Ok(Some(fs::read(path)?));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("blobcache_persist_{}_{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn key(tag: u8) -> CacheKey {
        CacheKey::new([tag; KEY_LEN])
    }

    fn sample_snapshot() -> IndexSnapshot {
        IndexSnapshot {
            header: IndexHeader {
                max_items: 16,
                max_size: 1 << 20,
                generation: 3,
            },
            entries: vec![
                IndexEntry {
                    key: key(1),
                    item: ItemDescriptor::new(4, 2, 7, 100, false),
                    chain: Vec::new(),
                },
                IndexEntry {
                    key: key(2),
                    item: ItemDescriptor::new(0, 3, 0, 1808, true),
                    chain: vec![1, 5],
                },
            ],
        }
    }

    #[test]
    fn test_encode_decode_round_trip() -> crate::error::Result<()> {
        let encoded = encode(&sample_snapshot());
        let decoded = decode(&encoded)?;

        assert_eq!(decoded.header.max_items, 16);
        assert_eq!(decoded.header.max_size, 1 << 20);
        assert_eq!(decoded.header.generation, 3);
        assert_eq!(decoded.entries.len(), 2);

        assert_eq!(decoded.entries[0].key, key(1));
        assert!(!decoded.entries[0].item.is_large());
        assert!(decoded.entries[0].chain.is_empty());

        assert_eq!(decoded.entries[1].key, key(2));
        assert!(decoded.entries[1].item.is_large());
        assert_eq!(decoded.entries[1].chain, vec![1, 5]);
        Ok(())
    }

    #[test]
    fn test_unrecognized_version_is_fatal() {
        let mut encoded = encode(&sample_snapshot());
        encoded[0] = 99;
        assert!(matches!(
            decode(&encoded),
            Err(Error::DataFormat(_))
        ));
    }

    #[test]
    fn test_oversized_item_count_is_rejected() {
        // Corrupting the item-count field must surface as a data-format
        // error, not an attempt to reserve memory for billions of entries.
        let mut encoded = encode(&sample_snapshot());
        encoded[14..18].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(decode(&encoded), Err(Error::DataFormat(_))));

        // Off by one is caught too: claim one more entry than the bytes hold.
        let mut encoded = encode(&sample_snapshot());
        encoded[14..18].copy_from_slice(&3i32.to_le_bytes());
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let encoded = encode(&sample_snapshot());
        for len in [0, 5, 17, encoded.len() - 1] {
            assert!(decode(&encoded[..len]).is_err(), "accepted {} bytes", len);
        }
    }

    #[test]
    fn test_write_atomic_leaves_no_staging_file() -> crate::error::Result<()> {
        let dir = scratch_dir("atomic");
        let path = dir.join("cache.idx");
        write_atomic(&path, b"payload")?;
        assert_eq!(fs::read(&path)?, b"payload");
        assert!(!staging_path(&path).exists());
        fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_staged_file_is_promoted() -> crate::error::Result<()> {
        let dir = scratch_dir("promote");
        let path = dir.join("cache.idx");
        fs::write(staging_path(&path), b"staged")?;

        let recovered = read_or_recover(&path)?.unwrap();
        assert_eq!(recovered, b"staged");
        // Promotion renames rather than copies.
        assert!(path.exists());
        assert!(!staging_path(&path).exists());
        fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_canonical_file_wins_over_staged() -> crate::error::Result<()> {
        let dir = scratch_dir("canonical");
        let path = dir.join("cache.idx");
        fs::write(&path, b"canonical")?;
        fs::write(staging_path(&path), b"staged")?;

        let read = read_or_recover(&path)?.unwrap();
        assert_eq!(read, b"canonical");
        fs::remove_dir_all(dir).ok();
        Ok(())
    }

    #[test]
    fn test_missing_files_read_as_none() -> crate::error::Result<()> {
        let dir = scratch_dir("missing");
        assert!(read_or_recover(&dir.join("cache.idx"))?.is_none());
        fs::remove_dir_all(dir).ok();
        Ok(())
    }
}
