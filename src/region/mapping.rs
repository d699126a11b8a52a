//! Memory-mapped region adapter.
//!
//! The data file is preallocated to the configured size (rounded down to a
//! page multiple) and mapped read-write. All page/offset arithmetic into the
//! mapping happens behind this adapter; the rest of the crate only ever sees
//! safe byte slices. The file has no header - its structure is reconstructed
//! entirely from the index file at open.

use crate::error::{Error, Result};
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

use super::page::PAGE_SIZE;

/// Fixed-size mapped byte region, addressed by page index.
pub struct Region {
    map: UnsafeCell<MmapMut>,
    len: usize,
}

// SAFETY: all mutation goes through `write_page`/`write_block`, which the
// engine only calls while holding its mutation lock, and an item's bytes are
// written before its descriptor is published to the index. Readers therefore
// never observe a page that a writer is still filling.
unsafe impl Sync for Region {}

impl Region {
    /// Usable region size for a configured maximum: rounded down to a
    /// multiple of the page size.
    pub fn rounded_size(max_size: u64) -> u64 {
        max_size / PAGE_SIZE as u64 * PAGE_SIZE as u64
    }

    /// Create (or truncate to size) the data file and map it.
    pub fn create(path: &Path, max_size: u64) -> Result<Self> {
        Self::map_file(path, max_size, true)
    }

    /// Map an existing data file; fails if it is missing.
    pub fn open(path: &Path, max_size: u64) -> Result<Self> {
        Self::map_file(path, max_size, false)
    }

    fn map_file(path: &Path, max_size: u64, create: bool) -> Result<Self> {
        let len = Self::rounded_size(max_size);
        if len == 0 {
            return Err(Error::Storage(format!(
                "max_size {} is smaller than one {}-byte page",
                max_size, PAGE_SIZE
            )));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        let file_len = file.metadata()?.len();
        if file_len != len {
            if !create {
                // An existing data file of the wrong length is corruption;
                // resizing it would hand out zeroed pages for valid hashes.
                return Err(Error::DataFormat(format!(
                    "data file {} is {} bytes, expected {}",
                    path.display(),
                    file_len,
                    len
                )));
            }
            file.set_len(len)?;
        }

        // SAFETY: the mapping is private to this process; the file length
        // was just fixed above and is never changed while mapped.
        let map = unsafe { MmapMut::map_mut(&file)? };
        debug!(path = ?path, len, "mapped data region");

        Ok(Self {
            map: UnsafeCell::new(map),
            len: len as usize,
        })
    }

    /// Number of whole pages in the region.
    pub fn page_total(&self) -> u32 {
        (self.len / PAGE_SIZE) as u32
    }

    fn base(&self) -> *mut u8 {
        // SAFETY: only used to derive in-bounds slices below.
        unsafe { (*self.map.get()).as_mut_ptr() }
    }

    /// Whole page as a byte slice.
    pub fn page(&self, page: u32) -> &[u8] {
        self.slice(page as usize * PAGE_SIZE, PAGE_SIZE)
    }

    /// Block `index` of a page formatted for class `shift`, truncated to
    /// `len` bytes.
    pub fn block(&self, page: u32, shift: u32, index: u32, len: usize) -> &[u8] {
        debug_assert!(len <= 1usize << shift);
        self.slice(page as usize * PAGE_SIZE + ((index as usize) << shift), len)
    }

    fn slice(&self, offset: usize, len: usize) -> &[u8] {
        assert!(offset + len <= self.len, "region access out of bounds");
        // SAFETY: bounds asserted above; concurrent writes never target
        // pages reachable from a published item (see the Sync rationale).
        unsafe { std::slice::from_raw_parts(self.base().add(offset), len) }
    }

    /// Copy `data` into the front of a page. Writer-only.
    pub fn write_page(&self, page: u32, data: &[u8]) {
        debug_assert!(data.len() <= PAGE_SIZE);
        self.write(page as usize * PAGE_SIZE, data);
    }

    /// Copy `data` into block `index` of a class-`shift` page. Writer-only.
    pub fn write_block(&self, page: u32, shift: u32, index: u32, data: &[u8]) {
        debug_assert!(data.len() <= 1usize << shift);
        self.write(page as usize * PAGE_SIZE + ((index as usize) << shift), data);
    }

    fn write(&self, offset: usize, data: &[u8]) {
        assert!(offset + data.len() <= self.len, "region write out of bounds");
        // SAFETY: bounds asserted; the destination blocks are freshly
        // allocated and not yet visible to any reader.
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.base().add(offset), data.len());
        }
    }

    /// Flush the mapping to the backing file.
    pub fn flush(&self) -> Result<()> {
        // SAFETY: shared access; flush takes &self on MmapMut.
        let map = unsafe { &*self.map.get() };
        map.flush()?;
        Ok(())
    }
}
