//! # Paged Memory Cache
//!
//! Read-through page cache in front of any [`MemoryAccessor`].
//!
//! Walkers issue many small reads (a link field here, a size field there),
//! which is slow against a live target or a compressed core. `PagedMemory`
//! fetches whole pages and serves small reads from them.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::{Endian, MemoryAccessor};
use crate::error::{SiftError, SiftResult};
use crate::types::Address;

/// Default page size when none is configured.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

fn page_align_down(value: u64, page_size: usize) -> u64
{
    let mask = !(page_size as u64 - 1);
    value & mask
}

/// Simple read-through cache that stores pages fetched from the inner accessor.
///
/// Pages that cannot be fetched whole (unmapped, or the end of a mapping
/// falls inside the page) are remembered as unreadable and never fetched
/// again; the requested bytes are read directly instead. Direct reads that
/// fail are remembered too, so a read covering a known-bad span fails without
/// touching the inner accessor.
pub struct PagedMemory<A>
{
    inner: A,
    page_size: usize,
    pages: RwLock<HashMap<u64, Arc<Vec<u8>>>>,
    // Page base -> failed direct reads `(address, length)` within it.
    unreadable: RwLock<HashMap<u64, Vec<(u64, usize)>>>,
}

impl<A: MemoryAccessor> PagedMemory<A>
{
    /// Create a cache with the default page size.
    pub fn new(inner: A) -> Self
    {
        Self::with_page_size(inner, DEFAULT_PAGE_SIZE)
    }

    /// Create a cache with a custom page size (rounded up to a power of two, at least 256).
    pub fn with_page_size(inner: A, page_size: usize) -> Self
    {
        let size = page_size.max(256).next_power_of_two();
        Self {
            inner,
            page_size: size,
            pages: RwLock::new(HashMap::new()),
            unreadable: RwLock::new(HashMap::new()),
        }
    }

    /// Page size in use.
    pub fn page_size(&self) -> usize
    {
        self.page_size
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize
    {
        self.pages.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of pages known to be unreadable as a whole.
    pub fn unreadable_pages(&self) -> usize
    {
        self.unreadable.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Clears all cached pages and remembered failures.
    ///
    /// Needed between analysis passes over a live target that kept running.
    pub fn clear(&self)
    {
        self.pages.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.unreadable.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// The wrapped accessor.
    pub fn inner(&self) -> &A
    {
        &self.inner
    }

    fn fetch_page(&self, base: u64) -> Option<Arc<Vec<u8>>>
    {
        if let Some(existing) = self.pages.read().unwrap_or_else(PoisonError::into_inner).get(&base) {
            return Some(existing.clone());
        }

        if self.unreadable.read().unwrap_or_else(PoisonError::into_inner).contains_key(&base) {
            return None;
        }

        // The inner read happens without holding the lock.
        match self.inner.read_bytes(Address::from(base), self.page_size) {
            Ok(data) => {
                let page = Arc::new(data);
                let mut pages = self.pages.write().unwrap_or_else(PoisonError::into_inner);
                Some(pages.entry(base).or_insert(page).clone())
            }
            Err(_) => {
                self.unreadable
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(base)
                    .or_default();
                None
            }
        }
    }

    /// Direct read of `length` bytes inside the unreadable page at `base`.
    fn read_direct(&self, base: u64, absolute: u64, length: usize) -> SiftResult<Vec<u8>>
    {
        let covers_failure = |spans: &Vec<(u64, usize)>| {
            spans
                .iter()
                .any(|&(start, len)| start >= absolute && (start - absolute) as usize + len <= length)
        };
        let known_bad = self
            .unreadable
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&base)
            .is_some_and(covers_failure);
        if known_bad {
            return Err(SiftError::MemoryFault {
                address: Address::from(absolute),
                length,
            });
        }

        self.inner.read_bytes(Address::from(absolute), length).map_err(|error| {
            let mut unreadable = self.unreadable.write().unwrap_or_else(PoisonError::into_inner);
            let spans = unreadable.entry(base).or_default();
            if !covers_failure(spans) {
                spans.push((absolute, length));
            }
            error
        })
    }
}

impl<A: MemoryAccessor> MemoryAccessor for PagedMemory<A>
{
    fn read_bytes(&self, address: Address, length: usize) -> SiftResult<Vec<u8>>
    {
        if length == 0 {
            return Ok(Vec::new());
        }

        let mut output = Vec::with_capacity(length);
        while output.len() < length {
            let absolute = address.value().wrapping_add(output.len() as u64);
            let page_base = page_align_down(absolute, self.page_size);
            let page_offset = (absolute - page_base) as usize;
            let chunk = (length - output.len()).min(self.page_size - page_offset);

            match self.fetch_page(page_base) {
                Some(page) => output.extend_from_slice(&page[page_offset..page_offset + chunk]),
                None => {
                    let bytes = self.read_direct(page_base, absolute, chunk)?;
                    output.extend_from_slice(&bytes);
                }
            }
        }

        Ok(output)
    }

    fn find_pattern(&self, pattern: &[u8], alignment: u64, start: Address) -> SiftResult<Option<Address>>
    {
        self.inner.find_pattern(pattern, alignment, start)
    }

    fn byte_order(&self) -> Endian
    {
        self.inner.byte_order()
    }
}
