//! # Snapshot Memory
//!
//! A [`MemoryAccessor`] over byte ranges captured ahead of time.
//!
//! Core-file readers and tests both end up with "these bytes lived at this
//! address". `SnapshotMemory` keeps those ranges ordered by base address and
//! serves reads that may span adjacent ranges.

use std::collections::BTreeMap;

use super::{Endian, MemoryAccessor};
use crate::error::{SiftError, SiftResult};
use crate::types::Address;

/// Captured target memory held in process
///
/// ## Example
///
/// ```rust
/// use vmsift_core::memory::{Endian, MemoryAccessor, SnapshotMemory};
/// use vmsift_core::types::Address;
///
/// let mut memory = SnapshotMemory::new(Endian::Little);
/// memory.add_range(Address::from(0x1000), vec![0x78, 0x56, 0x34, 0x12])?;
/// assert_eq!(memory.read_u32(Address::from(0x1000))?, 0x1234_5678);
/// assert!(memory.read_u32(Address::from(0x2000)).is_err());
/// # Ok::<(), vmsift_core::error::SiftError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SnapshotMemory
{
    endian: Endian,
    ranges: BTreeMap<u64, Vec<u8>>,
}

impl SnapshotMemory
{
    /// Create an empty snapshot for a target with the given byte order.
    #[must_use]
    pub fn new(endian: Endian) -> Self
    {
        Self {
            endian,
            ranges: BTreeMap::new(),
        }
    }

    /// Add a captured range.
    ///
    /// ## Errors
    ///
    /// `Config` if the range is empty, wraps the address space, or overlaps a
    /// range already present.
    pub fn add_range(&mut self, base: Address, bytes: Vec<u8>) -> SiftResult<()>
    {
        if bytes.is_empty() {
            return Err(SiftError::Config(format!("empty range at {base}")));
        }
        let start = base.value();
        let end = start
            .checked_add(bytes.len() as u64)
            .ok_or_else(|| SiftError::Config(format!("range at {base} wraps the address space")))?;

        if let Some((&prev_base, prev)) = self.ranges.range(..end).next_back() {
            if prev_base + prev.len() as u64 > start {
                return Err(SiftError::Config(format!(
                    "range [{base}, 0x{end:x}) overlaps range at 0x{prev_base:x}"
                )));
            }
        }

        self.ranges.insert(start, bytes);
        Ok(())
    }

    /// Builder-style [`add_range`](Self::add_range).
    ///
    /// ## Errors
    ///
    /// Same as `add_range`.
    pub fn with_range(mut self, base: Address, bytes: Vec<u8>) -> SiftResult<Self>
    {
        self.add_range(base, bytes)?;
        Ok(self)
    }

    /// Captured ranges as `(base, length)` pairs in address order.
    pub fn ranges(&self) -> impl Iterator<Item = (Address, usize)> + '_
    {
        self.ranges.iter().map(|(&base, bytes)| (Address::from(base), bytes.len()))
    }

    /// Range containing `address`, with the offset of `address` inside it.
    fn locate(&self, address: u64) -> Option<(&[u8], usize)>
    {
        let (&base, bytes) = self.ranges.range(..=address).next_back()?;
        let offset = usize::try_from(address - base).ok()?;
        (offset < bytes.len()).then_some((bytes.as_slice(), offset))
    }
}

impl MemoryAccessor for SnapshotMemory
{
    fn read_bytes(&self, address: Address, length: usize) -> SiftResult<Vec<u8>>
    {
        let fault = || SiftError::MemoryFault { address, length };
        let mut output = Vec::with_capacity(length);
        let mut cursor = address.value();

        while output.len() < length {
            let (bytes, offset) = self.locate(cursor).ok_or_else(fault)?;
            let chunk = (length - output.len()).min(bytes.len() - offset);
            output.extend_from_slice(&bytes[offset..offset + chunk]);
            cursor = cursor.checked_add(chunk as u64).ok_or_else(fault)?;
        }

        Ok(output)
    }

    fn find_pattern(&self, pattern: &[u8], alignment: u64, start: Address) -> SiftResult<Option<Address>>
    {
        if pattern.is_empty() {
            return Ok(None);
        }
        let alignment = alignment.max(1);
        let first = self.ranges.range(..=start.value()).next_back().map_or(0, |(&base, _)| base);

        // Matches spanning two ranges are not reported.
        for (&base, bytes) in self.ranges.range(first..) {
            let end = base + bytes.len() as u64;
            let from = base.max(start.value());
            let mut candidate = Address::from(from).align_up(alignment).value();
            // No aligned address at or above `from` before the top of the address space.
            if candidate < from {
                break;
            }
            while candidate.saturating_add(pattern.len() as u64) <= end {
                let offset = (candidate - base) as usize;
                if &bytes[offset..offset + pattern.len()] == pattern {
                    return Ok(Some(Address::from(candidate)));
                }
                let Some(next) = candidate.checked_add(alignment) else {
                    break;
                };
                candidate = next;
            }
        }

        Ok(None)
    }

    fn byte_order(&self) -> Endian
    {
        self.endian
    }
}
