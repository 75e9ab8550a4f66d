//! Memory segment type tags and heap regions.

use std::fmt;
use std::ops::BitOr;

use super::Address;

/// Type bitmask carried by every memory segment
///
/// A segment may carry several bits at once. Walkers filter segments by
/// testing whether the segment's tag intersects a requested mask.
///
/// ```rust
/// use vmsift_core::types::SegmentType;
///
/// let tag = SegmentType::CLASS_METADATA | SegmentType::FIXED;
/// assert!(tag.intersects(SegmentType::CLASS_METADATA));
/// assert!(!tag.intersects(SegmentType::OBJECT_HEAP));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SegmentType(u64);

impl SegmentType
{
    /// Matches no segment.
    pub const NONE: Self = SegmentType(0);
    /// Segment fixed in place (never moved or freed by the runtime)
    pub const FIXED: Self = SegmentType(0x0000_0002);
    /// Segment holding managed objects
    pub const OBJECT_HEAP: Self = SegmentType(0x0000_0008);
    /// Segment holding per-class runtime structures
    pub const CLASS_RUNTIME: Self = SegmentType(0x0001_0000);
    /// Segment holding packed class metadata records
    pub const CLASS_METADATA: Self = SegmentType(0x0002_0000);
    /// Matches every segment.
    pub const ALL: Self = SegmentType(u64::MAX);

    /// Create a mask from raw bits.
    pub const fn from_bits(bits: u64) -> Self
    {
        SegmentType(bits)
    }

    /// Raw bits of the mask.
    pub const fn bits(self) -> u64
    {
        self.0
    }

    /// Whether any bit of `mask` is set in `self`.
    pub const fn intersects(self, mask: SegmentType) -> bool
    {
        self.0 & mask.0 != 0
    }
}

impl BitOr for SegmentType
{
    type Output = SegmentType;

    fn bitor(self, rhs: Self) -> Self::Output
    {
        SegmentType(self.0 | rhs.0)
    }
}

impl fmt::Display for SegmentType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:x}", self.0)
    }
}

/// A contiguous heap sub-range `[base, top)`
///
/// Regions are the unit of heap scanning and the key under which flat
/// monitors found in them are memoized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HeapRegion
{
    /// First byte of the region (inclusive)
    pub base: Address,
    /// End of allocated data in the region (exclusive)
    pub top: Address,
}

impl HeapRegion
{
    /// Create a region from its bounds.
    pub const fn new(base: Address, top: Address) -> Self
    {
        Self { base, top }
    }

    /// Size of the region in bytes (zero when `top` is below `base`).
    pub fn size(&self) -> u64
    {
        self.base.distance_to(self.top)
    }

    /// Whether `address` lies inside the region.
    pub fn contains(&self, address: Address) -> bool
    {
        address >= self.base && address < self.top
    }
}

impl fmt::Display for HeapRegion
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "[{}, {})", self.base, self.top)
    }
}
