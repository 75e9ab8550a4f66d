//! Target address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address in the target image
///
/// This wrapper around `u64` keeps target addresses apart from sizes, counts,
/// and offsets. The target may be a 32-bit or 64-bit process; addresses are
/// always widened to `u64` here and the pointer width lives in the
/// [`ImageSchema`](crate::schema::ImageSchema).
///
/// ## NULL
///
/// Address `0` is the target's NULL pointer. Walkers treat a NULL link or
/// slot as "nothing here", which is distinct from a read that failed.
///
/// ## Example
///
/// ```rust
/// use vmsift_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100;
/// assert_eq!(next_addr.value(), 0x1100);
/// assert!(Address::NULL.is_null());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The target NULL pointer (0x0)
    pub const NULL: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// ```rust
    /// use vmsift_core::types::Address;
    ///
    /// const HEAP_BASE: Address = Address::new(0x7f00_0000_0000);
    /// ```
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Whether this is the target NULL pointer.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use vmsift_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Apply a signed displacement, checking for wrap-around
    ///
    /// Used to resolve self-relative references.
    ///
    /// ```rust
    /// use vmsift_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_offset(-0x10), Some(Address::from(0xff0)));
    /// assert_eq!(Address::from(0x8).checked_offset(-0x10), None);
    /// ```
    pub fn checked_offset(self, displacement: i64) -> Option<Self>
    {
        self.0.checked_add_signed(displacement).map(Address)
    }

    /// Add an offset to this address, saturating at the maximum value
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }

    /// Round up to the next multiple of `alignment` (a power of two)
    ///
    /// ```rust
    /// use vmsift_core::types::Address;
    ///
    /// assert_eq!(Address::from(0x1001).align_up(8), Address::from(0x1008));
    /// assert_eq!(Address::from(0x1008).align_up(8), Address::from(0x1008));
    /// ```
    pub fn align_up(self, alignment: u64) -> Self
    {
        if alignment <= 1 {
            return self;
        }
        let mask = alignment - 1;
        Address(self.0.saturating_add(mask) & !mask)
    }

    /// Number of bytes from `self` up to `end`, zero if `end` is below `self`.
    pub fn distance_to(self, end: Address) -> u64
    {
        end.0.saturating_sub(self.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
