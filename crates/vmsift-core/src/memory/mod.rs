//! # Target Memory Access
//!
//! The accessor trait every walker reads through, plus typed read helpers.
//!
//! The transport behind an accessor (core file, live attach, captured ranges)
//! is not this crate's concern. Implementations only need to return exactly
//! the requested bytes or a [`SiftError::MemoryFault`], search for a byte
//! pattern, and report the target's byte order; everything else is provided.
//!
//! ## Implementations
//!
//! - [`SnapshotMemory`]: captured byte ranges held in memory
//! - [`PagedMemory`]: read-through page cache in front of another accessor

pub mod cache;
pub mod snapshot;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub use cache::PagedMemory;
pub use snapshot::SnapshotMemory;

use crate::error::{SiftError, SiftResult};
use crate::types::Address;

/// Longest string [`MemoryAccessor::read_c_string`] will follow.
pub const MAX_C_STRING: usize = 4096;

/// Byte order of the target process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian
{
    /// Least significant byte first (x86, most aarch64 targets)
    Little,
    /// Most significant byte first (s390x, AIX/ppc64)
    Big,
}

impl Endian
{
    /// Decode a `u16` from the first two bytes of `bytes`.
    pub fn u16(self, bytes: &[u8]) -> u16
    {
        match self {
            Endian::Little => LittleEndian::read_u16(bytes),
            Endian::Big => BigEndian::read_u16(bytes),
        }
    }

    /// Decode a `u32` from the first four bytes of `bytes`.
    pub fn u32(self, bytes: &[u8]) -> u32
    {
        match self {
            Endian::Little => LittleEndian::read_u32(bytes),
            Endian::Big => BigEndian::read_u32(bytes),
        }
    }

    /// Decode a `u64` from the first eight bytes of `bytes`.
    pub fn u64(self, bytes: &[u8]) -> u64
    {
        match self {
            Endian::Little => LittleEndian::read_u64(bytes),
            Endian::Big => BigEndian::read_u64(bytes),
        }
    }

    /// Decode an unsigned integer of `bytes.len()` bytes (1 to 8).
    pub fn uint(self, bytes: &[u8]) -> u64
    {
        match bytes.len() {
            0 => 0,
            1 => u64::from(bytes[0]),
            len => match self {
                Endian::Little => LittleEndian::read_uint(bytes, len.min(8)),
                Endian::Big => BigEndian::read_uint(bytes, len.min(8)),
            },
        }
    }

    /// Encode `value` as eight bytes in this order.
    pub fn u64_bytes(self, value: u64) -> [u8; 8]
    {
        let mut buf = [0u8; 8];
        match self {
            Endian::Little => LittleEndian::write_u64(&mut buf, value),
            Endian::Big => BigEndian::write_u64(&mut buf, value),
        }
        buf
    }

    /// Encode `value` as four bytes in this order.
    pub fn u32_bytes(self, value: u32) -> [u8; 4]
    {
        let mut buf = [0u8; 4];
        match self {
            Endian::Little => LittleEndian::write_u32(&mut buf, value),
            Endian::Big => BigEndian::write_u32(&mut buf, value),
        }
        buf
    }
}

/// Byte-addressable view of a target image
///
/// Implementations must be shareable between threads; a session may be
/// driven from any thread, though walking itself is single-threaded.
///
/// Every read may block on I/O. Callers must not hold locks across reads.
pub trait MemoryAccessor: Send + Sync
{
    /// Read exactly `length` bytes at `address`.
    ///
    /// ## Errors
    ///
    /// `MemoryFault` if any byte of the range is unavailable.
    fn read_bytes(&self, address: Address, length: usize) -> SiftResult<Vec<u8>>;

    /// Find the first occurrence of `pattern` at or after `start` whose
    /// address is a multiple of `alignment`.
    ///
    /// Returns `Ok(None)` when the pattern does not occur again.
    fn find_pattern(&self, pattern: &[u8], alignment: u64, start: Address) -> SiftResult<Option<Address>>;

    /// Byte order of the target.
    fn byte_order(&self) -> Endian;

    /// Read one byte.
    fn read_u8(&self, address: Address) -> SiftResult<u8>
    {
        let bytes = self.read_bytes(address, 1)?;
        Ok(bytes[0])
    }

    /// Read a `u16` in target byte order.
    fn read_u16(&self, address: Address) -> SiftResult<u16>
    {
        let bytes = self.read_bytes(address, 2)?;
        Ok(self.byte_order().u16(&bytes))
    }

    /// Read a `u32` in target byte order.
    fn read_u32(&self, address: Address) -> SiftResult<u32>
    {
        let bytes = self.read_bytes(address, 4)?;
        Ok(self.byte_order().u32(&bytes))
    }

    /// Read an `i32` in target byte order.
    fn read_i32(&self, address: Address) -> SiftResult<i32>
    {
        self.read_u32(address).map(|value| value as i32)
    }

    /// Read a `u64` in target byte order.
    fn read_u64(&self, address: Address) -> SiftResult<u64>
    {
        let bytes = self.read_bytes(address, 8)?;
        Ok(self.byte_order().u64(&bytes))
    }

    /// Read an unsigned integer `width` bytes wide (1 to 8).
    fn read_uint(&self, address: Address, width: usize) -> SiftResult<u64>
    {
        if width == 0 || width > 8 {
            return Err(SiftError::IllegalState(format!("unsupported integer width {width}")));
        }
        let bytes = self.read_bytes(address, width)?;
        Ok(self.byte_order().uint(&bytes))
    }

    /// Read a pointer `width` bytes wide.
    fn read_pointer(&self, address: Address, width: usize) -> SiftResult<Address>
    {
        self.read_uint(address, width).map(Address::from)
    }

    /// Read a length-prefixed UTF-8 record: a `u16` byte count followed by the bytes.
    ///
    /// Invalid sequences are replaced rather than rejected; names in a damaged
    /// image are still worth showing.
    fn read_utf8(&self, address: Address) -> SiftResult<String>
    {
        let length = self.read_u16(address)?;
        let bytes = self.read_bytes(address + 2, usize::from(length))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read a NUL-terminated string of at most [`MAX_C_STRING`] bytes.
    ///
    /// Reads byte by byte so a string ending just before unmapped memory is
    /// still recovered.
    fn read_c_string(&self, address: Address) -> SiftResult<String>
    {
        let mut bytes = Vec::new();
        let mut cursor = address;
        while bytes.len() < MAX_C_STRING {
            let byte = self.read_u8(cursor)?;
            if byte == 0 {
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.push(byte);
            cursor = cursor + 1;
        }
        Err(SiftError::corrupt(address, "unterminated string"))
    }
}

impl<T: MemoryAccessor + ?Sized> MemoryAccessor for std::sync::Arc<T>
{
    fn read_bytes(&self, address: Address, length: usize) -> SiftResult<Vec<u8>>
    {
        (**self).read_bytes(address, length)
    }

    fn find_pattern(&self, pattern: &[u8], alignment: u64, start: Address) -> SiftResult<Option<Address>>
    {
        (**self).find_pattern(pattern, alignment, start)
    }

    fn byte_order(&self) -> Endian
    {
        (**self).byte_order()
    }
}
