//! # Typed Address Handles
//!
//! An address paired with the layout of the structure found there.
//!
//! Handles never own target bytes. Every field read goes back to the
//! [`MemoryAccessor`], and any failure (unmapped memory, a field the layout
//! does not have, a NULL handle) surfaces as [`SiftError::CorruptData`] naming
//! the structure and field.
//!
//! Self-relative references are signed 32-bit offsets from their own storage
//! address, with 0 meaning NULL. Resolving one is address arithmetic only; the
//! target is not read until someone dereferences the result.

use std::fmt;
use std::sync::Arc;

use crate::error::{SiftError, SiftResult};
use crate::memory::MemoryAccessor;
use crate::schema::{FieldLayout, StructLayout};
use crate::types::Address;

/// Resolve a self-relative offset stored at `storage`.
///
/// Returns `Ok(None)` for the NULL encoding (offset 0).
///
/// ## Errors
///
/// `CorruptData` if the target falls outside the address space.
///
/// ```rust
/// use vmsift_core::pointer::resolve_self_relative;
/// use vmsift_core::types::Address;
///
/// let storage = Address::from(0x1000);
/// assert_eq!(resolve_self_relative(storage, 0x20)?, Some(Address::from(0x1020)));
/// assert_eq!(resolve_self_relative(storage, -0x10)?, Some(Address::from(0xff0)));
/// assert_eq!(resolve_self_relative(storage, 0)?, None);
/// # Ok::<(), vmsift_core::error::SiftError>(())
/// ```
pub fn resolve_self_relative(storage: Address, offset: i32) -> SiftResult<Option<Address>>
{
    if offset == 0 {
        return Ok(None);
    }
    storage
        .checked_offset(i64::from(offset))
        .map(Some)
        .ok_or_else(|| SiftError::corrupt(storage, format!("self-relative offset {offset} leaves the address space")))
}

/// Read and resolve the self-relative reference stored at `storage`.
///
/// ## Errors
///
/// `CorruptData` if the offset cannot be read or resolves outside the
/// address space.
pub fn read_self_relative(memory: &dyn MemoryAccessor, storage: Address) -> SiftResult<Option<Address>>
{
    let offset = memory
        .read_i32(storage)
        .map_err(|err| SiftError::corrupt(storage, format!("unreadable self-relative reference: {err}")))?;
    resolve_self_relative(storage, offset)
}

/// Address of a structure plus its layout
#[derive(Clone, PartialEq, Eq)]
pub struct TypedHandle
{
    address: Address,
    layout: Arc<StructLayout>,
}

impl TypedHandle
{
    /// Bind `layout` to `address`.
    pub fn new(layout: Arc<StructLayout>, address: Address) -> Self
    {
        Self { address, layout }
    }

    /// Address of the structure.
    pub fn address(&self) -> Address
    {
        self.address
    }

    /// Layout the handle reads through.
    pub fn layout(&self) -> &Arc<StructLayout>
    {
        &self.layout
    }

    /// Whether the handle is the target NULL pointer.
    pub fn is_null(&self) -> bool
    {
        self.address.is_null()
    }

    /// First byte after the structure.
    pub fn end(&self) -> Address
    {
        self.address + self.layout.size()
    }

    /// Handle for the same layout `index` elements further on.
    ///
    /// Used for structures laid out back to back in an inline array.
    #[must_use]
    pub fn element(&self, index: u64) -> Self
    {
        Self::new(self.layout.clone(), self.address + index.wrapping_mul(self.layout.size()))
    }

    fn resolve(&self, field: &str) -> SiftResult<(FieldLayout, Address)>
    {
        if self.is_null() {
            return Err(SiftError::corrupt(
                self.address,
                format!("NULL dereference of {}.{field}", self.layout.name()),
            ));
        }
        let layout = self
            .layout
            .field(field)
            .map_err(|err| SiftError::corrupt(self.address, err.to_string()))?;
        Ok((layout, self.address + layout.offset))
    }

    /// Address of a field inside the structure.
    ///
    /// ## Errors
    ///
    /// `CorruptData` for a NULL handle or an unknown field.
    pub fn field_address(&self, field: &str) -> SiftResult<Address>
    {
        self.resolve(field).map(|(_, address)| address)
    }

    /// Read an unsigned scalar field, using the width recorded in the layout.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the handle is NULL, the field is unknown, or the read fails.
    pub fn uint(&self, memory: &dyn MemoryAccessor, field: &str) -> SiftResult<u64>
    {
        let (layout, address) = self.resolve(field)?;
        memory.read_uint(address, layout.size).map_err(|err| {
            SiftError::corrupt(
                address,
                format!("unable to read {}.{field}: {err}", self.layout.name()),
            )
        })
    }

    /// Read a `u32` field (narrowing wider fields).
    ///
    /// ## Errors
    ///
    /// Same as [`uint`](Self::uint).
    pub fn u32(&self, memory: &dyn MemoryAccessor, field: &str) -> SiftResult<u32>
    {
        self.uint(memory, field).map(|value| value as u32)
    }

    /// Read a pointer field.
    ///
    /// ## Errors
    ///
    /// Same as [`uint`](Self::uint).
    pub fn pointer(&self, memory: &dyn MemoryAccessor, field: &str) -> SiftResult<Address>
    {
        self.uint(memory, field).map(Address::from)
    }

    /// Read a pointer field and bind it to another layout.
    ///
    /// ## Errors
    ///
    /// Same as [`uint`](Self::uint).
    pub fn follow(&self, memory: &dyn MemoryAccessor, field: &str, layout: Arc<StructLayout>) -> SiftResult<TypedHandle>
    {
        self.pointer(memory, field).map(|address| TypedHandle::new(layout, address))
    }

    /// Read and resolve a self-relative reference field.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the field cannot be read or resolves outside the address space.
    pub fn self_relative(&self, memory: &dyn MemoryAccessor, field: &str) -> SiftResult<Option<Address>>
    {
        let address = self.field_address(field)?;
        read_self_relative(memory, address)
    }
}

impl fmt::Debug for TypedHandle
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}@{}", self.layout.name(), self.address)
    }
}
