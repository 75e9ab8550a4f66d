//! Object model capability.
//!
//! Heap scanning needs four facts about an object: how big it is, whether it
//! is live, and what its lock word says (nothing, a flat lock, or an inflated
//! monitor). How those facts are encoded belongs to the runtime's object
//! model, so the scanner asks through [`ObjectModel`] and never decodes
//! headers itself.

use std::sync::Arc;

use crate::error::{SiftError, SiftResult};
use crate::memory::MemoryAccessor;
use crate::pointer::TypedHandle;
use crate::schema::{ImageSchema, StructLayout};
use crate::types::Address;

/// Default bit of `Object.flags` marking a live object.
pub const DEFAULT_OBJECT_LIVE_FLAG: u64 = 0x1;

/// Default bit of `Object.lockword` marking an inflated monitor.
pub const DEFAULT_LOCK_INFLATED_FLAG: u64 = 0x1;

/// Facts about heap objects the scanner relies on
pub trait ObjectModel: Send + Sync
{
    /// Total size of the object in bytes, header included.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the header cannot be read.
    fn object_size(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<u64>;

    /// Whether the object is live.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the header cannot be read.
    fn is_live(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<bool>;

    /// The object's lock word when it holds a flat (non-inflated) lock.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the lock word cannot be read.
    fn flat_lock_word(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<Option<u64>>;

    /// The monitor the object's lock word points at, if it is inflated.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the lock word cannot be read.
    fn inflated_monitor(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<Option<Address>>;
}

/// Object model reading the image's `Object` header layout
///
/// `Object.size` is the total size, bit `OBJECT_LIVE_FLAG` of `Object.flags`
/// marks live objects, and a non-zero `Object.lockword` is either a flat
/// lock or, with `LOCK_INFLATED_FLAG` set, a tagged monitor pointer.
#[derive(Debug, Clone)]
pub struct HeaderObjectModel
{
    layout: Arc<StructLayout>,
    live_flag: u64,
    inflated_flag: u64,
}

impl HeaderObjectModel
{
    /// Build the model from the image's `Object` layout and flag constants.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image has no `Object` layout.
    pub fn from_schema(schema: &ImageSchema) -> SiftResult<Self>
    {
        Ok(Self {
            layout: schema.structure("Object")?,
            live_flag: schema.constant_or("OBJECT_LIVE_FLAG", DEFAULT_OBJECT_LIVE_FLAG),
            inflated_flag: schema.constant_or("LOCK_INFLATED_FLAG", DEFAULT_LOCK_INFLATED_FLAG),
        })
    }

    fn header(&self, object: Address) -> TypedHandle
    {
        TypedHandle::new(self.layout.clone(), object)
    }

    fn lock_word(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<u64>
    {
        self.header(object).uint(memory, "lockword")
    }
}

impl ObjectModel for HeaderObjectModel
{
    fn object_size(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<u64>
    {
        let size = self.header(object).uint(memory, "size")?;
        if size < self.layout.size() {
            return Err(SiftError::corrupt(object, format!("object size {size} is smaller than its header")));
        }
        Ok(size)
    }

    fn is_live(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<bool>
    {
        Ok(self.header(object).uint(memory, "flags")? & self.live_flag != 0)
    }

    fn flat_lock_word(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<Option<u64>>
    {
        let word = self.lock_word(memory, object)?;
        Ok((word != 0 && word & self.inflated_flag == 0).then_some(word))
    }

    fn inflated_monitor(&self, memory: &dyn MemoryAccessor, object: Address) -> SiftResult<Option<Address>>
    {
        let word = self.lock_word(memory, object)?;
        Ok((word & self.inflated_flag != 0).then(|| Address::from(word & !self.inflated_flag)))
    }
}
