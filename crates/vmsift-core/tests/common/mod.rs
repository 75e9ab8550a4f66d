//! Synthetic 64-bit little-endian images for integration tests.
//!
//! [`ImageBuilder`] bump-allocates zeroed structures in one captured range
//! and writes their fields by name through the layouts of [`schema`].

#![allow(dead_code)]

use std::sync::Arc;

use vmsift_core::config::SessionConfig;
use vmsift_core::events::CollectingListener;
use vmsift_core::memory::{Endian, SnapshotMemory};
use vmsift_core::schema::{ImageSchema, ImageSchemaBuilder, StructLayout};
use vmsift_core::session::AnalysisSession;
use vmsift_core::types::{Address, SegmentType};

pub const IMAGE_BASE: u64 = 0x10_0000;
pub const MONITOR_POOL_SIZE: u64 = 4;

/// Layouts of every structure the walkers read.
pub fn schema_builder() -> ImageSchemaBuilder
{
    ImageSchema::builder(8)
        .structure(
            StructLayout::new("JavaVM", 40)
                .with_field("memorySegments", 0, 8)
                .with_field("classMemorySegments", 8, 8)
                .with_field("portGlobals", 16, 8)
                .with_field("threadLibrary", 24, 8),
        )
        .structure(StructLayout::new("MemorySegmentList", 8).with_field("nextSegment", 0, 8))
        .structure(
            StructLayout::new("MemorySegment", 48)
                .with_field("type", 0, 8)
                .with_field("heapBase", 8, 8)
                .with_field("heapAlloc", 16, 8)
                .with_field("nextSegment", 24, 8)
                .with_field("nextSegmentInClassLoader", 32, 8)
                .with_field("classLoader", 40, 8),
        )
        .structure(
            StructLayout::new("ClassLoader", 16)
                .with_field("classSegments", 0, 8)
                .with_field("classHashTable", 8, 8),
        )
        .structure(
            StructLayout::new("HashTable", 24)
                .with_field("table", 0, 8)
                .with_field("tableSize", 8, 8)
                .with_field("listNodePool", 16, 8),
        )
        .structure(
            StructLayout::new("Pool", 24)
                .with_field("elementSize", 0, 8)
                .with_field("elementsPerBlock", 8, 8)
                .with_field("firstBlock", 16, 8),
        )
        .structure(
            StructLayout::new("PoolBlock", 24)
                .with_field("nextBlock", 0, 8)
                .with_field("firstElement", 8, 8)
                .with_field("usedBitmap", 16, 4),
        )
        .structure(StructLayout::new("Class", 8).with_field("romClass", 0, 8))
        .structure(
            StructLayout::new("ClassRecord", 16)
                .with_field("romSize", 0, 4)
                .with_field("className", 4, 4),
        )
        .structure(
            StructLayout::new("Object", 24)
                .with_field("size", 0, 8)
                .with_field("flags", 8, 8)
                .with_field("lockword", 16, 8),
        )
        .structure(StructLayout::new("ThreadLibrary", 8).with_field("monitorPool", 0, 8))
        .structure(
            StructLayout::new("MonitorPoolBlock", 8)
                .with_field("next", 0, 8)
                .with_field("entries", 8, 40),
        )
        .structure(
            StructLayout::new("ThreadMonitor", 40)
                .with_field("flags", 0, 8)
                .with_field("userData", 8, 8)
                .with_field("owner", 16, 8)
                .with_field("count", 24, 8)
                .with_field("name", 32, 8),
        )
        .structure(
            StructLayout::new("MemoryCategory", 48)
                .with_field("name", 0, 8)
                .with_field("categoryCode", 8, 4)
                .with_field("liveBytes", 16, 8)
                .with_field("liveAllocations", 24, 8)
                .with_field("numberOfChildren", 32, 8)
                .with_field("children", 40, 8),
        )
        .structure(
            StructLayout::new("MemoryCategorySet", 16)
                .with_field("numberOfCategories", 0, 8)
                .with_field("categories", 8, 8),
        )
        .structure(
            StructLayout::new("PortLibraryGlobals", 160)
                .with_field("languageCategories", 0, 8)
                .with_field("omrCategories", 8, 8)
                .with_field("portLibraryCategory", 16, 48)
                .with_field("unknownCategory", 64, 48)
                .with_field("unusedSlabCategory", 112, 48),
        )
        .structure(
            StructLayout::new("MemTag", 32)
                .with_field("eyeCatcher", 0, 4)
                .with_field("sumCheck", 4, 4)
                .with_field("allocSize", 8, 8)
                .with_field("callSite", 16, 8)
                .with_field("category", 24, 8),
        )
        .structure(
            StructLayout::new("MethodDebugInfo", 12)
                .with_field("lineNumberCount", 0, 4)
                .with_field("varInfoCount", 4, 4)
                .with_field("lineNumbersCompressedSize", 8, 4),
        )
        .structure(
            StructLayout::new("LineNumber", 8)
                .with_field("location", 0, 4)
                .with_field("lineNumber", 4, 4),
        )
        .structure(
            StructLayout::new("VariableInfo", 24)
                .with_field("slotNumber", 0, 4)
                .with_field("startVisibility", 4, 4)
                .with_field("visibilityLength", 8, 4)
                .with_field("name", 12, 4)
                .with_field("signature", 16, 4)
                .with_field("genericSignature", 20, 4),
        )
        .constant("MONITOR_POOL_SIZE", MONITOR_POOL_SIZE)
}

/// Schema with every layout and default algorithm versions.
pub fn schema() -> ImageSchema
{
    schema_builder().build()
}

/// Bump allocator over one captured range
pub struct ImageBuilder
{
    schema: ImageSchema,
    bytes: Vec<u8>,
}

impl ImageBuilder
{
    pub fn new() -> Self
    {
        Self::with_schema(schema())
    }

    pub fn with_schema(schema: ImageSchema) -> Self
    {
        Self {
            schema,
            bytes: Vec::new(),
        }
    }

    pub fn schema(&self) -> &ImageSchema
    {
        &self.schema
    }

    /// Zeroed, 8-aligned block of `size` bytes.
    pub fn alloc(&mut self, size: u64) -> Address
    {
        let start = (self.bytes.len() + 7) & !7;
        self.bytes.resize(start + size as usize, 0);
        Address::from(IMAGE_BASE + start as u64)
    }

    /// Zeroed instance of a structure.
    pub fn alloc_struct(&mut self, structure: &str) -> Address
    {
        let size = self.schema.structure(structure).unwrap().size();
        self.alloc(size)
    }

    fn offset(&self, address: Address) -> usize
    {
        (address.value() - IMAGE_BASE) as usize
    }

    pub fn put_bytes(&mut self, address: Address, bytes: &[u8])
    {
        let offset = self.offset(address);
        self.bytes[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn put_u32(&mut self, address: Address, value: u32)
    {
        self.put_bytes(address, &value.to_le_bytes());
    }

    pub fn put_u64(&mut self, address: Address, value: u64)
    {
        self.put_bytes(address, &value.to_le_bytes());
    }

    pub fn put_i32(&mut self, address: Address, value: i32)
    {
        self.put_bytes(address, &value.to_le_bytes());
    }

    /// Self-relative reference stored at `storage` pointing at `target`.
    pub fn put_self_relative(&mut self, storage: Address, target: Address)
    {
        let offset = target.value() as i64 - storage.value() as i64;
        self.put_i32(storage, offset as i32);
    }

    /// Address of a field of the structure at `address`.
    pub fn field_address(&self, structure: &str, address: Address, field: &str) -> Address
    {
        address + self.schema.structure(structure).unwrap().field(field).unwrap().offset
    }

    /// Write `value` into a field, using the field's width.
    pub fn set(&mut self, structure: &str, address: Address, field: &str, value: u64)
    {
        let layout = self.schema.structure(structure).unwrap();
        let field = layout.field(field).unwrap();
        let at = address + field.offset;
        match field.size {
            4 => self.put_u32(at, value as u32),
            _ => self.put_u64(at, value),
        }
    }

    /// Write an address into a field.
    pub fn set_ptr(&mut self, structure: &str, address: Address, field: &str, value: Address)
    {
        self.set(structure, address, field, value.value());
    }

    /// NUL-terminated string.
    pub fn c_string(&mut self, value: &str) -> Address
    {
        let address = self.alloc(value.len() as u64 + 1);
        self.put_bytes(address, value.as_bytes());
        address
    }

    /// Length-prefixed UTF-8 record.
    pub fn utf8(&mut self, value: &str) -> Address
    {
        let address = self.alloc(value.len() as u64 + 2);
        self.put_bytes(address, &(value.len() as u16).to_le_bytes());
        self.put_bytes(address + 2, value.as_bytes());
        address
    }

    /// Array of pointer slots.
    pub fn pointer_array(&mut self, slots: &[Address]) -> Address
    {
        let address = self.alloc(8 * slots.len().max(1) as u64);
        for (index, slot) in slots.iter().enumerate() {
            self.put_u64(address + 8 * index as u64, slot.value());
        }
        address
    }

    /// Segment of `data_size` bytes with its own data block.
    ///
    /// Returns `(segment, base)`; the allocation pointer starts at `base + used`.
    pub fn segment(&mut self, segment_type: SegmentType, data_size: u64, used: u64) -> (Address, Address)
    {
        let segment = self.alloc_struct("MemorySegment");
        let base = self.alloc(data_size);
        self.set("MemorySegment", segment, "type", segment_type.bits());
        self.set_ptr("MemorySegment", segment, "heapBase", base);
        self.set_ptr("MemorySegment", segment, "heapAlloc", base + used);
        (segment, base)
    }

    /// Link `segments` through `nextSegment` behind a new segment list.
    pub fn segment_list(&mut self, segments: &[Address]) -> Address
    {
        let list = self.alloc_struct("MemorySegmentList");
        let head = segments.first().copied().unwrap_or(Address::NULL);
        self.set_ptr("MemorySegmentList", list, "nextSegment", head);
        for pair in segments.windows(2) {
            self.set_ptr("MemorySegment", pair[0], "nextSegment", pair[1]);
        }
        list
    }

    pub fn memory(&self) -> SnapshotMemory
    {
        let mut bytes = self.bytes.clone();
        if bytes.is_empty() {
            bytes.push(0);
        }
        SnapshotMemory::new(Endian::Little)
            .with_range(Address::from(IMAGE_BASE), bytes)
            .unwrap()
    }

    /// Session over the image with a collecting listener attached.
    pub fn session(&self, vm: Option<Address>) -> (AnalysisSession, Arc<CollectingListener>)
    {
        self.session_with(vm, SessionConfig::default())
    }

    pub fn session_with(&self, vm: Option<Address>, config: SessionConfig) -> (AnalysisSession, Arc<CollectingListener>)
    {
        let collector = Arc::new(CollectingListener::new());
        let mut builder = AnalysisSession::builder(Arc::new(self.memory()), self.schema.clone())
            .config(config)
            .listener(collector.clone());
        if let Some(vm) = vm {
            builder = builder.vm(vm);
        }
        (builder.build(), collector)
    }
}
