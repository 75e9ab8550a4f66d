//! # Image Schema
//!
//! Structure layouts, constants, and algorithm versions describing one target
//! build.
//!
//! A runtime image embeds metadata describing its own structures: field
//! offsets and widths, build constants, and version numbers for encodings
//! that changed across releases. `ImageSchema` is the in-process form of that
//! metadata. Walkers never hard-code offsets; they look fields up by name here
//! and read them through a [`TypedHandle`](crate::pointer::TypedHandle).
//!
//! ## Example
//!
//! ```rust
//! use vmsift_core::schema::{ImageSchema, StructLayout};
//!
//! let schema = ImageSchema::builder(8)
//!     .structure(
//!         StructLayout::new("MemorySegment", 48)
//!             .with_field("type", 0, 8)
//!             .with_field("heapBase", 8, 8),
//!     )
//!     .constant("MONITOR_POOL_SIZE", 64)
//!     .version("LINE_NUMBER_TABLE_VERSION", 1)
//!     .build();
//!
//! assert_eq!(schema.structure("MemorySegment")?.field("heapBase")?.offset, 8);
//! assert_eq!(schema.algorithm_version("LOCAL_VARIABLE_TABLE_VERSION"), 0);
//! # Ok::<(), vmsift_core::error::SiftError>(())
//! ```

pub mod version;

use std::collections::HashMap;
use std::sync::Arc;

pub use version::VersionResolver;

use crate::error::{SiftError, SiftResult};

/// Offset and width of one structure field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout
{
    /// Byte offset from the start of the structure
    pub offset: u64,
    /// Width in bytes (1 to 8 for scalar fields)
    pub size: usize,
}

/// Layout of one target structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout
{
    name: String,
    size: u64,
    fields: HashMap<String, FieldLayout>,
}

impl StructLayout
{
    /// Create a layout with no fields.
    pub fn new(name: impl Into<String>, size: u64) -> Self
    {
        Self {
            name: name.into(),
            size,
            fields: HashMap::new(),
        }
    }

    /// Add a field (builder style).
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, offset: u64, size: usize) -> Self
    {
        self.fields.insert(name.into(), FieldLayout { offset, size });
        self
    }

    /// Structure name.
    pub fn name(&self) -> &str
    {
        &self.name
    }

    /// Total size of the structure in bytes.
    pub fn size(&self) -> u64
    {
        self.size
    }

    /// Look up a field.
    ///
    /// ## Errors
    ///
    /// `MissingField` if the layout has no such field.
    pub fn field(&self, name: &str) -> SiftResult<FieldLayout>
    {
        self.fields.get(name).copied().ok_or_else(|| SiftError::MissingField {
            structure: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Whether the layout has a field with this name.
    pub fn has_field(&self, name: &str) -> bool
    {
        self.fields.contains_key(name)
    }
}

/// Layouts, constants, and algorithm versions for one target build
#[derive(Debug, Clone)]
pub struct ImageSchema
{
    pointer_size: usize,
    structures: HashMap<String, Arc<StructLayout>>,
    constants: HashMap<String, u64>,
    versions: HashMap<String, u32>,
}

impl ImageSchema
{
    /// Start building a schema for a target with `pointer_size`-byte pointers.
    pub fn builder(pointer_size: usize) -> ImageSchemaBuilder
    {
        ImageSchemaBuilder {
            schema: ImageSchema {
                pointer_size,
                structures: HashMap::new(),
                constants: HashMap::new(),
                versions: HashMap::new(),
            },
        }
    }

    /// Width of a target pointer in bytes.
    pub fn pointer_size(&self) -> usize
    {
        self.pointer_size
    }

    /// Look up a structure layout.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the target build has no such structure.
    pub fn structure(&self, name: &str) -> SiftResult<Arc<StructLayout>>
    {
        self.structures
            .get(name)
            .cloned()
            .ok_or_else(|| SiftError::MissingStructure(name.to_string()))
    }

    /// Whether the schema has a layout for `name`.
    pub fn has_structure(&self, name: &str) -> bool
    {
        self.structures.contains_key(name)
    }

    /// Look up a build constant.
    ///
    /// ## Errors
    ///
    /// `MissingConstant` if the constant is not defined.
    pub fn constant(&self, name: &str) -> SiftResult<u64>
    {
        self.constants
            .get(name)
            .copied()
            .ok_or_else(|| SiftError::MissingConstant(name.to_string()))
    }

    /// Look up a build constant, falling back to `default`.
    pub fn constant_or(&self, name: &str, default: u64) -> u64
    {
        self.constants.get(name).copied().unwrap_or(default)
    }
}

impl VersionResolver for ImageSchema
{
    fn version_of(&self, name: &str) -> u32
    {
        self.versions.get(name).copied().unwrap_or(0)
    }
}

impl ImageSchema
{
    /// Resolve a named algorithm version (0 when the image does not record it).
    pub fn algorithm_version(&self, name: &str) -> u32
    {
        self.version_of(name)
    }
}

/// Builder for [`ImageSchema`]
#[derive(Debug, Clone)]
pub struct ImageSchemaBuilder
{
    schema: ImageSchema,
}

impl ImageSchemaBuilder
{
    /// Add a structure layout, replacing any layout with the same name.
    #[must_use]
    pub fn structure(mut self, layout: StructLayout) -> Self
    {
        self.schema
            .structures
            .insert(layout.name().to_string(), Arc::new(layout));
        self
    }

    /// Add a build constant.
    #[must_use]
    pub fn constant(mut self, name: impl Into<String>, value: u64) -> Self
    {
        self.schema.constants.insert(name.into(), value);
        self
    }

    /// Record an algorithm version.
    #[must_use]
    pub fn version(mut self, name: impl Into<String>, value: u32) -> Self
    {
        self.schema.versions.insert(name.into(), value);
        self
    }

    /// Finish building.
    pub fn build(self) -> ImageSchema
    {
        self.schema
    }
}
