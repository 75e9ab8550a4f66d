//! Common module for library exports

pub use crate::config::SessionConfig;
pub use crate::error::{SiftError, SiftResult};
pub use crate::events::{CorruptDataEvent, CorruptDataListener, EventRegistry};
pub use crate::memory::{Endian, MemoryAccessor, SnapshotMemory};
pub use crate::schema::{ImageSchema, StructLayout};
pub use crate::session::AnalysisSession;
pub use crate::types::{Address, HeapRegion, SegmentType};
pub use crate::walk::Advance;
