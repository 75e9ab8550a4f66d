//! # Types
//!
//! Small value types shared by every walker.
//!
//! These types describe the target image independently of how its bytes are
//! fetched, so walkers work the same over a core file and a live process.

pub mod address;
pub mod region;

// Re-export all public types
pub use address::Address;
pub use region::{HeapRegion, SegmentType};
