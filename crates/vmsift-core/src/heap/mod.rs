//! # Heap
//!
//! Object heap scanning and the per-region flat-monitor cache.
//!
//! ## Modules
//!
//! - [`object_model`]: how object headers are interpreted
//! - [`scan`]: the section state machine over a region's objects
//! - [`cache`]: flat monitors remembered per region

pub mod cache;
pub mod object_model;
pub mod scan;

pub use cache::RegionMonitorCache;
pub use object_model::{HeaderObjectModel, ObjectModel};
pub use scan::{HeapScanSink, HeapScanner, NullSink, RegionScan, ScanState};
