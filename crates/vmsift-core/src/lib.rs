//! # vmsift-core
//!
//! Fault-tolerant structure walkers for postmortem and live images of a
//! managed runtime.
//!
//! Every read goes through a [`MemoryAccessor`](memory::MemoryAccessor), so
//! the same walkers work over a core file, a live process, or a synthetic
//! image built in memory. Structure layouts and constants come from an
//! [`ImageSchema`](schema::ImageSchema) describing the target build.
//!
//! This crate provides:
//! - Generic walkers over arrays, linked chains, segment lists and pools
//! - Class tables, class records and native memory categories
//! - Line-number and local-variable table decoding
//! - Heap scanning with flat-monitor harvesting and monitor reconciliation
//! - Allocation-tag scanning
//!
//! ## Corrupt data
//!
//! Target images are frequently damaged. Walkers never panic on bad data:
//! they skip what they can, stop where they must, and report every problem
//! to the listeners registered on the session's
//! [`EventRegistry`](events::EventRegistry).

pub mod config;
pub mod debuginfo;
pub mod error;
pub mod events;
pub mod heap;
pub mod memory;
pub mod memtag;
pub mod metadata;
pub mod monitors;
pub mod pointer;
pub mod prelude;
pub mod schema;
pub mod session;
pub mod types;
pub mod walk;

// Re-export commonly used types
pub use config::SessionConfig;
pub use error::{SiftError, SiftResult};
pub use session::AnalysisSession;
pub use types::Address;
