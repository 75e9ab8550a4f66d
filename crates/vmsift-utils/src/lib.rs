//! # vmsift Utilities
//!
//! Logging setup shared by the vmsift workspace.
//!
//! The core crate only emits `tracing` events; programs embedding it call
//! one of the initialisers here to decide where those events go.

pub mod logging;

// Re-export commonly used logging functions for convenience
pub use logging::{
    dated_log_file, init_logging, init_logging_to_file, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
