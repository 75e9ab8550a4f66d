//! # Object Monitors
//!
//! Monitors come in two places. A *flat* monitor is a lock word held in an
//! object's header and can only be found by scanning the heap. A *pool*
//! monitor lives in the thread library's monitor pool; it is either bound to
//! an object whose lock word has been inflated to point at it, or a system
//! monitor with no object at all.
//!
//! [`MonitorWalker`] reconciles both sources into one sequence where every
//! monitor appears exactly once.

pub mod pool;
pub mod reconcile;

use std::fmt;

pub use pool::{MonitorPoolWalker, PoolMonitor};
pub use reconcile::MonitorWalker;

use crate::types::Address;

/// A lock held in an object header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlatMonitor
{
    /// Object whose header holds the lock
    pub object: Address,
    /// Raw lock word
    pub lock_word: u64,
}

/// What a monitor is identified by for de-duplication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MonitorIdentity
{
    /// Monitors guarding an object
    Object(Address),
    /// Monitors with no object
    Monitor(Address),
}

/// A monitor found in the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectMonitor
{
    /// Lock word in an object header
    Flat(FlatMonitor),
    /// Pool monitor an object's lock word has been inflated to
    Inflated
    {
        /// The pool entry
        monitor: Address,
        /// The object it guards
        object: Address,
    },
    /// Pool monitor not bound to an object
    System
    {
        /// The pool entry
        monitor: Address,
    },
}

impl ObjectMonitor
{
    /// Identity used to report each monitor once.
    pub fn identity(&self) -> MonitorIdentity
    {
        match self {
            ObjectMonitor::Flat(flat) => MonitorIdentity::Object(flat.object),
            ObjectMonitor::Inflated { object, .. } => MonitorIdentity::Object(*object),
            ObjectMonitor::System { monitor } => MonitorIdentity::Monitor(*monitor),
        }
    }

    /// Object guarded by the monitor, if any.
    pub fn object(&self) -> Option<Address>
    {
        match self {
            ObjectMonitor::Flat(flat) => Some(flat.object),
            ObjectMonitor::Inflated { object, .. } => Some(*object),
            ObjectMonitor::System { .. } => None,
        }
    }

    /// Whether this is an inflated monitor.
    pub fn is_inflated(&self) -> bool
    {
        matches!(self, ObjectMonitor::Inflated { .. })
    }
}

impl fmt::Display for ObjectMonitor
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ObjectMonitor::Flat(flat) => write!(f, "flat monitor on {} (lock word 0x{:x})", flat.object, flat.lock_word),
            ObjectMonitor::Inflated { monitor, object } => write!(f, "inflated monitor {monitor} on {object}"),
            ObjectMonitor::System { monitor } => write!(f, "system monitor {monitor}"),
        }
    }
}
