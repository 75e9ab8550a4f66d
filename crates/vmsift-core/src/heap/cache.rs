//! Region-keyed flat-monitor cache.
//!
//! Flat monitors can only be found by scanning the heap, and scanning is the
//! most expensive thing a session does. Each region's flat monitors are
//! stored here once, when the scan of that region completes; later requests
//! take them from the cache. An entry is never replaced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::monitors::FlatMonitor;
use crate::types::HeapRegion;

/// Flat monitors per heap region, shareable between sessions
#[derive(Debug, Default)]
pub struct RegionMonitorCache
{
    regions: Mutex<HashMap<HeapRegion, Arc<[FlatMonitor]>>>,
}

impl RegionMonitorCache
{
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Flat monitors of `region`, if it has been scanned.
    pub fn get(&self, region: &HeapRegion) -> Option<Arc<[FlatMonitor]>>
    {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(region)
            .cloned()
    }

    /// Whether `region` has been scanned.
    pub fn contains(&self, region: &HeapRegion) -> bool
    {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(region)
    }

    /// Store the monitors of `region` unless another scan got there first.
    ///
    /// Returns the entry now in the cache.
    pub fn insert_if_absent(&self, region: HeapRegion, monitors: Vec<FlatMonitor>) -> Arc<[FlatMonitor]>
    {
        let mut regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        regions.entry(region).or_insert_with(|| monitors.into()).clone()
    }

    /// Number of regions cached.
    pub fn len(&self) -> usize
    {
        self.regions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no region has been cached.
    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}
