//! # Heap Region Scanning
//!
//! Objects in a region are laid out back to back from its base to its
//! allocation top. The scanner visits them in address order and groups them
//! into runs of live objects ("sections"), reporting each run's boundaries
//! and every object to a [`HeapScanSink`].
//!
//! ## States
//!
//! ```text
//! INIT --live--> OBJECT_LIVE --live--> SCANNING_LIVE --dead--> OBJECT_DEAD
//!  |                  ^                                          |
//!  +--dead--> SCANNING_DEAD <---------------dead-----------------+
//!                     |                                          |
//!                     +----------------live----> OBJECT_LIVE <---+
//! ```
//!
//! Entering `OBJECT_LIVE` opens a section at the object's address before the
//! live callback; entering `OBJECT_DEAD` closes the open section at the dead
//! object's address before the dead callback. After the last object the
//! state is `FINISHED` and one closing section end is reported: at the end
//! of the last object if it is live, at its own address if it is dead. A
//! region with no objects reports no sections.
//!
//! ## Flat monitors
//!
//! Every live object is asked for a flat lock word. The monitors found are
//! committed into the session's [`RegionMonitorCache`] when the region scan
//! ends, even when it ends early on corrupt data.
//!
//! [`RegionMonitorCache`]: super::cache::RegionMonitorCache

use std::sync::Arc;

use crate::error::{SiftError, SiftResult};
use crate::monitors::FlatMonitor;
use crate::session::AnalysisSession;
use crate::types::{Address, HeapRegion, SegmentType};
use crate::walk::SegmentWalker;

/// Position of the scanner within a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanState
{
    /// No object seen yet
    Init,
    /// The current object is live and opened a section
    ObjectLive,
    /// The current object is dead and closed a section
    ObjectDead,
    /// Inside a run of live objects
    ScanningLive,
    /// Inside a run of dead objects
    ScanningDead,
    /// The region has been fully scanned
    Finished,
}

impl ScanState
{
    /// Whether a live section is open.
    pub fn in_live_run(self) -> bool
    {
        matches!(self, ScanState::ObjectLive | ScanState::ScanningLive)
    }

    /// State after seeing an object, given the current state.
    pub fn next(self, live: bool) -> ScanState
    {
        match (self.in_live_run(), live) {
            (true, true) => ScanState::ScanningLive,
            (true, false) => ScanState::ObjectDead,
            (false, true) => ScanState::ObjectLive,
            (false, false) => ScanState::ScanningDead,
        }
    }
}

/// Receiver of heap scan callbacks
///
/// Every method defaults to doing nothing.
#[allow(unused_variables)]
pub trait HeapScanSink
{
    /// A run of live objects starts at `address`.
    fn section_start(&mut self, address: Address) {}

    /// The current run of live objects ends at `address` (exclusive).
    fn section_end(&mut self, address: Address) {}

    /// A live object.
    fn live_object(&mut self, object: Address, size: u64) {}

    /// A dead object.
    fn dead_object(&mut self, object: Address, size: u64) {}

    /// The scan stopped on corrupt data.
    fn corrupt_data(&mut self, error: &SiftError) {}
}

/// Sink ignoring every callback
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl HeapScanSink for NullSink {}

/// Result of scanning one region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionScan
{
    /// Region scanned
    pub region: HeapRegion,
    /// Objects visited
    pub objects: u64,
    /// Final state (`Finished` unless the scan stopped on corrupt data)
    pub state: ScanState,
    /// Flat monitors now cached for the region
    pub flat_monitors: Arc<[FlatMonitor]>,
}

/// Scans heap regions of one session
#[derive(Debug, Clone, Copy)]
pub struct HeapScanner<'a>
{
    session: &'a AnalysisSession,
}

impl<'a> HeapScanner<'a>
{
    /// Scanner reading through `session`.
    pub fn new(session: &'a AnalysisSession) -> Self
    {
        Self { session }
    }

    /// Heap regions of the VM: the allocated part of every object heap segment.
    ///
    /// ## Errors
    ///
    /// Fails if the session has no VM or its segment list cannot be located.
    pub fn regions(&self) -> SiftResult<Vec<HeapRegion>>
    {
        Ok(SegmentWalker::vm_segments(self.session, SegmentType::OBJECT_HEAP)?
            .map(|segment| segment.region())
            .collect())
    }

    /// Scan one region, reporting to `sink`, and cache its flat monitors.
    ///
    /// Corruption stops the scan of the region: an open section is closed
    /// at the corrupt address, the sink and the session's listeners are told,
    /// and the monitors found so far are still committed.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` when the session has no object model.
    pub fn scan_region(&self, region: HeapRegion, sink: &mut dyn HeapScanSink) -> SiftResult<RegionScan>
    {
        let model = self.session.object_model()?;
        let memory = self.session.memory();
        let _scope = self.session.events().enter("HeapScanner");
        tracing::trace!(region = %region, "scanning heap region");

        let mut state = ScanState::Init;
        let mut objects = 0u64;
        let mut flats = Vec::new();
        let mut cursor = region.base;
        let mut corrupted = false;

        while cursor < region.top {
            let outcome = model.object_size(memory, cursor).and_then(|size| {
                let end = cursor
                    .checked_add(size)
                    .filter(|end| *end <= region.top)
                    .ok_or_else(|| SiftError::corrupt(cursor, format!("object of {size} bytes overruns {region}")))?;
                Ok((size, end, model.is_live(memory, cursor)?))
            });
            let (size, end, live) = match outcome {
                Ok(object) => object,
                Err(err) => {
                    if state.in_live_run() {
                        sink.section_end(cursor);
                    }
                    sink.corrupt_data(&err);
                    self.session.raise(err, true);
                    corrupted = true;
                    break;
                }
            };

            let next = state.next(live);
            if live {
                if next == ScanState::ObjectLive {
                    tracing::trace!(start = %cursor, "live section");
                    sink.section_start(cursor);
                }
                sink.live_object(cursor, size);
                match model.flat_lock_word(memory, cursor) {
                    Ok(Some(lock_word)) => flats.push(FlatMonitor {
                        object: cursor,
                        lock_word,
                    }),
                    Ok(None) => {}
                    Err(err) => self.session.raise(err, false),
                }
            } else {
                if next == ScanState::ObjectDead {
                    sink.section_end(cursor);
                }
                sink.dead_object(cursor, size);
            }

            state = next;
            objects += 1;
            if end >= region.top {
                sink.section_end(if live { end } else { cursor });
            }
            cursor = end;
        }
        if !corrupted {
            state = ScanState::Finished;
        }

        let flat_monitors = self.session.monitor_cache().insert_if_absent(region, flats);
        Ok(RegionScan {
            region,
            objects,
            state,
            flat_monitors,
        })
    }

    /// Flat monitors of every heap region, scanning only uncached regions.
    ///
    /// ## Errors
    ///
    /// Fails if the regions cannot be listed or there is no object model.
    pub fn all_flat_monitors(&self) -> SiftResult<Vec<FlatMonitor>>
    {
        self.flat_monitors_in(&self.regions()?)
    }

    /// Flat monitors of `regions`, scanning only those not cached yet.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` when an uncached region needs scanning and the
    /// session has no object model.
    pub fn flat_monitors_in(&self, regions: &[HeapRegion]) -> SiftResult<Vec<FlatMonitor>>
    {
        let cache = self.session.monitor_cache();
        let mut monitors = Vec::new();
        for region in regions {
            let cached = match cache.get(region) {
                Some(cached) => cached,
                None => self.scan_region(*region, &mut NullSink)?.flat_monitors,
            };
            monitors.extend_from_slice(&cached);
        }
        Ok(monitors)
    }
}
