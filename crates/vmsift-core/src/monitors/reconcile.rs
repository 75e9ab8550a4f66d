//! Reconciliation of pool and flat monitors.
//!
//! Pool entries come first, in pool order. Entries bound to an object are
//! reported only when that object's lock word is actually inflated; a stale
//! binding is skipped. Flat monitors from the region cache follow, minus any
//! object already reported through an inflated monitor.

use std::collections::HashSet;

use crate::error::SiftResult;
use crate::heap::{HeapScanner, ObjectModel};
use crate::session::AnalysisSession;
use crate::walk::{pump, Step, StepWalker};

use super::pool::{MonitorPoolWalker, PoolMonitor};
use super::{FlatMonitor, MonitorIdentity, ObjectMonitor};

enum Phase<'a>
{
    Pool(MonitorPoolWalker<'a>),
    Flat(std::vec::IntoIter<FlatMonitor>),
    Done,
}

/// Yields every monitor in the image exactly once
pub struct MonitorWalker<'a>
{
    session: &'a AnalysisSession,
    model: &'a dyn ObjectModel,
    phase: Phase<'a>,
    seen: HashSet<MonitorIdentity>,
}

impl<'a> MonitorWalker<'a>
{
    /// Walk the VM's monitor pool, then the heap's flat monitors.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` when the session has no object model or the image
    /// lacks the monitor pool layouts.
    pub fn new(session: &'a AnalysisSession) -> SiftResult<Self>
    {
        Ok(Self {
            session,
            model: session.object_model()?,
            phase: Phase::Pool(MonitorPoolWalker::for_vm(session)?),
            seen: HashSet::new(),
        })
    }

    fn classify(&self, entry: &PoolMonitor) -> SiftResult<Option<ObjectMonitor>>
    {
        let Some(object) = entry.object else {
            return Ok(Some(ObjectMonitor::System {
                monitor: entry.address(),
            }));
        };
        // The lock word must point back at this entry, not merely be inflated.
        let inflated = self.model.inflated_monitor(self.session.memory(), object)?;
        Ok(inflated
            .filter(|monitor| *monitor == entry.address())
            .map(|monitor| ObjectMonitor::Inflated { monitor, object }))
    }

    fn start_flat_phase(&mut self) -> SiftResult<()>
    {
        self.phase = Phase::Done;
        let flats = HeapScanner::new(self.session).all_flat_monitors()?;
        tracing::debug!(count = flats.len(), "reconciling flat monitors");
        self.phase = Phase::Flat(flats.into_iter());
        Ok(())
    }
}

impl<'a> StepWalker<'a> for MonitorWalker<'a>
{
    type Item = ObjectMonitor;

    const NAME: &'static str = "MonitorWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<ObjectMonitor>
    {
        loop {
            match &mut self.phase {
                Phase::Pool(pool) => match pool.step() {
                    Step::Item(entry) => match self.classify(&entry) {
                        Ok(Some(monitor)) => {
                            if self.seen.insert(monitor.identity()) {
                                return Step::Item(monitor);
                            }
                        }
                        Ok(None) => {
                            tracing::trace!(monitor = %entry.address(), "object monitor is not inflated");
                        }
                        Err(err) => return Step::Corrupt(err),
                    },
                    Step::Corrupt(err) => return Step::Corrupt(err),
                    Step::End => {
                        if let Err(err) = self.start_flat_phase() {
                            return Step::Fatal(err);
                        }
                    }
                    Step::Fatal(err) => {
                        // Losing the pool does not lose the heap's flat monitors.
                        self.session.raise(err, true);
                        if let Err(err) = self.start_flat_phase() {
                            return Step::Fatal(err);
                        }
                    }
                },
                Phase::Flat(flats) => match flats.next() {
                    Some(flat) => {
                        let monitor = ObjectMonitor::Flat(flat);
                        if self.seen.insert(monitor.identity()) {
                            return Step::Item(monitor);
                        }
                    }
                    None => {
                        self.phase = Phase::Done;
                        return Step::End;
                    }
                },
                Phase::Done => return Step::End,
            }
        }
    }
}

impl Iterator for MonitorWalker<'_>
{
    type Item = ObjectMonitor;

    fn next(&mut self) -> Option<ObjectMonitor>
    {
        pump(self)
    }
}
