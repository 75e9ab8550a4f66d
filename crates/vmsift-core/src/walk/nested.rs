//! Records nested inside the segments of a chain.
//!
//! [`SegmentRecordWalker`] composes a [`SegmentWalker`] with a per-segment
//! [`RecordCursor`]. Corruption inside one segment abandons the rest of that
//! segment and moves on to the next one; only a broken segment chain ends
//! the walk.

use super::segment::{MemorySegment, SegmentWalker};
use super::{pump, Step, StepWalker};
use crate::error::SiftResult;
use crate::session::AnalysisSession;

/// Forward-only cursor over the records of one segment
pub trait RecordCursor
{
    /// Record type
    type Item;

    /// Next record, or `None` when the segment has no more.
    ///
    /// ## Errors
    ///
    /// Any error abandons the rest of the segment.
    fn next_record(&mut self, session: &AnalysisSession) -> SiftResult<Option<Self::Item>>;
}

/// Opens a [`RecordCursor`] for each segment
pub trait SegmentScanner
{
    /// Cursor type
    type Cursor: RecordCursor;

    /// Cursor for `segment`, or `None` to skip the segment entirely.
    ///
    /// ## Errors
    ///
    /// Any error skips the segment with a recoverable event.
    fn open(&mut self, session: &AnalysisSession, segment: &MemorySegment) -> SiftResult<Option<Self::Cursor>>;

    /// Called once after the last segment of the chain.
    ///
    /// ## Errors
    ///
    /// An error is reported as fatal to the walk.
    fn finish(&mut self, _session: &AnalysisSession) -> SiftResult<()>
    {
        Ok(())
    }
}

/// Yields every record of every segment in a chain
pub struct SegmentRecordWalker<'a, S: SegmentScanner>
{
    segments: SegmentWalker<'a>,
    scanner: S,
    current: Option<S::Cursor>,
    finished: bool,
}

impl<'a, S: SegmentScanner> SegmentRecordWalker<'a, S>
{
    /// Scan each segment produced by `segments` with `scanner`.
    pub fn new(segments: SegmentWalker<'a>, scanner: S) -> Self
    {
        Self {
            segments,
            scanner,
            current: None,
            finished: false,
        }
    }

    /// The per-segment scanner.
    pub fn scanner(&self) -> &S
    {
        &self.scanner
    }
}

impl<'a, S: SegmentScanner> StepWalker<'a> for SegmentRecordWalker<'a, S>
{
    type Item = <S::Cursor as RecordCursor>::Item;

    const NAME: &'static str = "SegmentRecordWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.segments.session()
    }

    fn step(&mut self) -> Step<Self::Item>
    {
        if self.finished {
            return Step::End;
        }
        let session = self.segments.session();
        loop {
            if let Some(cursor) = self.current.as_mut() {
                match cursor.next_record(session) {
                    Ok(Some(record)) => return Step::Item(record),
                    Ok(None) => self.current = None,
                    Err(err) => {
                        self.current = None;
                        return Step::Corrupt(err);
                    }
                }
            }

            // The segment walker reports its own corruption.
            let Some(segment) = self.segments.next() else {
                self.finished = true;
                return match self.scanner.finish(session) {
                    Ok(()) => Step::End,
                    Err(err) => Step::Fatal(err),
                };
            };
            match self.scanner.open(session, &segment) {
                Ok(cursor) => self.current = cursor,
                Err(err) => return Step::Corrupt(err),
            }
        }
    }
}

impl<S: SegmentScanner> Iterator for SegmentRecordWalker<'_, S>
{
    type Item = <S::Cursor as RecordCursor>::Item;

    fn next(&mut self) -> Option<Self::Item>
    {
        pump(self)
    }
}
