//! # Class Records
//!
//! Class metadata lives in segments tagged [`SegmentType::CLASS_METADATA`],
//! packed back to back. Every record starts with its own size in bytes, so
//! the walk reads a size, yields the record, and skips ahead by that size
//! until it reaches the segment's allocation pointer.
//!
//! A record claiming size zero would never advance; it ends the walk of its
//! segment with a recoverable event and the walk continues with the next
//! segment. The same happens when a segment yields more records than the
//! configured limit.

use std::sync::Arc;

use crate::error::{SiftError, SiftResult};
use crate::pointer::TypedHandle;
use crate::schema::StructLayout;
use crate::session::AnalysisSession;
use crate::types::{Address, SegmentType};
use crate::walk::{MemorySegment, RecordCursor, SegmentRecordWalker, SegmentScanner, SegmentWalker};

/// One class metadata record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassRecord
{
    handle: TypedHandle,
    size: u64,
}

impl ClassRecord
{
    /// Read the record at `handle`.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the size cannot be read or is zero.
    pub fn read(session: &AnalysisSession, handle: TypedHandle) -> SiftResult<Self>
    {
        let size = handle.uint(session.memory(), "romSize")?;
        if size == 0 {
            return Err(SiftError::corrupt(handle.address(), "class record with size 0"));
        }
        Ok(Self { handle, size })
    }

    /// Record of the runtime class at `class` (a `Class` handle).
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the class or its record cannot be read.
    pub fn of_class(session: &AnalysisSession, class: &TypedHandle) -> SiftResult<Self>
    {
        let record = class.follow(session.memory(), "romClass", session.layout("ClassRecord")?)?;
        Self::read(session, record)
    }

    /// Address of the record.
    pub fn address(&self) -> Address
    {
        self.handle.address()
    }

    /// Size of the record in bytes.
    pub fn size(&self) -> u64
    {
        self.size
    }

    /// First byte after the record.
    pub fn end(&self) -> Address
    {
        self.address() + self.size
    }

    /// Handle to the record.
    pub fn handle(&self) -> &TypedHandle
    {
        &self.handle
    }

    /// Class name, read through the record's self-relative name reference.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the reference is NULL or the name cannot be read.
    pub fn name(&self, session: &AnalysisSession) -> SiftResult<String>
    {
        let target = self
            .handle
            .self_relative(session.memory(), "className")?
            .ok_or_else(|| SiftError::corrupt(self.address(), "class record without a name"))?;
        session.memory().read_utf8(target)
    }
}

/// Cursor over the records of one segment
#[derive(Debug)]
pub struct ClassRecordCursor
{
    layout: Arc<StructLayout>,
    next: Address,
    end: Address,
    stop: Option<Address>,
    count: usize,
    limit: usize,
}

impl RecordCursor for ClassRecordCursor
{
    type Item = ClassRecord;

    fn next_record(&mut self, session: &AnalysisSession) -> SiftResult<Option<ClassRecord>>
    {
        if self.next >= self.end || self.stop.is_some_and(|stop| self.next >= stop) {
            return Ok(None);
        }
        if self.count >= self.limit {
            return Err(SiftError::corrupt(
                self.next,
                format!("more than {} class records in one segment", self.limit),
            ));
        }

        let record = ClassRecord::read(session, TypedHandle::new(self.layout.clone(), self.next))?;
        self.next = self
            .next
            .checked_add(record.size())
            .ok_or_else(|| SiftError::corrupt(record.address(), "class record size wraps the address space"))?;
        self.count += 1;
        Ok(Some(record))
    }
}

/// Opens a [`ClassRecordCursor`] per class metadata segment
#[derive(Debug)]
pub struct ClassRecordScanner
{
    layout: Arc<StructLayout>,
    limit: usize,
    range: Option<(Address, Address)>,
    // Set once the segment holding the range start has been opened.
    started: bool,
}

impl SegmentScanner for ClassRecordScanner
{
    type Cursor = ClassRecordCursor;

    fn open(&mut self, _session: &AnalysisSession, segment: &MemorySegment) -> SiftResult<Option<ClassRecordCursor>>
    {
        if !segment.segment_type.intersects(SegmentType::CLASS_METADATA) {
            return Ok(None);
        }

        let (next, stop) = match self.range {
            None => (segment.base, None),
            Some((start, end)) if !self.started => {
                if !segment.contains(start) {
                    return Ok(None);
                }
                self.started = true;
                (start, Some(end))
            }
            Some((_, end)) => {
                if segment.base >= end {
                    return Ok(None);
                }
                (segment.base, Some(end))
            }
        };

        Ok(Some(ClassRecordCursor {
            layout: self.layout.clone(),
            next,
            end: segment.alloc,
            stop,
            count: 0,
            limit: self.limit,
        }))
    }

    fn finish(&mut self, _session: &AnalysisSession) -> SiftResult<()>
    {
        match self.range {
            Some((start, _)) if !self.started => {
                Err(SiftError::corrupt(start, "range start is not inside a class metadata segment"))
            }
            _ => Ok(()),
        }
    }
}

/// Yields the class records packed in a chain of segments
pub struct ClassRecordWalker<'a>
{
    inner: SegmentRecordWalker<'a, ClassRecordScanner>,
}

impl<'a> ClassRecordWalker<'a>
{
    /// Walk the class metadata segments produced by `segments`.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image has no `ClassRecord` layout.
    pub fn new(session: &'a AnalysisSession, segments: SegmentWalker<'a>) -> SiftResult<Self>
    {
        Self::build(session, segments, None)
    }

    /// Walk every class record in the VM's class memory segments.
    ///
    /// ## Errors
    ///
    /// Fails if the session has no VM or the segment list cannot be located.
    pub fn all(session: &'a AnalysisSession) -> SiftResult<Self>
    {
        Self::new(session, SegmentWalker::vm_class_segments(session, SegmentType::CLASS_METADATA)?)
    }

    /// Walk the class records of the segments owned by a class loader.
    ///
    /// ## Errors
    ///
    /// Schema errors for missing layouts.
    pub fn for_class_loader(session: &'a AnalysisSession, loader: Address) -> SiftResult<Self>
    {
        Self::new(
            session,
            SegmentWalker::from_class_loader(session, loader, SegmentType::CLASS_METADATA)?,
        )
    }

    /// Walk the class records of `segment` and of every segment chained after it.
    ///
    /// ## Errors
    ///
    /// Schema errors for missing layouts.
    pub fn from_segment(session: &'a AnalysisSession, segment: Address) -> SiftResult<Self>
    {
        Self::new(
            session,
            SegmentWalker::new(session, segment, crate::walk::SegmentLink::Global, SegmentType::CLASS_METADATA)?,
        )
    }

    /// Walk the records of the segment list at `list` whose start lies in `[start, end)`.
    ///
    /// The walk begins at `start` in the segment holding it and continues
    /// through the segments chained after that one. If no class metadata
    /// segment of the list holds `start`, the walk yields nothing and reports
    /// a fatal `CorruptData` event once the list is exhausted.
    ///
    /// ## Errors
    ///
    /// Schema errors for missing layouts.
    pub fn in_range(session: &'a AnalysisSession, list: Address, start: Address, end: Address) -> SiftResult<Self>
    {
        let segments = SegmentWalker::from_segment_list(session, list, SegmentType::CLASS_METADATA)?;
        Self::build(session, segments, Some((start, end)))
    }

    fn build(session: &'a AnalysisSession, segments: SegmentWalker<'a>, range: Option<(Address, Address)>) -> SiftResult<Self>
    {
        let scanner = ClassRecordScanner {
            layout: session.layout("ClassRecord")?,
            limit: session.config().max_records_per_segment,
            range,
            started: false,
        };
        Ok(Self {
            inner: SegmentRecordWalker::new(segments, scanner),
        })
    }
}

impl Iterator for ClassRecordWalker<'_>
{
    type Item = ClassRecord;

    fn next(&mut self) -> Option<ClassRecord>
    {
        self.inner.next()
    }
}
