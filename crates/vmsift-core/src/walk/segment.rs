//! # Memory Segment Chains
//!
//! The runtime keeps its memory segments in one global chain (headed by a
//! `MemorySegmentList`) and, for class memory, in one chain per class loader.
//! Both chains link the same `MemorySegment` structures through different
//! fields; [`SegmentLink`] picks which one a walk follows.
//!
//! A NULL head is an empty chain. A link that cannot be read ends the walk
//! with a fatal event after the last good segment.

use std::fmt;

use super::list::Chain;
use super::{pump, Step, StepWalker};
use crate::error::SiftResult;
use crate::pointer::TypedHandle;
use crate::session::AnalysisSession;
use crate::types::{Address, HeapRegion, SegmentType};

/// Which link field a segment walk follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentLink
{
    /// `nextSegment`: every segment of a segment list
    Global,
    /// `nextSegmentInClassLoader`: the class segments of one class loader
    ClassLoader,
}

impl SegmentLink
{
    /// Name of the link field in `MemorySegment`.
    pub fn field(self) -> &'static str
    {
        match self {
            SegmentLink::Global => "nextSegment",
            SegmentLink::ClassLoader => "nextSegmentInClassLoader",
        }
    }
}

/// One memory segment, read in full
#[derive(Clone, PartialEq, Eq)]
pub struct MemorySegment
{
    handle: TypedHandle,
    /// Type bitmask
    pub segment_type: SegmentType,
    /// First byte of the segment's data
    pub base: Address,
    /// End of allocated data (exclusive)
    pub alloc: Address,
}

impl MemorySegment
{
    /// Read the segment at `handle`.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if any of the type, base or allocation fields cannot be read.
    pub fn read(session: &AnalysisSession, handle: TypedHandle) -> SiftResult<Self>
    {
        let memory = session.memory();
        let segment_type = SegmentType::from_bits(handle.uint(memory, "type")?);
        let base = handle.pointer(memory, "heapBase")?;
        let alloc = handle.pointer(memory, "heapAlloc")?;
        Ok(Self {
            handle,
            segment_type,
            base,
            alloc,
        })
    }

    /// Address of the `MemorySegment` structure itself.
    pub fn address(&self) -> Address
    {
        self.handle.address()
    }

    /// Handle to the structure.
    pub fn handle(&self) -> &TypedHandle
    {
        &self.handle
    }

    /// Allocated data as a heap region.
    pub fn region(&self) -> HeapRegion
    {
        HeapRegion::new(self.base, self.alloc)
    }

    /// Whether `address` lies in the allocated part of the segment.
    pub fn contains(&self, address: Address) -> bool
    {
        self.region().contains(address)
    }

    /// Class loader owning the segment (NULL for non-class segments).
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the field cannot be read.
    pub fn class_loader(&self, session: &AnalysisSession) -> SiftResult<Address>
    {
        self.handle.pointer(session.memory(), "classLoader")
    }
}

impl fmt::Debug for MemorySegment
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "MemorySegment@{} {} type {}", self.address(), self.region(), self.segment_type)
    }
}

/// Yields the segments of a chain whose type intersects a mask
pub struct SegmentWalker<'a>
{
    session: &'a AnalysisSession,
    chain: Chain,
    mask: SegmentType,
}

impl<'a> SegmentWalker<'a>
{
    /// Walk the chain starting at the segment `head`.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image has no `MemorySegment` layout.
    pub fn new(session: &'a AnalysisSession, head: Address, link: SegmentLink, mask: SegmentType) -> SiftResult<Self>
    {
        let layout = session.layout("MemorySegment")?;
        tracing::debug!(head = %head, ?link, mask = %mask, "walking segment chain");
        Ok(Self {
            session,
            chain: Chain::new(layout, link.field(), head),
            mask,
        })
    }

    /// Walk every segment of the `MemorySegmentList` at `list`.
    ///
    /// A NULL list walks nothing. A list whose head cannot be read fails on
    /// the first step.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image lacks the list or segment layouts.
    pub fn from_segment_list(session: &'a AnalysisSession, list: Address, mask: SegmentType) -> SiftResult<Self>
    {
        let handle = session.handle("MemorySegmentList", list)?;
        Self::from_head(session, &handle, "nextSegment", SegmentLink::Global, mask)
    }

    /// Walk the class segments owned by the class loader at `loader`.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image lacks the loader or segment layouts.
    pub fn from_class_loader(session: &'a AnalysisSession, loader: Address, mask: SegmentType) -> SiftResult<Self>
    {
        let handle = session.handle("ClassLoader", loader)?;
        Self::from_head(session, &handle, "classSegments", SegmentLink::ClassLoader, mask)
    }

    /// Walk the VM's main segment list (`JavaVM.memorySegments`).
    ///
    /// ## Errors
    ///
    /// Fails if the session has no VM or the VM's list field cannot be read.
    pub fn vm_segments(session: &'a AnalysisSession, mask: SegmentType) -> SiftResult<Self>
    {
        let vm = session.vm()?;
        let list = vm.pointer(session.memory(), "memorySegments")?;
        Self::from_segment_list(session, list, mask)
    }

    /// Walk the VM's class memory segment list (`JavaVM.classMemorySegments`).
    ///
    /// ## Errors
    ///
    /// Fails if the session has no VM or the VM's list field cannot be read.
    pub fn vm_class_segments(session: &'a AnalysisSession, mask: SegmentType) -> SiftResult<Self>
    {
        let vm = session.vm()?;
        let list = vm.pointer(session.memory(), "classMemorySegments")?;
        Self::from_segment_list(session, list, mask)
    }

    fn from_head(
        session: &'a AnalysisSession,
        owner: &TypedHandle,
        field: &str,
        link: SegmentLink,
        mask: SegmentType,
    ) -> SiftResult<Self>
    {
        let layout = session.layout("MemorySegment")?;
        let chain = if owner.is_null() {
            Chain::new(layout, link.field(), Address::NULL)
        } else {
            match owner.pointer(session.memory(), field) {
                Ok(head) => Chain::new(layout, link.field(), head),
                Err(err) => Chain::failed(layout, err),
            }
        };
        Ok(Self { session, chain, mask })
    }

    /// Type mask segments must intersect.
    pub fn mask(&self) -> SegmentType
    {
        self.mask
    }
}

impl<'a> StepWalker<'a> for SegmentWalker<'a>
{
    type Item = MemorySegment;

    const NAME: &'static str = "SegmentWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<MemorySegment>
    {
        loop {
            let handle = match self.chain.step(self.session.memory()) {
                Step::Item(handle) => handle,
                Step::End => return Step::End,
                Step::Corrupt(err) => return Step::Corrupt(err),
                Step::Fatal(err) => return Step::Fatal(err),
            };
            match MemorySegment::read(self.session, handle) {
                Ok(segment) if segment.segment_type.intersects(self.mask) => return Step::Item(segment),
                Ok(_) => {}
                Err(err) => return Step::Corrupt(err),
            }
        }
    }
}

impl Iterator for SegmentWalker<'_>
{
    type Item = MemorySegment;

    fn next(&mut self) -> Option<MemorySegment>
    {
        pump(self)
    }
}
