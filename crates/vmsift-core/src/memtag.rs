//! # Allocation Tags
//!
//! Debug allocators wrap every native allocation in a header tag and a footer
//! tag. Both tags share one layout (`MemTag`):
//!
//! ```text
//! { eyeCatcher: u32, sumCheck: u32, allocSize: uptr, callSite: ptr, category: ptr }
//! ```
//!
//! The footer sits at `header + sizeof(MemTag) + round_up(allocSize, 8)`. The
//! XOR of all 32-bit words of an intact tag is zero.
//!
//! | Eyecatcher | Header | Footer |
//! |------------|--------|--------|
//! | allocated | `0xB1234567` | `0xB7654321` |
//! | freed | `0xBADBAD67` | `0xBADBAD21` |
//!
//! [`TagScanner`] searches a range for header eyecatchers and validates each
//! candidate through a [`TagChecker`]. The search always resumes past the
//! current match, so it terminates even when nothing validates.

use std::fmt;

use crate::error::{SiftError, SiftResult};
use crate::memory::MemoryAccessor;
use crate::metadata::MemoryCategory;
use crate::pointer::TypedHandle;
use crate::session::AnalysisSession;
use crate::types::Address;
use crate::walk::{pump, Step, StepWalker};

/// Header eyecatcher of a live allocation.
pub const ALLOCATED_HEADER: u64 = 0xB123_4567;
/// Footer eyecatcher of a live allocation.
pub const ALLOCATED_FOOTER: u64 = 0xB765_4321;
/// Header eyecatcher of a freed allocation.
pub const FREED_HEADER: u64 = 0xBADB_AD67;
/// Footer eyecatcher of a freed allocation.
pub const FREED_FOOTER: u64 = 0xBADB_AD21;

/// Which blocks a scan looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagScanMode
{
    /// Live allocations; a damaged footer rejects the block
    Allocated,
    /// Freed allocations; a damaged footer is flagged and reported
    Freed,
    /// Freed allocations for call-site statistics; a damaged footer is
    /// flagged without an event
    FreedCallSites,
}

impl TagScanMode
{
    /// Header and footer eyecatchers for the mode.
    pub fn eyecatchers(self) -> (u64, u64)
    {
        match self {
            TagScanMode::Allocated => (ALLOCATED_HEADER, ALLOCATED_FOOTER),
            TagScanMode::Freed | TagScanMode::FreedCallSites => (FREED_HEADER, FREED_FOOTER),
        }
    }
}

/// Outcome of validating a candidate header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagCheck
{
    /// The match was a coincidence
    NotATag,
    /// The header is intact but its footer is not
    FooterCorrupted,
    /// Header and footer are intact
    Valid,
}

/// Validates allocation tag candidates
pub trait TagChecker: Send + Sync
{
    /// Classify the candidate header at `tag`.
    fn check(&self, memory: &dyn MemoryAccessor, tag: &TypedHandle, header: u64, footer: u64) -> TagCheck;
}

/// Checks eyecatchers and the XOR sum of both tags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SumCheckTagChecker;

impl SumCheckTagChecker
{
    fn intact(memory: &dyn MemoryAccessor, tag: &TypedHandle, eyecatcher: u64) -> bool
    {
        let Ok(bytes) = memory.read_bytes(tag.address(), tag.layout().size() as usize) else {
            return false;
        };
        let endian = memory.byte_order();
        let sum = bytes.chunks_exact(4).fold(0u32, |acc, word| acc ^ endian.u32(word));
        sum == 0 && tag.u32(memory, "eyeCatcher").is_ok_and(|value| value == eyecatcher as u32)
    }

    /// Footer of the block headed by `tag`.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the allocation size cannot be read or overflows.
    pub fn footer(memory: &dyn MemoryAccessor, tag: &TypedHandle) -> SiftResult<TypedHandle>
    {
        let size = tag.uint(memory, "allocSize")?;
        let rounded = size
            .checked_add(7)
            .map(|size| size & !7)
            .ok_or_else(|| SiftError::corrupt(tag.address(), "allocation size overflows"))?;
        let footer = tag
            .end()
            .checked_add(rounded)
            .ok_or_else(|| SiftError::corrupt(tag.address(), "footer leaves the address space"))?;
        Ok(TypedHandle::new(tag.layout().clone(), footer))
    }
}

impl TagChecker for SumCheckTagChecker
{
    fn check(&self, memory: &dyn MemoryAccessor, tag: &TypedHandle, header: u64, footer: u64) -> TagCheck
    {
        if !Self::intact(memory, tag, header) {
            return TagCheck::NotATag;
        }
        match Self::footer(memory, tag) {
            Ok(end) if Self::intact(memory, &end, footer) => TagCheck::Valid,
            _ => TagCheck::FooterCorrupted,
        }
    }
}

/// A validated allocation tag
#[derive(Clone, PartialEq, Eq)]
pub struct MemTag
{
    handle: TypedHandle,
    /// Size of the user allocation in bytes
    pub alloc_size: u64,
    /// Set when the footer did not validate (freed scans only)
    pub footer_corrupted: bool,
}

impl MemTag
{
    /// Address of the header tag.
    pub fn address(&self) -> Address
    {
        self.handle.address()
    }

    /// First byte of the user allocation.
    pub fn allocation(&self) -> Address
    {
        self.handle.end()
    }

    /// Allocation call site, as recorded by the allocator.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the call-site pointer or string cannot be read.
    pub fn call_site(&self, session: &AnalysisSession) -> SiftResult<String>
    {
        let site = self.handle.pointer(session.memory(), "callSite")?;
        if site.is_null() {
            return Err(SiftError::corrupt(self.address(), "tag without a call site"));
        }
        session.memory().read_c_string(site)
    }

    /// Memory category the allocation was charged to.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the category pointer or category cannot be read.
    pub fn category(&self, session: &AnalysisSession) -> SiftResult<MemoryCategory>
    {
        let category = self.handle.pointer(session.memory(), "category")?;
        if category.is_null() {
            return Err(SiftError::corrupt(self.address(), "tag without a category"));
        }
        MemoryCategory::read(session, category)
    }

    /// Code of the category the allocation was charged to.
    ///
    /// ## Errors
    ///
    /// As [`category`](Self::category).
    pub fn category_code(&self, session: &AnalysisSession) -> SiftResult<u32>
    {
        self.category(session).map(|category| category.code)
    }
}

impl fmt::Debug for MemTag
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("MemTag")
            .field("address", &self.address())
            .field("alloc_size", &self.alloc_size)
            .field("footer_corrupted", &self.footer_corrupted)
            .finish()
    }
}

/// Search pattern for `eyecatcher`: the low four bytes of its 8-byte value
/// in target byte order.
pub fn eyecatcher_pattern(memory: &dyn MemoryAccessor, eyecatcher: u64) -> [u8; 4]
{
    let endian = memory.byte_order();
    let bytes = endian.u64_bytes(eyecatcher);
    let low = match endian {
        crate::memory::Endian::Little => &bytes[..4],
        crate::memory::Endian::Big => &bytes[4..],
    };
    [low[0], low[1], low[2], low[3]]
}

/// Yields the allocation tags found in `[start, end)`
pub struct TagScanner<'a>
{
    session: &'a AnalysisSession,
    handle: TypedHandle,
    mode: TagScanMode,
    pattern: [u8; 4],
    cursor: Address,
    end: Address,
    finished: bool,
}

impl<'a> TagScanner<'a>
{
    /// Scan `[start, end)` for tags of the given mode.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image has no `MemTag` layout.
    pub fn new(session: &'a AnalysisSession, start: Address, end: Address, mode: TagScanMode) -> SiftResult<Self>
    {
        let handle = session.handle("MemTag", Address::NULL)?;
        let pattern = eyecatcher_pattern(session.memory(), mode.eyecatchers().0);
        tracing::debug!(start = %start, end = %end, ?mode, "scanning for allocation tags");
        Ok(Self {
            session,
            handle,
            mode,
            pattern,
            cursor: start,
            end,
            finished: start >= end,
        })
    }

    /// Scan mode.
    pub fn mode(&self) -> TagScanMode
    {
        self.mode
    }

    fn tag(&self, address: Address, footer_corrupted: bool) -> SiftResult<MemTag>
    {
        let handle = TypedHandle::new(self.handle.layout().clone(), address);
        Ok(MemTag {
            alloc_size: handle.uint(self.session.memory(), "allocSize")?,
            handle,
            footer_corrupted,
        })
    }
}

impl<'a> StepWalker<'a> for TagScanner<'a>
{
    type Item = MemTag;

    const NAME: &'static str = "TagScanner";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<MemTag>
    {
        let memory = self.session.memory();
        let (header, footer) = self.mode.eyecatchers();
        let alignment = self.session.config().tag_alignment;

        while !self.finished {
            let found = match memory.find_pattern(&self.pattern, alignment, self.cursor) {
                Ok(Some(found)) if found < self.end => found,
                Ok(_) => {
                    self.finished = true;
                    return Step::End;
                }
                Err(err) => {
                    self.finished = true;
                    return Step::Fatal(err);
                }
            };
            self.cursor = found + self.pattern.len() as u64;

            let candidate = TypedHandle::new(self.handle.layout().clone(), found);
            match self.session.tag_checker().check(memory, &candidate, header, footer) {
                TagCheck::NotATag => {}
                TagCheck::Valid => return Step::recoverable(self.tag(found, false)),
                TagCheck::FooterCorrupted => {
                    let err = SiftError::corrupt(found, "allocation tag footer is corrupted");
                    match self.mode {
                        TagScanMode::Allocated => return Step::Corrupt(err),
                        TagScanMode::Freed => {
                            self.session.raise(err, false);
                            return Step::recoverable(self.tag(found, true));
                        }
                        TagScanMode::FreedCallSites => return Step::recoverable(self.tag(found, true)),
                    }
                }
            }
        }
        Step::End
    }
}

impl Iterator for TagScanner<'_>
{
    type Item = MemTag;

    fn next(&mut self) -> Option<MemTag>
    {
        pump(self)
    }
}
