//! # Memory Categories
//!
//! The port library accounts native memory against a forest of categories.
//! Runtimes that register their categories publish two sets (language and
//! OMR); the walker yields the language set followed by the OMR set. Older
//! runtimes register nothing, and only the port library's own well-known
//! categories exist: port library, unknown, and on some platforms the
//! unused-slab region.

use std::collections::BTreeMap;
use std::fmt;

use smallvec::SmallVec;

use crate::error::{SiftError, SiftResult};
use crate::pointer::TypedHandle;
use crate::session::AnalysisSession;
use crate::types::Address;
use crate::walk::{pump, ArrayWalker, Step, StepWalker};

/// Child category codes; most categories have only a few.
pub type ChildCodes = SmallVec<[u32; 8]>;

/// One accounting category
#[derive(Clone, PartialEq, Eq)]
pub struct MemoryCategory
{
    handle: TypedHandle,
    /// Category code
    pub code: u32,
    /// Codes of the direct children
    pub children: ChildCodes,
}

impl MemoryCategory
{
    /// Read the category at `address`.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the code or child list cannot be read.
    pub fn read(session: &AnalysisSession, address: Address) -> SiftResult<Self>
    {
        let handle = session.handle("MemoryCategory", address)?;
        let memory = session.memory();
        let code = handle.u32(memory, "categoryCode")?;
        let count = handle.uint(memory, "numberOfChildren")?;
        let mut children = ChildCodes::new();
        if count > 0 {
            let list = handle.pointer(memory, "children")?;
            if list.is_null() {
                return Err(SiftError::corrupt(address, format!("{count} children but no child list")));
            }
            for index in 0..count {
                children.push(memory.read_u32(list + index * 4)?);
            }
        }
        Ok(Self { handle, code, children })
    }

    /// Address of the category structure.
    pub fn address(&self) -> Address
    {
        self.handle.address()
    }

    /// Category name.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the name pointer or string cannot be read.
    pub fn name(&self, session: &AnalysisSession) -> SiftResult<String>
    {
        let name = self.handle.pointer(session.memory(), "name")?;
        if name.is_null() {
            return Err(SiftError::corrupt(self.address(), "category without a name"));
        }
        session.memory().read_c_string(name)
    }

    /// Bytes currently allocated against the category.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the counter cannot be read.
    pub fn live_bytes(&self, session: &AnalysisSession) -> SiftResult<u64>
    {
        self.handle.uint(session.memory(), "liveBytes")
    }

    /// Allocations currently live against the category.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the counter cannot be read.
    pub fn live_allocations(&self, session: &AnalysisSession) -> SiftResult<u64>
    {
        self.handle.uint(session.memory(), "liveAllocations")
    }
}

impl fmt::Debug for MemoryCategory
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("MemoryCategory")
            .field("address", &self.address())
            .field("code", &self.code)
            .field("children", &self.children)
            .finish()
    }
}

/// Well-known categories walked when none are registered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Legacy
{
    PortLibrary,
    Unknown,
    UnusedSlabRegion,
    Terminal,
}

enum Source<'a>
{
    Registered(std::iter::Chain<ArrayWalker<'a>, ArrayWalker<'a>>),
    Legacy
    {
        globals: TypedHandle,
        state: Legacy,
        unused_slab: bool,
    },
}

/// Yields every memory category of the port library
pub struct MemoryCategoryWalker<'a>
{
    session: &'a AnalysisSession,
    source: Source<'a>,
}

impl<'a> MemoryCategoryWalker<'a>
{
    /// Walk the categories of the port library globals at `globals`.
    ///
    /// ## Errors
    ///
    /// Schema errors for missing layouts, or `CorruptData` if the registered
    /// set pointers cannot be read.
    pub fn new(session: &'a AnalysisSession, globals: Address) -> SiftResult<Self>
    {
        let globals = session.handle("PortLibraryGlobals", globals)?;
        let memory = session.memory();
        let language = globals.pointer(memory, "languageCategories")?;
        let omr = globals.pointer(memory, "omrCategories")?;

        let source = if language.is_null() && omr.is_null() {
            let unused_slab = session.config().unused_slab_category.unwrap_or_else(|| {
                session.schema().constant_or("PORT_HAS_UNUSED_SLAB_CATEGORY", 0) != 0
            });
            tracing::debug!(unused_slab, "no registered memory categories, using the port library set");
            Source::Legacy {
                globals,
                state: Legacy::PortLibrary,
                unused_slab,
            }
        } else {
            Source::Registered(Self::set(session, language)?.chain(Self::set(session, omr)?))
        };
        Ok(Self { session, source })
    }

    /// Walk the categories of the VM's port library.
    ///
    /// ## Errors
    ///
    /// As [`new`](Self::new), plus failures locating the VM.
    pub fn for_vm(session: &'a AnalysisSession) -> SiftResult<Self>
    {
        let globals = session.vm()?.pointer(session.memory(), "portGlobals")?;
        Self::new(session, globals)
    }

    fn set(session: &'a AnalysisSession, set: Address) -> SiftResult<ArrayWalker<'a>>
    {
        if set.is_null() {
            return Ok(ArrayWalker::new(session, Address::NULL, 0));
        }
        let set = session.handle("MemoryCategorySet", set)?;
        let count = set.uint(session.memory(), "numberOfCategories")?;
        let categories = set.pointer(session.memory(), "categories")?;
        Ok(ArrayWalker::new(session, categories, count))
    }

    /// Whether the walker is using the port library's well-known set.
    pub fn is_legacy(&self) -> bool
    {
        matches!(self.source, Source::Legacy { .. })
    }
}

impl<'a> StepWalker<'a> for MemoryCategoryWalker<'a>
{
    type Item = MemoryCategory;

    const NAME: &'static str = "MemoryCategoryWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<MemoryCategory>
    {
        let address = match &mut self.source {
            Source::Registered(entries) => match entries.next() {
                Some(address) => Ok(address),
                None => return Step::End,
            },
            Source::Legacy {
                globals,
                state,
                unused_slab,
            } => {
                let (field, next) = match *state {
                    Legacy::PortLibrary => ("portLibraryCategory", Legacy::Unknown),
                    Legacy::Unknown if *unused_slab => ("unknownCategory", Legacy::UnusedSlabRegion),
                    Legacy::Unknown => ("unknownCategory", Legacy::Terminal),
                    Legacy::UnusedSlabRegion => ("unusedSlabCategory", Legacy::Terminal),
                    Legacy::Terminal => return Step::End,
                };
                *state = next;
                globals.field_address(field)
            }
        };
        Step::recoverable(address.and_then(|address| MemoryCategory::read(self.session, address)))
    }
}

impl Iterator for MemoryCategoryWalker<'_>
{
    type Item = MemoryCategory;

    fn next(&mut self) -> Option<MemoryCategory>
    {
        pump(self)
    }
}

/// Categories that are not a child of any other category, ordered by code.
///
/// Walks the categories twice: once to index them by code, once to strike
/// out every code listed as a child.
///
/// ## Errors
///
/// Fails only if the walkers cannot be built.
pub fn root_categories(session: &AnalysisSession, globals: Address) -> SiftResult<Vec<MemoryCategory>>
{
    let mut by_code: BTreeMap<u32, MemoryCategory> = MemoryCategoryWalker::new(session, globals)?
        .map(|category| (category.code, category))
        .collect();
    for category in MemoryCategoryWalker::new(session, globals)? {
        for child in &category.children {
            by_code.remove(child);
        }
    }
    Ok(by_code.into_values().collect())
}
