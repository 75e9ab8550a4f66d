//! Monitor pool walking.
//!
//! The thread library allocates monitors in blocks of `MONITOR_POOL_SIZE`
//! `ThreadMonitor` entries, chained through `MonitorPoolBlock.next`. Unused
//! entries carry `MONITOR_FREE_FLAG`; entries bound to an object carry
//! `MONITOR_OBJECT_FLAG` and hold the object in `userData`.

use std::fmt;
use std::sync::Arc;

use crate::error::{SiftError, SiftResult};
use crate::pointer::TypedHandle;
use crate::schema::StructLayout;
use crate::session::AnalysisSession;
use crate::types::Address;
use crate::walk::list::Chain;
use crate::walk::{pump, Step, StepWalker};

/// Entries per pool block when the image does not say.
pub const DEFAULT_MONITOR_POOL_SIZE: u64 = 64;
/// Default flag marking an unused pool entry.
pub const DEFAULT_MONITOR_FREE_FLAG: u64 = 0x1;
/// Default flag marking a pool entry bound to an object.
pub const DEFAULT_MONITOR_OBJECT_FLAG: u64 = 0x2;

/// An in-use monitor pool entry
#[derive(Clone, PartialEq, Eq)]
pub struct PoolMonitor
{
    handle: TypedHandle,
    /// Raw flags
    pub flags: u64,
    /// Object the monitor is bound to, if it is an object monitor
    pub object: Option<Address>,
}

impl PoolMonitor
{
    /// Address of the `ThreadMonitor` entry.
    pub fn address(&self) -> Address
    {
        self.handle.address()
    }

    /// Owning thread (NULL when unowned).
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the field cannot be read.
    pub fn owner(&self, session: &AnalysisSession) -> SiftResult<Address>
    {
        self.handle.pointer(session.memory(), "owner")
    }

    /// Recursion count of the owner.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the field cannot be read.
    pub fn count(&self, session: &AnalysisSession) -> SiftResult<u64>
    {
        self.handle.uint(session.memory(), "count")
    }

    /// Monitor name, if it has one.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the name cannot be read.
    pub fn name(&self, session: &AnalysisSession) -> SiftResult<Option<String>>
    {
        let name = self.handle.pointer(session.memory(), "name")?;
        if name.is_null() {
            return Ok(None);
        }
        session.memory().read_c_string(name).map(Some)
    }
}

impl fmt::Debug for PoolMonitor
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("PoolMonitor")
            .field("address", &self.address())
            .field("flags", &format_args!("0x{:x}", self.flags))
            .field("object", &self.object)
            .finish()
    }
}

#[derive(Debug)]
struct BlockCursor
{
    first: TypedHandle,
    index: u64,
}

/// Yields the in-use entries of the monitor pool in pool order
pub struct MonitorPoolWalker<'a>
{
    session: &'a AnalysisSession,
    blocks: Chain,
    entry_layout: Arc<StructLayout>,
    per_block: u64,
    free_flag: u64,
    object_flag: u64,
    current: Option<BlockCursor>,
}

impl<'a> MonitorPoolWalker<'a>
{
    /// Walk the pool whose first block is at `head`.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image lacks the pool layouts.
    pub fn new(session: &'a AnalysisSession, head: Address) -> SiftResult<Self>
    {
        let block_layout = session.layout("MonitorPoolBlock")?;
        Self::with_chain(session, Chain::new(block_layout, "next", head))
    }

    /// Walk the pool of the VM's thread library.
    ///
    /// A VM without a thread library fails on the first step.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image lacks the pool layouts, or failures
    /// locating the VM.
    pub fn for_vm(session: &'a AnalysisSession) -> SiftResult<Self>
    {
        let block_layout = session.layout("MonitorPoolBlock")?;
        let chain = match Self::pool_head(session) {
            Ok(head) => Chain::new(block_layout, "next", head),
            Err(err) => Chain::failed(block_layout, err),
        };
        Self::with_chain(session, chain)
    }

    fn pool_head(session: &AnalysisSession) -> SiftResult<Address>
    {
        let vm = session.vm()?;
        let library = vm.follow(session.memory(), "threadLibrary", session.layout("ThreadLibrary")?)?;
        if library.is_null() {
            return Err(SiftError::corrupt(vm.address(), "unable to locate the thread library"));
        }
        library.pointer(session.memory(), "monitorPool")
    }

    fn with_chain(session: &'a AnalysisSession, blocks: Chain) -> SiftResult<Self>
    {
        let schema = session.schema();
        Ok(Self {
            session,
            blocks,
            entry_layout: session.layout("ThreadMonitor")?,
            per_block: schema.constant_or("MONITOR_POOL_SIZE", DEFAULT_MONITOR_POOL_SIZE),
            free_flag: schema.constant_or("MONITOR_FREE_FLAG", DEFAULT_MONITOR_FREE_FLAG),
            object_flag: schema.constant_or("MONITOR_OBJECT_FLAG", DEFAULT_MONITOR_OBJECT_FLAG),
            current: None,
        })
    }

    fn read_entry(&self, entry: TypedHandle) -> SiftResult<Option<PoolMonitor>>
    {
        let memory = self.session.memory();
        let flags = entry.uint(memory, "flags")?;
        if flags & self.free_flag != 0 {
            return Ok(None);
        }
        let object = if flags & self.object_flag != 0 {
            let object = entry.pointer(memory, "userData")?;
            if object.is_null() {
                return Err(SiftError::corrupt(entry.address(), "object monitor without an object"));
            }
            Some(object)
        } else {
            None
        };
        Ok(Some(PoolMonitor {
            handle: entry,
            flags,
            object,
        }))
    }
}

impl<'a> StepWalker<'a> for MonitorPoolWalker<'a>
{
    type Item = PoolMonitor;

    const NAME: &'static str = "MonitorPoolWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<PoolMonitor>
    {
        loop {
            if let Some(cursor) = self.current.as_mut() {
                if cursor.index < self.per_block {
                    let entry = cursor.first.element(cursor.index);
                    cursor.index += 1;
                    match self.read_entry(entry) {
                        Ok(Some(monitor)) => return Step::Item(monitor),
                        Ok(None) => continue,
                        Err(err) => return Step::Corrupt(err),
                    }
                }
                self.current = None;
            }

            match self.blocks.step(self.session.memory()) {
                Step::Item(block) => match block.field_address("entries") {
                    Ok(first) => {
                        self.current = Some(BlockCursor {
                            first: TypedHandle::new(self.entry_layout.clone(), first),
                            index: 0,
                        });
                    }
                    Err(err) => return Step::Corrupt(err),
                },
                Step::End => return Step::End,
                Step::Corrupt(err) => return Step::Corrupt(err),
                Step::Fatal(err) => return Step::Fatal(err),
            }
        }
    }
}

impl Iterator for MonitorPoolWalker<'_>
{
    type Item = PoolMonitor;

    fn next(&mut self) -> Option<PoolMonitor>
    {
        pump(self)
    }
}
