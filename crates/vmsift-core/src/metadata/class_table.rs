//! # Class Tables
//!
//! Each class loader indexes its classes in a hash table. Older runtimes
//! keep the entries in pool-allocated list nodes; newer ones keep a plain
//! array of slots. `CLASS_TABLE_VERSION` tells the two apart and is resolved
//! once, when the walker is built.
//!
//! Slots can hold tagged values (tombstones, lazily removed entries). Only
//! non-NULL entries with the tag bits clear are live classes.

use std::sync::Arc;

use crate::error::SiftResult;
use crate::pointer::TypedHandle;
use crate::schema::version::CLASS_TABLE_VERSION;
use crate::schema::StructLayout;
use crate::session::AnalysisSession;
use crate::types::Address;
use crate::walk::{pump, ArrayWalker, PoolWalker, Step, StepWalker};

/// Tag bits of a class table slot when the image does not define them.
pub const DEFAULT_CLASS_TAG_MASK: u64 = 0x3;

/// Whether a class table slot value is a live class.
pub fn is_live_class_entry(entry: Address, tag_mask: u64) -> bool
{
    !entry.is_null() && entry.value() & tag_mask == 0
}

enum Source<'a>
{
    Pooled(PoolWalker<'a>),
    Array(ArrayWalker<'a>),
}

/// Yields the live classes of one class hash table
pub struct ClassTableWalker<'a>
{
    session: &'a AnalysisSession,
    source: Source<'a>,
    class_layout: Arc<StructLayout>,
    tag_mask: u64,
}

impl<'a> ClassTableWalker<'a>
{
    /// Walk the hash table at `table`.
    ///
    /// ## Errors
    ///
    /// Schema errors for missing layouts, or `CorruptData` if the table
    /// header cannot be read.
    pub fn new(session: &'a AnalysisSession, table: Address) -> SiftResult<Self>
    {
        let class_layout = session.layout("Class")?;
        let tag_mask = session.schema().constant_or("CLASS_TABLE_TAG_MASK", DEFAULT_CLASS_TAG_MASK);
        let header = session.handle("HashTable", table)?;
        let version = session.schema().algorithm_version(CLASS_TABLE_VERSION);

        let source = if table.is_null() {
            Source::Array(ArrayWalker::new(session, Address::NULL, 0))
        } else if version == 0 {
            let pool = header.pointer(session.memory(), "listNodePool")?;
            Source::Pooled(PoolWalker::new(session, pool)?)
        } else {
            let slots = header.pointer(session.memory(), "table")?;
            let size = header.uint(session.memory(), "tableSize")?;
            Source::Array(ArrayWalker::new(session, slots, size))
        };
        tracing::debug!(table = %table, version, pooled = matches!(source, Source::Pooled(_)), "walking class table");

        Ok(Self {
            session,
            source,
            class_layout,
            tag_mask,
        })
    }

    /// Walk the classes defined by the class loader at `loader`.
    ///
    /// ## Errors
    ///
    /// As [`new`](Self::new), plus `CorruptData` if the loader's table pointer
    /// cannot be read.
    pub fn for_class_loader(session: &'a AnalysisSession, loader: Address) -> SiftResult<Self>
    {
        let loader = session.handle("ClassLoader", loader)?;
        let table = loader.pointer(session.memory(), "classHashTable")?;
        Self::new(session, table)
    }

    /// Whether the table is the pooled shape.
    pub fn is_pooled(&self) -> bool
    {
        matches!(self.source, Source::Pooled(_))
    }
}

impl<'a> StepWalker<'a> for ClassTableWalker<'a>
{
    type Item = TypedHandle;

    const NAME: &'static str = "ClassTableWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<TypedHandle>
    {
        loop {
            let entry = match &mut self.source {
                Source::Array(slots) => match slots.next() {
                    Some(entry) => entry,
                    None => return Step::End,
                },
                Source::Pooled(nodes) => {
                    let Some(node) = nodes.next() else {
                        return Step::End;
                    };
                    match self.session.memory().read_pointer(node, self.session.pointer_size()) {
                        Ok(entry) => entry,
                        Err(err) => return Step::Corrupt(err),
                    }
                }
            };
            if is_live_class_entry(entry, self.tag_mask) {
                return Step::Item(TypedHandle::new(self.class_layout.clone(), entry));
            }
        }
    }
}

impl Iterator for ClassTableWalker<'_>
{
    type Item = TypedHandle;

    fn next(&mut self) -> Option<TypedHandle>
    {
        pump(self)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_live_entry_tag_test()
    {
        assert!(is_live_class_entry(Address::from(0x1000), DEFAULT_CLASS_TAG_MASK));
        assert!(!is_live_class_entry(Address::NULL, DEFAULT_CLASS_TAG_MASK));
        assert!(!is_live_class_entry(Address::from(0x1001), DEFAULT_CLASS_TAG_MASK));
        assert!(!is_live_class_entry(Address::from(0x1002), DEFAULT_CLASS_TAG_MASK));
    }
}
