//! Singly linked chains.
//!
//! [`Chain`] holds the link-following state shared by every chain-shaped
//! walker: the next node, the nodes already visited, and a pending fault when
//! a link could not be read. A node whose link is unreadable is still
//! yielded; the chain ends with a fatal step right after it.

use std::collections::HashSet;
use std::sync::Arc;

use super::{pump, Step, StepWalker};
use crate::error::SiftError;
use crate::memory::MemoryAccessor;
use crate::pointer::TypedHandle;
use crate::schema::StructLayout;
use crate::session::AnalysisSession;
use crate::types::Address;

/// Link-following state for one chain
#[derive(Debug)]
pub struct Chain
{
    layout: Arc<StructLayout>,
    link: String,
    next: Address,
    visited: HashSet<Address>,
    pending: Option<SiftError>,
    finished: bool,
}

impl Chain
{
    /// Follow `link` from node to node starting at `head`.
    pub fn new(layout: Arc<StructLayout>, link: impl Into<String>, head: Address) -> Self
    {
        Self {
            layout,
            link: link.into(),
            next: head,
            visited: HashSet::new(),
            pending: None,
            finished: false,
        }
    }

    /// A chain that fails on its first step.
    pub fn failed(layout: Arc<StructLayout>, error: SiftError) -> Self
    {
        let mut chain = Self::new(layout, String::new(), Address::NULL);
        chain.pending = Some(error);
        chain
    }

    /// Name of the link field followed.
    pub fn link(&self) -> &str
    {
        &self.link
    }

    /// Yield the next node.
    pub fn step(&mut self, memory: &dyn MemoryAccessor) -> Step<TypedHandle>
    {
        if self.finished {
            return Step::End;
        }
        if let Some(err) = self.pending.take() {
            self.finished = true;
            return Step::Fatal(err);
        }
        if self.next.is_null() {
            self.finished = true;
            return Step::End;
        }
        if !self.visited.insert(self.next) {
            self.finished = true;
            return Step::Fatal(SiftError::corrupt(
                self.next,
                format!("cycle in {} chain through {}", self.layout.name(), self.link),
            ));
        }

        let node = TypedHandle::new(self.layout.clone(), self.next);
        match node.pointer(memory, &self.link) {
            Ok(next) => self.next = next,
            Err(err) => {
                self.next = Address::NULL;
                self.pending = Some(err);
            }
        }
        Step::Item(node)
    }
}

/// Yields every node of a singly linked chain
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
/// use vmsift_core::memory::{Endian, SnapshotMemory};
/// use vmsift_core::schema::{ImageSchema, StructLayout};
/// use vmsift_core::session::AnalysisSession;
/// use vmsift_core::types::Address;
/// use vmsift_core::walk::LinkedWalker;
///
/// // Two nodes: 0x100 -> 0x108 -> NULL
/// let mut bytes = vec![0u8; 16];
/// bytes[0..8].copy_from_slice(&0x108u64.to_le_bytes());
/// let memory = SnapshotMemory::new(Endian::Little).with_range(Address::from(0x100), bytes)?;
/// let schema = ImageSchema::builder(8)
///     .structure(StructLayout::new("Node", 8).with_field("next", 0, 8))
///     .build();
/// let session = AnalysisSession::builder(Arc::new(memory), schema).build();
///
/// let nodes: Vec<_> = LinkedWalker::new(&session, "Node", "next", Address::from(0x100))?
///     .map(|node| node.address())
///     .collect();
/// assert_eq!(nodes, vec![Address::from(0x100), Address::from(0x108)]);
/// # Ok::<(), vmsift_core::error::SiftError>(())
/// ```
pub struct LinkedWalker<'a>
{
    session: &'a AnalysisSession,
    chain: Chain,
}

impl<'a> LinkedWalker<'a>
{
    /// Walk the chain of `structure` nodes linked through `link`.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image has no layout for `structure`.
    pub fn new(
        session: &'a AnalysisSession,
        structure: &str,
        link: &str,
        head: Address,
    ) -> crate::error::SiftResult<Self>
    {
        let layout = session.layout(structure)?;
        if !layout.has_field(link) {
            return Err(SiftError::MissingField {
                structure: structure.to_string(),
                field: link.to_string(),
            });
        }
        Ok(Self {
            session,
            chain: Chain::new(layout, link, head),
        })
    }
}

impl<'a> StepWalker<'a> for LinkedWalker<'a>
{
    type Item = TypedHandle;

    const NAME: &'static str = "LinkedWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<TypedHandle>
    {
        self.chain.step(self.session.memory())
    }
}

impl Iterator for LinkedWalker<'_>
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
    use crate::memory::{Endian, SnapshotMemory};

    fn layout() -> Arc<StructLayout>
    {
        Arc::new(StructLayout::new("Node", 8).with_field("next", 0, 8))
    }

    #[test]
    fn test_cycle_ends_chain()
    {
        // 0x100 -> 0x108 -> 0x100
        let mut bytes = vec![0u8; 16];
        bytes[0..8].copy_from_slice(&0x108u64.to_le_bytes());
        bytes[8..16].copy_from_slice(&0x100u64.to_le_bytes());
        let memory = SnapshotMemory::new(Endian::Little)
            .with_range(Address::from(0x100), bytes)
            .unwrap();

        let mut chain = Chain::new(layout(), "next", Address::from(0x100));
        assert!(matches!(chain.step(&memory), Step::Item(_)));
        assert!(matches!(chain.step(&memory), Step::Item(_)));
        assert!(matches!(chain.step(&memory), Step::Fatal(SiftError::CorruptData { .. })));
        assert_eq!(chain.step(&memory), Step::End);
    }

    #[test]
    fn test_unreadable_link_yields_node_then_fails()
    {
        let memory = SnapshotMemory::new(Endian::Little);
        let mut chain = Chain::new(layout(), "next", Address::from(0x100));
        match chain.step(&memory) {
            Step::Item(node) => assert_eq!(node.address(), Address::from(0x100)),
            other => panic!("unexpected step {other:?}"),
        }
        assert!(matches!(chain.step(&memory), Step::Fatal(_)));
        assert_eq!(chain.step(&memory), Step::End);
    }
}
