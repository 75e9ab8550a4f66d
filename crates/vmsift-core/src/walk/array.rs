//! Walker over a fixed-size array of pointer slots.

use super::{pump, Step, StepWalker};
use crate::session::AnalysisSession;
use crate::types::Address;

/// Yields the non-NULL slots of a pointer array in index order
///
/// A NULL slot is skipped silently. A slot that cannot be read raises a
/// recoverable event and is skipped.
pub struct ArrayWalker<'a>
{
    session: &'a AnalysisSession,
    base: Address,
    count: u64,
    index: u64,
    width: usize,
}

impl<'a> ArrayWalker<'a>
{
    /// Walk `count` pointer-sized slots starting at `base`.
    ///
    /// A NULL `base` walks nothing.
    pub fn new(session: &'a AnalysisSession, base: Address, count: u64) -> Self
    {
        let count = if base.is_null() { 0 } else { count };
        Self {
            session,
            base,
            count,
            index: 0,
            width: session.pointer_size(),
        }
    }

    /// Whether any slot is still unvisited.
    pub fn has_more(&self) -> bool
    {
        self.index < self.count
    }

    /// Number of slots in the array.
    pub fn len(&self) -> u64
    {
        self.count
    }

    /// Whether the array has no slots.
    pub fn is_empty(&self) -> bool
    {
        self.count == 0
    }
}

impl<'a> StepWalker<'a> for ArrayWalker<'a>
{
    type Item = Address;

    const NAME: &'static str = "ArrayWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<Address>
    {
        while self.index < self.count {
            let slot = self.base + self.index * self.width as u64;
            self.index += 1;
            match self.session.memory().read_pointer(slot, self.width) {
                Ok(entry) if entry.is_null() => {}
                Ok(entry) => return Step::Item(entry),
                Err(err) => return Step::Corrupt(err),
            }
        }
        Step::End
    }
}

impl Iterator for ArrayWalker<'_>
{
    type Item = Address;

    fn next(&mut self) -> Option<Address>
    {
        pump(self)
    }
}
