//! # Structure Walkers
//!
//! Lazy, forward-only traversal of containers in the target image.
//!
//! Every walker is bound to one source when it is built, reads nothing until
//! it is advanced, and never goes back. Walkers implement [`Iterator`]; a
//! walker that has run out returns `None` forever after.
//!
//! ## Steps
//!
//! Internally each walker advances one [`Step`] at a time. A step either
//! yields an element, reports the end of the source, reports corruption it
//! can skip past, or reports corruption that ends the walk. [`pump`] turns
//! steps into `Iterator::next` results: it raises corrupt-data events through
//! the session, skips recoverable ones, and stops on fatal ones. While a step
//! runs, events are attributed to the stepping walker.
//!
//! ## Walkers
//!
//! - [`ArrayWalker`]: fixed-size array of pointer slots
//! - [`LinkedWalker`]: singly linked chain through a named field
//! - [`SegmentWalker`]: memory segment chains with a type filter
//! - [`SegmentRecordWalker`]: records packed inside each segment of a chain
//! - [`PoolWalker`]: in-use elements of a chained block pool

pub mod array;
pub mod list;
pub mod nested;
pub mod pool;
pub mod segment;

pub use array::ArrayWalker;
pub use list::LinkedWalker;
pub use nested::{RecordCursor, SegmentRecordWalker, SegmentScanner};
pub use pool::PoolWalker;
pub use segment::{MemorySegment, SegmentLink, SegmentWalker};

use crate::error::{SiftError, SiftResult};
use crate::session::AnalysisSession;

/// Outcome of advancing a walker by one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<T>
{
    /// A well-formed element
    Item(T),
    /// The source is exhausted
    End,
    /// Corruption the walker has already stepped past; the walk continues
    Corrupt(SiftError),
    /// Corruption that ends the walk
    Fatal(SiftError),
}

impl<T> Step<T>
{
    /// Turn a fallible read into a step, treating failure as recoverable.
    pub fn recoverable(result: SiftResult<T>) -> Self
    {
        match result {
            Ok(item) => Step::Item(item),
            Err(err) => Step::Corrupt(err),
        }
    }
}

/// A walker driven one [`Step`] at a time
///
/// After returning [`Step::End`] or [`Step::Fatal`] a walker must return
/// `End` from every later step.
pub trait StepWalker<'a>
{
    /// Element type yielded
    type Item;

    /// Name events raised during a step are attributed to.
    const NAME: &'static str;

    /// Session the walker reads through.
    fn session(&self) -> &'a AnalysisSession;

    /// Advance by one step.
    fn step(&mut self) -> Step<Self::Item>;
}

/// Advance `walker` to its next element, reporting and skipping corruption.
///
/// The walker attribution scope is pushed for each step and dropped when the
/// step returns, so events raised by nested walkers land on the right name.
pub fn pump<'a, W: StepWalker<'a>>(walker: &mut W) -> Option<W::Item>
{
    let session = walker.session();
    loop {
        let _scope = session.events().enter(W::NAME);
        match walker.step() {
            Step::Item(item) => return Some(item),
            Step::End => return None,
            Step::Corrupt(err) => session.raise(err, false),
            Step::Fatal(err) => {
                session.raise(err, true);
                return None;
            }
        }
    }
}

/// Explicit advancing for walkers
///
/// `Iterator::next` reports exhaustion as `None`; `advance` treats it as a
/// caller error.
pub trait Advance: Iterator
{
    /// Next element.
    ///
    /// ## Errors
    ///
    /// `NoMoreElements` when called after the walker is exhausted.
    fn advance(&mut self) -> SiftResult<Self::Item>
    {
        self.next().ok_or(SiftError::NoMoreElements)
    }

    /// Walkers never modify their source.
    ///
    /// ## Errors
    ///
    /// Always `Unsupported`.
    fn remove(&mut self) -> SiftResult<()>
    {
        Err(SiftError::Unsupported("walkers are read-only".to_string()))
    }
}

impl<I: Iterator> Advance for I {}
