//! # Block Pools
//!
//! A pool hands out fixed-size elements from a chain of blocks. Each block
//! holds `elementsPerBlock` elements starting at `firstElement`, and an inline
//! bitmap of `u32` words at `usedBitmap` in which a set bit marks an element
//! in use (bit `i % 32` of word `i / 32`).
//!
//! The walker yields the address of every in-use element, block by block.
//! A bitmap word that cannot be read abandons the rest of its block; a block
//! link that cannot be read ends the walk.

use super::list::Chain;
use super::{pump, Step, StepWalker};
use crate::error::{SiftError, SiftResult};
use crate::pointer::TypedHandle;
use crate::session::AnalysisSession;
use crate::types::Address;

#[derive(Debug)]
struct BlockCursor
{
    block: TypedHandle,
    first: Address,
    index: u64,
    word: Option<u32>,
}

/// Yields the in-use elements of a pool
pub struct PoolWalker<'a>
{
    session: &'a AnalysisSession,
    blocks: Chain,
    element_size: u64,
    per_block: u64,
    current: Option<BlockCursor>,
}

impl<'a> PoolWalker<'a>
{
    /// Walk the pool whose header is at `pool`.
    ///
    /// A NULL pool walks nothing. A header that cannot be read fails on the
    /// first step.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image lacks the `Pool` or `PoolBlock` layouts.
    pub fn new(session: &'a AnalysisSession, pool: Address) -> SiftResult<Self>
    {
        let header = session.handle("Pool", pool)?;
        let block_layout = session.layout("PoolBlock")?;
        let mut walker = Self {
            session,
            blocks: Chain::new(block_layout.clone(), "nextBlock", Address::NULL),
            element_size: 0,
            per_block: 0,
            current: None,
        };
        if pool.is_null() {
            return Ok(walker);
        }

        match Self::read_header(session, &header) {
            Ok((element_size, per_block, first)) => {
                tracing::debug!(pool = %pool, element_size, per_block, "walking pool");
                walker.element_size = element_size;
                walker.per_block = per_block;
                walker.blocks = Chain::new(block_layout, "nextBlock", first);
            }
            Err(err) => walker.blocks = Chain::failed(block_layout, err),
        }
        Ok(walker)
    }

    fn read_header(session: &AnalysisSession, header: &TypedHandle) -> SiftResult<(u64, u64, Address)>
    {
        let memory = session.memory();
        let element_size = header.uint(memory, "elementSize")?;
        let per_block = header.uint(memory, "elementsPerBlock")?;
        if element_size == 0 {
            return Err(SiftError::corrupt(header.address(), "pool element size is zero"));
        }
        Ok((element_size, per_block, header.pointer(memory, "firstBlock")?))
    }

    /// Size of one element in bytes.
    pub fn element_size(&self) -> u64
    {
        self.element_size
    }

    fn open_block(&self, block: TypedHandle) -> SiftResult<BlockCursor>
    {
        let first = block.pointer(self.session.memory(), "firstElement")?;
        // Validate the bitmap field exists before stepping into the block.
        block.field_address("usedBitmap")?;
        Ok(BlockCursor {
            block,
            first,
            index: 0,
            word: None,
        })
    }
}

impl<'a> StepWalker<'a> for PoolWalker<'a>
{
    type Item = Address;

    const NAME: &'static str = "PoolWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<Address>
    {
        loop {
            if let Some(cursor) = self.current.as_mut() {
                while cursor.index < self.per_block {
                    let index = cursor.index;
                    cursor.index += 1;

                    if index % 32 == 0 || cursor.word.is_none() {
                        let bitmap = match cursor.block.field_address("usedBitmap") {
                            Ok(bitmap) => bitmap,
                            Err(err) => {
                                self.current = None;
                                return Step::Corrupt(err);
                            }
                        };
                        match self.session.memory().read_u32(bitmap + (index / 32) * 4) {
                            Ok(word) => cursor.word = Some(word),
                            Err(err) => {
                                self.current = None;
                                return Step::Corrupt(err);
                            }
                        }
                    }

                    if cursor.word.is_some_and(|word| word & (1 << (index % 32)) != 0) {
                        return Step::Item(cursor.first + index * self.element_size);
                    }
                }
                self.current = None;
            }

            match self.blocks.step(self.session.memory()) {
                Step::Item(block) => match self.open_block(block) {
                    Ok(cursor) => self.current = Some(cursor),
                    Err(err) => return Step::Corrupt(err),
                },
                Step::End => return Step::End,
                Step::Corrupt(err) => return Step::Corrupt(err),
                Step::Fatal(err) => return Step::Fatal(err),
            }
        }
    }
}

impl Iterator for PoolWalker<'_>
{
    type Item = Address;

    fn next(&mut self) -> Option<Address>
    {
        pump(self)
    }
}

#[cfg(test)]
mod tests
{
    use std::sync::Arc;

    use super::*;
    use crate::memory::{Endian, SnapshotMemory};
    use crate::schema::{ImageSchema, StructLayout};

    #[test]
    fn test_free_slots_are_skipped_across_blocks()
    {
        let endian = Endian::Little;
        // Pool header at 0x100, blocks at 0x200 and 0x300, elements 16 bytes.
        let mut header = Vec::new();
        header.extend_from_slice(&endian.u64_bytes(16));
        header.extend_from_slice(&endian.u64_bytes(3));
        header.extend_from_slice(&endian.u64_bytes(0x200));

        let block = |next: u64, first: u64, bitmap: u32| {
            let mut bytes = Vec::new();
            bytes.extend_from_slice(&endian.u64_bytes(next));
            bytes.extend_from_slice(&endian.u64_bytes(first));
            bytes.extend_from_slice(&endian.u32_bytes(bitmap));
            bytes
        };

        let memory = SnapshotMemory::new(endian)
            .with_range(Address::from(0x100), header)
            .and_then(|m| m.with_range(Address::from(0x200), block(0x300, 0x1000, 0b101)))
            .and_then(|m| m.with_range(Address::from(0x300), block(0, 0x2000, 0b010)))
            .unwrap();
        let schema = ImageSchema::builder(8)
            .structure(
                StructLayout::new("Pool", 24)
                    .with_field("elementSize", 0, 8)
                    .with_field("elementsPerBlock", 8, 8)
                    .with_field("firstBlock", 16, 8),
            )
            .structure(
                StructLayout::new("PoolBlock", 24)
                    .with_field("nextBlock", 0, 8)
                    .with_field("firstElement", 8, 8)
                    .with_field("usedBitmap", 16, 4),
            )
            .build();
        let session = AnalysisSession::builder(Arc::new(memory), schema).build();

        let elements: Vec<_> = PoolWalker::new(&session, Address::from(0x100)).unwrap().collect();
        assert_eq!(
            elements,
            vec![Address::from(0x1000), Address::from(0x1020), Address::from(0x2010)]
        );

        assert_eq!(PoolWalker::new(&session, Address::NULL).unwrap().count(), 0);
    }
}
