//! Line-number tables.
//!
//! ## Compact stream
//!
//! Each entry adds a location delta and a line delta to the running state.
//! The high bits of the first byte pick the form (bytes in stream order,
//! most significant first):
//!
//! | Bytes | Bits | Location | Line |
//! |-------|------|----------|------|
//! | 1 | `0xxxxxyy` | +5 bits | +2 bits |
//! | 2 | `10xxxxxY YYYYYYYY` | +5 bits | 9-bit signed |
//! | 3 | `110xxxxx xxYYYYYY YYYYYYYY` | +7 bits | 14-bit signed |
//! | 5 | `1110000Y ######## ######## YYYYYYYY YYYYYYYY` | absolute 16 bits | 17-bit signed |
//!
//! ## Legacy records
//!
//! Fixed-size `LineNumber` records holding an absolute line number. The
//! location of legacy entries is always reported as 0.

use std::sync::Arc;

use super::{sign_extend, MethodDebugInfo};
use crate::error::{SiftError, SiftResult};
use crate::memory::MemoryAccessor;
use crate::pointer::TypedHandle;
use crate::schema::version::LINE_NUMBER_TABLE_VERSION;
use crate::schema::StructLayout;
use crate::session::AnalysisSession;
use crate::types::Address;
use crate::walk::{pump, Step, StepWalker};

/// One decoded line-number entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LineNumber
{
    /// Bytecode location
    pub location: u32,
    /// Source line
    pub line_number: u32,
}

/// Running totals carried from entry to entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineNumberState
{
    location: u32,
    line_number: u32,
}

impl LineNumberState
{
    /// Entry described by the current totals.
    pub fn entry(self) -> LineNumber
    {
        LineNumber {
            location: self.location,
            line_number: self.line_number,
        }
    }

    fn add(self, location: u32, line_delta: i64) -> Self
    {
        Self {
            location: self.location.wrapping_add(location),
            line_number: self.line_number.wrapping_add_signed(line_delta as i32),
        }
    }
}

/// Length of the compact form starting with `first`, if it is one.
pub fn compact_form_len(first: u8) -> Option<usize>
{
    if first & 0x80 == 0 {
        Some(1)
    } else if first & 0xC0 == 0x80 {
        Some(2)
    } else if first & 0xE0 == 0xC0 {
        Some(3)
    } else if first & 0xFE == 0xE0 {
        Some(5)
    } else {
        None
    }
}

/// Apply one compact entry (all of its bytes) to `state`.
///
/// Returns `None` for an unknown prefix or a slice of the wrong length.
pub fn apply_compact(bytes: &[u8], state: LineNumberState) -> Option<LineNumberState>
{
    let first = *bytes.first()?;
    if compact_form_len(first)? != bytes.len() {
        return None;
    }
    let value = bytes.iter().fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));

    let next = match bytes.len() {
        1 => state.add(u32::from((first >> 2) & 0x1F), i64::from(first & 0x3)),
        2 => state.add(((value >> 9) & 0x1F) as u32, sign_extend(value & 0x1FF, 9)),
        3 => state.add(((value >> 14) & 0x7F) as u32, sign_extend(value & 0x3FFF, 14)),
        _ => {
            let location = (value >> 16) & 0xFFFF;
            let line = (u64::from(first & 1) << 16) | (value & 0xFFFF);
            LineNumberState {
                location: location as u32,
                ..state
            }
            .add(0, sign_extend(line, 17))
        }
    };
    Some(next)
}

/// Table layout, chosen once from `LINE_NUMBER_TABLE_VERSION`
#[derive(Debug, Clone)]
pub enum LineNumberDecoder
{
    /// Fixed-size records with absolute line numbers
    Legacy
    {
        /// Layout of one record
        layout: Arc<StructLayout>,
    },
    /// Prefix-coded delta stream
    Compact,
}

impl LineNumberDecoder
{
    /// Decoder for the image's line-number layout.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the legacy layout is selected but not described.
    pub fn for_session(session: &AnalysisSession) -> SiftResult<Self>
    {
        let version = session.schema().algorithm_version(LINE_NUMBER_TABLE_VERSION);
        tracing::debug!(version, "line number decoder selected");
        if version == 0 {
            Ok(Self::Legacy {
                layout: session.layout("LineNumber")?,
            })
        } else {
            Ok(Self::Compact)
        }
    }

    /// Decode the entry at `cursor`, returning the new state and the next cursor.
    ///
    /// ## Errors
    ///
    /// `CorruptData` for unreadable bytes or an unknown compact prefix.
    pub fn decode(
        &self,
        memory: &dyn MemoryAccessor,
        cursor: Address,
        state: LineNumberState,
    ) -> SiftResult<(LineNumberState, Address)>
    {
        match self {
            Self::Legacy { layout } => {
                let record = TypedHandle::new(layout.clone(), cursor);
                let line_number = record.u32(memory, "lineNumber")?;
                Ok((LineNumberState { line_number, ..state }, record.end()))
            }
            Self::Compact => {
                let first = memory.read_u8(cursor)?;
                let len = compact_form_len(first).ok_or_else(|| {
                    SiftError::corrupt(cursor, format!("unknown line number encoding 0x{first:02x}"))
                })?;
                let bytes = memory.read_bytes(cursor, len)?;
                let next = apply_compact(&bytes, state)
                    .ok_or_else(|| SiftError::corrupt(cursor, "malformed line number entry"))?;
                Ok((next, cursor + len as u64))
            }
        }
    }
}

/// Yields the line-number entries of one method in table order
pub struct LineNumberWalker<'a>
{
    session: &'a AnalysisSession,
    decoder: LineNumberDecoder,
    cursor: Address,
    remaining: u64,
    state: LineNumberState,
}

impl<'a> LineNumberWalker<'a>
{
    /// Walk the table of the method whose debug info is at `debug_info`.
    ///
    /// ## Errors
    ///
    /// Fails if the header cannot be read or the layout is not described.
    pub fn new(session: &'a AnalysisSession, debug_info: Address) -> SiftResult<Self>
    {
        let info = MethodDebugInfo::read(session, debug_info)?;
        Ok(Self::with_decoder(
            session,
            LineNumberDecoder::for_session(session)?,
            info.line_numbers_start(),
            info.line_number_count,
        ))
    }

    /// Walk `count` entries starting at `cursor` with an explicit decoder.
    pub fn with_decoder(session: &'a AnalysisSession, decoder: LineNumberDecoder, cursor: Address, count: u64) -> Self
    {
        Self {
            session,
            decoder,
            cursor,
            remaining: count,
            state: LineNumberState::default(),
        }
    }

    /// Entries not yet decoded.
    pub fn remaining(&self) -> u64
    {
        self.remaining
    }
}

impl<'a> StepWalker<'a> for LineNumberWalker<'a>
{
    type Item = LineNumber;

    const NAME: &'static str = "LineNumberWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<LineNumber>
    {
        if self.remaining == 0 {
            return Step::End;
        }
        match self.decoder.decode(self.session.memory(), self.cursor, self.state) {
            Ok((state, next)) => {
                self.remaining -= 1;
                self.state = state;
                self.cursor = next;
                Step::Item(state.entry())
            }
            Err(err) => {
                self.remaining = 0;
                Step::Fatal(err)
            }
        }
    }
}

impl Iterator for LineNumberWalker<'_>
{
    type Item = LineNumber;

    fn next(&mut self) -> Option<LineNumber>
    {
        pump(self)
    }
}
