//! Local-variable tables.
//!
//! ## Compact stream
//!
//! Each entry adds signed deltas to the running slot number, start of
//! visibility, and visibility length. In the short forms `D` is an unsigned
//! one-bit slot step (successive variables usually take the next slot).
//! Forms by leading bits:
//!
//! | Bytes | Bits | Slot | Start | Length |
//! |-------|------|------|-------|--------|
//! | 1 | `0Dllllll` | `D` | | 6 bits |
//! | 2 | `10Dsssss llllllll` | `D` | 5 bits | 8 bits |
//! | 3 | `110Dssss ssssslll llllllll` | `D` | 9 bits | 11 bits |
//! | 5 | `11100D` then 18 + 16 bits | `D` | 18 bits | 16 bits |
//! | 13 | `11110000` then three 32-bit words | 32 bits | 32 bits | 32 bits |
//!
//! The writer ORs [`VARIABLE_HAS_GENERIC_FLAG`] into an entry's length before
//! taking the delta against the previous (unflagged) length. The flag is read
//! back from the accumulated length and masked off it.
//!
//! Every entry is followed by self-relative references in target byte order:
//! name, signature, and the generic signature when the flag is set.
//!
//! ## Legacy records
//!
//! Fixed-size `VariableInfo` records holding absolute values and the same
//! three references as fields.

use std::sync::Arc;

use super::{sign_extend, MethodDebugInfo};
use crate::error::{SiftError, SiftResult};
use crate::memory::MemoryAccessor;
use crate::pointer::{read_self_relative, TypedHandle};
use crate::schema::version::LOCAL_VARIABLE_TABLE_VERSION;
use crate::schema::StructLayout;
use crate::session::AnalysisSession;
use crate::types::Address;
use crate::walk::{pump, Step, StepWalker};

/// One decoded local variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalVariable
{
    /// Address of the entry in the table
    pub address: Address,
    /// Local variable slot
    pub slot: u32,
    /// First bytecode location where the variable is visible
    pub start_visibility: u32,
    /// Number of bytecode locations the variable stays visible for
    pub visibility_length: u32,
    /// UTF-8 record holding the name
    pub name: Option<Address>,
    /// UTF-8 record holding the signature
    pub signature: Option<Address>,
    /// UTF-8 record holding the generic signature, if there is one
    pub generic_signature: Option<Address>,
}

impl LocalVariable
{
    /// Variable name.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the name is NULL or unreadable.
    pub fn name(&self, session: &AnalysisSession) -> SiftResult<String>
    {
        self.utf8(session, self.name, "name")
    }

    /// Variable signature.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the signature is NULL or unreadable.
    pub fn signature(&self, session: &AnalysisSession) -> SiftResult<String>
    {
        self.utf8(session, self.signature, "signature")
    }

    /// Generic signature, if the entry has one.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if the generic signature is unreadable.
    pub fn generic_signature(&self, session: &AnalysisSession) -> SiftResult<Option<String>>
    {
        self.generic_signature
            .map(|address| session.memory().read_utf8(address))
            .transpose()
    }

    fn utf8(&self, session: &AnalysisSession, target: Option<Address>, what: &str) -> SiftResult<String>
    {
        let target = target.ok_or_else(|| SiftError::corrupt(self.address, format!("local variable without a {what}")))?;
        session.memory().read_utf8(target)
    }
}

/// Bit of an accumulated visibility length marking a generic signature reference.
pub const VARIABLE_HAS_GENERIC_FLAG: u32 = 0x1_0000;

/// Running totals carried from entry to entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalVariableState
{
    slot: u32,
    start_visibility: u32,
    visibility_length: u32,
}

impl LocalVariableState
{
    /// Apply one entry's deltas; also returns the entry's generic flag.
    fn add(self, slot: i64, start: i64, length: i64) -> (Self, bool)
    {
        let length = self.visibility_length.wrapping_add_signed(length as i32);
        let next = Self {
            slot: self.slot.wrapping_add_signed(slot as i32),
            start_visibility: self.start_visibility.wrapping_add_signed(start as i32),
            visibility_length: length & !VARIABLE_HAS_GENERIC_FLAG,
        };
        (next, length & VARIABLE_HAS_GENERIC_FLAG != 0)
    }
}

/// A decoded compact header: state after the entry, its length, and the generic flag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactHeader
{
    /// Totals including this entry
    pub state: LocalVariableState,
    /// Bytes the header occupies
    pub len: usize,
    /// Whether a generic signature reference follows
    pub generic: bool,
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
    } else if first & 0xF8 == 0xE0 {
        Some(5)
    } else if first == 0xF0 {
        Some(13)
    } else {
        None
    }
}

/// Decode one compact header (all of its bytes) on top of `state`.
///
/// Returns `None` for an unknown prefix or a slice of the wrong length.
pub fn apply_compact(bytes: &[u8], state: LocalVariableState) -> Option<CompactHeader>
{
    let first = *bytes.first()?;
    let len = compact_form_len(first)?;
    if len != bytes.len() {
        return None;
    }
    let value = bytes.iter().take(5).fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    let step = |bit: u32| i64::from(value >> bit & 1 == 1);

    let (next, generic) = match len {
        1 => state.add(step(6), 0, sign_extend(value & 0x3F, 6)),
        2 => state.add(step(13), sign_extend((value >> 8) & 0x1F, 5), sign_extend(value & 0xFF, 8)),
        3 => state.add(step(20), sign_extend((value >> 11) & 0x1FF, 9), sign_extend(value & 0x7FF, 11)),
        5 => state.add(step(34), sign_extend((value >> 16) & 0x3_FFFF, 18), sign_extend(value & 0xFFFF, 16)),
        _ => {
            let word = |index: usize| {
                let start = 1 + index * 4;
                i64::from(i32::from_be_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]]))
            };
            state.add(word(0), word(1), word(2))
        }
    };
    Some(CompactHeader {
        state: next,
        len,
        generic,
    })
}

/// Table layout, chosen once from `LOCAL_VARIABLE_TABLE_VERSION`
#[derive(Debug, Clone)]
pub enum LocalVariableDecoder
{
    /// Fixed-size records with absolute values
    Legacy
    {
        /// Layout of one record
        layout: Arc<StructLayout>,
    },
    /// Prefix-coded delta stream
    Compact,
}

impl LocalVariableDecoder
{
    /// Decoder for the image's local-variable layout.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the legacy layout is selected but not described.
    pub fn for_session(session: &AnalysisSession) -> SiftResult<Self>
    {
        let version = session.schema().algorithm_version(LOCAL_VARIABLE_TABLE_VERSION);
        tracing::debug!(version, "local variable decoder selected");
        if version == 0 {
            Ok(Self::Legacy {
                layout: session.layout("VariableInfo")?,
            })
        } else {
            Ok(Self::Compact)
        }
    }

    /// Decode the entry at `cursor`.
    ///
    /// Returns the entry, the new state, and the address of the next entry.
    ///
    /// ## Errors
    ///
    /// `CorruptData` for unreadable bytes or an unknown compact prefix.
    pub fn decode(
        &self,
        memory: &dyn MemoryAccessor,
        cursor: Address,
        state: LocalVariableState,
    ) -> SiftResult<(LocalVariable, LocalVariableState, Address)>
    {
        match self {
            Self::Legacy { layout } => {
                let record = TypedHandle::new(layout.clone(), cursor);
                let state = LocalVariableState {
                    slot: record.u32(memory, "slotNumber")?,
                    start_visibility: record.u32(memory, "startVisibility")?,
                    visibility_length: record.u32(memory, "visibilityLength")?,
                };
                let variable = LocalVariable {
                    address: cursor,
                    slot: state.slot,
                    start_visibility: state.start_visibility,
                    visibility_length: state.visibility_length,
                    name: record.self_relative(memory, "name")?,
                    signature: record.self_relative(memory, "signature")?,
                    generic_signature: record.self_relative(memory, "genericSignature")?,
                };
                Ok((variable, state, record.end()))
            }
            Self::Compact => {
                let first = memory.read_u8(cursor)?;
                let len = compact_form_len(first).ok_or_else(|| {
                    SiftError::corrupt(cursor, format!("unknown local variable encoding 0x{first:02x}"))
                })?;
                let bytes = memory.read_bytes(cursor, len)?;
                let header = apply_compact(&bytes, state)
                    .ok_or_else(|| SiftError::corrupt(cursor, "malformed local variable entry"))?;

                let refs = cursor + header.len as u64;
                let name = read_self_relative(memory, refs)?;
                let signature = read_self_relative(memory, refs + 4)?;
                let (generic_signature, next) = if header.generic {
                    (read_self_relative(memory, refs + 8)?, refs + 12)
                } else {
                    (None, refs + 8)
                };

                let state = header.state;
                let variable = LocalVariable {
                    address: cursor,
                    slot: state.slot,
                    start_visibility: state.start_visibility,
                    visibility_length: state.visibility_length,
                    name,
                    signature,
                    generic_signature,
                };
                Ok((variable, state, next))
            }
        }
    }
}

/// Yields the local variables of one method in table order
pub struct LocalVariableWalker<'a>
{
    session: &'a AnalysisSession,
    decoder: LocalVariableDecoder,
    cursor: Address,
    remaining: u64,
    state: LocalVariableState,
}

impl<'a> LocalVariableWalker<'a>
{
    /// Walk the table of the method whose debug info is at `debug_info`.
    ///
    /// ## Errors
    ///
    /// Fails if the header cannot be read or a layout is not described.
    pub fn new(session: &'a AnalysisSession, debug_info: Address) -> SiftResult<Self>
    {
        let info = MethodDebugInfo::read(session, debug_info)?;
        Ok(Self::with_decoder(
            session,
            LocalVariableDecoder::for_session(session)?,
            info.variables_start(session)?,
            info.variable_count,
        ))
    }

    /// Walk `count` entries starting at `cursor` with an explicit decoder.
    pub fn with_decoder(session: &'a AnalysisSession, decoder: LocalVariableDecoder, cursor: Address, count: u64) -> Self
    {
        Self {
            session,
            decoder,
            cursor,
            remaining: count,
            state: LocalVariableState::default(),
        }
    }

    /// Address just past the last decoded entry.
    pub fn cursor(&self) -> Address
    {
        self.cursor
    }
}

impl<'a> StepWalker<'a> for LocalVariableWalker<'a>
{
    type Item = LocalVariable;

    const NAME: &'static str = "LocalVariableWalker";

    fn session(&self) -> &'a AnalysisSession
    {
        self.session
    }

    fn step(&mut self) -> Step<LocalVariable>
    {
        if self.remaining == 0 {
            return Step::End;
        }
        match self.decoder.decode(self.session.memory(), self.cursor, self.state) {
            Ok((variable, state, next)) => {
                self.remaining -= 1;
                self.state = state;
                self.cursor = next;
                Step::Item(variable)
            }
            Err(err) => {
                self.remaining = 0;
                Step::Fatal(err)
            }
        }
    }
}

impl Iterator for LocalVariableWalker<'_>
{
    type Item = LocalVariable;

    fn next(&mut self) -> Option<LocalVariable>
    {
        pump(self)
    }
}
