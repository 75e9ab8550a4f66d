//! # Method Debug Tables
//!
//! Each method's debug information starts with a `MethodDebugInfo` header,
//! followed by its line-number table and then its local-variable table.
//!
//! Both tables come in a legacy layout (fixed-size records with absolute
//! values) and a compact layout (prefix-coded byte streams of deltas). The
//! layout is chosen once per walker from the image's algorithm versions:
//!
//! | Version name | 0 | 1 and later |
//! |--------------|---|-------------|
//! | `LINE_NUMBER_TABLE_VERSION` | legacy records | compact stream |
//! | `LOCAL_VARIABLE_TABLE_VERSION` | legacy records | compact stream |
//!
//! Compact entries only make sense relative to the entries before them, so
//! decoders thread an explicit state value from entry to entry and cannot be
//! restarted part way through a table. A decode failure ends the walk.

pub mod line_numbers;
pub mod local_variables;

pub use line_numbers::{LineNumber, LineNumberDecoder, LineNumberState, LineNumberWalker};
pub use local_variables::{LocalVariable, LocalVariableDecoder, LocalVariableState, LocalVariableWalker};

use crate::error::SiftResult;
use crate::pointer::TypedHandle;
use crate::schema::version::LINE_NUMBER_TABLE_VERSION;
use crate::session::AnalysisSession;
use crate::types::Address;

/// Sign-extend the low `bits` bits of `value`.
///
/// ```rust
/// use vmsift_core::debuginfo::sign_extend;
///
/// assert_eq!(sign_extend(0x1ff, 9), -1);
/// assert_eq!(sign_extend(0x0ff, 9), 255);
/// assert_eq!(sign_extend(0x2_0000, 18), -0x2_0000);
/// ```
pub fn sign_extend(value: u64, bits: u32) -> i64
{
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Header of one method's debug tables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDebugInfo
{
    handle: TypedHandle,
    /// Entries in the line-number table
    pub line_number_count: u64,
    /// Byte length of the compact line-number stream (0 for legacy tables)
    pub line_numbers_size: u64,
    /// Entries in the local-variable table
    pub variable_count: u64,
}

impl MethodDebugInfo
{
    /// Read the header at `address`.
    ///
    /// ## Errors
    ///
    /// `CorruptData` if a count cannot be read, or `MissingStructure` if the
    /// image has no `MethodDebugInfo` layout.
    pub fn read(session: &AnalysisSession, address: Address) -> SiftResult<Self>
    {
        let handle = session.handle("MethodDebugInfo", address)?;
        let memory = session.memory();
        // Legacy layouts have no stream length.
        let line_numbers_size = if handle.layout().has_field("lineNumbersCompressedSize") {
            handle.uint(memory, "lineNumbersCompressedSize")?
        } else {
            0
        };
        Ok(Self {
            line_number_count: handle.uint(memory, "lineNumberCount")?,
            line_numbers_size,
            variable_count: handle.uint(memory, "varInfoCount")?,
            handle,
        })
    }

    /// Address of the header.
    pub fn address(&self) -> Address
    {
        self.handle.address()
    }

    /// First byte of the line-number table.
    pub fn line_numbers_start(&self) -> Address
    {
        self.handle.end()
    }

    /// First byte of the local-variable table.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the legacy `LineNumber` layout is needed and absent.
    pub fn variables_start(&self, session: &AnalysisSession) -> SiftResult<Address>
    {
        let table = if session.schema().algorithm_version(LINE_NUMBER_TABLE_VERSION) == 0 {
            self.line_number_count * session.layout("LineNumber")?.size()
        } else {
            self.line_numbers_size
        };
        Ok(self.line_numbers_start() + table)
    }
}
