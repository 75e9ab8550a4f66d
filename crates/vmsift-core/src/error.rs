//! # Error Types
//!
//! General error handling for image walking.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.

use thiserror::Error;

use crate::types::Address;

/// Main error type for image analysis operations
///
/// This enum represents all the ways reading or interpreting a target image
/// can fail. Walkers rarely hand these to their callers directly: corrupt data
/// is reported through the session's event channel and the walker either skips
/// the element or stops.
///
/// ## Error Categories
///
/// 1. **Data errors**: CorruptData, MemoryFault
/// 2. **Schema errors**: MissingStructure, MissingField, MissingConstant
/// 3. **Walker errors**: NoMoreElements, Unsupported, IllegalState
/// 4. **Configuration errors**: Config
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SiftError
{
    /// A read or a structural consistency check failed on otherwise plausible input
    ///
    /// Raised for zero-sized records, bad link fields, failed eyecatcher
    /// checks and any remote read that could not be satisfied while following
    /// a structure.
    #[error("Corrupt data at {address}: {message}")]
    CorruptData
    {
        /// Address of the structure or field being read
        address: Address,
        /// Description of what was wrong
        message: String,
    },

    /// The memory accessor could not supply the requested bytes
    ///
    /// This happens when the range is not captured in a core file, is not
    /// mapped in the live target, or straddles the end of a mapping.
    #[error("Memory fault reading {length} bytes at {address}")]
    MemoryFault
    {
        /// Start of the failed read
        address: Address,
        /// Number of bytes requested
        length: usize,
    },

    /// The image schema has no layout for the named structure
    #[error("No layout for structure {0}")]
    MissingStructure(String),

    /// The structure layout has no field with this name
    #[error("Structure {structure} has no field {field}")]
    MissingField
    {
        /// Structure that was searched
        structure: String,
        /// Field that was requested
        field: String,
    },

    /// The image schema does not define the named constant
    #[error("No constant named {0}")]
    MissingConstant(String),

    /// A walker was advanced after it reported that it had no more elements
    #[error("No more elements")]
    NoMoreElements,

    /// Mutation or removal was requested from a read-only walker
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// An internal invariant of a walker was violated
    ///
    /// This points at a defect in the walker itself, not in the image.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SiftError
{
    /// Build a [`SiftError::CorruptData`] for `address`.
    pub fn corrupt(address: Address, message: impl Into<String>) -> Self
    {
        Self::CorruptData {
            address,
            message: message.into(),
        }
    }

    /// Whether the error describes bad data in the image rather than a caller mistake.
    ///
    /// Memory faults and schema gaps count as corrupt data once a walker is
    /// following pointers: both mean the image cannot be trusted at that spot.
    #[must_use]
    pub fn is_corrupt_data(&self) -> bool
    {
        matches!(
            self,
            Self::CorruptData { .. } | Self::MemoryFault { .. } | Self::MissingField { .. } | Self::MissingStructure(_)
        )
    }

    /// Address associated with the error, if any.
    #[must_use]
    pub fn address(&self) -> Option<Address>
    {
        match self {
            Self::CorruptData { address, .. } | Self::MemoryFault { address, .. } => Some(*address),
            _ => None,
        }
    }
}

/// Convenience type alias for `Result<T, SiftError>`
///
/// ```rust
/// use vmsift_core::error::SiftResult;
/// fn foo() -> SiftResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type SiftResult<T> = std::result::Result<T, SiftError>;
