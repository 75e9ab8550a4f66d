//! Algorithm version names.
//!
//! Encodings that changed between runtime releases record a version number in
//! the image metadata. Decoders resolve the version once when they are built
//! and pick a concrete variant from it; nothing re-checks per element.

/// Selects the legacy (0) or compact (1+) line-number table encoding.
pub const LINE_NUMBER_TABLE_VERSION: &str = "LINE_NUMBER_TABLE_VERSION";

/// Selects the legacy (0) or compact (1+) local-variable table encoding.
pub const LOCAL_VARIABLE_TABLE_VERSION: &str = "LOCAL_VARIABLE_TABLE_VERSION";

/// Selects the pooled (0) or plain array (1+) class hash table.
pub const CLASS_TABLE_VERSION: &str = "CLASS_TABLE_VERSION";

/// Source of algorithm versions
///
/// Versions absent from the image resolve to 0, the oldest layout.
pub trait VersionResolver
{
    /// Version recorded for `name`, or 0.
    fn version_of(&self, name: &str) -> u32;
}
