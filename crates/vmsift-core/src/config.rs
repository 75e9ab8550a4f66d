//! Session configuration.
//!
//! Knobs that change how hard a session works, never what it finds. Values
//! come from code through [`SessionConfig::builder`] or from the environment
//! through [`SessionConfig::from_env`]:
//!
//! - `VMSIFT_PAGE_SIZE`: page cache size in bytes (0 disables the cache)
//! - `VMSIFT_TAG_ALIGNMENT`: alignment of allocation tag candidates
//! - `VMSIFT_MAX_RECORDS`: records read from one segment before giving up on it

use crate::error::{SiftError, SiftResult};
use crate::memory::cache::DEFAULT_PAGE_SIZE;

/// Default alignment used when searching for allocation tags.
pub const DEFAULT_TAG_ALIGNMENT: u64 = 8;

/// Default cap on class records read from a single segment.
pub const DEFAULT_MAX_RECORDS_PER_SEGMENT: usize = 1 << 20;

/// Tunables for one [`AnalysisSession`](crate::session::AnalysisSession)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig
{
    /// Page size of the read-through cache; 0 reads the accessor directly
    pub page_size: usize,
    /// Alignment of allocation tag candidates
    pub tag_alignment: u64,
    /// Records read from one segment before the segment is declared corrupt
    pub max_records_per_segment: usize,
    /// Force the unused-slab category on or off in the legacy category list
    ///
    /// `None` follows the image (`PORT_HAS_UNUSED_SLAB_CATEGORY`).
    pub unused_slab_category: Option<bool>,
}

impl Default for SessionConfig
{
    fn default() -> Self
    {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            tag_alignment: DEFAULT_TAG_ALIGNMENT,
            max_records_per_segment: DEFAULT_MAX_RECORDS_PER_SEGMENT,
            unused_slab_category: None,
        }
    }
}

impl SessionConfig
{
    /// Start from the defaults.
    #[must_use]
    pub fn builder() -> SessionConfigBuilder
    {
        SessionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults overridden by `VMSIFT_*` environment variables.
    ///
    /// ## Errors
    ///
    /// `Config` if a variable is set but is not a valid number, or the
    /// resulting configuration fails [`validate`](Self::validate).
    pub fn from_env() -> SiftResult<Self>
    {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SiftResult<Self>
    {
        fn parse<T: std::str::FromStr>(name: &str, value: Option<String>) -> SiftResult<Option<T>>
        {
            value
                .map(|raw| {
                    raw.trim()
                        .parse()
                        .map_err(|_| SiftError::Config(format!("{name}={raw} is not a number")))
                })
                .transpose()
        }

        let mut builder = Self::builder();
        if let Some(size) = parse("VMSIFT_PAGE_SIZE", lookup("VMSIFT_PAGE_SIZE"))? {
            builder = builder.page_size(size);
        }
        if let Some(alignment) = parse("VMSIFT_TAG_ALIGNMENT", lookup("VMSIFT_TAG_ALIGNMENT"))? {
            builder = builder.tag_alignment(alignment);
        }
        if let Some(limit) = parse("VMSIFT_MAX_RECORDS", lookup("VMSIFT_MAX_RECORDS"))? {
            builder = builder.max_records_per_segment(limit);
        }
        builder.build()
    }

    /// Check the configuration for values no walk can use.
    ///
    /// ## Errors
    ///
    /// `Config` for a tag alignment that is zero or not a power of two, or a
    /// zero record limit.
    pub fn validate(&self) -> SiftResult<()>
    {
        if !self.tag_alignment.is_power_of_two() {
            return Err(SiftError::Config(format!(
                "tag alignment {} is not a power of two",
                self.tag_alignment
            )));
        }
        if self.max_records_per_segment == 0 {
            return Err(SiftError::Config("record limit must be positive".to_string()));
        }
        Ok(())
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder
{
    config: SessionConfig,
}

impl SessionConfigBuilder
{
    /// Page size of the read-through cache (0 disables it).
    #[must_use]
    pub fn page_size(mut self, page_size: usize) -> Self
    {
        self.config.page_size = page_size;
        self
    }

    /// Alignment of allocation tag candidates.
    #[must_use]
    pub fn tag_alignment(mut self, alignment: u64) -> Self
    {
        self.config.tag_alignment = alignment;
        self
    }

    /// Records read from one segment before giving up on it.
    #[must_use]
    pub fn max_records_per_segment(mut self, limit: usize) -> Self
    {
        self.config.max_records_per_segment = limit;
        self
    }

    /// Force the unused-slab category on or off.
    #[must_use]
    pub fn unused_slab_category(mut self, include: bool) -> Self
    {
        self.config.unused_slab_category = Some(include);
        self
    }

    /// Validate and finish.
    ///
    /// ## Errors
    ///
    /// See [`SessionConfig::validate`].
    pub fn build(self) -> SiftResult<SessionConfig>
    {
        self.config.validate()?;
        Ok(self.config)
    }
}
