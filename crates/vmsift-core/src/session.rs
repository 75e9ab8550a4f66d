//! # Analysis Session
//!
//! Everything one analysis of one image shares.
//!
//! A session bundles the memory accessor, the image schema, the configuration,
//! the corrupt-data listener registry, and the region-keyed flat-monitor cache.
//! Walkers borrow the session for their whole lifetime; nothing in this crate
//! reaches for global state.
//!
//! ## Sharing
//!
//! The flat-monitor cache lives behind an `Arc` so that several sessions over
//! the same image (for example one per report section) scan each heap region
//! only once between them. Everything else is owned per session.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vmsift_core::config::SessionConfig;
//! use vmsift_core::events::CollectingListener;
//! use vmsift_core::memory::{Endian, SnapshotMemory};
//! use vmsift_core::schema::ImageSchema;
//! use vmsift_core::session::AnalysisSession;
//!
//! let memory = SnapshotMemory::new(Endian::Little);
//! let collector = Arc::new(CollectingListener::new());
//! let session = AnalysisSession::builder(Arc::new(memory), ImageSchema::builder(8).build())
//!     .config(SessionConfig::builder().page_size(0).build()?)
//!     .listener(collector.clone())
//!     .build();
//!
//! assert_eq!(session.pointer_size(), 8);
//! assert_eq!(session.events().listener_count(), 1);
//! # Ok::<(), vmsift_core::error::SiftError>(())
//! ```

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::config::SessionConfig;
use crate::error::{SiftError, SiftResult};
use crate::events::{CorruptDataListener, EventRegistry};
use crate::heap::cache::RegionMonitorCache;
use crate::heap::object_model::{HeaderObjectModel, ObjectModel};
use crate::memory::{MemoryAccessor, PagedMemory};
use crate::memtag::{SumCheckTagChecker, TagChecker};
use crate::pointer::TypedHandle;
use crate::schema::{ImageSchema, StructLayout};
use crate::types::Address;

/// Shared context for every walker in one analysis
pub struct AnalysisSession
{
    memory: Arc<dyn MemoryAccessor>,
    schema: Arc<ImageSchema>,
    config: SessionConfig,
    events: EventRegistry,
    monitor_cache: Arc<RegionMonitorCache>,
    object_model: Option<Arc<dyn ObjectModel>>,
    tag_checker: Arc<dyn TagChecker>,
    vm: Option<Address>,
    vm_handle: OnceCell<TypedHandle>,
}

impl AnalysisSession
{
    /// Start building a session over `memory` described by `schema`.
    pub fn builder(memory: Arc<dyn MemoryAccessor>, schema: ImageSchema) -> AnalysisSessionBuilder
    {
        AnalysisSessionBuilder {
            memory,
            schema,
            config: SessionConfig::default(),
            monitor_cache: None,
            object_model: None,
            tag_checker: None,
            vm: None,
            listeners: Vec::new(),
        }
    }

    /// Accessor every read goes through.
    pub fn memory(&self) -> &dyn MemoryAccessor
    {
        self.memory.as_ref()
    }

    /// Schema of the image.
    pub fn schema(&self) -> &ImageSchema
    {
        &self.schema
    }

    /// Configuration in effect.
    pub fn config(&self) -> &SessionConfig
    {
        &self.config
    }

    /// Corrupt-data listener registry.
    pub fn events(&self) -> &EventRegistry
    {
        &self.events
    }

    /// Region-keyed flat-monitor cache.
    pub fn monitor_cache(&self) -> &Arc<RegionMonitorCache>
    {
        &self.monitor_cache
    }

    /// Tag checker used by the allocation-tag scanner.
    pub fn tag_checker(&self) -> &dyn TagChecker
    {
        self.tag_checker.as_ref()
    }

    /// Object model used for heap walking.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` when no model was supplied and the image has no
    /// `Object` layout to build the default one from.
    pub fn object_model(&self) -> SiftResult<&dyn ObjectModel>
    {
        self.object_model
            .as_deref()
            .ok_or_else(|| SiftError::MissingStructure("Object".to_string()))
    }

    /// Width of a target pointer in bytes.
    pub fn pointer_size(&self) -> usize
    {
        self.schema.pointer_size()
    }

    /// Layout of a named structure.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image does not describe it.
    pub fn layout(&self, structure: &str) -> SiftResult<Arc<StructLayout>>
    {
        self.schema.structure(structure)
    }

    /// Bind a structure layout to an address.
    ///
    /// ## Errors
    ///
    /// `MissingStructure` if the image does not describe the structure.
    pub fn handle(&self, structure: &str, address: Address) -> SiftResult<TypedHandle>
    {
        Ok(TypedHandle::new(self.layout(structure)?, address))
    }

    /// Handle to the runtime's root `JavaVM` structure.
    ///
    /// ## Errors
    ///
    /// `IllegalState` if the session was built without a VM address, or
    /// `MissingStructure` if the image has no `JavaVM` layout.
    pub fn vm(&self) -> SiftResult<&TypedHandle>
    {
        self.vm_handle.get_or_try_init(|| {
            let address = self
                .vm
                .ok_or_else(|| SiftError::IllegalState("session has no VM address".to_string()))?;
            self.handle("JavaVM", address)
        })
    }

    /// Report corrupt data to every registered listener.
    pub fn raise(&self, error: SiftError, fatal: bool)
    {
        self.events.raise(error, fatal);
    }
}

impl std::fmt::Debug for AnalysisSession
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("AnalysisSession")
            .field("config", &self.config)
            .field("vm", &self.vm)
            .field("events", &self.events)
            .field("cached_regions", &self.monitor_cache.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`AnalysisSession`]
pub struct AnalysisSessionBuilder
{
    memory: Arc<dyn MemoryAccessor>,
    schema: ImageSchema,
    config: SessionConfig,
    monitor_cache: Option<Arc<RegionMonitorCache>>,
    object_model: Option<Arc<dyn ObjectModel>>,
    tag_checker: Option<Arc<dyn TagChecker>>,
    vm: Option<Address>,
    listeners: Vec<Arc<dyn CorruptDataListener>>,
}

impl AnalysisSessionBuilder
{
    /// Use this configuration instead of the defaults.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self
    {
        self.config = config;
        self
    }

    /// Share a flat-monitor cache with other sessions over the same image.
    #[must_use]
    pub fn monitor_cache(mut self, cache: Arc<RegionMonitorCache>) -> Self
    {
        self.monitor_cache = Some(cache);
        self
    }

    /// Replace the header-based object model.
    #[must_use]
    pub fn object_model(mut self, model: Arc<dyn ObjectModel>) -> Self
    {
        self.object_model = Some(model);
        self
    }

    /// Replace the sum-check tag checker.
    #[must_use]
    pub fn tag_checker(mut self, checker: Arc<dyn TagChecker>) -> Self
    {
        self.tag_checker = Some(checker);
        self
    }

    /// Address of the runtime's `JavaVM` structure.
    #[must_use]
    pub fn vm(mut self, address: Address) -> Self
    {
        self.vm = Some(address);
        self
    }

    /// Register a listener for the whole life of the session.
    #[must_use]
    pub fn listener(mut self, listener: Arc<dyn CorruptDataListener>) -> Self
    {
        self.listeners.push(listener);
        self
    }

    /// Finish building.
    pub fn build(self) -> AnalysisSession
    {
        let memory: Arc<dyn MemoryAccessor> = if self.config.page_size > 0 {
            Arc::new(PagedMemory::with_page_size(self.memory, self.config.page_size))
        } else {
            self.memory
        };

        let object_model = self.object_model.or_else(|| {
            HeaderObjectModel::from_schema(&self.schema)
                .ok()
                .map(|model| Arc::new(model) as Arc<dyn ObjectModel>)
        });

        let events = EventRegistry::new();
        for listener in self.listeners {
            events.register(listener);
        }

        tracing::debug!(
            pointer_size = self.schema.pointer_size(),
            page_size = self.config.page_size,
            vm = ?self.vm,
            "analysis session created"
        );

        AnalysisSession {
            memory,
            schema: Arc::new(self.schema),
            config: self.config,
            events,
            monitor_cache: self.monitor_cache.unwrap_or_default(),
            object_model,
            tag_checker: self.tag_checker.unwrap_or_else(|| Arc::new(SumCheckTagChecker)),
            vm: self.vm,
            vm_handle: OnceCell::new(),
        }
    }
}
