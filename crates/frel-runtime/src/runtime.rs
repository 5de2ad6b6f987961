#![forbid(unsafe_code)]

//! The runtime handle.
//!
//! [`Runtime`] owns every table of the kernel: the datum and closure stores,
//! the subscription registry, the scheduler, the metadata registry and the
//! event queue. Operations are spread over the modules that own their
//! concern (`datum`, `closure`, `store`, `subscription`, `scheduler`,
//! `lifecycle`, `event`, `snapshot`); this module only holds the struct and
//! its introspection helpers.
//!
//! # Threading
//!
//! A runtime is single-threaded and not `Send`: callbacks are `Rc` closures
//! and run on the thread that calls [`Runtime::drain`]. Other threads talk
//! to it through an [`EventSender`](crate::EventSender).

use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};

use ahash::AHashMap;

use crate::closure::Closure;
use crate::config::RuntimeConfig;
use crate::datum::{Datum, Revisions};
use crate::error::{Result, RuntimeError};
use crate::event::Event;
use crate::identity::{ClosureId, DatumId, IdAllocator, NodeId};
use crate::metadata::MetadataRegistry;
use crate::scheduler::Scheduler;
use crate::subscription::SubscriptionRegistry;
use crate::trace::{TraceSink, Tracer};

/// Reactive kernel state.
pub struct Runtime {
    pub(crate) config: RuntimeConfig,
    pub(crate) ids: IdAllocator,
    pub(crate) datums: AHashMap<DatumId, Datum>,
    pub(crate) closures: AHashMap<ClosureId, Closure>,
    pub(crate) registry: SubscriptionRegistry,
    pub(crate) scheduler: Scheduler,
    pub(crate) metadata: MetadataRegistry,
    pub(crate) events_tx: Sender<Event>,
    pub(crate) events_rx: Receiver<Event>,
    pub(crate) tracer: Tracer,
}

impl Runtime {
    /// Create a runtime with default configuration.
    #[must_use]
    pub fn new(metadata: MetadataRegistry) -> Self {
        Self::with_config(metadata, RuntimeConfig::default())
    }

    #[must_use]
    pub fn with_config(metadata: MetadataRegistry, config: RuntimeConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        tracing::debug!(
            message = "runtime.new",
            templates = metadata.len(),
            gen_limit = config.gen_limit,
            entry = %config.entry_template,
        );
        Self {
            config,
            ids: IdAllocator::default(),
            datums: AHashMap::new(),
            closures: AHashMap::new(),
            registry: SubscriptionRegistry::default(),
            scheduler: Scheduler::default(),
            metadata,
            events_tx,
            events_rx,
            tracer: Tracer::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    #[must_use]
    pub fn metadata(&self) -> &MetadataRegistry {
        &self.metadata
    }

    /// Register templates after construction.
    pub fn metadata_mut(&mut self) -> &mut MetadataRegistry {
        &mut self.metadata
    }

    /// Install the instrumentation hook, replacing any previous sink.
    pub fn set_trace_sink(&mut self, sink: impl TraceSink + 'static) {
        self.tracer.install(Box::new(sink));
    }

    /// Remove the instrumentation hook and hand it back.
    pub fn clear_trace_sink(&mut self) -> Option<Box<dyn TraceSink>> {
        self.tracer.remove()
    }

    /// Whether `node` names a live datum or closure.
    #[must_use]
    pub fn contains(&self, node: impl Into<NodeId>) -> bool {
        match node.into() {
            NodeId::Datum(id) => self.datums.contains_key(&id),
            NodeId::Closure(id) => self.closures.contains_key(&id),
        }
    }

    #[must_use]
    pub fn datum_count(&self) -> usize {
        self.datums.len()
    }

    #[must_use]
    pub fn closure_count(&self) -> usize {
        self.closures.len()
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry.len()
    }

    /// Subscriptions waiting for the next wave.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_len()
    }

    /// Generation of the most recent wave; `0` before the first drain.
    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.scheduler.generation()
    }

    /// Whether a drain is running (i.e. the caller is inside a callback).
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.scheduler.is_draining()
    }

    /// Revision counters of a datum or closure.
    pub fn revisions(&self, node: impl Into<NodeId>) -> Result<Revisions> {
        match node.into() {
            NodeId::Datum(id) => Ok(self.datum_ref(id)?.revisions),
            NodeId::Closure(id) => Ok(self.closure_ref(id)?.revisions),
        }
    }

    pub(crate) fn set_generation_of(&self, node: NodeId) -> Result<u64> {
        match node {
            NodeId::Datum(id) => self
                .datums
                .get(&id)
                .map(|d| d.set_generation)
                .ok_or(RuntimeError::UnknownDatum(id)),
            NodeId::Closure(id) => self
                .closures
                .get(&id)
                .map(|c| c.set_generation)
                .ok_or(RuntimeError::UnknownClosure(id)),
        }
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("datums", &self.datums.len())
            .field("closures", &self.closures.len())
            .field("subscriptions", &self.registry.len())
            .field("functions", &self.registry.function_count())
            .field("scheduler", &self.scheduler)
            .field("metadata", &self.metadata)
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}
