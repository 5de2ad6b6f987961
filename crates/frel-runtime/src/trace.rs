#![forbid(unsafe_code)]

//! Instrumentation hook for external tracers.
//!
//! A [`TraceSink`] receives a [`TraceEvent`] at every defined point of the
//! kernel: datum and closure lifecycle, field and availability sets,
//! subscription edges, notifications and drain boundaries.
//!
//! When no sink is installed the hook costs one `Option` check: events are
//! built lazily inside [`Tracer::emit`] and never allocated.
//!
//! Two sinks ship with the crate:
//! - [`RecordingSink`] collects events in memory (shared handle, for test
//!   harnesses).
//! - [`LogSink`] forwards every event to `tracing` at `TRACE` level.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use crate::datum::Availability;
use crate::identity::{ClosureId, DatumId, NodeId, SubscriptionId};
use crate::selector::Selector;
use crate::value::Value;

/// A tagged kernel event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    DatumCreated {
        datum: DatumId,
        type_name: String,
        owner: Option<ClosureId>,
    },
    DatumDestroyed {
        datum: DatumId,
    },
    ClosureCreated {
        closure: ClosureId,
        template: String,
        parent: Option<ClosureId>,
    },
    ClosureInstantiated {
        closure: ClosureId,
        template: String,
    },
    ClosureDestroyed {
        closure: ClosureId,
    },
    FieldSet {
        node: NodeId,
        field: String,
        old: Value,
        new: Value,
        generation: u64,
    },
    ItemsSet {
        datum: DatumId,
        len: usize,
        generation: u64,
    },
    AvailabilitySet {
        datum: DatumId,
        availability: Availability,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
        generation: u64,
    },
    Subscribed {
        subscription: SubscriptionId,
        source: NodeId,
        target: NodeId,
        selector: Selector,
    },
    Unsubscribed {
        subscription: SubscriptionId,
    },
    Notified {
        subscription: SubscriptionId,
        generation: u64,
    },
    DrainStarted {
        generation: u64,
        pending: usize,
    },
    GenerationDrained {
        generation: u64,
        callbacks: usize,
    },
    DrainFinished {
        generation: u64,
        waves: usize,
        overrun: bool,
    },
}

impl TraceEvent {
    /// Stable tag, matching the serialized `event` field.
    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::DatumCreated { .. } => "datum_created",
            Self::DatumDestroyed { .. } => "datum_destroyed",
            Self::ClosureCreated { .. } => "closure_created",
            Self::ClosureInstantiated { .. } => "closure_instantiated",
            Self::ClosureDestroyed { .. } => "closure_destroyed",
            Self::FieldSet { .. } => "field_set",
            Self::ItemsSet { .. } => "items_set",
            Self::AvailabilitySet { .. } => "availability_set",
            Self::Subscribed { .. } => "subscribed",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::Notified { .. } => "notified",
            Self::DrainStarted { .. } => "drain_started",
            Self::GenerationDrained { .. } => "generation_drained",
            Self::DrainFinished { .. } => "drain_finished",
        }
    }
}

/// Receiver of kernel events.
pub trait TraceSink {
    fn record(&mut self, event: &TraceEvent);
}

/// Holds the optional sink.
#[derive(Default)]
pub(crate) struct Tracer {
    sink: Option<Box<dyn TraceSink>>,
}

impl Tracer {
    pub(crate) fn install(&mut self, sink: Box<dyn TraceSink>) {
        self.sink = Some(sink);
    }

    pub(crate) fn remove(&mut self) -> Option<Box<dyn TraceSink>> {
        self.sink.take()
    }

    #[inline]
    pub(crate) fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Build and deliver an event, only if a sink is installed.
    #[inline]
    pub(crate) fn emit(&mut self, event: impl FnOnce() -> TraceEvent) {
        if let Some(sink) = self.sink.as_mut() {
            sink.record(&event());
        }
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// In-memory sink. Clones share the same event log.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Rc<RefCell<Vec<TraceEvent>>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    /// Tags of every event recorded so far, in order.
    #[must_use]
    pub fn tags(&self) -> Vec<&'static str> {
        self.events.borrow().iter().map(TraceEvent::tag).collect()
    }

    #[must_use]
    pub fn count(&self, tag: &str) -> usize {
        self.events.borrow().iter().filter(|e| e.tag() == tag).count()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// Render the log as JSON lines.
    pub fn to_jsonl(&self) -> serde_json::Result<String> {
        let mut out = String::new();
        for event in self.events.borrow().iter() {
            out.push_str(&serde_json::to_string(event)?);
            out.push('\n');
        }
        Ok(out)
    }
}

impl TraceSink for RecordingSink {
    fn record(&mut self, event: &TraceEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Forwards events to the `tracing` subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&mut self, event: &TraceEvent) {
        tracing::trace!(message = "frel.trace", tag = event.tag(), ?event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_tracer_never_builds_events() {
        let mut tracer = Tracer::default();
        let mut built = false;
        tracer.emit(|| {
            built = true;
            TraceEvent::DrainStarted {
                generation: 0,
                pending: 0,
            }
        });
        assert!(!built);
        assert!(!tracer.is_enabled());
    }

    #[test]
    fn recording_sink_shares_log_across_clones() {
        let sink = RecordingSink::new();
        let mut tracer = Tracer::default();
        tracer.install(Box::new(sink.clone()));
        tracer.emit(|| TraceEvent::DrainStarted {
            generation: 0,
            pending: 2,
        });
        tracer.emit(|| TraceEvent::DrainFinished {
            generation: 1,
            waves: 1,
            overrun: false,
        });
        assert_eq!(sink.tags(), vec!["drain_started", "drain_finished"]);
        assert_eq!(sink.count("drain_started"), 1);

        let jsonl = sink.to_jsonl().unwrap();
        let first = jsonl.lines().next().unwrap();
        assert_eq!(first, r#"{"event":"drain_started","generation":0,"pending":2}"#);

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn removing_the_sink_disables_emission() {
        let sink = RecordingSink::new();
        let mut tracer = Tracer::default();
        tracer.install(Box::new(sink.clone()));
        assert!(tracer.remove().is_some());
        tracer.emit(|| TraceEvent::DrainStarted {
            generation: 0,
            pending: 0,
        });
        assert!(sink.events().is_empty());
    }
}
