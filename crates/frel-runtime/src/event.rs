#![forbid(unsafe_code)]

//! External event intake.
//!
//! Producers on any thread hold an [`EventSender`] and push [`Event`]s; the
//! owning thread applies them with [`Runtime::drain_events`], which then runs
//! the scheduler. `put_event` only appends to the queue and never touches
//! kernel state.
//!
//! # Identity boundary
//!
//! Events carry raw integer ids, the form renderers and host bridges hold.
//! They are decoded here with the parity check; a datum event naming an odd
//! id (or the reverse) is rejected with
//! [`RuntimeError::IdentityViolation`](crate::RuntimeError::IdentityViolation).
//!
//! # Failure Modes
//!
//! - A rejected event (bad id, unknown node, shape mismatch, failing
//!   `Invoke`) is logged at `WARN` and counted in
//!   [`DrainReport::events_rejected`]; later events still apply.
//! - Events queued by callbacks during the drain stay queued until the next
//!   `drain_events` call.

use std::fmt;
use std::sync::mpsc::{SendError, Sender};

use crate::datum::Availability;
use crate::error::{Result, RuntimeError};
use crate::identity::{DatumId, NodeId};
use crate::runtime::Runtime;
use crate::scheduler::DrainReport;
use crate::value::Value;

/// Deferred work run on the owning thread.
pub type Invocation = Box<dyn FnOnce(&mut Runtime) -> Result<()> + Send>;

/// One queued mutation.
pub enum Event {
    /// Write a field of a record datum or a closure.
    Set {
        node: u64,
        field: String,
        value: Value,
    },
    /// Replace the items of a collection datum.
    SetItems { datum: u64, items: Vec<Value> },
    /// Change the availability of a datum.
    SetAvailability {
        datum: u64,
        availability: Availability,
    },
    /// Put a datum into the `Error` state with a payload.
    SetError { datum: u64, payload: Value },
    /// Run arbitrary code against the runtime.
    Invoke(Invocation),
}

impl Event {
    /// Convenience constructor for [`Event::Invoke`].
    pub fn invoke<F>(f: F) -> Self
    where
        F: FnOnce(&mut Runtime) -> Result<()> + Send + 'static,
    {
        Self::Invoke(Box::new(f))
    }

    #[must_use]
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::SetItems { .. } => "set_items",
            Self::SetAvailability { .. } => "set_availability",
            Self::SetError { .. } => "set_error",
            Self::Invoke(_) => "invoke",
        }
    }

    fn apply(self, rt: &mut Runtime) -> Result<()> {
        match self {
            Self::Set { node, field, value } => {
                rt.set(NodeId::from_raw(node), &field, value)?;
            }
            Self::SetItems { datum, items } => {
                rt.set_items(DatumId::from_raw(datum)?, items)?;
            }
            Self::SetAvailability {
                datum,
                availability,
            } => {
                rt.set_availability(DatumId::from_raw(datum)?, availability)?;
            }
            Self::SetError { datum, payload } => {
                rt.set_error(DatumId::from_raw(datum)?, payload)?;
            }
            Self::Invoke(f) => f(rt)?,
        }
        Ok(())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Set { node, field, value } => f
                .debug_struct("Set")
                .field("node", node)
                .field("field", field)
                .field("value", value)
                .finish(),
            Self::SetItems { datum, items } => f
                .debug_struct("SetItems")
                .field("datum", datum)
                .field("len", &items.len())
                .finish(),
            Self::SetAvailability {
                datum,
                availability,
            } => f
                .debug_struct("SetAvailability")
                .field("datum", datum)
                .field("availability", availability)
                .finish(),
            Self::SetError { datum, payload } => f
                .debug_struct("SetError")
                .field("datum", datum)
                .field("payload", payload)
                .finish(),
            Self::Invoke(_) => f.write_str("Invoke(..)"),
        }
    }
}

/// Thread-safe handle for queueing events into a runtime.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Append an event. Fails only when the runtime has been dropped.
    pub fn put_event(&self, event: Event) -> std::result::Result<(), SendError<Event>> {
        self.tx.send(event)
    }
}

impl Runtime {
    /// A sender that can be moved to other threads.
    #[must_use]
    pub fn event_sender(&self) -> EventSender {
        EventSender {
            tx: self.events_tx.clone(),
        }
    }

    /// Queue an event from the owning thread.
    pub fn put_event(&self, event: Event) {
        // The receiver lives in `self`, so the channel cannot be closed here.
        let _ = self.events_tx.send(event);
    }

    /// Apply every queued event in arrival order, then drain.
    pub fn drain_events(&mut self) -> Result<DrainReport> {
        if self.scheduler.is_draining() {
            return Err(RuntimeError::Reentrant);
        }

        let queued: Vec<Event> = self.events_rx.try_iter().collect();
        let mut applied = 0;
        let mut rejected = 0;
        for event in queued {
            let tag = event.tag();
            match event.apply(self) {
                Ok(()) => applied += 1,
                Err(err) => {
                    rejected += 1;
                    tracing::warn!(message = "event.rejected", event = tag, %err);
                }
            }
        }
        tracing::debug!(message = "event.applied", applied, rejected);

        let mut report = self.drain()?;
        report.events_applied = applied;
        report.events_rejected = rejected;
        Ok(report)
    }
}
