#![forbid(unsafe_code)]

//! Field read/write path shared by datums and closures.
//!
//! # Change detection
//!
//! [`Runtime::set`] is the only de-duplication point in the kernel: writing
//! a value equal (shallowly, see [`Value`]) to the current one is a no-op
//! with no revision bump and no notification. An absent field reads as
//! [`Value::Null`], so writing `Null` to an absent field is also a no-op.
//!
//! # Propagation
//!
//! An effective datum write bumps both revisions, stamps `set_generation`,
//! enqueues the datum's matching subscriptions, then carries the change one
//! hop to the owner closure (`Carried`/`Everything` subscribers only). An
//! effective closure write does the same restricted to the closure's own
//! subscribers; closures never carry upward.
//!
//! Enqueued ids land in the scheduler's pending set and run in the next
//! wave, never the current one.

use crate::datum::Shape;
use crate::error::{Result, RuntimeError};
use crate::identity::NodeId;
use crate::runtime::Runtime;
use crate::selector::Change;
use crate::trace::TraceEvent;
use crate::value::Value;

impl Runtime {
    /// Read a field of a record datum or a closure. Absent fields read as
    /// `Null`.
    pub fn get(&self, node: impl Into<NodeId>, field: &str) -> Result<Value> {
        Ok(self.field(node, field)?.cloned().unwrap_or_default())
    }

    /// Borrow a field of a record datum or a closure.
    pub fn field(&self, node: impl Into<NodeId>, field: &str) -> Result<Option<&Value>> {
        match node.into() {
            NodeId::Datum(id) => {
                let datum = self.datum_ref(id)?;
                let fields = datum.fields().ok_or(RuntimeError::ShapeMismatch {
                    datum: id,
                    expected: Shape::Record,
                    actual: Shape::Collection,
                })?;
                Ok(fields.get(field))
            }
            NodeId::Closure(id) => Ok(self.closure_ref(id)?.fields.get(field)),
        }
    }

    /// Write a field of a record datum or a closure.
    ///
    /// Returns `true` when the write was effective (and subscribers were
    /// enqueued), `false` when the value was unchanged.
    pub fn set(
        &mut self,
        node: impl Into<NodeId>,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<bool> {
        let node = node.into();
        let value = value.into();
        let generation = self.scheduler.generation();
        let traced = self.tracer.is_enabled().then(|| value.clone());

        let old = match node {
            NodeId::Datum(id) => {
                let datum = self.datum_mut(id)?;
                let fields = datum.fields_mut()?;
                if fields.get(field).unwrap_or(&Value::Null) == &value {
                    return Ok(false);
                }
                let old = fields.insert(field.to_owned(), value);
                datum.touch(generation);
                old
            }
            NodeId::Closure(id) => {
                let closure = self.closure_mut(id)?;
                if closure.fields.get(field).unwrap_or(&Value::Null) == &value {
                    return Ok(false);
                }
                let old = closure.fields.insert(field.to_owned(), value);
                closure.revisions.bump_structural();
                closure.set_generation = generation;
                old
            }
        };

        if let Some(new) = traced {
            self.tracer.emit(|| TraceEvent::FieldSet {
                node,
                field: field.to_owned(),
                old: old.unwrap_or_default(),
                new,
                generation,
            });
        }
        tracing::trace!(message = "field.set", %node, field, generation);

        let change = Change::Field(field.to_owned());
        match node {
            NodeId::Datum(id) => self.datum_changed(id, &change),
            NodeId::Closure(_) => self.notify(node, &change),
        }
        Ok(true)
    }

    /// Enqueue every subscription on `source` whose selector matches.
    pub(crate) fn notify(&mut self, source: NodeId, change: &Change) {
        let outgoing = match source {
            NodeId::Datum(id) => self.datums.get(&id).map(|d| &d.subscriptions),
            NodeId::Closure(id) => self.closures.get(&id).map(|c| &c.subscriptions_to_this),
        };
        let Some(outgoing) = outgoing else {
            return;
        };
        for id in outgoing {
            let matched = self
                .registry
                .get(*id)
                .is_some_and(|sub| sub.selector.matches(change));
            if matched && self.scheduler.enqueue(*id) {
                tracing::trace!(message = "notify.enqueue", subscription = %id, %source);
            }
        }
    }
}
