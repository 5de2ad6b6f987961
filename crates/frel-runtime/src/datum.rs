#![forbid(unsafe_code)]

//! Datum store: composite reactive cells.
//!
//! A [`Datum`] is either record-shaped (named fields) or collection-shaped
//! (an ordered item list), never both. Each carries two revision counters:
//!
//! - `structural_rev` counts changes to the datum's own contents.
//! - `carried_rev` counts changes visible to owners; a structural change
//!   bumps both.
//!
//! # Invariants
//!
//! 1. Revisions start at 1 and only increase.
//! 2. `set_generation` is the scheduler generation of the last effective
//!    change (creation counts as a change).
//! 3. `owner`, when present, names a live closure that lists this datum in
//!    its `owned_datum`.
//! 4. `subscriptions` holds exactly the live subscriptions whose source is
//!    this datum.
//!
//! # Failure Modes
//!
//! - Record operations on a collection (or the reverse) fail with
//!   [`RuntimeError::ShapeMismatch`] and leave the datum untouched.
//! - Operations on a destroyed datum fail with
//!   [`RuntimeError::UnknownDatum`].

use std::collections::BTreeMap;
use std::fmt;

use ahash::AHashSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};
use crate::identity::{ClosureId, DatumId, NodeId, SubscriptionId};
use crate::runtime::Runtime;
use crate::selector::Change;
use crate::trace::TraceEvent;
use crate::value::Value;

/// Load status of a datum. Data-level failure is a value, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Loading,
    #[default]
    Ready,
    Error,
}

/// Which of the two datum layouts is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    Record,
    Collection,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record => f.write_str("record"),
            Self::Collection => f.write_str("collection"),
        }
    }
}

/// Revision counters of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Revisions {
    pub structural: u64,
    pub carried: u64,
}

impl Revisions {
    pub(crate) const INITIAL: Self = Self {
        structural: 1,
        carried: 1,
    };

    pub(crate) fn bump_structural(&mut self) {
        self.structural += 1;
        self.carried += 1;
    }

    pub(crate) fn bump_carried(&mut self) {
        self.carried += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Content {
    Record(BTreeMap<String, Value>),
    Collection(Vec<Value>),
}

/// One composite value.
#[derive(Debug)]
pub struct Datum {
    pub(crate) id: DatumId,
    pub(crate) type_name: String,
    pub(crate) revisions: Revisions,
    pub(crate) set_generation: u64,
    pub(crate) availability: Availability,
    pub(crate) error: Option<Value>,
    pub(crate) owner: Option<ClosureId>,
    pub(crate) content: Content,
    pub(crate) subscriptions: AHashSet<SubscriptionId>,
}

impl Datum {
    #[must_use]
    pub fn id(&self) -> DatumId {
        self.id
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[must_use]
    pub fn revisions(&self) -> Revisions {
        self.revisions
    }

    #[must_use]
    pub fn set_generation(&self) -> u64 {
        self.set_generation
    }

    #[must_use]
    pub fn availability(&self) -> Availability {
        self.availability
    }

    #[must_use]
    pub fn error(&self) -> Option<&Value> {
        self.error.as_ref()
    }

    #[must_use]
    pub fn owner(&self) -> Option<ClosureId> {
        self.owner
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        match self.content {
            Content::Record(_) => Shape::Record,
            Content::Collection(_) => Shape::Collection,
        }
    }

    /// Fields of a record datum; `None` for collections.
    #[must_use]
    pub fn fields(&self) -> Option<&BTreeMap<String, Value>> {
        match &self.content {
            Content::Record(fields) => Some(fields),
            Content::Collection(_) => None,
        }
    }

    /// Items of a collection datum; `None` for records.
    #[must_use]
    pub fn items(&self) -> Option<&[Value]> {
        match &self.content {
            Content::Collection(items) => Some(items),
            Content::Record(_) => None,
        }
    }

    /// Subscriptions whose source is this datum, sorted.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.subscriptions.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn fields_mut(&mut self) -> Result<&mut BTreeMap<String, Value>> {
        match &mut self.content {
            Content::Record(fields) => Ok(fields),
            Content::Collection(_) => Err(RuntimeError::ShapeMismatch {
                datum: self.id,
                expected: Shape::Record,
                actual: Shape::Collection,
            }),
        }
    }

    pub(crate) fn items_mut(&mut self) -> Result<&mut Vec<Value>> {
        match &mut self.content {
            Content::Collection(items) => Ok(items),
            Content::Record(_) => Err(RuntimeError::ShapeMismatch {
                datum: self.id,
                expected: Shape::Collection,
                actual: Shape::Record,
            }),
        }
    }

    pub(crate) fn touch(&mut self, generation: u64) {
        self.revisions.bump_structural();
        self.set_generation = generation;
    }
}

impl Runtime {
    /// Create a record datum, optionally owned by a closure.
    pub fn create_datum<K, I>(
        &mut self,
        type_name: impl Into<String>,
        fields: I,
        owner: Option<ClosureId>,
    ) -> Result<DatumId>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let fields = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
        self.insert_datum(type_name.into(), Content::Record(fields), owner)
    }

    /// Create a collection datum, optionally owned by a closure.
    pub fn create_collection<I>(
        &mut self,
        type_name: impl Into<String>,
        items: I,
        owner: Option<ClosureId>,
    ) -> Result<DatumId>
    where
        I: IntoIterator<Item = Value>,
    {
        let items = items.into_iter().collect();
        self.insert_datum(type_name.into(), Content::Collection(items), owner)
    }

    fn insert_datum(
        &mut self,
        type_name: String,
        content: Content,
        owner: Option<ClosureId>,
    ) -> Result<DatumId> {
        if let Some(owner) = owner
            && !self.closures.contains_key(&owner)
        {
            return Err(RuntimeError::UnknownClosure(owner));
        }

        let id = self.ids.datum();
        if let Some(owner) = owner
            && let Some(closure) = self.closures.get_mut(&owner)
        {
            closure.owned_datum.push(id);
        }

        self.tracer.emit(|| TraceEvent::DatumCreated {
            datum: id,
            type_name: type_name.clone(),
            owner,
        });
        tracing::trace!(message = "datum.create", datum = %id, type_name = %type_name);

        self.datums.insert(
            id,
            Datum {
                id,
                type_name,
                revisions: Revisions::INITIAL,
                set_generation: self.scheduler.generation(),
                availability: Availability::Ready,
                error: None,
                owner,
                content,
                subscriptions: AHashSet::new(),
            },
        );
        Ok(id)
    }

    /// Borrow a datum record.
    #[must_use]
    pub fn datum(&self, id: DatumId) -> Option<&Datum> {
        self.datums.get(&id)
    }

    pub(crate) fn datum_ref(&self, id: DatumId) -> Result<&Datum> {
        self.datums.get(&id).ok_or(RuntimeError::UnknownDatum(id))
    }

    pub(crate) fn datum_mut(&mut self, id: DatumId) -> Result<&mut Datum> {
        self.datums.get_mut(&id).ok_or(RuntimeError::UnknownDatum(id))
    }

    /// Items of a collection datum.
    pub fn get_items(&self, id: DatumId) -> Result<&[Value]> {
        let datum = self.datum_ref(id)?;
        datum.items().ok_or(RuntimeError::ShapeMismatch {
            datum: id,
            expected: Shape::Collection,
            actual: Shape::Record,
        })
    }

    /// Replace the item list of a collection datum.
    ///
    /// A freshly supplied list is never identical to the stored one, so this
    /// always counts as a change.
    pub fn set_items(&mut self, id: DatumId, items: Vec<Value>) -> Result<()> {
        let generation = self.scheduler.generation();
        let datum = self.datum_mut(id)?;
        let len = items.len();
        *datum.items_mut()? = items;
        datum.touch(generation);
        self.tracer.emit(|| TraceEvent::ItemsSet {
            datum: id,
            len,
            generation,
        });
        self.datum_changed(id, &Change::Items);
        Ok(())
    }

    /// Overwrite one item. Returns `false` (and does nothing) when the new
    /// value equals the old one.
    pub fn set_item(&mut self, id: DatumId, index: usize, value: Value) -> Result<bool> {
        let generation = self.scheduler.generation();
        let datum = self.datum_mut(id)?;
        let items = datum.items_mut()?;
        let len = items.len();
        let slot = items
            .get_mut(index)
            .ok_or(RuntimeError::ItemIndexOutOfRange { datum: id, index, len })?;
        if *slot == value {
            return Ok(false);
        }
        *slot = value;
        datum.touch(generation);
        self.tracer.emit(|| TraceEvent::ItemsSet {
            datum: id,
            len,
            generation,
        });
        self.datum_changed(id, &Change::Items);
        Ok(true)
    }

    /// Append an item.
    pub fn push_item(&mut self, id: DatumId, value: Value) -> Result<()> {
        let generation = self.scheduler.generation();
        let datum = self.datum_mut(id)?;
        let items = datum.items_mut()?;
        items.push(value);
        let len = items.len();
        datum.touch(generation);
        self.tracer.emit(|| TraceEvent::ItemsSet {
            datum: id,
            len,
            generation,
        });
        self.datum_changed(id, &Change::Items);
        Ok(())
    }

    /// Remove and return the item at `index`.
    pub fn remove_item(&mut self, id: DatumId, index: usize) -> Result<Value> {
        let generation = self.scheduler.generation();
        let datum = self.datum_mut(id)?;
        let items = datum.items_mut()?;
        let len = items.len();
        if index >= len {
            return Err(RuntimeError::ItemIndexOutOfRange { datum: id, index, len });
        }
        let removed = items.remove(index);
        datum.touch(generation);
        self.tracer.emit(|| TraceEvent::ItemsSet {
            datum: id,
            len: len - 1,
            generation,
        });
        self.datum_changed(id, &Change::Items);
        Ok(removed)
    }

    pub fn get_availability(&self, id: DatumId) -> Result<Availability> {
        Ok(self.datum_ref(id)?.availability)
    }

    /// Error payload of a datum in the `Error` state.
    pub fn get_error(&self, id: DatumId) -> Result<Option<&Value>> {
        Ok(self.datum_ref(id)?.error.as_ref())
    }

    /// Change availability. Leaving the `Error` state clears the payload.
    /// Returns `false` when nothing changed.
    pub fn set_availability(&mut self, id: DatumId, availability: Availability) -> Result<bool> {
        let payload = match availability {
            Availability::Error => self.datum_ref(id)?.error.clone(),
            Availability::Loading | Availability::Ready => None,
        };
        self.update_availability(id, availability, payload)
    }

    /// Put a datum into the `Error` state with a payload.
    pub fn set_error(&mut self, id: DatumId, payload: impl Into<Value>) -> Result<bool> {
        self.update_availability(id, Availability::Error, Some(payload.into()))
    }

    fn update_availability(
        &mut self,
        id: DatumId,
        availability: Availability,
        error: Option<Value>,
    ) -> Result<bool> {
        let generation = self.scheduler.generation();
        let datum = self.datum_mut(id)?;
        if datum.availability == availability && datum.error == error {
            return Ok(false);
        }
        datum.availability = availability;
        datum.error.clone_from(&error);
        datum.touch(generation);
        self.tracer.emit(|| TraceEvent::AvailabilitySet {
            datum: id,
            availability,
            error,
            generation,
        });
        tracing::trace!(message = "datum.availability", datum = %id, ?availability);
        self.datum_changed(id, &Change::Availability);
        Ok(true)
    }

    /// Destroy a datum: sever every subscription that references it, unlink
    /// it from its owner, drop the record.
    pub fn destroy_datum(&mut self, id: DatumId) -> Result<()> {
        let datum = self.datum_ref(id)?;
        let mut severed: Vec<SubscriptionId> = datum.subscriptions.iter().copied().collect();
        severed.extend(self.registry.targeting(id));
        let owner = datum.owner;

        for sub in severed {
            self.remove_subscription(sub);
        }
        if let Some(owner) = owner
            && let Some(closure) = self.closures.get_mut(&owner)
        {
            closure.owned_datum.retain(|d| *d != id);
        }
        self.datums.remove(&id);

        self.tracer.emit(|| TraceEvent::DatumDestroyed { datum: id });
        tracing::trace!(message = "datum.destroy", datum = %id);
        Ok(())
    }

    /// Notify a datum's own subscribers of a structural change, then carry
    /// the change one hop to its owner.
    pub(crate) fn datum_changed(&mut self, id: DatumId, change: &Change) {
        self.notify(NodeId::Datum(id), change);

        let Some(owner) = self.datums.get(&id).and_then(|d| d.owner) else {
            return;
        };
        if let Some(closure) = self.closures.get_mut(&owner) {
            closure.revisions.bump_carried();
            self.notify(NodeId::Closure(owner), &Change::Carried);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataRegistry;

    fn runtime() -> Runtime {
        Runtime::new(MetadataRegistry::new())
    }

    #[test]
    fn record_datum_starts_at_revision_one() {
        let mut rt = runtime();
        let id = rt
            .create_datum("User", [("name", Value::from("ada"))], None)
            .unwrap();
        let datum = rt.datum(id).unwrap();
        assert_eq!(datum.revisions(), Revisions::INITIAL);
        assert_eq!(datum.shape(), Shape::Record);
        assert_eq!(datum.type_name(), "User");
        assert_eq!(datum.availability(), Availability::Ready);
        assert!(datum.items().is_none());
    }

    #[test]
    fn collection_ops_bump_revisions() {
        let mut rt = runtime();
        let id = rt
            .create_collection("List", [Value::Int(1), Value::Int(2)], None)
            .unwrap();
        rt.push_item(id, Value::Int(3)).unwrap();
        assert_eq!(rt.get_items(id).unwrap(), &[Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert!(!rt.set_item(id, 0, Value::Int(1)).unwrap());
        assert!(rt.set_item(id, 0, Value::Int(9)).unwrap());
        assert_eq!(rt.remove_item(id, 1).unwrap(), Value::Int(2));
        assert_eq!(rt.datum(id).unwrap().revisions().structural, 4);
    }

    #[test]
    fn set_items_always_counts_as_change() {
        let mut rt = runtime();
        let id = rt.create_collection("List", [Value::Int(1)], None).unwrap();
        rt.set_items(id, vec![Value::Int(1)]).unwrap();
        rt.set_items(id, vec![Value::Int(1)]).unwrap();
        assert_eq!(rt.datum(id).unwrap().revisions().structural, 3);
    }

    #[test]
    fn shape_mismatch_is_reported() {
        let mut rt = runtime();
        let rec = rt.create_datum::<&str, _>("R", [], None).unwrap();
        let list = rt.create_collection("L", [], None).unwrap();
        assert!(matches!(
            rt.get_items(rec),
            Err(RuntimeError::ShapeMismatch { expected: Shape::Collection, .. })
        ));
        assert!(matches!(
            rt.set(list, "x", 1),
            Err(RuntimeError::ShapeMismatch { expected: Shape::Record, .. })
        ));
    }

    #[test]
    fn item_index_out_of_range() {
        let mut rt = runtime();
        let id = rt.create_collection("L", [Value::Null], None).unwrap();
        assert!(matches!(
            rt.set_item(id, 3, Value::Int(1)),
            Err(RuntimeError::ItemIndexOutOfRange { index: 3, len: 1, .. })
        ));
        assert!(rt.remove_item(id, 1).is_err());
    }

    #[test]
    fn availability_round_trip() {
        let mut rt = runtime();
        let id = rt.create_datum::<&str, _>("R", [], None).unwrap();
        assert!(rt.set_availability(id, Availability::Loading).unwrap());
        assert!(!rt.set_availability(id, Availability::Loading).unwrap());
        assert!(rt.set_error(id, "timeout").unwrap());
        assert_eq!(rt.get_availability(id).unwrap(), Availability::Error);
        assert_eq!(rt.get_error(id).unwrap(), Some(&Value::from("timeout")));
        assert!(rt.set_availability(id, Availability::Ready).unwrap());
        assert_eq!(rt.get_error(id).unwrap(), None);
    }

    #[test]
    fn availability_changes_reach_the_trace_hook() {
        let mut rt = runtime();
        let id = rt.create_datum::<&str, _>("R", [], None).unwrap();
        let sink = crate::trace::RecordingSink::new();
        rt.set_trace_sink(sink.clone());

        rt.set_error(id, "timeout").unwrap();
        rt.set_error(id, "timeout").unwrap();
        rt.set_availability(id, Availability::Ready).unwrap();

        let events = sink.events();
        assert_eq!(sink.count("availability_set"), 2);
        assert!(matches!(
            &events[0],
            TraceEvent::AvailabilitySet {
                availability: Availability::Error,
                error: Some(Value::Str(msg)),
                ..
            } if msg == "timeout"
        ));
        assert!(matches!(
            &events[1],
            TraceEvent::AvailabilitySet {
                availability: Availability::Ready,
                error: None,
                ..
            }
        ));
    }

    #[test]
    fn owned_datum_is_linked_and_unlinked() {
        let mut rt = runtime();
        let owner = rt.create_closure("Host", None).unwrap();
        let id = rt.create_datum::<&str, _>("R", [], Some(owner)).unwrap();
        assert_eq!(rt.closure(owner).unwrap().owned_datum(), &[id]);
        assert_eq!(rt.datum(id).unwrap().owner(), Some(owner));

        rt.destroy_datum(id).unwrap();
        assert!(rt.closure(owner).unwrap().owned_datum().is_empty());
        assert!(rt.datum(id).is_none());
        assert!(matches!(rt.destroy_datum(id), Err(RuntimeError::UnknownDatum(_))));
    }

    #[test]
    fn unknown_owner_is_rejected() {
        let mut rt = runtime();
        let bogus = ClosureId::from_raw(99).unwrap();
        assert!(matches!(
            rt.create_datum::<&str, _>("R", [], Some(bogus)),
            Err(RuntimeError::UnknownClosure(_))
        ));
        assert_eq!(rt.datum_count(), 0);
    }
}
