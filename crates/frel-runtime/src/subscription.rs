#![forbid(unsafe_code)]

//! Subscription registry: filtered, directed edges with bound callbacks.
//!
//! # Design
//!
//! Each subscription gets its own [`SubscriptionId`] and a [`FunctionId`]
//! naming its callback. The registry owns both tables; the source node keeps
//! the id in its outgoing set (`Datum::subscriptions` or
//! `Closure::subscriptions_to_this`) and a closure target keeps it in
//! `subscriptions_by_this` so destruction can sever it. Datum targets are
//! tracked in a registry-side index for the same reason.
//!
//! # Invariants
//!
//! 1. A live subscription id appears in exactly one outgoing set: its
//!    source's.
//! 2. A live subscription whose target is a closure appears in that
//!    closure's `subscriptions_by_this`.
//! 3. Removing a subscription removes it from every set above and drops its
//!    callback. Already-queued copies of the id are skipped by the
//!    scheduler.
//!
//! # Subscribe during drain
//!
//! A subscription created while its source's `set_generation` equals the
//! current generation has missed that change; it is enqueued immediately and
//! runs once in the next wave.

use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

use crate::error::{Result, RuntimeError};
use crate::identity::{DatumId, FunctionId, NodeId, SubscriptionId};
use crate::runtime::Runtime;
use crate::selector::Selector;
use crate::trace::TraceEvent;

/// A bound callback. Reads and writes go through the runtime it receives.
pub type Callback = Rc<dyn Fn(&mut Runtime, &Notification) -> Result<()>>;

/// What a callback is told when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub subscription: SubscriptionId,
    pub source: NodeId,
    pub target: NodeId,
    /// Generation of the wave running the callback.
    pub generation: u64,
}

/// One directed edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub source: NodeId,
    pub target: NodeId,
    pub selector: Selector,
    pub callback: FunctionId,
}

impl Subscription {
    /// Whether `node` is either endpoint.
    #[must_use]
    pub fn references(&self, node: NodeId) -> bool {
        self.source == node || self.target == node
    }
}

#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    subscriptions: AHashMap<SubscriptionId, Subscription>,
    functions: AHashMap<FunctionId, Callback>,
    datum_targets: AHashMap<DatumId, AHashSet<SubscriptionId>>,
}

impl SubscriptionRegistry {
    pub(crate) fn insert(&mut self, subscription: Subscription, callback: Callback) {
        if let NodeId::Datum(target) = subscription.target {
            self.datum_targets
                .entry(target)
                .or_default()
                .insert(subscription.id);
        }
        self.functions.insert(subscription.callback, callback);
        self.subscriptions.insert(subscription.id, subscription);
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let subscription = self.subscriptions.remove(&id)?;
        self.functions.remove(&subscription.callback);
        if let NodeId::Datum(target) = subscription.target
            && let Some(set) = self.datum_targets.get_mut(&target)
        {
            set.remove(&id);
            if set.is_empty() {
                self.datum_targets.remove(&target);
            }
        }
        Some(subscription)
    }

    pub(crate) fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    pub(crate) fn callback(&self, id: SubscriptionId) -> Option<(&Subscription, Callback)> {
        let subscription = self.subscriptions.get(&id)?;
        let callback = self.functions.get(&subscription.callback)?;
        Some((subscription, Rc::clone(callback)))
    }

    /// Subscriptions whose target is `datum`.
    pub(crate) fn targeting(&self, datum: DatumId) -> Vec<SubscriptionId> {
        self.datum_targets
            .get(&datum)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.subscriptions.values()
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.subscriptions.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl Runtime {
    /// Create an edge from `source` to `target` and bind `callback` to it.
    pub fn subscribe<F>(
        &mut self,
        source: impl Into<NodeId>,
        target: impl Into<NodeId>,
        selector: Selector,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&mut Runtime, &Notification) -> Result<()> + 'static,
    {
        let source = source.into();
        let target = target.into();
        let source_generation = self.set_generation_of(source)?;
        if !self.contains(target) {
            return Err(match target {
                NodeId::Datum(id) => RuntimeError::UnknownDatum(id),
                NodeId::Closure(id) => RuntimeError::UnknownClosure(id),
            });
        }

        let id = self.ids.subscription();
        let function = self.ids.function();

        match source {
            NodeId::Datum(d) => {
                self.datum_mut(d)?.subscriptions.insert(id);
            }
            NodeId::Closure(c) => {
                self.closure_mut(c)?.subscriptions_to_this.insert(id);
            }
        }
        if let NodeId::Closure(c) = target {
            self.closure_mut(c)?.subscriptions_by_this.insert(id);
        }

        self.tracer.emit(|| TraceEvent::Subscribed {
            subscription: id,
            source,
            target,
            selector: selector.clone(),
        });
        self.registry.insert(
            Subscription {
                id,
                source,
                target,
                selector,
                callback: function,
            },
            Rc::new(callback),
        );

        if source_generation == self.scheduler.generation() && self.scheduler.enqueue(id) {
            tracing::trace!(message = "subscribe.catch_up", subscription = %id, %source);
        }
        Ok(id)
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    ///
    /// Safe from inside a running callback; a queued copy of the id is
    /// skipped when its turn comes.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.remove_subscription(id).is_some()
    }

    pub(crate) fn remove_subscription(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let subscription = self.registry.remove(id)?;
        match subscription.source {
            NodeId::Datum(d) => {
                if let Some(datum) = self.datums.get_mut(&d) {
                    datum.subscriptions.remove(&id);
                }
            }
            NodeId::Closure(c) => {
                if let Some(closure) = self.closures.get_mut(&c) {
                    closure.subscriptions_to_this.remove(&id);
                }
            }
        }
        if let NodeId::Closure(c) = subscription.target
            && let Some(closure) = self.closures.get_mut(&c)
        {
            closure.subscriptions_by_this.remove(&id);
        }
        self.tracer.emit(|| TraceEvent::Unsubscribed { subscription: id });
        Some(subscription)
    }

    /// Look up a live subscription.
    #[must_use]
    pub fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.registry.get(id)
    }

    /// Every live subscription, in id order.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<&Subscription> {
        let mut subs: Vec<_> = self.registry.iter().collect();
        subs.sort_unstable_by_key(|s| s.id);
        subs
    }

    /// Live subscriptions whose source is `node`, sorted.
    pub fn subscriptions_of(&self, node: impl Into<NodeId>) -> Result<Vec<SubscriptionId>> {
        match node.into() {
            NodeId::Datum(id) => Ok(self.datum_ref(id)?.subscriptions()),
            NodeId::Closure(id) => Ok(self.closure_ref(id)?.subscriptions_to_this()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataRegistry;
    use crate::value::Value;
    use std::cell::Cell;

    fn runtime() -> Runtime {
        Runtime::new(MetadataRegistry::new())
    }

    fn noop(_: &mut Runtime, _: &Notification) -> Result<()> {
        Ok(())
    }

    #[test]
    fn subscribe_registers_both_endpoints() {
        let mut rt = runtime();
        let src = rt.create_closure("Src", None).unwrap();
        let dst = rt.create_closure("Dst", None).unwrap();
        let id = rt.subscribe(src, dst, Selector::Everything, noop).unwrap();

        assert_eq!(rt.closure(src).unwrap().subscriptions_to_this(), vec![id]);
        assert_eq!(rt.closure(dst).unwrap().subscriptions_by_this(), vec![id]);
        assert_eq!(rt.subscription_count(), 1);
        assert_eq!(rt.registry.function_count(), 1);

        assert!(rt.unsubscribe(id));
        assert!(!rt.unsubscribe(id));
        assert!(rt.closure(src).unwrap().subscriptions_to_this().is_empty());
        assert!(rt.closure(dst).unwrap().subscriptions_by_this().is_empty());
        assert_eq!(rt.registry.function_count(), 0);
    }

    #[test]
    fn datum_targets_are_indexed() {
        let mut rt = runtime();
        let src = rt.create_closure("Src", None).unwrap();
        let dst = rt.create_datum::<&str, _>("D", [], None).unwrap();
        let id = rt.subscribe(src, dst, Selector::Everything, noop).unwrap();
        assert_eq!(rt.registry.targeting(dst), vec![id]);
        rt.unsubscribe(id);
        assert!(rt.registry.targeting(dst).is_empty());
    }

    #[test]
    fn subscribing_to_missing_node_fails() {
        let mut rt = runtime();
        let c = rt.create_closure("C", None).unwrap();
        let ghost = DatumId::from_raw(1000).unwrap();
        assert!(matches!(
            rt.subscribe(ghost, c, Selector::Everything, noop),
            Err(RuntimeError::UnknownDatum(_))
        ));
        assert!(matches!(
            rt.subscribe(c, ghost, Selector::Everything, noop),
            Err(RuntimeError::UnknownDatum(_))
        ));
        assert_eq!(rt.subscription_count(), 0);
    }

    #[test]
    fn fresh_source_is_caught_up_in_next_wave() {
        let mut rt = runtime();
        let d = rt.create_datum("D", [("x", Value::Int(1))], None).unwrap();
        let c = rt.create_closure("C", None).unwrap();
        let calls = Rc::new(Cell::new(0));
        let calls_in = Rc::clone(&calls);
        rt.subscribe(d, c, Selector::key("x"), move |_, _| {
            calls_in.set(calls_in.get() + 1);
            Ok(())
        })
        .unwrap();
        assert_eq!(rt.pending_count(), 1);
        rt.drain().unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn stale_source_is_not_enqueued() {
        let mut rt = runtime();
        let d = rt.create_datum("D", [("x", Value::Int(1))], None).unwrap();
        let c = rt.create_closure("C", None).unwrap();
        rt.subscribe(d, c, Selector::key("x"), noop).unwrap();
        rt.drain().unwrap();

        rt.subscribe(d, c, Selector::key("x"), noop).unwrap();
        assert_eq!(rt.pending_count(), 0);
    }

    #[test]
    fn subscriptions_lists_in_id_order() {
        let mut rt = runtime();
        let a = rt.create_closure("A", None).unwrap();
        let b = rt.create_closure("B", None).unwrap();
        let s1 = rt.subscribe(a, b, Selector::Structural, noop).unwrap();
        let s2 = rt.subscribe(b, a, Selector::Carried, noop).unwrap();
        let ids: Vec<_> = rt.subscriptions().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![s1, s2]);
        assert_eq!(rt.subscriptions_of(a).unwrap(), vec![s1]);
        assert!(rt.subscription(s2).unwrap().references(NodeId::Closure(a)));
    }
}
