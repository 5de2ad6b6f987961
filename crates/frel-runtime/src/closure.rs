#![forbid(unsafe_code)]

//! Closure store: per-instantiation activation records.
//!
//! A [`Closure`] has three regions:
//!
//! - **structural** (`parent`, `children`): the instantiation tree. Not
//!   subscribable.
//! - **cleanup** (`subscriptions_to_this`, `subscriptions_by_this`,
//!   `owned_datum`): everything destruction must sever. Not subscribable.
//! - **fields**: the subscribable name → value map.
//!
//! Parent and owner links are relations only; the runtime's tables own every
//! record.

use std::collections::BTreeMap;

use ahash::AHashSet;

use crate::datum::Revisions;
use crate::error::{Result, RuntimeError};
use crate::identity::{ClosureId, DatumId, SubscriptionId};
use crate::runtime::Runtime;
use crate::trace::TraceEvent;
use crate::value::Value;

/// One template instantiation.
#[derive(Debug)]
pub struct Closure {
    pub(crate) id: ClosureId,
    pub(crate) template: String,
    pub(crate) parent: Option<ClosureId>,
    pub(crate) children: Vec<ClosureId>,
    pub(crate) subscriptions_to_this: AHashSet<SubscriptionId>,
    pub(crate) subscriptions_by_this: AHashSet<SubscriptionId>,
    pub(crate) owned_datum: Vec<DatumId>,
    pub(crate) fields: BTreeMap<String, Value>,
    pub(crate) revisions: Revisions,
    pub(crate) set_generation: u64,
}

impl Closure {
    #[must_use]
    pub fn id(&self) -> ClosureId {
        self.id
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    #[must_use]
    pub fn parent(&self) -> Option<ClosureId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[ClosureId] {
        &self.children
    }

    #[must_use]
    pub fn owned_datum(&self) -> &[DatumId] {
        &self.owned_datum
    }

    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    #[must_use]
    pub fn revisions(&self) -> Revisions {
        self.revisions
    }

    #[must_use]
    pub fn set_generation(&self) -> u64 {
        self.set_generation
    }

    /// Inbound edges (this closure is the source), sorted.
    #[must_use]
    pub fn subscriptions_to_this(&self) -> Vec<SubscriptionId> {
        sorted(&self.subscriptions_to_this)
    }

    /// Edges this closure is the target of, sorted.
    #[must_use]
    pub fn subscriptions_by_this(&self) -> Vec<SubscriptionId> {
        sorted(&self.subscriptions_by_this)
    }
}

fn sorted(set: &AHashSet<SubscriptionId>) -> Vec<SubscriptionId> {
    let mut ids: Vec<_> = set.iter().copied().collect();
    ids.sort_unstable();
    ids
}

impl Runtime {
    /// Allocate a bare closure and link it under `parent`.
    ///
    /// No metadata is consulted; [`Runtime::instantiate`] builds on this.
    pub fn create_closure(
        &mut self,
        template: impl Into<String>,
        parent: Option<ClosureId>,
    ) -> Result<ClosureId> {
        if let Some(parent) = parent
            && !self.closures.contains_key(&parent)
        {
            return Err(RuntimeError::UnknownClosure(parent));
        }
        let template = template.into();
        let id = self.ids.closure();
        if let Some(parent) = parent
            && let Some(p) = self.closures.get_mut(&parent)
        {
            p.children.push(id);
        }

        self.tracer.emit(|| TraceEvent::ClosureCreated {
            closure: id,
            template: template.clone(),
            parent,
        });

        self.closures.insert(
            id,
            Closure {
                id,
                template,
                parent,
                children: Vec::new(),
                subscriptions_to_this: AHashSet::new(),
                subscriptions_by_this: AHashSet::new(),
                owned_datum: Vec::new(),
                fields: BTreeMap::new(),
                revisions: Revisions::INITIAL,
                set_generation: self.scheduler.generation(),
            },
        );
        Ok(id)
    }

    /// Borrow a closure record.
    #[must_use]
    pub fn closure(&self, id: ClosureId) -> Option<&Closure> {
        self.closures.get(&id)
    }

    pub(crate) fn closure_ref(&self, id: ClosureId) -> Result<&Closure> {
        self.closures.get(&id).ok_or(RuntimeError::UnknownClosure(id))
    }

    pub(crate) fn closure_mut(&mut self, id: ClosureId) -> Result<&mut Closure> {
        self.closures
            .get_mut(&id)
            .ok_or(RuntimeError::UnknownClosure(id))
    }

    pub fn parent(&self, id: ClosureId) -> Result<Option<ClosureId>> {
        Ok(self.closure_ref(id)?.parent)
    }

    pub fn children(&self, id: ClosureId) -> Result<&[ClosureId]> {
        Ok(&self.closure_ref(id)?.children)
    }

    /// Ids of every live closure without a parent, sorted.
    #[must_use]
    pub fn roots(&self) -> Vec<ClosureId> {
        let mut roots: Vec<_> = self
            .closures
            .values()
            .filter(|c| c.parent.is_none())
            .map(|c| c.id)
            .collect();
        roots.sort_unstable();
        roots
    }
}
