#![forbid(unsafe_code)]

//! Instantiation and cascading destruction of closure trees.
//!
//! # Instantiation
//!
//! [`Runtime::instantiate`] allocates a closure, writes its parameters,
//! runs the template's internal binding, then instantiates every top-level
//! child and runs that child's call-site binding. Bindings are opaque
//! callables from the [`MetadataRegistry`](crate::MetadataRegistry).
//!
//! If any step fails, the partially built closure (and whatever it already
//! created) is destroyed before the error is returned. A binding that
//! destroys its own closure makes instantiation fail with
//! [`RuntimeError::UnknownClosure`].
//!
//! # Destruction
//!
//! [`Runtime::destroy_closure`] runs, in order:
//!
//! 1. remove every subscription whose source is this closure;
//! 2. remove every subscription whose target is this closure, including
//!    from its source's outgoing set;
//! 3. destroy every owned datum;
//! 4. destroy every child closure, recursively;
//! 5. unlink from the parent's `children`;
//! 6. drop the record.
//!
//! Edges are always severed before their endpoints disappear, so no step
//! dereferences an id that is already gone.

use crate::error::{Result, RuntimeError};
use crate::identity::{ClosureId, SubscriptionId};
use crate::metadata::TemplateMeta;
use crate::runtime::Runtime;
use crate::trace::TraceEvent;
use crate::value::Value;

impl Runtime {
    /// Instantiate `template` under `parent` with initial field values.
    pub fn instantiate<K, I>(
        &mut self,
        template: &str,
        parent: Option<ClosureId>,
        params: I,
    ) -> Result<ClosureId>
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let meta = self.metadata.require(template)?;
        let id = self.create_closure(template, parent)?;
        {
            let closure = self.closure_mut(id)?;
            for (name, value) in params {
                closure.fields.insert(name.into(), value);
            }
        }

        if let Err(err) = self.wire(id, &meta) {
            tracing::warn!(message = "closure.instantiate_failed", closure = %id, template, %err);
            if self.closures.contains_key(&id) {
                self.destroy_closure(id)?;
            }
            return Err(err);
        }
        if !self.closures.contains_key(&id) {
            tracing::warn!(message = "closure.destroyed_during_instantiate", closure = %id, template);
            return Err(RuntimeError::UnknownClosure(id));
        }

        self.tracer.emit(|| TraceEvent::ClosureInstantiated {
            closure: id,
            template: template.to_owned(),
        });
        tracing::debug!(message = "closure.instantiate", closure = %id, template);
        Ok(id)
    }

    fn wire(&mut self, id: ClosureId, meta: &TemplateMeta) -> Result<()> {
        if let Some(binding) = meta.internal_binding() {
            binding(self, id)?;
        }
        for &index in meta.top_children() {
            self.instantiate_call_site(id, index)?;
        }
        Ok(())
    }

    /// Instantiate the child declared at call site `index` of `parent`'s
    /// template and run its call-site binding.
    pub fn instantiate_call_site(&mut self, parent: ClosureId, index: usize) -> Result<ClosureId> {
        let template = self.closure_ref(parent)?.template.clone();
        let meta = self.metadata.require(&template)?;
        let site = meta
            .call_site(index)
            .ok_or_else(|| RuntimeError::UnknownCallSite {
                template: template.clone(),
                index,
            })?;

        let child = self.instantiate(site.template(), Some(parent), Vec::<(String, Value)>::new())?;
        if let Some(binding) = site.binding()
            && let Err(err) = binding(self, parent, child)
        {
            if self.closures.contains_key(&child) {
                self.destroy_closure(child)?;
            }
            return Err(err);
        }
        Ok(child)
    }

    /// Destroy a closure and everything it owns or parents.
    pub fn destroy_closure(&mut self, id: ClosureId) -> Result<()> {
        let closure = self.closure_mut(id)?;
        let as_source: Vec<SubscriptionId> = closure.subscriptions_to_this.drain().collect();
        let as_target: Vec<SubscriptionId> = closure.subscriptions_by_this.drain().collect();
        let owned = std::mem::take(&mut closure.owned_datum);
        let children = std::mem::take(&mut closure.children);
        let parent = closure.parent;

        for sub in as_source {
            self.remove_subscription(sub);
        }
        for sub in as_target {
            self.remove_subscription(sub);
        }
        for datum in owned {
            if self.datums.contains_key(&datum) {
                self.destroy_datum(datum)?;
            }
        }
        for child in children {
            if self.closures.contains_key(&child) {
                self.destroy_closure(child)?;
            }
        }
        if let Some(parent) = parent
            && let Some(p) = self.closures.get_mut(&parent)
        {
            p.children.retain(|c| *c != id);
        }
        self.closures.remove(&id);

        self.tracer.emit(|| TraceEvent::ClosureDestroyed { closure: id });
        tracing::debug!(message = "closure.destroy", closure = %id);
        Ok(())
    }

    /// Instantiate a root template, drain once, return the root closure.
    ///
    /// With `None`, the template is resolved from the configured entry name
    /// (see [`MetadataRegistry::resolve_entry`](crate::MetadataRegistry::resolve_entry)).
    ///
    /// If the initial drain fails (a cycle overrun, or a callback error under
    /// the `Abort` policy), the root tree is destroyed before the error is
    /// returned.
    pub fn run(&mut self, template: Option<&str>) -> Result<ClosureId> {
        let name = match template {
            Some(name) => name.to_owned(),
            None => self
                .metadata
                .resolve_entry(&self.config.entry_template)?
                .to_owned(),
        };
        let root = self.instantiate(&name, None, Vec::<(String, Value)>::new())?;
        let report = match self.drain() {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(message = "runtime.run_failed", template = %name, root = %root, %err);
                if self.closures.contains_key(&root) {
                    self.destroy_closure(root)?;
                }
                return Err(err);
            }
        };
        tracing::debug!(
            message = "runtime.run",
            template = %name,
            root = %root,
            waves = report.waves,
        );
        Ok(root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{CallSite, MetadataRegistry};
    use crate::selector::Selector;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn instantiate_runs_bindings_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let (l1, l2, l3) = (Rc::clone(&log), Rc::clone(&log), Rc::clone(&log));
        let registry = MetadataRegistry::new()
            .with_template(
                "app.Main",
                TemplateMeta::new()
                    .with_internal_binding(move |_, _| {
                        l1.borrow_mut().push("main.internal");
                        Ok(())
                    })
                    .with_child(
                        0,
                        CallSite::new("app.Child").with_binding(move |_, _, _| {
                            l2.borrow_mut().push("child.call_site");
                            Ok(())
                        }),
                    ),
            )
            .with_template(
                "app.Child",
                TemplateMeta::new().with_internal_binding(move |_, _| {
                    l3.borrow_mut().push("child.internal");
                    Ok(())
                }),
            );
        let mut rt = Runtime::new(registry);
        let root = rt
            .instantiate("app.Main", None, [("title", Value::from("hi"))])
            .unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["main.internal", "child.internal", "child.call_site"]
        );
        assert_eq!(rt.get(root, "title").unwrap(), Value::from("hi"));
        let children = rt.children(root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(rt.closure(children[0]).unwrap().template(), "app.Child");
    }

    #[test]
    fn unknown_template_allocates_nothing() {
        let mut rt = Runtime::new(MetadataRegistry::new());
        assert!(matches!(
            rt.instantiate("nope.T", None, Vec::<(String, Value)>::new()),
            Err(RuntimeError::UnknownTemplate { .. })
        ));
        assert_eq!(rt.closure_count(), 0);
    }

    #[test]
    fn failed_binding_rolls_back_the_subtree() {
        let registry = MetadataRegistry::new()
            .with_template(
                "app.Main",
                TemplateMeta::new().with_child(0, CallSite::new("app.Broken")),
            )
            .with_template(
                "app.Broken",
                TemplateMeta::new().with_internal_binding(|rt, id| {
                    rt.create_datum("Scratch", [("x", Value::Int(1))], Some(id))?;
                    Err(RuntimeError::UnknownTemplate {
                        name: "missing".into(),
                    })
                }),
            );
        let mut rt = Runtime::new(registry);
        assert!(rt.instantiate("app.Main", None, Vec::<(String, Value)>::new()).is_err());
        assert_eq!(rt.closure_count(), 0);
        assert_eq!(rt.datum_count(), 0);
    }

    #[test]
    fn missing_call_site_is_reported() {
        let registry = MetadataRegistry::new().with_template("app.Main", TemplateMeta::new());
        let mut rt = Runtime::new(registry);
        let root = rt.run(Some("app.Main")).unwrap();
        assert!(matches!(
            rt.instantiate_call_site(root, 7),
            Err(RuntimeError::UnknownCallSite { index: 7, .. })
        ));
    }

    #[test]
    fn on_demand_call_site() {
        let registry = MetadataRegistry::new()
            .with_template(
                "app.Main",
                TemplateMeta::new().with_call_site(
                    3,
                    CallSite::new("app.Row").with_binding(|rt, parent, child| {
                        let label = rt.get(parent, "label")?;
                        rt.set(child, "label", label).map(|_| ())
                    }),
                ),
            )
            .with_template("app.Row", TemplateMeta::new());
        let mut rt = Runtime::new(registry);
        let root = rt
            .instantiate("app.Main", None, [("label", Value::from("row"))])
            .unwrap();
        assert!(rt.children(root).unwrap().is_empty());

        let row = rt.instantiate_call_site(root, 3).unwrap();
        assert_eq!(rt.get(row, "label").unwrap(), Value::from("row"));
        assert_eq!(rt.children(root).unwrap(), &[row]);
    }

    #[test]
    fn destroy_unlinks_from_parent_and_severs_edges() {
        let mut rt = Runtime::new(MetadataRegistry::new());
        let root = rt.create_closure("Root", None).unwrap();
        let child = rt.create_closure("Child", Some(root)).unwrap();
        let owned = rt.create_datum::<&str, _>("D", [], Some(child)).unwrap();
        rt.subscribe(root, child, Selector::Everything, |_, _| Ok(()))
            .unwrap();
        rt.subscribe(child, root, Selector::Everything, |_, _| Ok(()))
            .unwrap();
        rt.subscribe(owned, root, Selector::Everything, |_, _| Ok(()))
            .unwrap();

        rt.destroy_closure(child).unwrap();
        assert!(rt.closure(child).is_none());
        assert!(rt.datum(owned).is_none());
        assert!(rt.children(root).unwrap().is_empty());
        assert_eq!(rt.subscription_count(), 0);
        assert!(rt.closure(root).unwrap().subscriptions_to_this().is_empty());
        assert!(rt.closure(root).unwrap().subscriptions_by_this().is_empty());
        assert!(matches!(
            rt.destroy_closure(child),
            Err(RuntimeError::UnknownClosure(_))
        ));
    }

    #[test]
    fn binding_that_destroys_its_closure_fails() {
        let registry = MetadataRegistry::new().with_template(
            "app.Gone",
            TemplateMeta::new().with_internal_binding(|rt, id| rt.destroy_closure(id)),
        );
        let mut rt = Runtime::new(registry);
        let err = rt
            .instantiate("app.Gone", None, Vec::<(String, Value)>::new())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownClosure(_)));
        assert_eq!(rt.closure_count(), 0);
    }

    #[test]
    fn run_destroys_the_root_after_a_cycle_overrun() {
        let registry = MetadataRegistry::new().with_template(
            "app.Main",
            TemplateMeta::new().with_internal_binding(|rt, id| {
                rt.create_datum("Scratch", [("x", Value::Int(0))], Some(id))?;
                rt.subscribe(id, id, Selector::key("n"), |rt, n| {
                    let v = rt.get(n.source, "n")?.as_int().unwrap_or(0);
                    rt.set(n.source, "n", v + 1).map(|_| ())
                })?;
                Ok(())
            }),
        );
        let config = crate::config::RuntimeConfig::default().with_gen_limit(3);
        let mut rt = Runtime::with_config(registry, config);

        let err = rt.run(None).unwrap_err();
        assert!(matches!(err, RuntimeError::CycleOverrun { limit: 3, .. }));
        assert_eq!(rt.closure_count(), 0);
        assert_eq!(rt.datum_count(), 0);
        assert_eq!(rt.subscription_count(), 0);
        assert!(rt.roots().is_empty());

        // Still usable afterwards.
        let c = rt.create_closure("Fresh", None).unwrap();
        rt.set(c, "v", 1).unwrap();
        assert!(rt.drain().is_ok());
    }

    #[test]
    fn run_resolves_entry_template() {
        let registry = MetadataRegistry::new()
            .with_template("demo.Main", TemplateMeta::new())
            .with_template("demo.Other", TemplateMeta::new());
        let mut rt = Runtime::new(registry);
        let root = rt.run(None).unwrap();
        assert_eq!(rt.closure(root).unwrap().template(), "demo.Main");
        assert_eq!(rt.roots(), vec![root]);
    }
}
