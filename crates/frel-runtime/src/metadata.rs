#![forbid(unsafe_code)]

//! Template metadata produced by the compiler.
//!
//! The kernel never inspects template source. For each fully-qualified
//! template name it only needs:
//!
//! - an optional **internal binding**, which wires subscriptions inside a
//!   fresh closure;
//! - the **top-level children**, a list of call-site indices instantiated
//!   together with the closure;
//! - the **call sites**, each naming a child template and an optional
//!   binding that wires parent → child subscriptions.
//!
//! Call sites not listed as top-level children (conditional or repeated
//! content) are instantiated on demand through
//! [`Runtime::instantiate_call_site`].

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use ahash::AHashMap;

use crate::error::{Result, RuntimeError};
use crate::identity::ClosureId;
use crate::runtime::Runtime;

/// Wires the subscriptions internal to a closure.
pub type InternalBinding = Rc<dyn Fn(&mut Runtime, ClosureId) -> Result<()>>;

/// Wires the subscriptions between a parent closure and a child closure.
pub type CallSiteBinding = Rc<dyn Fn(&mut Runtime, ClosureId, ClosureId) -> Result<()>>;

/// One child instantiation point inside a template.
#[derive(Clone)]
pub struct CallSite {
    template: String,
    binding: Option<CallSiteBinding>,
}

impl CallSite {
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            binding: None,
        }
    }

    #[must_use]
    pub fn with_binding<F>(mut self, binding: F) -> Self
    where
        F: Fn(&mut Runtime, ClosureId, ClosureId) -> Result<()> + 'static,
    {
        self.binding = Some(Rc::new(binding));
        self
    }

    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    #[must_use]
    pub fn binding(&self) -> Option<&CallSiteBinding> {
        self.binding.as_ref()
    }
}

impl fmt::Debug for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSite")
            .field("template", &self.template)
            .field("binding", &self.binding.is_some())
            .finish()
    }
}

/// Metadata of one template.
#[derive(Clone, Default)]
pub struct TemplateMeta {
    internal_binding: Option<InternalBinding>,
    top_children: Vec<usize>,
    call_sites: BTreeMap<usize, CallSite>,
}

impl TemplateMeta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_internal_binding<F>(mut self, binding: F) -> Self
    where
        F: Fn(&mut Runtime, ClosureId) -> Result<()> + 'static,
    {
        self.internal_binding = Some(Rc::new(binding));
        self
    }

    /// Declare a call site and list it as a top-level child.
    #[must_use]
    pub fn with_child(mut self, index: usize, site: CallSite) -> Self {
        if !self.top_children.contains(&index) {
            self.top_children.push(index);
        }
        self.call_sites.insert(index, site);
        self
    }

    /// Declare a call site instantiated on demand.
    #[must_use]
    pub fn with_call_site(mut self, index: usize, site: CallSite) -> Self {
        self.call_sites.insert(index, site);
        self
    }

    #[must_use]
    pub fn internal_binding(&self) -> Option<&InternalBinding> {
        self.internal_binding.as_ref()
    }

    #[must_use]
    pub fn top_children(&self) -> &[usize] {
        &self.top_children
    }

    #[must_use]
    pub fn call_site(&self, index: usize) -> Option<&CallSite> {
        self.call_sites.get(&index)
    }
}

impl fmt::Debug for TemplateMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateMeta")
            .field("internal_binding", &self.internal_binding.is_some())
            .field("top_children", &self.top_children)
            .field("call_sites", &self.call_sites)
            .finish()
    }
}

/// Fully-qualified template name → metadata.
#[derive(Clone, Default)]
pub struct MetadataRegistry {
    templates: AHashMap<String, Rc<TemplateMeta>>,
}

impl MetadataRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a template.
    pub fn register(&mut self, name: impl Into<String>, meta: TemplateMeta) -> Option<Rc<TemplateMeta>> {
        self.templates.insert(name.into(), Rc::new(meta))
    }

    #[must_use]
    pub fn with_template(mut self, name: impl Into<String>, meta: TemplateMeta) -> Self {
        self.register(name, meta);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rc<TemplateMeta>> {
        self.templates.get(name).cloned()
    }

    pub(crate) fn require(&self, name: &str) -> Result<Rc<TemplateMeta>> {
        self.get(name).ok_or_else(|| RuntimeError::UnknownTemplate {
            name: name.to_owned(),
        })
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Resolve the entry template: the one name equal to `entry` or ending
    /// in `.{entry}`.
    pub fn resolve_entry(&self, entry: &str) -> Result<&str> {
        let suffix = format!(".{entry}");
        let candidates: Vec<&str> = self
            .names()
            .into_iter()
            .filter(|name| *name == entry || name.ends_with(&suffix))
            .collect();
        match candidates.as_slice() {
            [only] => Ok(*only),
            [] => Err(RuntimeError::NoEntryTemplate {
                entry: entry.to_owned(),
            }),
            many => Err(RuntimeError::AmbiguousEntryTemplate {
                entry: entry.to_owned(),
                candidates: many.iter().map(|s| (*s).to_owned()).collect(),
            }),
        }
    }
}

impl fmt::Debug for MetadataRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataRegistry")
            .field("templates", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_child_lists_top_children_once() {
        let meta = TemplateMeta::new()
            .with_child(0, CallSite::new("app.Header"))
            .with_child(2, CallSite::new("app.Footer"))
            .with_child(0, CallSite::new("app.Banner"))
            .with_call_site(1, CallSite::new("app.Row"));
        assert_eq!(meta.top_children(), &[0, 2]);
        assert_eq!(meta.call_site(0).unwrap().template(), "app.Banner");
        assert_eq!(meta.call_site(1).unwrap().template(), "app.Row");
        assert!(meta.call_site(3).is_none());
    }

    #[test]
    fn resolve_entry_by_suffix() {
        let registry = MetadataRegistry::new()
            .with_template("app.Main", TemplateMeta::new())
            .with_template("app.Mainframe", TemplateMeta::new())
            .with_template("lib.Button", TemplateMeta::new());
        assert_eq!(registry.resolve_entry("Main").unwrap(), "app.Main");
        assert_eq!(registry.resolve_entry("app.Main").unwrap(), "app.Main");
    }

    #[test]
    fn resolve_entry_reports_missing_and_ambiguous() {
        let registry = MetadataRegistry::new()
            .with_template("a.Main", TemplateMeta::new())
            .with_template("b.Main", TemplateMeta::new());
        match registry.resolve_entry("Main") {
            Err(RuntimeError::AmbiguousEntryTemplate { candidates, .. }) => {
                assert_eq!(candidates, vec!["a.Main".to_owned(), "b.Main".to_owned()]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert!(matches!(
            registry.resolve_entry("App"),
            Err(RuntimeError::NoEntryTemplate { .. })
        ));
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = MetadataRegistry::new();
        assert!(registry.register("x.T", TemplateMeta::new()).is_none());
        assert!(registry.register("x.T", TemplateMeta::new()).is_some());
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("x.T"));
        assert!(registry.require("x.U").is_err());
    }
}
