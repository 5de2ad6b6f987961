#![forbid(unsafe_code)]

//! Point-in-time, read-only view of every live node.
//!
//! Snapshots are owned copies keyed by id in ascending order, so two
//! snapshots of the same state serialize identically. They are what an
//! external tracer or a test harness diffs between drains.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::datum::{Availability, Revisions};
use crate::error::Result;
use crate::identity::{ClosureId, DatumId};
use crate::runtime::Runtime;
use crate::value::Value;

/// Contents of a datum snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumContent {
    Fields(BTreeMap<String, Value>),
    Items(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatumSnapshot {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(flatten)]
    pub content: DatumContent,
    pub availability: Availability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    pub owner: Option<ClosureId>,
    pub revisions: Revisions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosureSnapshot {
    pub template: String,
    pub parent: Option<ClosureId>,
    pub children: Vec<ClosureId>,
    pub fields: BTreeMap<String, Value>,
    pub owned_datum: Vec<DatumId>,
    pub revisions: Revisions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub generation: u64,
    pub datums: BTreeMap<DatumId, DatumSnapshot>,
    pub closures: BTreeMap<ClosureId, ClosureSnapshot>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Runtime {
    /// Copy out the current state of every live datum and closure.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        let datums = self
            .datums
            .values()
            .map(|d| {
                let content = match (d.fields(), d.items()) {
                    (Some(fields), _) => DatumContent::Fields(fields.clone()),
                    (None, items) => DatumContent::Items(items.unwrap_or_default().to_vec()),
                };
                let snap = DatumSnapshot {
                    type_name: d.type_name.clone(),
                    content,
                    availability: d.availability,
                    error: d.error.clone(),
                    owner: d.owner,
                    revisions: d.revisions,
                };
                (d.id, snap)
            })
            .collect();
        let closures = self
            .closures
            .values()
            .map(|c| {
                let snap = ClosureSnapshot {
                    template: c.template.clone(),
                    parent: c.parent,
                    children: c.children.clone(),
                    fields: c.fields.clone(),
                    owned_datum: c.owned_datum.clone(),
                    revisions: c.revisions,
                };
                (c.id, snap)
            })
            .collect();
        Snapshot {
            generation: self.scheduler.generation(),
            datums,
            closures,
        }
    }
}
