#![forbid(unsafe_code)]

//! Change descriptors and the selectors that filter them.
//!
//! Every effective mutation produces one [`Change`]. A subscription fires
//! when its [`Selector`] matches that change:
//!
//! | selector      | field | items | availability | carried |
//! |---------------|-------|-------|--------------|---------|
//! | `Everything`  | yes   | yes   | yes          | yes     |
//! | `Structural`  | yes   | yes   | yes          | no      |
//! | `Carried`     | no    | no    | no           | yes     |
//! | `Key(k)`      | if k  | no    | no           | no      |
//! | `OneOf(ks)`   | if in | no    | no           | no      |
//!
//! `Carried` excludes structural changes on the same event.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// What happened to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// A named field of a record datum or a closure changed.
    Field(String),
    /// The item list of a collection datum changed.
    Items,
    /// A datum's availability (or error payload) changed.
    Availability,
    /// Something owned by this node changed.
    Carried,
}

impl Change {
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        !matches!(self, Self::Carried)
    }

    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Field(name) => Some(name),
            _ => None,
        }
    }
}

/// Change filter on a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    Everything,
    Structural,
    Carried,
    Key(String),
    OneOf(BTreeSet<String>),
}

impl Selector {
    #[must_use]
    pub fn key(name: impl Into<String>) -> Self {
        Self::Key(name.into())
    }

    #[must_use]
    pub fn one_of<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::OneOf(names.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn matches(&self, change: &Change) -> bool {
        match self {
            Self::Everything => true,
            Self::Structural => change.is_structural(),
            Self::Carried => !change.is_structural(),
            Self::Key(key) => change.field() == Some(key.as_str()),
            Self::OneOf(keys) => change.field().is_some_and(|f| keys.contains(f)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(name: &str) -> Change {
        Change::Field(name.to_owned())
    }

    #[test]
    fn everything_matches_all() {
        for change in [field("a"), Change::Items, Change::Availability, Change::Carried] {
            assert!(Selector::Everything.matches(&change));
        }
    }

    #[test]
    fn structural_ignores_carried() {
        assert!(Selector::Structural.matches(&field("a")));
        assert!(Selector::Structural.matches(&Change::Items));
        assert!(Selector::Structural.matches(&Change::Availability));
        assert!(!Selector::Structural.matches(&Change::Carried));
    }

    #[test]
    fn carried_ignores_structural() {
        assert!(Selector::Carried.matches(&Change::Carried));
        assert!(!Selector::Carried.matches(&field("a")));
        assert!(!Selector::Carried.matches(&Change::Items));
    }

    #[test]
    fn key_matches_only_its_field() {
        let sel = Selector::key("count");
        assert!(sel.matches(&field("count")));
        assert!(!sel.matches(&field("other")));
        assert!(!sel.matches(&Change::Items));
        assert!(!sel.matches(&Change::Carried));
    }

    #[test]
    fn one_of_matches_any_member() {
        let sel = Selector::one_of(["a", "b"]);
        assert!(sel.matches(&field("a")));
        assert!(sel.matches(&field("b")));
        assert!(!sel.matches(&field("c")));
        assert!(!sel.matches(&Change::Availability));
    }
}
