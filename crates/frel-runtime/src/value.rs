#![forbid(unsafe_code)]

//! Values stored in datum and closure field slots.
//!
//! A slot holds either an intrinsic (stored by value) or a composite, which
//! is stored as the identity of a child datum. There is no closure variant:
//! closures are not values.
//!
//! # Equality
//!
//! Change detection compares with `==`, which is shallow: intrinsics compare
//! by value, composites compare by identity. Two distinct datums with equal
//! contents are different values. `Float(NaN)` never equals itself, so
//! writing NaN always counts as a change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::DatumId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Datum(DatumId),
}

impl Value {
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether the value refers to a datum rather than holding data inline.
    #[must_use]
    pub const fn is_composite(&self) -> bool {
        matches!(self, Self::Datum(_))
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric view; integers widen to `f64`.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_datum(&self) -> Option<DatumId> {
        match self {
            Self::Datum(id) => Some(*id),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Datum(id) => id.fmt(f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<DatumId> for Value {
    fn from(id: DatumId) -> Self {
        Self::Datum(id)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composites_compare_by_identity() {
        let a = DatumId::from_raw(2).unwrap();
        let b = DatumId::from_raw(4).unwrap();
        assert_eq!(Value::from(a), Value::Datum(a));
        assert_ne!(Value::from(a), Value::from(b));
    }

    #[test]
    fn nan_is_never_equal() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(1.5), Value::Float(1.5));
    }

    #[test]
    fn int_and_float_are_distinct_values() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_eq!(Value::Int(3).as_float(), Some(3.0));
    }

    #[test]
    fn option_maps_none_to_null() {
        assert!(Value::from(None::<i64>).is_null());
        assert_eq!(Value::from(Some("x")), Value::Str("x".into()));
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_string(&Value::Int(5)).unwrap();
        assert_eq!(json, r#"{"kind":"int","value":5}"#);
        let json = serde_json::to_string(&Value::Null).unwrap();
        assert_eq!(json, r#"{"kind":"null"}"#);
    }
}
