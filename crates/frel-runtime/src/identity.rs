#![forbid(unsafe_code)]

//! Identity handles and their allocator.
//!
//! # Design
//!
//! Datum and closure identities are interleaved over one counter domain and
//! told apart by the low bit: datums are even, closures are odd. Inside the
//! kernel the distinction is carried by types ([`DatumId`], [`ClosureId`],
//! and the tagged [`NodeId`]), so a closure identity can never be stored
//! where a datum identity is expected. The parity bit is only consulted when
//! a raw integer crosses into the kernel (events, deserialized ids).
//!
//! Subscription and function identities use their own counters and never
//! appear in a field slot.
//!
//! # Invariants
//!
//! 1. Every counter is monotonically increasing; identities are never reused.
//! 2. `DatumId::raw()` is always even, `ClosureId::raw()` is always odd.
//! 3. Decoding a raw integer with the wrong parity fails with
//!    [`RuntimeError::IdentityViolation`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Handle of a composite reactive cell (record or collection). Always even.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct DatumId(u64);

/// Handle of a template instantiation. Always odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct ClosureId(u64);

/// Handle of a subscription edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(u64);

/// Handle of a callback bound to a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(u64);

impl DatumId {
    /// Decode a raw identity, rejecting odd (closure) values.
    pub fn from_raw(raw: u64) -> Result<Self> {
        if raw & 1 == 0 {
            Ok(Self(raw))
        } else {
            Err(RuntimeError::IdentityViolation {
                raw,
                expected: "datum",
            })
        }
    }

    /// Get the raw identity value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl ClosureId {
    /// Decode a raw identity, rejecting even (datum) values.
    pub fn from_raw(raw: u64) -> Result<Self> {
        if raw & 1 == 1 {
            Ok(Self(raw))
        } else {
            Err(RuntimeError::IdentityViolation {
                raw,
                expected: "closure",
            })
        }
    }

    /// Get the raw identity value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl SubscriptionId {
    /// Get the raw identity value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl FunctionId {
    /// Get the raw identity value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for DatumId {
    type Error = RuntimeError;

    fn try_from(raw: u64) -> Result<Self> {
        Self::from_raw(raw)
    }
}

impl TryFrom<u64> for ClosureId {
    type Error = RuntimeError;

    fn try_from(raw: u64) -> Result<Self> {
        Self::from_raw(raw)
    }
}

impl From<DatumId> for u64 {
    fn from(id: DatumId) -> Self {
        id.0
    }
}

impl From<ClosureId> for u64 {
    fn from(id: ClosureId) -> Self {
        id.0
    }
}

impl fmt::Display for DatumId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "datum#{}", self.0)
    }
}

impl fmt::Display for ClosureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "closure#{}", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// Either kind of subscribable node.
///
/// Subscriptions accept any node as source or target; field slots never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Datum(DatumId),
    Closure(ClosureId),
}

impl NodeId {
    /// Decode a raw identity by parity. Never fails: every integer is either
    /// a datum or a closure identity.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        if raw & 1 == 0 {
            Self::Datum(DatumId(raw))
        } else {
            Self::Closure(ClosureId(raw))
        }
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        match self {
            Self::Datum(id) => id.0,
            Self::Closure(id) => id.0,
        }
    }

    #[must_use]
    pub const fn as_datum(self) -> Option<DatumId> {
        match self {
            Self::Datum(id) => Some(id),
            Self::Closure(_) => None,
        }
    }

    #[must_use]
    pub const fn as_closure(self) -> Option<ClosureId> {
        match self {
            Self::Closure(id) => Some(id),
            Self::Datum(_) => None,
        }
    }
}

impl From<DatumId> for NodeId {
    fn from(id: DatumId) -> Self {
        Self::Datum(id)
    }
}

impl From<ClosureId> for NodeId {
    fn from(id: ClosureId) -> Self {
        Self::Closure(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Datum(id) => id.fmt(f),
            Self::Closure(id) => id.fmt(f),
        }
    }
}

/// Issues the four identity families.
#[derive(Debug, Clone)]
pub(crate) struct IdAllocator {
    next_datum: u64,
    next_closure: u64,
    next_subscription: u64,
    next_function: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            next_datum: 0,
            next_closure: 1,
            next_subscription: 0,
            next_function: 0,
        }
    }
}

impl IdAllocator {
    pub(crate) fn datum(&mut self) -> DatumId {
        let id = DatumId(self.next_datum);
        self.next_datum += 2;
        id
    }

    pub(crate) fn closure(&mut self) -> ClosureId {
        let id = ClosureId(self.next_closure);
        self.next_closure += 2;
        id
    }

    pub(crate) fn subscription(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        id
    }

    pub(crate) fn function(&mut self) -> FunctionId {
        let id = FunctionId(self.next_function);
        self.next_function += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datum_and_closure_counters_interleave() {
        let mut ids = IdAllocator::default();
        let d: Vec<u64> = (0..3).map(|_| ids.datum().raw()).collect();
        let c: Vec<u64> = (0..3).map(|_| ids.closure().raw()).collect();
        assert_eq!(d, vec![0, 2, 4]);
        assert_eq!(c, vec![1, 3, 5]);
    }

    #[test]
    fn subscription_and_function_counters_are_independent() {
        let mut ids = IdAllocator::default();
        assert_eq!(ids.subscription().raw(), 0);
        assert_eq!(ids.subscription().raw(), 1);
        assert_eq!(ids.function().raw(), 0);
        let _ = ids.datum();
        assert_eq!(ids.subscription().raw(), 2);
        assert_eq!(ids.function().raw(), 1);
    }

    #[test]
    fn raw_decoding_checks_parity() {
        assert!(DatumId::from_raw(4).is_ok());
        assert!(matches!(
            DatumId::from_raw(5),
            Err(RuntimeError::IdentityViolation { raw: 5, expected: "datum" })
        ));
        assert!(ClosureId::from_raw(7).is_ok());
        assert!(ClosureId::from_raw(8).is_err());
    }

    #[test]
    fn node_id_from_raw_uses_low_bit() {
        assert_eq!(NodeId::from_raw(10).as_datum().map(DatumId::raw), Some(10));
        assert_eq!(NodeId::from_raw(11).as_closure().map(ClosureId::raw), Some(11));
        assert_eq!(NodeId::from_raw(11).raw(), 11);
    }

    #[test]
    fn deserializing_wrong_parity_fails() {
        let ok: DatumId = serde_json::from_str("6").expect("even id");
        assert_eq!(ok.raw(), 6);
        assert!(serde_json::from_str::<DatumId>("7").is_err());
        assert!(serde_json::from_str::<ClosureId>("6").is_err());
    }

    #[test]
    fn display_names_the_family() {
        let mut ids = IdAllocator::default();
        assert_eq!(ids.datum().to_string(), "datum#0");
        assert_eq!(ids.closure().to_string(), "closure#1");
        assert_eq!(NodeId::from_raw(2).to_string(), "datum#2");
    }
}
