#![forbid(unsafe_code)]

//! Error taxonomy for the kernel.
//!
//! Stale subscription references are not errors (the scheduler skips them),
//! and Loading/Error availability is data, not an error. What remains are
//! contract violations by the caller and the cycle safety valve.

use thiserror::Error;

use crate::datum::Shape;
use crate::identity::{ClosureId, DatumId};

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("{0} does not exist")]
    UnknownDatum(DatumId),

    #[error("{0} does not exist")]
    UnknownClosure(ClosureId),

    #[error("template not found: {name}")]
    UnknownTemplate { name: String },

    #[error("template {template} has no call site {index}")]
    UnknownCallSite { template: String, index: usize },

    #[error("{datum} is a {actual}, expected a {expected}")]
    ShapeMismatch {
        datum: DatumId,
        expected: Shape,
        actual: Shape,
    },

    #[error("item index {index} out of range for {datum} (len {len})")]
    ItemIndexOutOfRange {
        datum: DatumId,
        index: usize,
        len: usize,
    },

    #[error("raw id {raw} is not a {expected} identity")]
    IdentityViolation { raw: u64, expected: &'static str },

    #[error("notification cycle: {limit} generations without draining ({discarded} pending discarded)")]
    CycleOverrun { limit: usize, discarded: usize },

    #[error("no template matches entry name `{entry}`")]
    NoEntryTemplate { entry: String },

    #[error("entry name `{entry}` is ambiguous: {candidates:?}")]
    AmbiguousEntryTemplate {
        entry: String,
        candidates: Vec<String>,
    },

    #[error("drain requested while a drain is already running")]
    Reentrant,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    /// Whether this error came from the cycle safety valve.
    #[must_use]
    pub fn is_cycle_overrun(&self) -> bool {
        matches!(self, Self::CycleOverrun { .. })
    }
}
