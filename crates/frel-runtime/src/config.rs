#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! Defaults match the documented kernel behavior; [`RuntimeConfig::from_env`]
//! lets a host override them without recompiling:
//!
//! | variable               | field            | default |
//! |------------------------|------------------|---------|
//! | `FREL_GEN_LIMIT`       | `gen_limit`      | `1000`  |
//! | `FREL_ENTRY_TEMPLATE`  | `entry_template` | `Main`  |
//! | `FREL_CALLBACK_ERRORS` | `callback_errors`| `log`   |

use std::env;
use std::str::FromStr;

use crate::scheduler::GEN_LIMIT;

/// What the drain loop does when a callback returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallbackErrorPolicy {
    /// Log the failure, count it in the drain report, keep draining.
    #[default]
    Log,
    /// Stop the drain, discard pending notifications, return the error.
    Abort,
}

impl FromStr for CallbackErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "continue" => Ok(Self::Log),
            "abort" | "fail" => Ok(Self::Abort),
            other => Err(format!("unknown callback error policy: {other}")),
        }
    }
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Maximum drain waves before the cycle safety valve trips.
    pub gen_limit: usize,
    /// Short name of the template `run(None)` instantiates.
    pub entry_template: String,
    /// Behavior on callback failure.
    pub callback_errors: CallbackErrorPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gen_limit: GEN_LIMIT,
            entry_template: "Main".to_owned(),
            callback_errors: CallbackErrorPolicy::Log,
        }
    }
}

impl RuntimeConfig {
    /// Set the wave limit. Clamped to at least one wave.
    #[must_use]
    pub fn with_gen_limit(mut self, limit: usize) -> Self {
        self.gen_limit = limit.max(1);
        self
    }

    /// Set the entry template short name.
    #[must_use]
    pub fn with_entry_template(mut self, name: impl Into<String>) -> Self {
        self.entry_template = name.into();
        self
    }

    /// Set the callback error policy.
    #[must_use]
    pub fn with_callback_errors(mut self, policy: CallbackErrorPolicy) -> Self {
        self.callback_errors = policy;
        self
    }

    /// Defaults overridden by `FREL_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `FREL_*`
    /// key. Unparsable values are logged and ignored.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(val) = lookup("FREL_GEN_LIMIT") {
            match val.trim().parse::<usize>() {
                Ok(n) => config = config.with_gen_limit(n),
                Err(_) => tracing::warn!(message = "config.ignored", key = "FREL_GEN_LIMIT", value = %val),
            }
        }
        if let Some(val) = lookup("FREL_ENTRY_TEMPLATE")
            && !val.trim().is_empty()
        {
            config.entry_template = val.trim().to_owned();
        }
        if let Some(val) = lookup("FREL_CALLBACK_ERRORS") {
            match val.parse() {
                Ok(policy) => config.callback_errors = policy,
                Err(err) => tracing::warn!(message = "config.ignored", key = "FREL_CALLBACK_ERRORS", %err),
            }
        }
        config
    }
}
