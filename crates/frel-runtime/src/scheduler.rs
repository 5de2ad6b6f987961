#![forbid(unsafe_code)]

//! Notification scheduler: the generation-batched drain loop.
//!
//! # Algorithm
//!
//! While the pending set is non-empty:
//!
//! 1. Take the whole pending set as this wave's snapshot and bump the
//!    generation.
//! 2. Run the callback of every id in the snapshot that is still
//!    registered. Writes made by callbacks enqueue into the (now empty)
//!    pending set, so they run in the next wave, never this one.
//! 3. Repeat.
//!
//! The pending collection is a set: a subscription enqueued by several
//! sources in one wave still runs once. That is what makes a diamond
//! glitch-free.
//!
//! # Invariants
//!
//! 1. `generation` strictly increases, one per wave, and never resets.
//! 2. At most `gen_limit` waves run per drain. If the set is still not
//!    empty after that, pending notifications are discarded and
//!    [`RuntimeError::CycleOverrun`] is returned. The runtime stays usable.
//! 3. A queued id whose subscription was removed is skipped and counted in
//!    [`DrainReport::stale_skipped`].
//!
//! # Failure Modes
//!
//! - **Callback error**: logged and counted under
//!   [`CallbackErrorPolicy::Log`]; under [`CallbackErrorPolicy::Abort`] the
//!   drain stops, pending notifications are discarded and the error is
//!   returned.
//! - **Drain from inside a callback**: rejected with
//!   [`RuntimeError::Reentrant`].

use std::collections::BTreeSet;
use std::mem;

use serde::Serialize;

use crate::config::CallbackErrorPolicy;
use crate::error::{Result, RuntimeError};
use crate::identity::SubscriptionId;
use crate::runtime::Runtime;
use crate::subscription::Notification;
use crate::trace::TraceEvent;

/// Default wave limit before a drain is considered a cycle.
pub const GEN_LIMIT: usize = 1000;

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    pending: BTreeSet<SubscriptionId>,
    generation: u64,
    draining: bool,
}

impl Scheduler {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining
    }

    /// Returns `true` if the id was not already pending.
    pub(crate) fn enqueue(&mut self, id: SubscriptionId) -> bool {
        self.pending.insert(id)
    }

    fn take_wave(&mut self) -> (u64, BTreeSet<SubscriptionId>) {
        self.generation += 1;
        (self.generation, mem::take(&mut self.pending))
    }

    fn discard(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }
}

/// Summary of one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Generation before the first wave.
    pub start_generation: u64,
    /// Generation after the last wave.
    pub end_generation: u64,
    pub waves: usize,
    pub callbacks_run: usize,
    pub stale_skipped: usize,
    pub callback_failures: usize,
    /// Queued events applied by [`Runtime::drain_events`].
    pub events_applied: usize,
    /// Queued events rejected by [`Runtime::drain_events`].
    pub events_rejected: usize,
}

impl DrainReport {
    fn starting_at(generation: u64) -> Self {
        Self {
            start_generation: generation,
            end_generation: generation,
            ..Self::default()
        }
    }

    /// Whether the drain had nothing to do.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.waves == 0
    }
}

impl Runtime {
    /// Run waves until no notification is pending.
    pub fn drain(&mut self) -> Result<DrainReport> {
        if self.scheduler.draining {
            return Err(RuntimeError::Reentrant);
        }
        let mut report = DrainReport::starting_at(self.scheduler.generation);
        if self.scheduler.pending.is_empty() {
            return Ok(report);
        }

        let pending = self.scheduler.pending.len();
        self.tracer.emit(|| TraceEvent::DrainStarted {
            generation: report.start_generation,
            pending,
        });

        self.scheduler.draining = true;
        let outcome = self.run_waves(&mut report);
        self.scheduler.draining = false;

        let overrun = matches!(outcome, Err(RuntimeError::CycleOverrun { .. }));
        self.tracer.emit(|| TraceEvent::DrainFinished {
            generation: report.end_generation,
            waves: report.waves,
            overrun,
        });
        tracing::debug!(
            message = "drain.end",
            start = report.start_generation,
            end = report.end_generation,
            waves = report.waves,
            callbacks = report.callbacks_run,
            stale = report.stale_skipped,
            failures = report.callback_failures,
            overrun,
        );

        outcome.map(|()| report)
    }

    fn run_waves(&mut self, report: &mut DrainReport) -> Result<()> {
        let limit = self.config.gen_limit;
        while !self.scheduler.pending.is_empty() {
            if report.waves >= limit {
                let discarded = self.scheduler.discard();
                tracing::error!(
                    message = "drain.cycle_overrun",
                    limit,
                    discarded,
                    generation = self.scheduler.generation,
                );
                return Err(RuntimeError::CycleOverrun { limit, discarded });
            }

            let (generation, wave) = self.scheduler.take_wave();
            report.waves += 1;
            report.end_generation = generation;

            let mut callbacks = 0;
            for id in wave {
                let Some((subscription, callback)) = self.registry.callback(id) else {
                    report.stale_skipped += 1;
                    tracing::trace!(message = "drain.stale", subscription = %id, generation);
                    continue;
                };
                let notification = Notification {
                    subscription: id,
                    source: subscription.source,
                    target: subscription.target,
                    generation,
                };
                self.tracer.emit(|| TraceEvent::Notified {
                    subscription: id,
                    generation,
                });

                callbacks += 1;
                if let Err(err) = callback(self, &notification) {
                    report.callback_failures += 1;
                    match self.config.callback_errors {
                        CallbackErrorPolicy::Log => {
                            tracing::warn!(
                                message = "drain.callback_failed",
                                subscription = %id,
                                generation,
                                %err,
                            );
                        }
                        CallbackErrorPolicy::Abort => {
                            let discarded = self.scheduler.discard();
                            tracing::warn!(
                                message = "drain.callback_aborted",
                                subscription = %id,
                                generation,
                                discarded,
                                %err,
                            );
                            report.callbacks_run += callbacks;
                            return Err(err);
                        }
                    }
                }
            }

            report.callbacks_run += callbacks;
            self.tracer
                .emit(|| TraceEvent::GenerationDrained { generation, callbacks });
        }
        Ok(())
    }
}
