//! Eventual-consistency confirmation.
//!
//! After a successful mutation the store may still serve the old state for a while. The
//! wait loop re-reads every mutated resource on a fixed cadence until each one satisfies
//! its [`Predicate`] or the timeout elapses. Every tick re-evaluates the whole batch from
//! fresh reads; nothing observed on an earlier tick is trusted.

use std::{
    thread,
    time::{Duration, Instant},
};

use serde_json::Value;
use settle_api::{CallContext, ObjectStore, StoreError};
use settle_types::{ObjectKey, ResourceVersion};
use settle_util::format_duration;
use tracing::{debug, info, warn};

use crate::error::OrchestrationError;

/// Timeout and poll interval of one wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitSpec {
    timeout: Duration,
    interval: Duration,
}

impl WaitSpec {
    /// The timeout must leave room for more than one poll.
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self, OrchestrationError> {
        if interval.is_zero() {
            return Err(OrchestrationError::invalid("interval must be greater than zero"));
        }
        if timeout <= interval {
            return Err(OrchestrationError::invalid(format!(
                "timeout ({}) must be greater than interval ({})",
                format_duration(timeout),
                format_duration(interval)
            )));
        }
        Ok(Self { timeout, interval })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// What a fresh read must show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// The resource is readable.
    Exists,
    /// The store reports the resource as not found.
    Absent,
    /// The resource is readable at this version or later.
    VersionAtLeast(ResourceVersion),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Satisfied,
    /// The store answered, but not with the expected state yet.
    Pending,
    /// The store did not answer.
    Unreadable(StoreError),
}

impl Predicate {
    pub fn observe(&self, read: &Result<Value, StoreError>) -> Observation {
        match (self, read) {
            (Predicate::Exists, Ok(_)) => Observation::Satisfied,
            (Predicate::VersionAtLeast(expected), Ok(document)) => match ResourceVersion::from_document(document) {
                Some(actual) if actual.is_at_least(expected) => Observation::Satisfied,
                _ => Observation::Pending,
            },
            (Predicate::Absent, Ok(_)) => Observation::Pending,
            (Predicate::Absent, Err(error)) if error.is_not_found() => Observation::Satisfied,
            (_, Err(error)) if error.is_not_found() => Observation::Pending,
            (_, Err(error)) => Observation::Unreadable(error.clone()),
        }
    }
}

/// One resource to confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub key: ObjectKey,
    pub predicate: Predicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitReport {
    pub ticks: u32,
    pub elapsed: Duration,
}

/// Poll until every check is satisfied. `on_read` sees each successful read with the index
/// of its check, so callers can refresh their copies in place.
///
/// A timeout carries only read errors from the final tick: a store that failed early and
/// answered later is reported as reachable.
pub fn wait_for<S, F>(
    store: &S,
    context: &CallContext,
    spec: &WaitSpec,
    checks: &[Check],
    mut on_read: F,
) -> Result<WaitReport, OrchestrationError>
where
    S: ObjectStore + ?Sized,
    F: FnMut(usize, &Value),
{
    info!(
        resources = checks.len(),
        timeout = %format_duration(spec.timeout),
        interval = %format_duration(spec.interval),
        "waiting for changes to become visible"
    );

    let started = Instant::now();
    let mut ticks = 0u32;
    loop {
        ticks += 1;
        let mut pending = Vec::new();
        let mut last_read_error = None;
        for (index, check) in checks.iter().enumerate() {
            let read = store.get(context, &check.key);
            if let Ok(document) = &read {
                on_read(index, document);
            }
            match check.predicate.observe(&read) {
                Observation::Satisfied => {}
                Observation::Pending => pending.push(check.key.clone()),
                Observation::Unreadable(error) => {
                    debug!(
                        key = %check.key,
                        tick = ticks,
                        transient = error.is_transient(),
                        error = %error,
                        "read failed while waiting"
                    );
                    last_read_error = Some(error);
                    pending.push(check.key.clone());
                }
            }
        }

        let elapsed = started.elapsed();
        if pending.is_empty() {
            info!(ticks, elapsed = %format_duration(elapsed), "changes visible");
            return Ok(WaitReport { ticks, elapsed });
        }
        if elapsed >= spec.timeout {
            warn!(ticks, pending = pending.len(), elapsed = %format_duration(elapsed), "wait timed out");
            return Err(OrchestrationError::ConsistencyTimeout {
                pending,
                elapsed,
                ticks,
                last_read_error,
            });
        }

        thread::sleep(spec.interval);
    }
}
