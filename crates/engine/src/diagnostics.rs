//! Failure reporting for waiting operations.
//!
//! Waiting operations are assertions: when one fails, the surrounding test (or run) must
//! stop. The report goes through a [`FailureReporter`] so hosts other than the test harness
//! can decide what "stop" means.

use tracing::error;

use crate::{args::Operation, error::OrchestrationError};

/// Severity marker that starts every failure message.
pub const FATAL_TAG: &str = "[FATAL]";

/// Receives fatal failures. Implementations must not return.
pub trait FailureReporter: Send + Sync {
    fn fail_now(&self, message: &str) -> !;
}

/// Panics with the failure message, which fails the current test.
#[derive(Debug, Default, Clone, Copy)]
pub struct PanicReporter;

impl FailureReporter for PanicReporter {
    fn fail_now(&self, message: &str) -> ! {
        panic!("{message}")
    }
}

/// `[FATAL] <Category>: <operation> failed: <detail>`
pub fn failure_message(operation: Operation, failure: &OrchestrationError) -> String {
    format!("{FATAL_TAG} {}: {operation} failed: {failure}", failure.category())
}

pub(crate) fn report(reporter: &dyn FailureReporter, operation: Operation, failure: OrchestrationError) -> ! {
    let message = failure_message(operation, &failure);
    error!(operation = %operation, category = %failure.category(), "{failure}");
    reporter.fail_now(&message)
}
