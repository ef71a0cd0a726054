//! Error taxonomy for orchestrated operations.

use std::{fmt, time::Duration};

use settle_api::StoreError;
use settle_types::{CopyError, ObjectKey};
use settle_util::format_duration;
use thiserror::Error;

use crate::{orchestrator::MutationKind, render::RenderError};

/// Short category name carried by every [`OrchestrationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    InvalidArguments,
    InvalidTemplateOrBindings,
    StoreMutation,
    ConsistencyTimeout,
    StateCopy,
    StoreRead,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::InvalidArguments => "InvalidArguments",
            ErrorCategory::InvalidTemplateOrBindings => "InvalidTemplateOrBindings",
            ErrorCategory::StoreMutation => "StoreMutationError",
            ErrorCategory::ConsistencyTimeout => "ConsistencyTimeoutError",
            ErrorCategory::StateCopy => "StateCopyError",
            ErrorCategory::StoreRead => "StoreReadError",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one orchestrated call.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    /// Malformed, ambiguous or conflicting call-site arguments.
    #[error("{0}")]
    InvalidArguments(String),
    /// The template could not be rendered into the expected documents.
    #[error(transparent)]
    InvalidTemplateOrBindings(#[from] RenderError),
    /// The create/update/delete call itself failed.
    #[error("{operation} of {key} failed: {source}")]
    StoreMutation {
        operation: MutationKind,
        key: ObjectKey,
        #[source]
        source: StoreError,
    },
    /// Every mutation succeeded but the change was not observed within the timeout.
    #[error("{}", timeout_message(pending, *elapsed, *ticks, last_read_error.as_ref()))]
    ConsistencyTimeout {
        pending: Vec<ObjectKey>,
        elapsed: Duration,
        ticks: u32,
        last_read_error: Option<StoreError>,
    },
    /// A document could not be stored in a destination handle.
    #[error("cannot copy {target} into result handle: {source}")]
    StateCopy {
        target: String,
        #[source]
        source: CopyError,
    },
    /// A read-only operation could not read from the store.
    #[error("reading {target} failed: {source}")]
    StoreRead {
        target: String,
        #[source]
        source: StoreError,
    },
}

impl OrchestrationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            OrchestrationError::InvalidArguments(_) => ErrorCategory::InvalidArguments,
            OrchestrationError::InvalidTemplateOrBindings(_) => ErrorCategory::InvalidTemplateOrBindings,
            OrchestrationError::StoreMutation { .. } => ErrorCategory::StoreMutation,
            OrchestrationError::ConsistencyTimeout { .. } => ErrorCategory::ConsistencyTimeout,
            OrchestrationError::StateCopy { .. } => ErrorCategory::StateCopy,
            OrchestrationError::StoreRead { .. } => ErrorCategory::StoreRead,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        OrchestrationError::InvalidArguments(message.into())
    }

    /// The store error behind a mutation or read failure.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            OrchestrationError::StoreMutation { source, .. } | OrchestrationError::StoreRead { source, .. } => Some(source),
            OrchestrationError::ConsistencyTimeout { last_read_error, .. } => last_read_error.as_ref(),
            _ => None,
        }
    }
}

fn timeout_message(pending: &[ObjectKey], elapsed: Duration, ticks: u32, last_read_error: Option<&StoreError>) -> String {
    let resources = pending.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
    let cause = match last_read_error {
        Some(error) => format!("store unreachable, last read error: {error}"),
        None => "store reachable but not yet consistent".to_string(),
    };
    format!(
        "change not observed after {} ({ticks} checks) for {resources}: {cause}",
        format_duration(elapsed)
    )
}
