//! The mutation phase: one store call per target, in order, stopping at the first failure.

use std::fmt;

use serde_json::Value;
use settle_api::{CallContext, ObjectStore};
use settle_types::{ObjectKey, ResourceVersion};
use tracing::{debug, warn};

use super::{
    prepare::{Driver, Target},
    wait::Predicate,
};
use crate::{args::Operation, error::OrchestrationError};

/// The store call issued for each target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    /// Merge-patch from a rendered template.
    Patch,
    /// Full replacement from a caller handle.
    Replace,
    Delete,
}

impl MutationKind {
    pub(crate) fn for_operation(operation: Operation, driver: Driver) -> Option<Self> {
        match operation {
            Operation::Create | Operation::CreateAndWait => Some(MutationKind::Create),
            Operation::Update | Operation::UpdateAndWait => Some(match driver {
                Driver::Template => MutationKind::Patch,
                Driver::Handles => MutationKind::Replace,
            }),
            Operation::Delete | Operation::DeleteAndWait => Some(MutationKind::Delete),
            Operation::Get | Operation::List | Operation::Render => None,
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MutationKind::Create => "create",
            MutationKind::Patch => "patch",
            MutationKind::Replace => "update",
            MutationKind::Delete => "delete",
        })
    }
}

/// Outcome of one successful mutation.
#[derive(Debug, Clone)]
pub(crate) struct Applied {
    pub key: ObjectKey,
    /// The store's response, when the call returns one.
    pub stored: Option<Value>,
    /// What a read must show for the mutation to count as visible.
    pub predicate: Predicate,
}

pub(crate) fn apply_mutations<S>(
    store: &S,
    context: &CallContext,
    kind: MutationKind,
    targets: &[Target],
) -> Result<Vec<Applied>, OrchestrationError>
where
    S: ObjectStore + ?Sized,
{
    let mut applied = Vec::with_capacity(targets.len());
    for (index, target) in targets.iter().enumerate() {
        let outcome = match kind {
            MutationKind::Create => store.create(context, &target.document).map(Some),
            MutationKind::Patch => store.patch(context, &target.key, &target.document).map(Some),
            MutationKind::Replace => store.update(context, &target.document).map(Some),
            MutationKind::Delete => store.delete(context, &target.key).map(|()| None),
        };
        let stored = match outcome {
            Ok(stored) => stored,
            Err(source) => {
                warn!(
                    operation = %kind,
                    key = %target.key,
                    skipped = targets.len() - index - 1,
                    error = %source,
                    "mutation failed; remaining targets skipped"
                );
                return Err(OrchestrationError::StoreMutation {
                    operation: kind,
                    key: target.key.clone(),
                    source,
                });
            }
        };
        let predicate = match kind {
            MutationKind::Create => Predicate::Exists,
            MutationKind::Patch | MutationKind::Replace => stored
                .as_ref()
                .and_then(ResourceVersion::from_document)
                .map(Predicate::VersionAtLeast)
                .unwrap_or(Predicate::Exists),
            MutationKind::Delete => Predicate::Absent,
        };
        debug!(operation = %kind, key = %target.key, "mutation applied");
        applied.push(Applied {
            key: target.key.clone(),
            stored,
            predicate,
        });
    }
    Ok(applied)
}
