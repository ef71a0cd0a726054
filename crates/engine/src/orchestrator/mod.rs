//! The orchestrator: argument resolution, preparation, mutation and confirmation wired
//! together for each public operation.
//!
//! Every operation runs the same phases in order and never starts a phase before the previous
//! one succeeded:
//!
//! 1. resolve the call-site arguments against the operation's profile;
//! 2. prepare (render, validate identities, check arity and destination types);
//! 3. mutate each target in order, stopping at the first failure;
//! 4. copy the results into the caller's handles;
//! 5. for waiting operations, poll until the change is visible.
//!
//! The `*_and_wait` operations report failures through the configured [`FailureReporter`]
//! and do not return on failure; their `try_*` twins return the error instead.

mod mutate;
mod prepare;
pub mod wait;

use serde_json::Value;
use settle_api::{CallContext, ObjectStore};
use settle_types::ResourceHandle;
use tracing::{debug, info};

pub use mutate::MutationKind;

use self::{
    mutate::apply_mutations,
    prepare::prepare,
    wait::{Check, WaitSpec, wait_for},
};
use crate::{
    args::{CallArgument, Operation, resolve_arguments},
    config::OrchestratorConfig,
    copy::{DocumentCopier, StateCopier},
    diagnostics::{FailureReporter, PanicReporter, report},
    error::OrchestrationError,
    render::{InterpolatingRenderer, TemplateRenderer},
};

pub struct Orchestrator<S> {
    store: S,
    config: OrchestratorConfig,
    renderer: Box<dyn TemplateRenderer>,
    copier: Box<dyn StateCopier>,
    reporter: Box<dyn FailureReporter>,
}

impl<S: ObjectStore> Orchestrator<S> {
    pub fn new(store: S) -> Self {
        Self::with_config(store, OrchestratorConfig::default())
    }

    pub fn with_config(store: S, config: OrchestratorConfig) -> Self {
        Self {
            store,
            config,
            renderer: Box::new(InterpolatingRenderer),
            copier: Box::new(DocumentCopier),
            reporter: Box::new(PanicReporter),
        }
    }

    pub fn with_renderer(mut self, renderer: impl TemplateRenderer + 'static) -> Self {
        self.renderer = Box::new(renderer);
        self
    }

    pub fn with_copier(mut self, copier: impl StateCopier + 'static) -> Self {
        self.copier = Box::new(copier);
        self
    }

    pub fn with_reporter(mut self, reporter: impl FailureReporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create every target without waiting for it to become visible.
    pub fn create(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        self.mutate(Operation::Create, context, arguments)
    }

    /// Create every target and wait until each one is readable.
    pub fn create_and_wait(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) {
        if let Err(failure) = self.try_create_and_wait(context, arguments) {
            report(self.reporter.as_ref(), Operation::CreateAndWait, failure)
        }
    }

    pub fn try_create_and_wait(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        self.mutate(Operation::CreateAndWait, context, arguments)
    }

    /// Update every target: a template is applied as a merge patch, handles replace the
    /// stored object.
    pub fn update(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        self.mutate(Operation::Update, context, arguments)
    }

    /// Update every target and wait until each one is readable at its new version or later.
    pub fn update_and_wait(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) {
        if let Err(failure) = self.try_update_and_wait(context, arguments) {
            report(self.reporter.as_ref(), Operation::UpdateAndWait, failure)
        }
    }

    pub fn try_update_and_wait(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        self.mutate(Operation::UpdateAndWait, context, arguments)
    }

    /// Delete every target. Deleting a resource that does not exist is an error.
    pub fn delete(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        self.mutate(Operation::Delete, context, arguments)
    }

    /// Delete every target and wait until the store reports each one as not found.
    pub fn delete_and_wait(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) {
        if let Err(failure) = self.try_delete_and_wait(context, arguments) {
            report(self.reporter.as_ref(), Operation::DeleteAndWait, failure)
        }
    }

    pub fn try_delete_and_wait(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        self.mutate(Operation::DeleteAndWait, context, arguments)
    }

    /// Read the current state of every target into the destination handles.
    pub fn get(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        let options = resolve_arguments(Operation::Get, arguments, &self.config)?;
        let mut plan = prepare(options, self.renderer.as_ref(), self.copier.as_ref())?;
        let mut documents = Vec::with_capacity(plan.targets.len());
        for target in &plan.targets {
            let document = self
                .store
                .get(context, &target.key)
                .map_err(|source| OrchestrationError::StoreRead {
                    target: target.key.to_string(),
                    source,
                })?;
            documents.push(document);
        }
        plan.destinations.store(self.copier.as_ref(), &plan.targets, &documents)?;
        debug!(resources = documents.len(), "get finished");
        Ok(())
    }

    /// Replace the contents of the `Objects` destination with every resource the selector
    /// matches.
    pub fn list(&self, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        let options = resolve_arguments(Operation::List, arguments, &self.config)?;
        let (Some(selector), Some(objects)) = (options.selector, options.objects) else {
            return Err(OrchestrationError::invalid("list requires one of: Objects"));
        };
        let documents = self.store.list(context, &selector).map_err(|source| OrchestrationError::StoreRead {
            target: describe_selector(&selector),
            source,
        })?;
        debug!(resources = documents.len(), kind = %selector.gvk.kind, "list finished");
        *objects = documents.into_iter().map(ResourceHandle::from_document).collect();
        Ok(())
    }

    /// Render the template without touching the store. Destination handles, if given,
    /// receive the rendered documents.
    pub fn render(&self, arguments: Vec<CallArgument<'_>>) -> Result<Vec<Value>, OrchestrationError> {
        let options = resolve_arguments(Operation::Render, arguments, &self.config)?;
        let mut plan = prepare(options, self.renderer.as_ref(), self.copier.as_ref())?;
        let documents: Vec<Value> = plan.targets.iter().map(|target| target.document.clone()).collect();
        plan.destinations.store(self.copier.as_ref(), &plan.targets, &documents)?;
        Ok(documents)
    }

    fn mutate(&self, operation: Operation, context: &CallContext, arguments: Vec<CallArgument<'_>>) -> Result<(), OrchestrationError> {
        let options = resolve_arguments(operation, arguments, &self.config)?;
        let wait = match (options.timeout, options.interval) {
            (Some(timeout), Some(interval)) if operation.waits() => Some(WaitSpec::new(timeout, interval)?),
            _ => None,
        };
        let mut plan = prepare(options, self.renderer.as_ref(), self.copier.as_ref())?;
        let Some(kind) = MutationKind::for_operation(operation, plan.driver) else {
            return Err(OrchestrationError::invalid(format!("{operation} does not mutate the store")));
        };
        info!(operation = %operation, resources = plan.targets.len(), "operation started");

        let applied = apply_mutations(&self.store, context, kind, &plan.targets)?;
        if kind != MutationKind::Delete {
            let stored: Vec<Value> = applied
                .iter()
                .zip(&plan.targets)
                .map(|(applied, target)| applied.stored.clone().unwrap_or_else(|| target.document.clone()))
                .collect();
            plan.destinations.store(self.copier.as_ref(), &plan.targets, &stored)?;
        }

        if let Some(spec) = wait {
            let checks: Vec<Check> = applied
                .into_iter()
                .map(|applied| Check {
                    key: applied.key,
                    predicate: applied.predicate,
                })
                .collect();
            let destinations = &mut plan.destinations;
            wait_for(&self.store, context, &spec, &checks, |index, document| destinations.refresh(index, document))?;
        }

        info!(operation = %operation, "operation finished");
        Ok(())
    }
}

fn describe_selector(selector: &settle_types::ListSelector) -> String {
    let mut description = selector.gvk.to_string();
    if let Some(namespace) = &selector.namespace {
        description.push_str(&format!(" in {namespace}"));
    }
    if !selector.labels.is_empty() {
        description.push_str(&format!(" with labels {}", selector.label_expression()));
    }
    description
}
