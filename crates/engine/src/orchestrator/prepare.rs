//! Everything that happens before the first store call: template loading and rendering,
//! identity validation, arity checks and destination type checks.

use std::fs;

use serde_json::Value;
use settle_types::{ObjectKey, ResourceHandle};
use tracing::debug;

use crate::{
    args::{Options, TemplateSource},
    bindings::merge_bindings,
    copy::StateCopier,
    error::OrchestrationError,
    render::{DocumentCount, RenderError, TemplateRenderer, document_keys},
};

/// What supplied the documents of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Driver {
    /// Rendered from a template; handles, if any, only receive results.
    Template,
    /// Taken from the caller's handles, which also receive results.
    Handles,
}

#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub key: ObjectKey,
    pub document: Value,
}

/// Caller handles that receive results, index-aligned with the targets.
#[derive(Debug)]
pub(crate) enum Destinations<'a> {
    None,
    Object(&'a mut ResourceHandle),
    Objects(&'a mut Vec<ResourceHandle>),
}

impl Destinations<'_> {
    fn expected_count(&self) -> DocumentCount {
        match self {
            Destinations::Object(_) => DocumentCount::Exactly(1),
            Destinations::Objects(handles) if !handles.is_empty() => DocumentCount::Exactly(handles.len()),
            _ => DocumentCount::AtLeastOne,
        }
    }

    fn get(&self, index: usize) -> Option<&ResourceHandle> {
        match self {
            Destinations::None => None,
            Destinations::Object(handle) => (index == 0).then_some(&**handle),
            Destinations::Objects(handles) => handles.get(index),
        }
    }

    fn get_mut(&mut self, index: usize) -> Option<&mut ResourceHandle> {
        match self {
            Destinations::None => None,
            Destinations::Object(handle) => (index == 0).then_some(&mut **handle),
            Destinations::Objects(handles) => handles.get_mut(index),
        }
    }

    /// Fail if any document would be rejected by its destination.
    pub fn check(&self, copier: &dyn StateCopier, targets: &[Target]) -> Result<(), OrchestrationError> {
        for (index, target) in targets.iter().enumerate() {
            if let Some(handle) = self.get(index) {
                copier.check(&target.document, handle).map_err(|source| OrchestrationError::StateCopy {
                    target: target.key.to_string(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Copy `documents` into the destinations. An empty `Objects` list grows one generic
    /// handle per document.
    pub fn store(&mut self, copier: &dyn StateCopier, targets: &[Target], documents: &[Value]) -> Result<(), OrchestrationError> {
        if let Destinations::Objects(handles) = self
            && handles.is_empty()
        {
            handles.extend(documents.iter().cloned().map(ResourceHandle::from_document));
            return Ok(());
        }
        for (index, (target, document)) in targets.iter().zip(documents).enumerate() {
            if let Some(handle) = self.get_mut(index) {
                copier.copy(document, handle).map_err(|source| OrchestrationError::StateCopy {
                    target: target.key.to_string(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Replace the state of destination `index` with a fresh read.
    pub fn refresh(&mut self, index: usize, document: &Value) {
        if let Some(handle) = self.get_mut(index) {
            handle.set_state(document.clone());
        }
    }
}

pub(crate) struct Plan<'a> {
    pub driver: Driver,
    pub targets: Vec<Target>,
    pub destinations: Destinations<'a>,
}

/// Turn resolved options into a validated plan without touching the store.
pub(crate) fn prepare<'a>(
    options: Options<'a>,
    renderer: &dyn TemplateRenderer,
    copier: &dyn StateCopier,
) -> Result<Plan<'a>, OrchestrationError> {
    let destinations = match (options.object, options.objects) {
        (Some(handle), _) => Destinations::Object(handle),
        (None, Some(handles)) => Destinations::Objects(handles),
        (None, None) => Destinations::None,
    };

    let Some(source) = options.template else {
        let targets = handle_targets(&destinations)?;
        return Ok(Plan {
            driver: Driver::Handles,
            targets,
            destinations,
        });
    };

    let text = load_template(&source)?;
    let bindings = merge_bindings(&options.bindings);
    let documents = renderer.render(&text, &bindings)?;
    let expected = destinations.expected_count();
    if !expected.admits(documents.len()) {
        return Err(RenderError::WrongDocumentCount {
            expected,
            actual: documents.len(),
        }
        .into());
    }
    let keys = document_keys(&documents)?;
    let targets: Vec<Target> = keys
        .into_iter()
        .zip(documents)
        .map(|(key, document)| Target { key, document })
        .collect();
    destinations.check(copier, &targets)?;
    debug!(documents = targets.len(), bindings = bindings.len(), "template rendered");

    Ok(Plan {
        driver: Driver::Template,
        targets,
        destinations,
    })
}

fn load_template(source: &TemplateSource) -> Result<String, OrchestrationError> {
    match source {
        TemplateSource::Inline(text) => Ok(text.clone()),
        TemplateSource::File(path) => fs::read_to_string(path).map_err(|error| {
            OrchestrationError::invalid(format!("cannot read template file {}: {error}", path.display()))
        }),
    }
}

fn handle_targets(destinations: &Destinations<'_>) -> Result<Vec<Target>, OrchestrationError> {
    let handles: Vec<&ResourceHandle> = match destinations {
        Destinations::None => Vec::new(),
        Destinations::Object(handle) => vec![&**handle],
        Destinations::Objects(handles) => handles.iter().collect(),
    };
    if handles.is_empty() {
        return Err(OrchestrationError::invalid("objects argument contains no resource handles"));
    }

    handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| {
            let document = handle
                .document()
                .ok_or_else(|| OrchestrationError::invalid(format!("object handle {} has no state", index + 1)))?;
            let key = ObjectKey::from_document(&document).map_err(|error| {
                OrchestrationError::invalid(format!("object handle {} cannot be addressed: {error}", index + 1))
            })?;
            Ok(Target { key, document })
        })
        .collect()
}
