//! Copying generic documents into caller handles.

use serde_json::Value;
use settle_types::{CopyError, ResourceHandle};

/// Stores a generic document in a destination handle, honoring the handle's typed shape.
pub trait StateCopier: Send + Sync {
    /// Whether `copy` would succeed, without touching the destination.
    fn check(&self, document: &Value, destination: &ResourceHandle) -> Result<(), CopyError>;

    fn copy(&self, document: &Value, destination: &mut ResourceHandle) -> Result<(), CopyError> {
        self.check(document, destination)?;
        destination.set_state(document.clone());
        Ok(())
    }
}

/// Generic handles accept any document; typed handles accept documents of their own
/// `apiVersion`/`kind` that deserialize into their type.
#[derive(Debug, Default, Clone, Copy)]
pub struct DocumentCopier;

impl StateCopier for DocumentCopier {
    fn check(&self, document: &Value, destination: &ResourceHandle) -> Result<(), CopyError> {
        match destination.shape() {
            Some(shape) => shape.check(document),
            None => Ok(()),
        }
    }
}
