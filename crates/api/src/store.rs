use std::sync::Arc;

use serde_json::Value;
use settle_types::{ListSelector, ObjectKey};

use crate::{context::CallContext, error::StoreError};

/// Client contract for the remote object store.
///
/// Every call takes the caller's [`CallContext`]; implementations fail with
/// [`StoreError::Cancelled`] once it is cancelled. Writes return the state as stored,
/// including the `metadata.resourceVersion` the store stamped.
pub trait ObjectStore: Send + Sync {
    /// Current state of `key`, or [`StoreError::NotFound`].
    fn get(&self, context: &CallContext, key: &ObjectKey) -> Result<Value, StoreError>;

    /// Create `document`; fails with [`StoreError::AlreadyExists`] when the key is taken.
    fn create(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError>;

    /// Replace the stored object with `document`.
    fn update(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError>;

    /// Apply a JSON merge patch to the stored object.
    fn patch(&self, context: &CallContext, key: &ObjectKey, merge_patch: &Value) -> Result<Value, StoreError>;

    /// Remove the object; fails with [`StoreError::NotFound`] when it does not exist.
    fn delete(&self, context: &CallContext, key: &ObjectKey) -> Result<(), StoreError>;

    /// All objects matching `selector`.
    fn list(&self, context: &CallContext, selector: &ListSelector) -> Result<Vec<Value>, StoreError>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn get(&self, context: &CallContext, key: &ObjectKey) -> Result<Value, StoreError> {
        (**self).get(context, key)
    }

    fn create(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        (**self).create(context, document)
    }

    fn update(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        (**self).update(context, document)
    }

    fn patch(&self, context: &CallContext, key: &ObjectKey, merge_patch: &Value) -> Result<Value, StoreError> {
        (**self).patch(context, key, merge_patch)
    }

    fn delete(&self, context: &CallContext, key: &ObjectKey) -> Result<(), StoreError> {
        (**self).delete(context, key)
    }

    fn list(&self, context: &CallContext, selector: &ListSelector) -> Result<Vec<Value>, StoreError> {
        (**self).list(context, selector)
    }
}

impl<S: ObjectStore + ?Sized> ObjectStore for Arc<S> {
    fn get(&self, context: &CallContext, key: &ObjectKey) -> Result<Value, StoreError> {
        (**self).get(context, key)
    }

    fn create(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        (**self).create(context, document)
    }

    fn update(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        (**self).update(context, document)
    }

    fn patch(&self, context: &CallContext, key: &ObjectKey, merge_patch: &Value) -> Result<Value, StoreError> {
        (**self).patch(context, key, merge_patch)
    }

    fn delete(&self, context: &CallContext, key: &ObjectKey) -> Result<(), StoreError> {
        (**self).delete(context, key)
    }

    fn list(&self, context: &CallContext, selector: &ListSelector) -> Result<Vec<Value>, StoreError> {
        (**self).list(context, selector)
    }
}
