//! In-process object store.
//!
//! [`MemoryStore`] behaves like a minimal API server: it stamps a monotonically increasing
//! `resourceVersion` on every write, assigns `uid`/`creationTimestamp` on create, enforces
//! optimistic concurrency on updates, and applies merge patches. Reads are immediately
//! consistent; tests that need lag or flakiness wrap it.

use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use chrono::{SecondsFormat, Utc};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use settle_types::{ListSelector, ObjectKey, ResourceVersion};
use settle_util::apply_merge_patch;
use tracing::debug;

use crate::{context::CallContext, error::StoreError, store::ObjectStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<IndexMap<ObjectKey, Value>>,
    revision: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().expect("memory store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.lock().expect("memory store lock poisoned").contains_key(key)
    }

    /// The last revision handed out; zero before the first write.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn key_of(document: &Value) -> Result<ObjectKey, StoreError> {
        ObjectKey::from_document(document).map_err(|error| StoreError::Invalid(error.to_string()))
    }
}

impl ObjectStore for MemoryStore {
    fn get(&self, context: &CallContext, key: &ObjectKey) -> Result<Value, StoreError> {
        context.check()?;
        let objects = self.objects.lock().expect("memory store lock poisoned");
        objects.get(key).cloned().ok_or_else(|| StoreError::NotFound { key: key.clone() })
    }

    fn create(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        context.check()?;
        let key = Self::key_of(document)?;
        let mut objects = self.objects.lock().expect("memory store lock poisoned");
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { key });
        }

        let revision = self.next_revision();
        let mut stored = document.clone();
        let metadata = metadata_mut(&mut stored);
        metadata.insert("resourceVersion".into(), Value::String(revision.to_string()));
        metadata.insert("uid".into(), Value::String(format!("mem-{revision:012}")));
        metadata.insert("generation".into(), Value::from(1));
        metadata.insert(
            "creationTimestamp".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        debug!(key = %key, revision, "memory store created object");
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    fn update(&self, context: &CallContext, document: &Value) -> Result<Value, StoreError> {
        context.check()?;
        let key = Self::key_of(document)?;
        let mut objects = self.objects.lock().expect("memory store lock poisoned");
        let current = objects.get(&key).ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        check_precondition(&key, current, document)?;

        let stored = restamp(current, document.clone(), self.next_revision());
        debug!(key = %key, "memory store replaced object");
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    fn patch(&self, context: &CallContext, key: &ObjectKey, merge_patch: &Value) -> Result<Value, StoreError> {
        context.check()?;
        let mut objects = self.objects.lock().expect("memory store lock poisoned");
        let current = objects.get(key).ok_or_else(|| StoreError::NotFound { key: key.clone() })?;
        check_precondition(key, current, merge_patch)?;

        let mut patched = current.clone();
        apply_merge_patch(&mut patched, merge_patch);
        if Self::key_of(&patched)? != *key {
            return Err(StoreError::Invalid(format!("patch for {key} changes the object's identity")));
        }
        let stored = restamp(current, patched, self.next_revision());
        debug!(key = %key, "memory store patched object");
        objects.insert(key.clone(), stored.clone());
        Ok(stored)
    }

    fn delete(&self, context: &CallContext, key: &ObjectKey) -> Result<(), StoreError> {
        context.check()?;
        let mut objects = self.objects.lock().expect("memory store lock poisoned");
        match objects.shift_remove(key) {
            Some(_) => {
                self.next_revision();
                debug!(key = %key, "memory store deleted object");
                Ok(())
            }
            None => Err(StoreError::NotFound { key: key.clone() }),
        }
    }

    fn list(&self, context: &CallContext, selector: &ListSelector) -> Result<Vec<Value>, StoreError> {
        context.check()?;
        let objects = self.objects.lock().expect("memory store lock poisoned");
        Ok(objects.values().filter(|document| selector.matches(document)).cloned().collect())
    }
}

fn metadata_mut(document: &mut Value) -> &mut Map<String, Value> {
    if !document.is_object() {
        *document = Value::Object(Map::new());
    }
    let Value::Object(map) = document else { unreachable!("document was just made an object") };
    let metadata = map.entry("metadata").or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    let Value::Object(metadata) = metadata else { unreachable!("metadata was just made an object") };
    metadata
}

/// A write carrying a `resourceVersion` only applies on top of exactly that version.
fn check_precondition(key: &ObjectKey, current: &Value, incoming: &Value) -> Result<(), StoreError> {
    let Some(expected) = ResourceVersion::from_document(incoming) else {
        return Ok(());
    };
    match ResourceVersion::from_document(current) {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(StoreError::Conflict {
            key: key.clone(),
            message: format!(
                "object has been modified (expected version {expected}, found {})",
                actual.map(|version| version.to_string()).unwrap_or_else(|| "none".into())
            ),
        }),
    }
}

/// Carry server-owned metadata over from `current` and stamp a new version.
fn restamp(current: &Value, mut next: Value, revision: u64) -> Value {
    let current_metadata = current.get("metadata");
    let generation = current_metadata
        .and_then(|metadata| metadata.get("generation"))
        .and_then(Value::as_u64)
        .unwrap_or(0)
        + 1;
    let metadata = metadata_mut(&mut next);
    for field in ["uid", "creationTimestamp"] {
        if let Some(value) = current_metadata.and_then(|metadata| metadata.get(field)) {
            metadata.insert(field.into(), value.clone());
        }
    }
    metadata.insert("generation".into(), Value::from(generation));
    metadata.insert("resourceVersion".into(), Value::String(revision.to_string()));
    next
}
