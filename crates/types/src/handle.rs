//! Caller-owned resource handles.
//!
//! A [`ResourceHandle`] is the unit of state I/O between a caller and the orchestrator: it
//! names a remote object (through the identity fields of its state) and carries the
//! last-known full state of that object. Handles created with [`ResourceHandle::for_type`]
//! additionally remember a Rust type they can be converted into, so documents of a different
//! kind are rejected before they overwrite the caller's state.

use std::{any, fmt};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use crate::{
    identity::{GroupVersionKind, IdentityError, ObjectKey},
    version::ResourceVersion,
};

/// A strongly-typed resource representation with a fixed `apiVersion` and `kind`.
pub trait TypedResource: Serialize + DeserializeOwned {
    const API_VERSION: &'static str;
    const KIND: &'static str;
}

/// Error raised when a generic document cannot be stored in a destination handle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CopyError {
    /// The document's `apiVersion`/`kind` differ from the handle's declared type.
    #[error("type mismatch: handle expects {expected}, document is {actual}")]
    TypeMismatch { expected: String, actual: String },
    /// The document has the right kind but does not deserialize into the handle's type.
    #[error("cannot convert document into {type_name}: {message}")]
    Conversion { type_name: &'static str, message: String },
    /// The handle carries no state to convert.
    #[error("handle has no state")]
    Empty,
}

/// The typed-conversion capability of a handle.
#[derive(Clone, Copy)]
pub struct TypedShape {
    api_version: &'static str,
    kind: &'static str,
    type_name: &'static str,
    convert: fn(&Value) -> Result<(), String>,
}

impl TypedShape {
    pub fn of<T: TypedResource>() -> Self {
        Self {
            api_version: T::API_VERSION,
            kind: T::KIND,
            type_name: any::type_name::<T>(),
            convert: |document| serde_json::from_value::<T>(document.clone()).map(|_| ()).map_err(|error| error.to_string()),
        }
    }

    pub fn api_version(&self) -> &'static str {
        self.api_version
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Verify that `document` has this shape's type and converts into it.
    ///
    /// Documents that omit `apiVersion`/`kind` are checked as if they carried this shape's.
    pub fn check(&self, document: &Value) -> Result<(), CopyError> {
        let expected = format!("{}, Kind={}", self.api_version, self.kind);
        let api_version = document.get("apiVersion").and_then(Value::as_str).unwrap_or(self.api_version);
        let kind = document.get("kind").and_then(Value::as_str).unwrap_or(self.kind);
        let actual = match GroupVersionKind::from_api_version(api_version, kind) {
            Ok(gvk) => gvk.to_string(),
            Err(_) => format!("{api_version}, Kind={kind}"),
        };
        if actual != expected {
            return Err(CopyError::TypeMismatch { expected, actual });
        }
        let mut filled = document.clone();
        fill_type_fields(&mut filled, self.api_version, self.kind);
        (self.convert)(&filled).map_err(|message| CopyError::Conversion {
            type_name: self.type_name,
            message,
        })
    }
}

impl fmt::Debug for TypedShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedShape")
            .field("api_version", &self.api_version)
            .field("kind", &self.kind)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl PartialEq for TypedShape {
    fn eq(&self, other: &Self) -> bool {
        self.api_version == other.api_version && self.kind == other.kind && self.type_name == other.type_name
    }
}

/// Identity and last-known state of one remote object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceHandle {
    state: Option<Value>,
    shape: Option<TypedShape>,
}

impl ResourceHandle {
    /// An empty, generic handle. Used as a result destination.
    pub fn new() -> Self {
        Self::default()
    }

    /// A generic handle carrying `document` as its state.
    pub fn from_document(document: Value) -> Self {
        Self {
            state: Some(document),
            shape: None,
        }
    }

    /// An empty handle that only accepts documents convertible into `T`.
    pub fn for_type<T: TypedResource>() -> Self {
        Self {
            state: None,
            shape: Some(TypedShape::of::<T>()),
        }
    }

    /// A typed handle whose state is the serialized `resource`.
    pub fn from_typed<T: TypedResource>(resource: &T) -> Result<Self, CopyError> {
        let mut document = serde_json::to_value(resource).map_err(|error| CopyError::Conversion {
            type_name: any::type_name::<T>(),
            message: error.to_string(),
        })?;
        fill_type_fields(&mut document, T::API_VERSION, T::KIND);
        Ok(Self {
            state: Some(document),
            shape: Some(TypedShape::of::<T>()),
        })
    }

    pub fn state(&self) -> Option<&Value> {
        self.state.as_ref()
    }

    pub fn set_state(&mut self, document: Value) {
        self.state = Some(document);
    }

    pub fn take_state(&mut self) -> Option<Value> {
        self.state.take()
    }

    pub fn shape(&self) -> Option<&TypedShape> {
        self.shape.as_ref()
    }

    pub fn supports_typed_conversion(&self) -> bool {
        self.shape.is_some()
    }

    /// The state as a document, with `apiVersion`/`kind` filled from the typed shape when the
    /// serialized type omits them.
    pub fn document(&self) -> Option<Value> {
        let mut document = self.state.clone()?;
        if let Some(shape) = &self.shape {
            fill_type_fields(&mut document, shape.api_version, shape.kind);
        }
        Some(document)
    }

    /// Identity of the object this handle refers to.
    pub fn key(&self) -> Result<ObjectKey, IdentityError> {
        match self.document() {
            Some(document) => ObjectKey::from_document(&document),
            None => Err(IdentityError::MissingField("metadata.name")),
        }
    }

    pub fn resource_version(&self) -> Option<ResourceVersion> {
        self.state.as_ref().and_then(ResourceVersion::from_document)
    }

    /// Convert the state into `T`.
    pub fn to_typed<T: TypedResource>(&self) -> Result<T, CopyError> {
        let document = self.document().ok_or(CopyError::Empty)?;
        let shape = TypedShape::of::<T>();
        shape.check(&document)?;
        serde_json::from_value(document).map_err(|error| CopyError::Conversion {
            type_name: shape.type_name,
            message: error.to_string(),
        })
    }
}

fn fill_type_fields(document: &mut Value, api_version: &str, kind: &str) {
    if let Value::Object(map) = document {
        map.entry("apiVersion").or_insert_with(|| Value::String(api_version.to_string()));
        map.entry("kind").or_insert_with(|| Value::String(kind.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Metadata {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct ConfigMap {
        metadata: Metadata,
        #[serde(default)]
        data: std::collections::BTreeMap<String, String>,
    }

    impl TypedResource for ConfigMap {
        const API_VERSION: &'static str = "v1";
        const KIND: &'static str = "ConfigMap";
    }

    fn config_map() -> ConfigMap {
        ConfigMap {
            metadata: Metadata {
                name: "settings".into(),
                namespace: Some("default".into()),
            },
            data: [("mode".to_string(), "fast".to_string())].into(),
        }
    }

    #[test]
    fn typed_handle_fills_type_fields() {
        let handle = ResourceHandle::from_typed(&config_map()).expect("handle");
        let document = handle.document().expect("document");
        assert_eq!(document["apiVersion"], "v1");
        assert_eq!(document["kind"], "ConfigMap");
        assert_eq!(handle.key().expect("key").qualified_name(), "default/settings");
        assert!(handle.supports_typed_conversion());
    }

    #[test]
    fn typed_round_trip() {
        let handle = ResourceHandle::from_typed(&config_map()).expect("handle");
        let converted: ConfigMap = handle.to_typed().expect("typed");
        assert_eq!(converted, config_map());
    }

    #[test]
    fn shape_rejects_other_kinds() {
        let shape = TypedShape::of::<ConfigMap>();
        let error = shape
            .check(&json!({ "apiVersion": "v1", "kind": "Secret", "metadata": { "name": "a" } }))
            .expect_err("mismatch");
        assert_eq!(
            error,
            CopyError::TypeMismatch {
                expected: "v1, Kind=ConfigMap".into(),
                actual: "v1, Kind=Secret".into()
            }
        );
    }

    #[test]
    fn shape_reports_conversion_failures() {
        let shape = TypedShape::of::<ConfigMap>();
        let error = shape
            .check(&json!({ "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": 5 } }))
            .expect_err("bad name");
        assert!(matches!(error, CopyError::Conversion { .. }), "unexpected error: {error:?}");
    }

    #[test]
    fn empty_handle_has_no_key() {
        assert!(ResourceHandle::new().key().is_err());
        assert_eq!(ResourceHandle::for_type::<ConfigMap>().to_typed::<ConfigMap>(), Err(CopyError::Empty));
    }

    #[test]
    fn reads_resource_version() {
        let handle = ResourceHandle::from_document(json!({ "metadata": { "name": "a", "resourceVersion": "7" } }));
        assert_eq!(handle.resource_version(), Some(ResourceVersion::new("7")));
    }
}
