//! Resource identity: group/version/kind plus namespace/name.
//!
//! Identity is always derived from a generic document so that rendered templates,
//! caller handles, and store responses agree on how a resource is addressed.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error raised when a document does not carry the fields needed to address it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The document is not a JSON object.
    #[error("resource document must be an object, got {0}")]
    NotAnObject(&'static str),
    /// A required identity field is missing or empty.
    #[error("resource document is missing '{0}'")]
    MissingField(&'static str),
    /// `apiVersion` has more than one `/`.
    #[error("invalid apiVersion '{0}'")]
    InvalidApiVersion(String),
}

/// Group, version and kind of a resource type.
///
/// The core group is represented by an empty `group`, so `apiVersion: v1` maps to
/// `{ group: "", version: "v1" }` and `apiVersion: apps/v1` to `{ group: "apps", version: "v1" }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    /// Build a GVK from an `apiVersion` string and a kind.
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Result<Self, IdentityError> {
        let trimmed = api_version.trim();
        if trimmed.is_empty() {
            return Err(IdentityError::MissingField("apiVersion"));
        }
        let (group, version) = match trimmed.split_once('/') {
            Some((group, version)) if !version.contains('/') && !group.is_empty() && !version.is_empty() => {
                (group.to_string(), version.to_string())
            }
            Some(_) => return Err(IdentityError::InvalidApiVersion(trimmed.to_string())),
            None => (String::new(), trimmed.to_string()),
        };
        Ok(Self {
            group,
            version,
            kind: kind.into(),
        })
    }

    /// The `apiVersion` string for this GVK.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Read `apiVersion` and `kind` from a document.
    pub fn from_document(document: &Value) -> Result<Self, IdentityError> {
        let object = document.as_object().ok_or(IdentityError::NotAnObject(json_type_name(document)))?;
        let api_version = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or(IdentityError::MissingField("apiVersion"))?;
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .filter(|kind| !kind.trim().is_empty())
            .ok_or(IdentityError::MissingField("kind"))?;
        Self::from_api_version(api_version, kind.trim())
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// Unique address of one remote object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub gvk: GroupVersionKind,
    #[serde(default)]
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(gvk: GroupVersionKind, namespace: Option<String>, name: impl Into<String>) -> Self {
        Self {
            gvk,
            namespace: namespace.filter(|namespace| !namespace.is_empty()),
            name: name.into(),
        }
    }

    /// Derive the key from a generic document (`apiVersion`, `kind`, `metadata.name`,
    /// optional `metadata.namespace`).
    pub fn from_document(document: &Value) -> Result<Self, IdentityError> {
        let gvk = GroupVersionKind::from_document(document)?;
        let metadata = document.get("metadata").ok_or(IdentityError::MissingField("metadata"))?;
        let name = metadata
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or(IdentityError::MissingField("metadata.name"))?;
        let namespace = metadata.get("namespace").and_then(Value::as_str).map(|namespace| namespace.trim().to_string());
        Ok(Self::new(gvk, namespace, name))
    }

    /// `namespace/name`, or just `name` for cluster-scoped objects.
    pub fn qualified_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{namespace}/{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.gvk, self.qualified_name())
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
