//! Store version markers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque version marker stamped by the store on every write (`metadata.resourceVersion`).
///
/// Stores in practice issue monotonically increasing integers, so markers that both parse as
/// `u64` are ordered numerically. Anything else can only be compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Read `metadata.resourceVersion` from a document. Numbers are accepted as well as strings.
    pub fn from_document(document: &Value) -> Option<Self> {
        match document.get("metadata")?.get("resourceVersion")? {
            Value::String(raw) if !raw.trim().is_empty() => Some(Self(raw.trim().to_string())),
            Value::Number(number) => Some(Self(number.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value when the marker is an integer.
    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }

    /// True when `self` reflects a write at least as recent as `other`.
    pub fn is_at_least(&self, other: &ResourceVersion) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(observed), Some(stamped)) => observed >= stamped,
            _ => self.0 == other.0,
        }
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
