//! List selectors.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identity::{GroupVersionKind, ObjectKey};

/// Selects the resources of one type, optionally narrowed to a namespace and to objects
/// carrying every listed label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListSelector {
    pub gvk: GroupVersionKind,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub labels: IndexMap<String, String>,
}

impl ListSelector {
    pub fn new(gvk: GroupVersionKind) -> Self {
        Self {
            gvk,
            namespace: None,
            labels: IndexMap::new(),
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Parse a `key=value,key2=value2` label expression into the selector.
    ///
    /// Returns `None` when a clause lacks `=` or has an empty key.
    pub fn with_label_expression(mut self, expression: &str) -> Option<Self> {
        for clause in expression.split(',').map(str::trim).filter(|clause| !clause.is_empty()) {
            let (key, value) = clause.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            self.labels.insert(key.to_string(), value.trim().to_string());
        }
        Some(self)
    }

    /// `key=value,...` form of the label constraints.
    pub fn label_expression(&self) -> String {
        self.labels.iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>().join(",")
    }

    /// True when the document has this selector's type, namespace and labels.
    pub fn matches(&self, document: &Value) -> bool {
        let Ok(key) = ObjectKey::from_document(document) else {
            return false;
        };
        if key.gvk != self.gvk {
            return false;
        }
        if let Some(namespace) = &self.namespace
            && key.namespace.as_deref() != Some(namespace.as_str())
        {
            return false;
        }
        let labels = document.get("metadata").and_then(|metadata| metadata.get("labels"));
        self.labels
            .iter()
            .all(|(label, expected)| labels.and_then(|labels| labels.get(label)).and_then(Value::as_str) == Some(expected.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config_map(name: &str, namespace: &str, labels: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": namespace, "labels": labels }
        })
    }

    fn selector() -> ListSelector {
        ListSelector::new(GroupVersionKind::from_api_version("v1", "ConfigMap").expect("gvk"))
    }

    #[test]
    fn matches_on_type_namespace_and_labels() {
        let selector = selector().in_namespace("default").with_label("app", "web");
        assert!(selector.matches(&config_map("a", "default", json!({ "app": "web", "tier": "front" }))));
        assert!(!selector.matches(&config_map("b", "other", json!({ "app": "web" }))));
        assert!(!selector.matches(&config_map("c", "default", json!({ "app": "db" }))));
    }

    #[test]
    fn parses_label_expressions() {
        let selector = selector().with_label_expression("app=web, tier = front").expect("expression");
        assert_eq!(selector.label_expression(), "app=web,tier=front");
        assert!(self::selector().with_label_expression("app").is_none());
        assert!(self::selector().with_label_expression("=web").is_none());
    }

    #[test]
    fn other_kinds_never_match() {
        let secret = json!({ "apiVersion": "v1", "kind": "Secret", "metadata": { "name": "a" } });
        assert!(!selector().matches(&secret));
    }
}
