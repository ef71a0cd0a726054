//! Layered binding merge.

use settle_types::Bindings;

/// Merge binding layers left to right; a later layer replaces the value of a key set by an
/// earlier one. Keys keep the position of their first appearance.
///
/// ```rust
/// use settle_engine::merge_bindings;
/// use settle_types::Bindings;
///
/// let defaults = Bindings::new().with("a", 1).with("b", 2);
/// let merged = merge_bindings([&defaults, &Bindings::new().with("b", 3), &Bindings::new().with("c", 4)]);
/// assert_eq!(merged, Bindings::new().with("a", 1).with("b", 3).with("c", 4));
/// ```
pub fn merge_bindings<'b>(layers: impl IntoIterator<Item = &'b Bindings>) -> Bindings {
    let mut merged = Bindings::new();
    for layer in layers {
        for (name, value) in layer.iter() {
            merged.insert(name.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn later_layers_win() {
        let defaults = Bindings::new().with("a", 1).with("b", 2);
        let merged = merge_bindings(&[defaults, Bindings::new().with("b", 3), Bindings::new().with("c", 4)]);
        assert_eq!(merged, Bindings::new().with("a", 1).with("b", 3).with("c", 4));
        assert_eq!(merged.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(), ["a", "b", "c"]);
    }

    #[test]
    fn empty_layers_yield_empty_bindings() {
        assert!(merge_bindings(&Vec::<Bindings>::new()).is_empty());
        let only = Bindings::new().with("x", json!({ "y": true }));
        assert_eq!(merge_bindings([&only]), only);
    }

    #[test]
    fn values_replace_rather_than_deep_merge() {
        let base = Bindings::new().with("labels", json!({ "app": "web", "tier": "front" }));
        let overlay = Bindings::new().with("labels", json!({ "app": "db" }));
        let merged = merge_bindings([&base, &overlay]);
        assert_eq!(merged.get("labels"), Some(&json!({ "app": "db" })));
    }
}
