//! JSON merge patch (RFC 7386).

use serde_json::Value;

/// Apply `patch` to `target` in place.
///
/// Object members in the patch replace or extend the target's members recursively, `null`
/// members delete the corresponding target member, and any non-object patch replaces the
/// target wholesale. Members the patch omits are left untouched.
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_members) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    let Value::Object(target_members) = target else {
        return;
    };
    for (name, patch_value) in patch_members {
        if patch_value.is_null() {
            target_members.remove(name);
            continue;
        }
        let entry = target_members.entry(name.clone()).or_insert(Value::Null);
        apply_merge_patch(entry, patch_value);
    }
}
