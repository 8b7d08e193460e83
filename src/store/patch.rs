//! State merging used by `patch`, `set_state` and `reset`.

use serde_json::{Map, Value};

/// Deep-merge `incoming` into `target`, driven by the keys of `incoming`.
///
/// Objects on both sides merge recursively; any other incoming value
/// (including arrays) replaces the target value. Keys absent from
/// `incoming` are left untouched, keys missing from `target` are created.
pub fn merge_state(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, new_value) in incoming {
        if let (Some(Value::Object(old)), Value::Object(new)) = (target.get_mut(key), new_value) {
            merge_state(old, new);
            continue;
        }
        target.insert(key.clone(), new_value.clone());
    }
}

/// Replace every top-level key of `target` that `incoming` provides.
pub fn assign_state(target: &mut Map<String, Value>, incoming: &Map<String, Value>) {
    for (key, value) in incoming {
        target.insert(key.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {other}"),
        }
    }

    #[test]
    fn nested_objects_merge_and_untouched_keys_survive() {
        let mut state = object(json!({"a": {"x": 1, "y": 2}, "b": 3}));
        merge_state(&mut state, &object(json!({"a": {"x": 9}})));
        assert_eq!(Value::Object(state), json!({"a": {"x": 9, "y": 2}, "b": 3}));
    }

    #[test]
    fn non_objects_overwrite() {
        let mut state = object(json!({"list": [1, 2, 3], "nested": {"deep": true}}));
        merge_state(&mut state, &object(json!({"list": [4], "nested": 5})));
        assert_eq!(Value::Object(state), json!({"list": [4], "nested": 5}));
    }

    #[test]
    fn missing_keys_are_created() {
        let mut state = object(json!({"a": 1}));
        merge_state(&mut state, &object(json!({"b": {"c": 2}})));
        assert_eq!(Value::Object(state), json!({"a": 1, "b": {"c": 2}}));
    }

    #[test]
    fn assign_replaces_whole_top_level_values() {
        let mut state = object(json!({"a": {"x": 1, "y": 2}, "b": 3}));
        assign_state(&mut state, &object(json!({"a": {"x": 9}})));
        assert_eq!(Value::Object(state), json!({"a": {"x": 9}, "b": 3}));
    }
}
