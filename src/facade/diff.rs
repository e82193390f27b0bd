use crate::core::value::type_name;
use crate::core::{DbError, Result};
use serde_json::{Map, Value, json};
use std::collections::BTreeSet;

/// Structural diff of two values.
///
/// Objects are compared property by property (a missing property equals
/// `null`); any other change is reported as `{"old": .., "new": ..}`. `None`
/// means no change. Replacing a value with one of a different JSON type, other
/// than to or from `null`, is an internal error.
pub fn diff(current: &Value, next: &Value) -> Result<Option<Value>> {
    diff_at("", current, next)
}

fn diff_at(path: &str, current: &Value, next: &Value) -> Result<Option<Value>> {
    if current == next {
        return Ok(None);
    }
    match (current, next) {
        (Value::Object(before), Value::Object(after)) => {
            let names: BTreeSet<&String> = before.keys().chain(after.keys()).collect();
            let mut changes = Map::new();
            for name in names {
                let child = if path.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", path, name)
                };
                let old = before.get(name).unwrap_or(&Value::Null);
                let new = after.get(name).unwrap_or(&Value::Null);
                if let Some(change) = diff_at(&child, old, new)? {
                    changes.insert(name.clone(), change);
                }
            }
            Ok((!changes.is_empty()).then_some(Value::Object(changes)))
        }
        (Value::Null, _) | (_, Value::Null) => Ok(Some(json!({"old": current, "new": next}))),
        (old, new) if type_name(old) != type_name(new) => Err(DbError::Internal(format!(
            "cannot diff '{}': {} changed to {}",
            path,
            type_name(old),
            type_name(new)
        ))),
        _ => Ok(Some(json!({"old": current, "new": next}))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_changes() {
        let before = json!({"name": "John", "address": {"city": "Oslo", "zip": "1"}, "age": 3});
        let after = json!({"name": "John", "address": {"city": "Bergen", "zip": "1"}, "age": 4});
        assert_eq!(
            diff(&before, &after).unwrap(),
            Some(json!({
                "address": {"city": {"old": "Oslo", "new": "Bergen"}},
                "age": {"old": 3, "new": 4}
            }))
        );
    }

    #[test]
    fn test_identical_and_null_equivalence() {
        let value = json!({"a": [1, 2], "b": {"c": true}});
        assert_eq!(diff(&value, &value).unwrap(), None);
        assert_eq!(diff(&json!({"a": null}), &json!({})).unwrap(), None);
        assert_eq!(
            diff(&json!({"a": null}), &json!({"a": 1})).unwrap(),
            Some(json!({"a": {"old": null, "new": 1}}))
        );
    }

    #[test]
    fn test_type_change_is_internal_error() {
        let err = diff(&json!({"a": {"b": 1}}), &json!({"a": {"b": "1"}})).unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
        assert!(err.to_string().contains("a.b"));
    }
}
