use super::{DbError, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A single row as seen by the facade.
pub type Record = Map<String, Value>;

/// Primary-key value in its canonical string form.
pub type Key = String;

/// Canonical string form of a primary-key value.
pub fn key_of(value: &Value) -> Result<Key> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(DbError::Internal(format!(
            "primary key must be a scalar, got {}",
            type_name(other)
        ))),
    }
}

/// Reads the primary key of `record`.
pub fn record_key(record: &Record, primary_key: &str, table: &str) -> Result<Key> {
    match record.get(primary_key) {
        Some(Value::Null) | None => Err(DbError::validation(
            table,
            format!("missing primary key '{}'", primary_key),
        )),
        Some(value) => key_of(value),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Dotted-path lookup (`"address.city"`). Array segments accept indices.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// [`lookup`] rooted at a record.
pub fn lookup_record<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let value = record.get(head)?;
    match rest {
        Some(rest) => lookup(value, rest),
        None => Some(value),
    }
}

/// Text form used for comparisons and rendering; `None` for null.
pub fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Ordering between two JSON values. Numbers compare numerically, numeric
/// strings are coerced when the other side is a number, everything else
/// falls back to text.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.trim().parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.trim().parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (a, b) => Some(as_text(a)?.cmp(&as_text(b)?)),
    }
}

/// Loose equality used by rule and filter evaluation.
pub fn loosely_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Array(_), _) | (Value::Object(_), _) | (_, Value::Array(_)) | (_, Value::Object(_)) => {
            left == right
        }
        _ => compare(left, right) == Some(Ordering::Equal),
    }
}

/// Does `container` structurally contain `contained` (jsonb `@>`)?
pub fn json_contains(container: &Value, contained: &Value) -> bool {
    match (container, contained) {
        (Value::Object(outer), Value::Object(inner)) => inner
            .iter()
            .all(|(k, v)| outer.get(k).is_some_and(|o| json_contains(o, v))),
        (Value::Array(outer), Value::Array(inner)) => inner
            .iter()
            .all(|v| outer.iter().any(|o| json_contains(o, v))),
        (Value::Array(outer), scalar) => outer.iter().any(|o| o == scalar),
        (a, b) => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_nested_paths() {
        let value = json!({"address": {"city": "Oslo"}, "tags": ["a", "b"]});
        assert_eq!(lookup(&value, "address.city"), Some(&json!("Oslo")));
        assert_eq!(lookup(&value, "tags.1"), Some(&json!("b")));
        assert_eq!(lookup(&value, "address.zip"), None);
    }

    #[test]
    fn test_compare_coerces_numeric_strings() {
        assert_eq!(compare(&json!(18), &json!("18")), Some(Ordering::Equal));
        assert_eq!(compare(&json!("9"), &json!(10)), Some(Ordering::Less));
        assert_eq!(compare(&json!(null), &json!(1)), None);
    }

    #[test]
    fn test_json_contains() {
        let doc = json!({"color": "red", "sizes": [1, 2, 3], "meta": {"a": 1, "b": 2}});
        assert!(json_contains(&doc, &json!({"color": "red"})));
        assert!(json_contains(&doc, &json!({"sizes": [2]})));
        assert!(json_contains(&doc, &json!({"meta": {"b": 2}})));
        assert!(!json_contains(&doc, &json!({"color": "blue"})));
    }

    #[test]
    fn test_key_of() {
        assert_eq!(key_of(&json!("u1")).unwrap(), "u1");
        assert_eq!(key_of(&json!(42)).unwrap(), "42");
        assert!(key_of(&json!({"a": 1})).is_err());
    }
}
