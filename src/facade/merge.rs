use crate::core::{ColumnDef, Record};
use serde_json::Value;
use std::collections::BTreeMap;

/// Top-level properties of `changes` replace those of `current`.
pub fn shallow(current: &Record, changes: &Record) -> Record {
    let mut merged = current.clone();
    for (name, value) in changes {
        merged.insert(name.clone(), value.clone());
    }
    merged
}

/// Merges `patch` onto `current`. Objects are merged recursively only where
/// `columns` declares a nested shape; everything else, arrays included, is
/// replaced.
pub fn deep(current: &Record, patch: &Record, columns: &BTreeMap<String, ColumnDef>) -> Record {
    let mut merged = current.clone();
    for (name, value) in patch {
        let nested = columns.get(name).and_then(|def| def.nested.as_ref());
        let next = match (nested, merged.get(name), value) {
            (Some(nested), Some(Value::Object(existing)), Value::Object(incoming)) => {
                Value::Object(deep(existing, incoming, nested))
            }
            _ => value.clone(),
        };
        merged.insert(name.clone(), next);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnType;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn columns() -> BTreeMap<String, ColumnDef> {
        let mut geo = BTreeMap::new();
        geo.insert("lat".to_string(), ColumnDef::new(ColumnType::Float));
        geo.insert("lng".to_string(), ColumnDef::new(ColumnType::Float));
        let mut address = BTreeMap::new();
        address.insert("city".to_string(), ColumnDef::new(ColumnType::Text));
        address.insert("geo".to_string(), ColumnDef::new(ColumnType::Jsonb).nested(geo));

        let mut columns = BTreeMap::new();
        columns.insert("address".to_string(), ColumnDef::new(ColumnType::Jsonb).nested(address));
        columns.insert("meta".to_string(), ColumnDef::new(ColumnType::Jsonb));
        columns.insert("tags".to_string(), ColumnDef::new(ColumnType::Jsonb));
        columns
    }

    #[test]
    fn test_deep_merges_declared_objects_only() {
        let current = record(json!({
            "address": {"city": "Oslo", "geo": {"lat": 1.0, "lng": 2.0}},
            "meta": {"a": 1, "b": 2},
            "tags": ["x", "y"]
        }));
        let patch = record(json!({
            "address": {"geo": {"lat": 5.0}},
            "meta": {"a": 3},
            "tags": ["z"]
        }));
        let merged = deep(&current, &patch, &columns());
        assert_eq!(
            merged["address"],
            json!({"city": "Oslo", "geo": {"lat": 5.0, "lng": 2.0}})
        );
        assert_eq!(merged["meta"], json!({"a": 3}));
        assert_eq!(merged["tags"], json!(["z"]));
    }

    #[test]
    fn test_shallow_replaces_objects() {
        let current = record(json!({"address": {"city": "Oslo"}, "name": "John"}));
        let merged = shallow(&current, &record(json!({"address": {"zip": "1"}})));
        assert_eq!(merged["address"], json!({"zip": "1"}));
        assert_eq!(merged["name"], json!("John"));
    }
}
