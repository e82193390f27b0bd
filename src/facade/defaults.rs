use crate::core::{ColumnDefault, ColumnType, Record, Result, TableSchema};
use crate::storage::SequenceStore;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Removes read-only columns from a write payload. On insert, columns marked
/// `definable_on_create` are kept.
pub fn strip_read_only(schema: &TableSchema, record: &mut Record, creating: bool) {
    record.retain(|name, _| match schema.get_column(name) {
        Some(def) if def.read_only => creating && def.definable_on_create,
        _ => true,
    });
}

/// Fills absent columns that declare a default.
pub async fn apply_defaults(
    schema: &TableSchema,
    record: &mut Record,
    sequences: &dyn SequenceStore,
) -> Result<()> {
    for (name, def) in &schema.columns {
        let Some(default) = &def.default else {
            continue;
        };
        if record.contains_key(name) {
            continue;
        }
        let value = match default {
            ColumnDefault::Value(value) => value.clone(),
            ColumnDefault::Sequence(sequence) => {
                let next = sequences.next(sequence).await?;
                match def.column_type {
                    ColumnType::Text => Value::String(next.to_string()),
                    _ => Value::from(next),
                }
            }
            ColumnDefault::Uuid => Value::String(Uuid::new_v4().to_string()),
            ColumnDefault::Now => now(),
        };
        record.insert(name.clone(), value);
    }
    Ok(())
}

/// Sets timestamp columns: all of them on insert, `on_update` ones otherwise.
pub fn stamp(schema: &TableSchema, record: &mut Record, creating: bool) {
    let at = now();
    for stamp in &schema.timestamps {
        if creating || stamp.on_update {
            record.insert(stamp.column.clone(), at.clone());
        }
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnDef;
    use crate::storage::MemorySequenceStore;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("users", "id")
            .column(
                "id",
                ColumnDef::new(ColumnType::Integer)
                    .primary()
                    .read_only()
                    .default_value(ColumnDefault::Sequence("users_id".into())),
            )
            .column(
                "token",
                ColumnDef::new(ColumnType::Uuid).default_value(ColumnDefault::Uuid),
            )
            .column(
                "role",
                ColumnDef::new(ColumnType::Text)
                    .read_only()
                    .definable_on_create()
                    .default_value(ColumnDefault::Value(json!("member"))),
            )
            .column("created_at", ColumnDef::new(ColumnType::Timestamp))
            .column("updated_at", ColumnDef::new(ColumnType::Timestamp))
            .timestamp("created_at", false)
            .timestamp("updated_at", true)
    }

    #[test]
    fn test_strip_read_only() {
        let mut record = json!({"id": 9, "role": "admin", "name": "x"})
            .as_object()
            .cloned()
            .unwrap();
        let mut update = record.clone();

        strip_read_only(&schema(), &mut record, true);
        assert!(!record.contains_key("id"));
        assert_eq!(record["role"], json!("admin"));

        strip_read_only(&schema(), &mut update, false);
        assert!(!update.contains_key("role"));
        assert!(update.contains_key("name"));
    }

    #[tokio::test]
    async fn test_defaults_and_stamps() {
        let sequences = MemorySequenceStore::new();
        let schema = schema();

        let mut first = Record::new();
        apply_defaults(&schema, &mut first, &sequences).await.unwrap();
        let mut second = Record::new();
        second.insert("role".into(), json!("owner"));
        apply_defaults(&schema, &mut second, &sequences).await.unwrap();

        assert_eq!(first["id"], json!(1));
        assert_eq!(second["id"], json!(2));
        assert_eq!(first["role"], json!("member"));
        assert_eq!(second["role"], json!("owner"));
        assert!(Uuid::parse_str(first["token"].as_str().unwrap()).is_ok());

        stamp(&schema, &mut first, true);
        assert!(first.contains_key("created_at") && first.contains_key("updated_at"));

        let mut changes = Record::new();
        stamp(&schema, &mut changes, false);
        assert!(changes.contains_key("updated_at"));
        assert!(!changes.contains_key("created_at"));
    }
}
