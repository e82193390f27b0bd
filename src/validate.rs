use crate::core::value::type_name;
use crate::core::{ColumnDef, DbError, Record, Result, TableSchema};
use serde_json::Value;
use std::collections::BTreeMap;

/// Checks a record before it is written.
pub trait Validator: Send + Sync {
    fn validate(&self, schema: &TableSchema, data: &Record) -> Result<()>;
}

/// Structural validation against the table descriptor: every property is a
/// declared column, values match the column type, non-nullable columns are
/// present. Declared nested shapes are checked recursively.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    fn check_value(table: &str, path: &str, def: &ColumnDef, value: &Value) -> Result<()> {
        if value.is_null() {
            if !def.nullable {
                return Err(DbError::validation(table, format!("'{}' cannot be null", path)));
            }
            return Ok(());
        }
        if !def.column_type.is_compatible(value) {
            return Err(DbError::validation(
                table,
                format!(
                    "'{}' expects {}, got {}",
                    path,
                    def.column_type,
                    type_name(value)
                ),
            ));
        }
        if let (Some(nested), Value::Object(members)) = (&def.nested, value) {
            Self::check_nested(table, path, nested, members)?;
        }
        Ok(())
    }

    fn check_nested(
        table: &str,
        path: &str,
        nested: &BTreeMap<String, ColumnDef>,
        members: &Record,
    ) -> Result<()> {
        for (name, def) in nested {
            let member_path = format!("{}.{}", path, name);
            match members.get(name) {
                Some(value) => Self::check_value(table, &member_path, def, value)?,
                None if !def.nullable => {
                    return Err(DbError::validation(
                        table,
                        format!("missing required property '{}'", member_path),
                    ));
                }
                None => {}
            }
        }
        Ok(())
    }
}

impl Validator for SchemaValidator {
    fn validate(&self, schema: &TableSchema, data: &Record) -> Result<()> {
        for (name, value) in data {
            let def = schema.get_column(name).ok_or_else(|| {
                DbError::validation(&schema.name, format!("unknown column '{}'", name))
            })?;
            Self::check_value(&schema.name, name, def, value)?;
        }
        for (name, def) in &schema.columns {
            if !def.nullable && !data.contains_key(name) {
                return Err(DbError::validation(
                    &schema.name,
                    format!("missing required column '{}'", name),
                ));
            }
        }
        Ok(())
    }
}
