use super::{DbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Boolean,
    Jsonb,
    Timestamp,
    Uuid,
}

impl ColumnType {
    pub fn is_compatible(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Text | ColumnType::Uuid | ColumnType::Timestamp, Value::String(_)) => true,
            (ColumnType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ColumnType::Float, Value::Number(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            (ColumnType::Jsonb, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Boolean => "boolean",
            ColumnType::Jsonb => "jsonb",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Uuid => "uuid",
        };
        f.write_str(name)
    }
}

/// Value injected when a column is absent on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnDefault {
    Value(Value),
    /// Next value of the named counter in the sequence store.
    Sequence(String),
    Uuid,
    Now,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub nullable: bool,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub definable_on_create: bool,
    #[serde(default)]
    pub default: Option<ColumnDefault>,
    #[serde(default)]
    pub case_insensitive: bool,
    #[serde(default)]
    pub blank_to_null: bool,
    /// Declared shape of a jsonb object column. Patch merges recursively
    /// only into columns (and sub-properties) that declare one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<BTreeMap<String, ColumnDef>>,
}

fn default_true() -> bool {
    true
}

impl ColumnDef {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: true,
            primary: false,
            unique: false,
            read_only: false,
            definable_on_create: false,
            default: None,
            case_insensitive: false,
            blank_to_null: false,
            nested: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn definable_on_create(mut self) -> Self {
        self.definable_on_create = true;
        self
    }

    pub fn default_value(mut self, default: ColumnDefault) -> Self {
        self.default = Some(default);
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    pub fn blank_to_null(mut self) -> Self {
        self.blank_to_null = true;
        self
    }

    pub fn nested(mut self, nested: BTreeMap<String, ColumnDef>) -> Self {
        self.nested = Some(nested);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampColumn {
    pub column: String,
    /// Refreshed on update/patch as well as on insert.
    #[serde(default)]
    pub on_update: bool,
}

/// A declared relationship to another table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub table: String,
    /// Column holding the foreign key.
    pub column: String,
    /// Column the foreign key points at.
    pub referenced_column: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Includes {
    /// This table holds the foreign key (`self.column -> table.referenced_column`).
    #[serde(default)]
    pub source: BTreeMap<String, Relation>,
    /// The related table holds the foreign key (`table.column -> self.referenced_column`).
    #[serde(default)]
    pub referenced: BTreeMap<String, Relation>,
}

/// Table descriptor produced by the schema loader. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub primary_key: String,
    pub columns: BTreeMap<String, ColumnDef>,
    #[serde(default)]
    pub timestamps: Vec<TimestampColumn>,
    #[serde(default)]
    pub es_enabled: bool,
    #[serde(default)]
    pub audit: bool,
    #[serde(default)]
    pub includes: Includes,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            columns: BTreeMap::new(),
            timestamps: Vec::new(),
            es_enabled: false,
            audit: false,
            includes: Includes::default(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, def: ColumnDef) -> Self {
        self.columns.insert(name.into(), def);
        self
    }

    pub fn timestamp(mut self, column: impl Into<String>, on_update: bool) -> Self {
        self.timestamps.push(TimestampColumn {
            column: column.into(),
            on_update,
        });
        self
    }

    pub fn es_enabled(mut self) -> Self {
        self.es_enabled = true;
        self
    }

    pub fn audited(mut self) -> Self {
        self.audit = true;
        self
    }

    pub fn source_include(mut self, id: impl Into<String>, relation: Relation) -> Self {
        self.includes.source.insert(id.into(), relation);
        self
    }

    pub fn referenced_include(mut self, id: impl Into<String>, relation: Relation) -> Self {
        self.includes.referenced.insert(id.into(), relation);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.get(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn is_jsonb(&self, name: &str) -> bool {
        self.columns
            .get(name)
            .is_some_and(|c| c.column_type == ColumnType::Jsonb)
    }

    /// Nested declaration for a dotted path inside a jsonb column.
    pub fn nested_at(&self, path: &[&str]) -> Option<&BTreeMap<String, ColumnDef>> {
        let (head, rest) = path.split_first()?;
        let mut current = self.columns.get(*head)?.nested.as_ref()?;
        for segment in rest {
            current = current.get(*segment)?.nested.as_ref()?;
        }
        Some(current)
    }

    /// Copy of the schema restricted to `fields`. The primary key is always kept.
    pub fn narrowed(&self, fields: &[String]) -> TableSchema {
        let mut narrowed = self.clone();
        narrowed.columns.retain(|name, _| {
            name == &self.primary_key || fields.iter().any(|f| f == name)
        });
        narrowed
    }

    fn check(&self) -> Result<()> {
        if !self.columns.contains_key(&self.primary_key) {
            return Err(DbError::Configuration(format!(
                "table '{}' declares primary key '{}' which is not a column",
                self.name, self.primary_key
            )));
        }
        for stamp in &self.timestamps {
            if !self.columns.contains_key(&stamp.column) {
                return Err(DbError::Configuration(format!(
                    "table '{}' declares timestamp '{}' which is not a column",
                    self.name, stamp.column
                )));
            }
        }
        Ok(())
    }
}

/// Read-only set of table descriptors shared by every facade handle.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: HashMap<String, Arc<TableSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, schema: TableSchema) -> Result<Self> {
        self.register(schema)?;
        Ok(self)
    }

    pub fn register(&mut self, schema: TableSchema) -> Result<()> {
        schema.check()?;
        if self.tables.contains_key(&schema.name) {
            return Err(DbError::Configuration(format!(
                "table '{}' already registered",
                schema.name
            )));
        }
        self.tables.insert(schema.name.clone(), Arc::new(schema));
        Ok(())
    }

    /// Parses a JSON array (or single object) of table descriptors.
    pub fn from_json(value: Value) -> Result<Self> {
        let schemas: Vec<TableSchema> = match value {
            Value::Array(_) => serde_json::from_value(value),
            other => serde_json::from_value(other).map(|s| vec![s]),
        }
        .map_err(|e| DbError::Configuration(format!("invalid table descriptor: {}", e)))?;

        let mut registry = Self::new();
        for schema in schemas {
            registry.register(schema)?;
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<Arc<TableSchema>> {
        self.tables
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::Configuration(format!("unknown table '{}'", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_deserialization() {
        let registry = SchemaRegistry::from_json(json!([{
            "name": "users",
            "primaryKey": "id",
            "columns": {
                "id": {"type": "text", "primary": true, "definableOnCreate": true, "readOnly": true},
                "email": {"type": "text", "caseInsensitive": true},
                "meta": {"type": "jsonb"},
                "seq": {"type": "integer", "default": {"sequence": "users_seq"}}
            },
            "timestamps": [{"column": "seq"}],
            "esEnabled": true
        }]))
        .unwrap();

        let users = registry.get("users").unwrap();
        assert!(users.es_enabled);
        assert!(users.is_jsonb("meta"));
        assert!(users.get_column("email").unwrap().case_insensitive);
        assert_eq!(
            users.get_column("seq").unwrap().default,
            Some(ColumnDefault::Sequence("users_seq".into()))
        );
    }

    #[test]
    fn test_primary_key_must_be_column() {
        let err = SchemaRegistry::new()
            .with_table(TableSchema::new("users", "id"))
            .unwrap_err();
        assert!(matches!(err, DbError::Configuration(_)));
    }

    #[test]
    fn test_narrowed_keeps_primary_key() {
        let schema = TableSchema::new("users", "id")
            .column("id", ColumnDef::new(ColumnType::Text).primary())
            .column("name", ColumnDef::new(ColumnType::Text))
            .column("age", ColumnDef::new(ColumnType::Integer));

        let narrowed = schema.narrowed(&["name".to_string()]);
        assert!(narrowed.has_column("id"));
        assert!(narrowed.has_column("name"));
        assert!(!narrowed.has_column("age"));
    }
}
