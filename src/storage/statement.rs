use crate::core::{Action, Key, Record, TableSchema};
use crate::filter::escape::quote_ident;
use serde_json::Value;

/// Row change carried by a [`Statement`], in the form the in-memory store applies.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Insert { key: Key, record: Record },
    /// Sets the given columns on one row.
    Update { key: Key, changes: Record },
    Delete { keys: Vec<Key> },
}

/// A parameterized write. `sql` uses `$n` placeholders bound to `bindings`.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub table: String,
    pub sql: String,
    pub bindings: Vec<Value>,
    pub mutation: Mutation,
}

impl Statement {
    pub fn insert(schema: &TableSchema, key: Key, record: Record) -> Self {
        let columns: Vec<String> = record.keys().map(|c| quote_ident(c)).collect();
        let placeholders: Vec<String> = (1..=record.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(&schema.name),
            columns.join(", "),
            placeholders.join(", ")
        );
        Self {
            table: schema.name.clone(),
            sql,
            bindings: record.values().cloned().collect(),
            mutation: Mutation::Insert { key, record },
        }
    }

    pub fn update(schema: &TableSchema, key: Key, changes: Record) -> Self {
        let assignments: Vec<String> = changes
            .keys()
            .enumerate()
            .map(|(i, column)| format!("{} = ${}", quote_ident(column), i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            quote_ident(&schema.name),
            assignments.join(", "),
            quote_ident(&schema.primary_key),
            changes.len() + 1
        );
        let mut bindings: Vec<Value> = changes.values().cloned().collect();
        bindings.push(Value::String(key.clone()));
        Self {
            table: schema.name.clone(),
            sql,
            bindings,
            mutation: Mutation::Update { key, changes },
        }
    }

    pub fn delete(schema: &TableSchema, keys: Vec<Key>) -> Self {
        let placeholders: Vec<String> = (1..=keys.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            quote_ident(&schema.name),
            quote_ident(&schema.primary_key),
            placeholders.join(", ")
        );
        Self {
            table: schema.name.clone(),
            sql,
            bindings: keys.iter().cloned().map(Value::String).collect(),
            mutation: Mutation::Delete { keys },
        }
    }

    pub fn action(&self) -> Action {
        match self.mutation {
            Mutation::Insert { .. } => Action::Create,
            Mutation::Update { .. } => Action::Update,
            Mutation::Delete { .. } => Action::Delete,
        }
    }

    pub fn keys(&self) -> Vec<Key> {
        match &self.mutation {
            Mutation::Insert { key, .. } | Mutation::Update { key, .. } => vec![key.clone()],
            Mutation::Delete { keys } => keys.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDef, ColumnType};
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("users", "id")
            .column("id", ColumnDef::new(ColumnType::Text).primary())
            .column("name", ColumnDef::new(ColumnType::Text))
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_insert_uses_bindings() {
        let stmt = Statement::insert(&schema(), "u1".into(), record(json!({"id": "u1", "name": "O'Brien"})));
        assert_eq!(stmt.sql, "INSERT INTO users (id, name) VALUES ($1, $2)");
        assert_eq!(stmt.bindings, vec![json!("u1"), json!("O'Brien")]);
        assert_eq!(stmt.action(), Action::Create);
    }

    #[test]
    fn test_update_and_delete_sql() {
        let stmt = Statement::update(&schema(), "u1".into(), record(json!({"name": "x"})));
        assert_eq!(stmt.sql, "UPDATE users SET name = $1 WHERE id = $2");
        assert_eq!(stmt.bindings.last(), Some(&json!("u1")));

        let stmt = Statement::delete(&schema(), vec!["a".into(), "b".into()]);
        assert_eq!(stmt.sql, "DELETE FROM users WHERE id IN ($1, $2)");
        assert_eq!(stmt.keys(), vec!["a".to_string(), "b".to_string()]);
    }
}
