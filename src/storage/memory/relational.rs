use crate::core::{BackendKind, DbError, Key, Record, Result};
use crate::storage::{Mutation, Query, RelationalStore, RelationalTransaction, Statement};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

type Tables = HashMap<String, BTreeMap<Key, Record>>;

/// Relational store kept in process memory.
///
/// Transactions stage their writes in an overlay and apply them under one
/// write lock on commit, so readers never observe a partial transaction.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelationalStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryRelationalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every committed row of `table`, ordered by key.
    pub async fn rows(&self, table: &str) -> Vec<Record> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn len(&self, table: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map(BTreeMap::len).unwrap_or(0)
    }

    /// Committed rows of the base table with joined rows attached.
    fn joined_rows(tables: &Tables, query: &Query) -> Vec<Record> {
        let Some(rows) = tables.get(&query.table) else {
            return Vec::new();
        };
        rows.values()
            .map(|row| {
                let mut row = row.clone();
                for join in &query.joins {
                    let related = row.get(&join.column).filter(|v| !v.is_null()).and_then(|fk| {
                        tables.get(&join.table).and_then(|other| {
                            other
                                .values()
                                .find(|r| r.get(&join.referenced_column) == Some(fk))
                        })
                    });
                    row.insert(
                        join.table.clone(),
                        related.cloned().map(Value::Object).unwrap_or(Value::Null),
                    );
                }
                row
            })
            .collect()
    }
}

#[async_trait]
impl RelationalStore for MemoryRelationalStore {
    async fn begin(&self) -> Result<Box<dyn RelationalTransaction>> {
        Ok(Box::new(MemoryTransaction {
            tables: self.tables.clone(),
            overlay: HashMap::new(),
            inserted: Vec::new(),
        }))
    }

    async fn select(&self, query: &Query) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        let rows = Self::joined_rows(&tables, query);
        let selected = query.select(rows.iter())?;
        tracing::debug!(table = %query.table, sql = %query.sql, rows = selected.len(), "select");
        let mut rows = query.page(query.aggregate(selected));
        // `SELECT table.*` returns base columns only.
        if !query.is_aggregate() {
            for row in &mut rows {
                for join in &query.joins {
                    row.remove(&join.table);
                }
            }
        }
        Ok(rows)
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        let tables = self.tables.read().await;
        let rows = Self::joined_rows(&tables, query);
        let selected = query.select(rows.iter())?;
        let total = if query.group.is_empty() {
            selected.len()
        } else {
            query.aggregate(selected).len()
        };
        Ok(total as u64)
    }
}

/// Staged writes of one transaction. `None` marks a deleted row.
struct MemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    overlay: HashMap<String, BTreeMap<Key, Option<Record>>>,
    inserted: Vec<(String, Key)>,
}

impl MemoryTransaction {
    fn visible(&self, committed: &Tables, table: &str, key: &str) -> Option<Record> {
        match self.overlay.get(table).and_then(|rows| rows.get(key)) {
            Some(staged) => staged.clone(),
            None => committed.get(table).and_then(|rows| rows.get(key)).cloned(),
        }
    }
}

#[async_trait]
impl RelationalTransaction for MemoryTransaction {
    async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        let tables = self.tables.clone();
        let committed = tables.read().await;
        let table = statement.table.as_str();

        let affected = match &statement.mutation {
            Mutation::Insert { key, record } => {
                if self.visible(&committed, table, key).is_some() {
                    return Err(DbError::backend(
                        BackendKind::Relational,
                        format!("duplicate key '{}' in '{}'", key, table),
                    ));
                }
                self.overlay
                    .entry(table.to_string())
                    .or_default()
                    .insert(key.clone(), Some(record.clone()));
                if !committed.get(table).is_some_and(|rows| rows.contains_key(key)) {
                    self.inserted.push((table.to_string(), key.clone()));
                }
                1
            }
            Mutation::Update { key, changes } => match self.visible(&committed, table, key) {
                Some(mut row) => {
                    for (column, value) in changes {
                        row.insert(column.clone(), value.clone());
                    }
                    self.overlay
                        .entry(table.to_string())
                        .or_default()
                        .insert(key.clone(), Some(row));
                    1
                }
                None => 0,
            },
            Mutation::Delete { keys } => {
                let mut affected = 0;
                for key in keys {
                    if self.visible(&committed, table, key).is_some() {
                        self.overlay
                            .entry(table.to_string())
                            .or_default()
                            .insert(key.clone(), None);
                        affected += 1;
                    }
                }
                affected
            }
        };

        tracing::debug!(table, sql = %statement.sql, affected, "execute");
        Ok(affected)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let store = self.tables.clone();
        let mut tables = store.write().await;

        // Another transaction may have committed the same key since execute.
        for (table, key) in &self.inserted {
            let staged_alive = self
                .overlay
                .get(table)
                .and_then(|rows| rows.get(key))
                .is_some_and(Option::is_some);
            let committed = tables.get(table).is_some_and(|rows| rows.contains_key(key));
            if staged_alive && committed {
                return Err(DbError::backend(
                    BackendKind::Relational,
                    format!("duplicate key '{}' in '{}'", key, table),
                ));
            }
        }

        let MemoryTransaction { overlay, .. } = *self;
        for (table, rows) in overlay {
            let target = tables.entry(table).or_default();
            for (key, row) in rows {
                match row {
                    Some(row) => {
                        target.insert(key, row);
                    }
                    None => {
                        target.remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDef, ColumnType, TableSchema};
    use crate::storage::Join;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("users", "id")
            .column("id", ColumnDef::new(ColumnType::Text).primary())
            .column("name", ColumnDef::new(ColumnType::Text))
            .column("org_id", ColumnDef::new(ColumnType::Text))
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn insert(store: &MemoryRelationalStore, table: &TableSchema, value: Value) {
        let record = record(value);
        let key = record["id"].as_str().unwrap().to_string();
        let mut tx = store.begin().await.unwrap();
        tx.execute(&Statement::insert(table, key, record)).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let store = MemoryRelationalStore::new();
        let schema = schema();
        let mut tx = store.begin().await.unwrap();
        tx.execute(&Statement::insert(&schema, "u1".into(), record(json!({"id": "u1"}))))
            .await
            .unwrap();
        assert_eq!(store.len("users").await, 0);
        tx.commit().await.unwrap();
        assert_eq!(store.len("users").await, 1);
    }

    #[tokio::test]
    async fn test_rollback_discards() {
        let store = MemoryRelationalStore::new();
        let schema = schema();
        let mut tx = store.begin().await.unwrap();
        tx.execute(&Statement::insert(&schema, "u1".into(), record(json!({"id": "u1"}))))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
        assert_eq!(store.len("users").await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected() {
        let store = MemoryRelationalStore::new();
        let schema = schema();
        insert(&store, &schema, json!({"id": "u1"})).await;

        let mut tx = store.begin().await.unwrap();
        let err = tx
            .execute(&Statement::insert(&schema, "u1".into(), record(json!({"id": "u1"}))))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BACKEND_ERROR");
    }

    #[tokio::test]
    async fn test_update_and_delete_counts() {
        let store = MemoryRelationalStore::new();
        let schema = schema();
        insert(&store, &schema, json!({"id": "u1", "name": "a"})).await;

        let mut tx = store.begin().await.unwrap();
        let n = tx
            .execute(&Statement::update(&schema, "u1".into(), record(json!({"name": "b"}))))
            .await
            .unwrap();
        assert_eq!(n, 1);
        let n = tx
            .execute(&Statement::update(&schema, "zz".into(), record(json!({"name": "b"}))))
            .await
            .unwrap();
        assert_eq!(n, 0);
        let n = tx
            .execute(&Statement::delete(&schema, vec!["u1".into(), "zz".into()]))
            .await
            .unwrap();
        assert_eq!(n, 1);
        tx.commit().await.unwrap();
        assert_eq!(store.len("users").await, 0);
    }

    #[tokio::test]
    async fn test_joined_columns_filter_but_are_not_returned() {
        let store = MemoryRelationalStore::new();
        let users = schema();
        let orgs = TableSchema::new("orgs", "id")
            .column("id", ColumnDef::new(ColumnType::Text).primary())
            .column("title", ColumnDef::new(ColumnType::Text));
        insert(&store, &orgs, json!({"id": "o1", "title": "Acme"})).await;
        insert(&store, &users, json!({"id": "u1", "org_id": "o1"})).await;
        insert(&store, &users, json!({"id": "u2", "org_id": null})).await;

        let mut query = Query::new("users", "id");
        query.joins = vec![Join::new("orgs", "org_id", "id")];
        assert_eq!(store.count(&query).await.unwrap(), 2);

        query.conditions = Some(crate::storage::RowConditions {
            rules: std::sync::Arc::new(crate::rules::RuleEvaluator::new()),
            conditions: vec![crate::rules::Condition::equals("orgs.title", json!("Acme"))],
        });
        let rows = store.select(&query).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("u1"));
        assert!(!rows[0].contains_key("orgs"));
    }
}
