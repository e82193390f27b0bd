use super::Store;
use crate::core::value::key_of;
use crate::core::{DbError, Key, Record, Result, TableSchema};
use crate::filter::Filter;
use crate::storage::Query;
use serde_json::Value;
use std::collections::HashMap;

impl Store {
    /// Attaches related records under each include id. A `source` relation
    /// attaches one record (or `null`); a `referenced` relation attaches an
    /// array. Related rows are read without authorization.
    pub(super) async fn expand_includes(
        &self,
        schema: &TableSchema,
        records: &mut [Record],
        includes: &[String],
    ) -> Result<()> {
        for id in includes {
            if let Some(relation) = schema.includes.source.get(id) {
                let values = distinct_keys(records, &relation.column);
                let related = self
                    .select_in(&relation.table, &relation.referenced_column, &values)
                    .await?;
                let by_key: HashMap<Key, Record> = related
                    .into_iter()
                    .filter_map(|row| Some((column_key(&row, &relation.referenced_column)?, row)))
                    .collect();
                for record in records.iter_mut() {
                    let value = column_key(record, &relation.column)
                        .and_then(|key| by_key.get(&key).cloned())
                        .map(Value::Object)
                        .unwrap_or(Value::Null);
                    record.insert(id.clone(), value);
                }
            } else if let Some(relation) = schema.includes.referenced.get(id) {
                let values = distinct_keys(records, &relation.referenced_column);
                let related = self
                    .select_in(&relation.table, &relation.column, &values)
                    .await?;
                let mut by_key: HashMap<Key, Vec<Value>> = HashMap::new();
                for row in related {
                    if let Some(key) = column_key(&row, &relation.column) {
                        by_key.entry(key).or_default().push(Value::Object(row));
                    }
                }
                for record in records.iter_mut() {
                    let items = column_key(record, &relation.referenced_column)
                        .and_then(|key| by_key.get(&key).cloned())
                        .unwrap_or_default();
                    record.insert(id.clone(), Value::Array(items));
                }
            } else {
                return Err(DbError::validation(
                    &schema.name,
                    format!("unknown include '{}'", id),
                ));
            }
        }
        Ok(())
    }

    async fn select_in(&self, table: &str, column: &str, values: &[Key]) -> Result<Vec<Record>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let schema = self.inner.schemas.get(table)?;
        let filter = Filter::values_in(&self.inner.schemas, table, column, values)?;
        let predicate = filter.to_sql()?;
        let mut query = Query::new(table, &schema.primary_key);
        query.filter = filter;
        let query = query.render(predicate.as_deref());
        tracing::debug!(sql = %query.sql, "include read");
        self.inner.relational.select(&query).await
    }
}

fn column_key(record: &Record, column: &str) -> Option<Key> {
    record.get(column).filter(|v| !v.is_null()).and_then(|v| key_of(v).ok())
}

fn distinct_keys(records: &[Record], column: &str) -> Vec<Key> {
    let mut keys: Vec<Key> = records.iter().filter_map(|r| column_key(r, column)).collect();
    keys.sort();
    keys.dedup();
    keys
}
