use super::Store;
use super::options::ReadOptions;
use crate::access::Authorization;
use crate::core::value::record_key;
use crate::core::{Action, DbError, Key, Record, Result, TableSchema};
use crate::filter::Filter;
use crate::storage::Query;
use crate::transaction::LockSet;
use std::collections::HashMap;

impl Store {
    /// Records for `keys` from the lock snapshots, the cache, then the
    /// relational store. Rows loaded from the relational store are cached.
    /// Keys that exist nowhere are absent from the result.
    pub(super) async fn load(
        &self,
        schema: &TableSchema,
        keys: &[Key],
        locks: Option<&LockSet>,
    ) -> Result<HashMap<Key, Record>> {
        let table = schema.name.as_str();
        let mut found = HashMap::new();
        let mut pending: Vec<Key> = Vec::new();
        for key in keys {
            if found.contains_key(key) || pending.contains(key) {
                continue;
            }
            match locks.and_then(|l| l.snapshot(table, key)) {
                Some(record) => {
                    found.insert(key.clone(), record.clone());
                }
                None => pending.push(key.clone()),
            }
        }
        if pending.is_empty() {
            return Ok(found);
        }

        match self.inner.cache.get_many(table, &pending).await {
            Ok(hits) => {
                tracing::debug!(table, hits = hits.len(), misses = pending.len() - hits.len(), "cache lookup");
                pending.retain(|key| !hits.contains_key(key));
                found.extend(hits);
            }
            Err(e) => tracing::warn!(table, error = %e, "cache read failed"),
        }
        if pending.is_empty() {
            return Ok(found);
        }

        let rows = self.select_keys(schema, &pending).await?;
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            let key = record_key(&row, &schema.primary_key, table)?;
            loaded.push((key.clone(), row.clone()));
            found.insert(key, row);
        }
        if !loaded.is_empty() {
            if let Err(e) = self.inner.cache.set_many(table, loaded).await {
                tracing::warn!(table, error = %e, "cache population failed");
            }
        }
        Ok(found)
    }

    /// `SELECT * FROM table WHERE pk IN (keys)`.
    async fn select_keys(&self, schema: &TableSchema, keys: &[Key]) -> Result<Vec<Record>> {
        let predicate =
            Filter::values_in(&self.inner.schemas, &schema.name, &schema.primary_key, keys)?
                .to_sql()?;
        let mut query = Query::new(&schema.name, &schema.primary_key);
        query.keys = Some(keys.to_vec());
        let query = query.render(predicate.as_deref());
        tracing::debug!(sql = %query.sql, "relational read");
        self.inner.relational.select(&query).await
    }

    /// Shapes a record for the caller: property masks, then the `fields`
    /// projection. The primary key is always kept.
    pub(super) fn present(
        &self,
        schema: &TableSchema,
        auth: &Authorization,
        record: Record,
        fields: Option<&[String]>,
    ) -> Result<Record> {
        let mut record = if auth.has_property_masks() {
            self.inner.engine.authorized_properties(auth, &record, None)?
        } else {
            record
        };
        if let Some(fields) = fields {
            record.retain(|name, _| name == &schema.primary_key || fields.contains(name));
        }
        Ok(record)
    }

    pub(super) async fn read_one(
        &self,
        table: &str,
        key: &str,
        options: &ReadOptions,
        locks: Option<&mut LockSet>,
    ) -> Result<Record> {
        let keys = [key.to_string()];
        let mut records = self.fetch(table, &keys, options, locks, true).await?;
        records
            .pop()
            .ok_or_else(|| DbError::not_found(table, keys.to_vec()))
    }

    pub(super) async fn read(
        &self,
        table: &str,
        keys: &[Key],
        options: &ReadOptions,
        locks: Option<&mut LockSet>,
    ) -> Result<Vec<Record>> {
        self.fetch(table, keys, options, locks, false).await
    }

    /// With `strict`, a row the caller may not read is an error instead of
    /// being left out.
    async fn fetch(
        &self,
        table: &str,
        keys: &[Key],
        options: &ReadOptions,
        locks: Option<&mut LockSet>,
        strict: bool,
    ) -> Result<Vec<Record>> {
        let schema = self.inner.schemas.get(table)?;
        let auth = self.authorize(&options.access, table, Action::Read)?;

        let mut found = match locks {
            Some(locks) => {
                if options.for_update {
                    let config = &self.inner.config;
                    locks
                        .acquire(
                            self.inner.cache.as_ref(),
                            table,
                            keys,
                            config.lock_ttl,
                            config.lock_wait_timeout,
                        )
                        .await?;
                }
                let found = self.load(&schema, keys, Some(&*locks)).await?;
                for (key, record) in &found {
                    if locks.holds(table, key) {
                        locks.set_snapshot(table, key, Some(record.clone()));
                    }
                }
                found
            }
            None if options.for_update => {
                return Err(DbError::LockScope(format!(
                    "reading '{}' for update requires a transaction",
                    table
                )));
            }
            None => self.load(&schema, keys, None).await?,
        };

        let mut ordered = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();
        for (index, key) in keys.iter().enumerate() {
            if keys[..index].contains(key) {
                continue;
            }
            match found.remove(key) {
                Some(record) => ordered.push(record),
                None => missing.push(key.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(DbError::not_found(table, missing));
        }

        let mut records = Vec::with_capacity(ordered.len());
        for record in ordered {
            if self.inner.engine.permits(&auth, &record)? {
                records.push(self.present(&schema, &auth, record, options.fields.as_deref())?);
            } else if strict {
                return Err(DbError::forbidden(table, "read", "row condition not met"));
            }
        }
        self.expand_includes(&schema, &mut records, &options.includes)
            .await?;
        Ok(records)
    }
}
