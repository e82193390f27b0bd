use super::options::WriteOptions;
use super::transaction::Transaction;
use super::diff::diff;
use super::{Store, defaults, merge};
use crate::access::{Access, Authorization};
use crate::core::value::{key_of, record_key};
use crate::core::{Action, DbError, Key, OperationContext, Record, Result, TableSchema};
use crate::filter::FilterInput;
use crate::storage::Statement;
use crate::transaction::{Effect, QueuedStatement};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeMode {
    Shallow,
    Deep,
}

enum Modified {
    Written(Record),
    Unchanged(Record),
}

fn effect(schema: &TableSchema, action: Action, options: &WriteOptions) -> Effect {
    Effect {
        table: schema.name.clone(),
        action,
        keys: Vec::new(),
        records: Vec::new(),
        audit: Vec::new(),
        actor: options.actor.clone(),
        indexed: schema.es_enabled,
    }
}

/// With `fields`, the payload may only carry those properties and the
/// primary key.
fn check_fields(schema: &TableSchema, data: &Record, options: &WriteOptions) -> Result<()> {
    let Some(fields) = &options.fields else {
        return Ok(());
    };
    for name in data.keys() {
        if name != &schema.primary_key && !fields.contains(name) {
            return Err(DbError::validation(
                &schema.name,
                format!("property '{}' is not among the writable fields", name),
            ));
        }
    }
    Ok(())
}

impl Store {
    /// Runs the validator against the schema, narrowed to `fields` when given.
    fn validate(&self, schema: &TableSchema, record: &Record, options: &WriteOptions) -> Result<()> {
        match &options.fields {
            Some(fields) => {
                let narrowed = schema.narrowed(fields);
                let view: Record = record
                    .iter()
                    .filter(|(name, _)| narrowed.has_column(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                self.inner.validator.validate(&narrowed, &view)
            }
            None => self.inner.validator.validate(schema, record),
        }
    }

    /// Mask, strip read-only columns, fill defaults and timestamps, validate,
    /// check the row grant.
    async fn prepare_insert(
        &self,
        schema: &TableSchema,
        auth: &Authorization,
        data: Record,
        options: &WriteOptions,
    ) -> Result<Record> {
        check_fields(schema, &data, options)?;
        let mut record = if auth.has_property_masks() {
            self.inner.engine.authorized_properties(auth, &data, None)?
        } else {
            data
        };
        if !options.ignore_read_only {
            defaults::strip_read_only(schema, &mut record, true);
        }
        defaults::apply_defaults(schema, &mut record, self.inner.sequences.as_ref()).await?;
        defaults::stamp(schema, &mut record, true);
        self.validate(schema, &record, options)?;
        if !self.inner.engine.permits(auth, &record)? {
            return Err(DbError::forbidden(
                &schema.name,
                Action::Create.as_str(),
                "row condition not met",
            ));
        }
        Ok(record)
    }
}

impl Transaction {
    pub async fn insert(&mut self, table: &str, data: Record, options: &WriteOptions) -> Result<Record> {
        self.create(table, vec![data], options)
            .await
            .and_then(|mut records| {
                records
                    .pop()
                    .ok_or_else(|| DbError::Internal("insert produced no record".to_string()))
            })
            .operation("insert")
    }

    /// Queues one insert per record. Returns the records as they will be stored.
    pub async fn insert_many(
        &mut self,
        table: &str,
        data: Vec<Record>,
        options: &WriteOptions,
    ) -> Result<Vec<Record>> {
        self.create(table, data, options)
            .await
            .operation("insert_many")
    }

    async fn create(
        &mut self,
        table: &str,
        data: Vec<Record>,
        options: &WriteOptions,
    ) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let store = self.store.clone();
        let schema = store.schema(table)?;
        let auth = store.authorize(&options.access, table, Action::Create)?;

        let mut inserted = Vec::with_capacity(data.len());
        for item in data {
            let record = store.prepare_insert(&schema, &auth, item, options).await?;
            let key = record_key(&record, &schema.primary_key, table)?;

            let mut effect = effect(&schema, Action::Create, options);
            effect.keys.push(key.clone());
            effect.records.push((key.clone(), record.clone()));
            if schema.audit {
                effect.audit.push((key.clone(), Value::Object(record.clone())));
            }
            let statement = Statement::insert(&schema, key, record.clone());
            self.push(QueuedStatement { statement, effect }).await?;
            inserted.push(record);
        }
        Ok(inserted)
    }

    pub async fn update(
        &mut self,
        table: &str,
        key: &str,
        data: Record,
        options: &WriteOptions,
    ) -> Result<Record> {
        self.modify_one(table, key, data, options, MergeMode::Shallow)
            .await
            .operation("update")
    }

    /// Each record must carry its primary key.
    pub async fn update_many(
        &mut self,
        table: &str,
        data: Vec<Record>,
        options: &WriteOptions,
    ) -> Result<Vec<Record>> {
        self.modify_many(table, data, options, MergeMode::Shallow)
            .await
            .operation("update_many")
    }

    pub async fn patch(
        &mut self,
        table: &str,
        key: &str,
        data: Record,
        options: &WriteOptions,
    ) -> Result<Record> {
        self.modify_one(table, key, data, options, MergeMode::Deep)
            .await
            .operation("patch")
    }

    pub async fn patch_many(
        &mut self,
        table: &str,
        data: Vec<Record>,
        options: &WriteOptions,
    ) -> Result<Vec<Record>> {
        self.modify_many(table, data, options, MergeMode::Deep)
            .await
            .operation("patch_many")
    }

    async fn modify_many(
        &mut self,
        table: &str,
        data: Vec<Record>,
        options: &WriteOptions,
        mode: MergeMode,
    ) -> Result<Vec<Record>> {
        let schema = self.store.schema(table)?;
        let mut items = Vec::with_capacity(data.len());
        for item in data {
            let key = record_key(&item, &schema.primary_key, table)?;
            items.push((key, item));
        }
        self.modify(table, items, options, mode).await
    }

    async fn modify_one(
        &mut self,
        table: &str,
        key: &str,
        data: Record,
        options: &WriteOptions,
        mode: MergeMode,
    ) -> Result<Record> {
        let schema = self.store.schema(table)?;
        if let Some(given) = data.get(&schema.primary_key) {
            if key_of(given)? != key {
                return Err(DbError::validation(
                    table,
                    format!("primary key '{}' cannot change", schema.primary_key),
                ));
            }
        }
        self.modify(table, vec![(key.to_string(), data)], options, mode)
            .await?
            .pop()
            .ok_or_else(|| DbError::Internal("update produced no record".to_string()))
    }

    /// Locks every record in ascending key order, then merges each payload
    /// into its record. Locks this call took are given back for records
    /// that queued nothing.
    async fn modify(
        &mut self,
        table: &str,
        items: Vec<(Key, Record)>,
        options: &WriteOptions,
        mode: MergeMode,
    ) -> Result<Vec<Record>> {
        self.ensure_open()?;
        let store = self.store.clone();
        let schema = store.schema(table)?;
        let auth = store.authorize(&options.access, table, Action::Update)?;
        for (_, data) in &items {
            check_fields(&schema, data, options)?;
        }

        let (ttl, wait) = self.lock_timing();
        let keys: Vec<Key> = items.iter().map(|(key, _)| key.clone()).collect();
        let acquired = self
            .locks
            .acquire(store.inner.cache.as_ref(), table, &keys, ttl, wait)
            .await?;

        let mut records = Vec::with_capacity(items.len());
        let mut written: Vec<Key> = Vec::new();
        let mut failure = None;
        for (key, data) in items {
            match self
                .modify_locked(&store, &schema, &auth, &key, data, options, mode)
                .await
            {
                Ok(Modified::Written(record)) => {
                    written.push(key);
                    records.push(record);
                }
                Ok(Modified::Unchanged(record)) => {
                    tracing::debug!(table, key = %key, "no changes, write skipped");
                    records.push(record);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let idle: Vec<Key> = acquired
            .into_iter()
            .filter(|key| !written.contains(key))
            .collect();
        if !idle.is_empty() {
            self.locks
                .release_keys(store.inner.cache.as_ref(), table, &idle)
                .await;
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(records),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn modify_locked(
        &mut self,
        store: &Store,
        schema: &TableSchema,
        auth: &Authorization,
        key: &str,
        data: Record,
        options: &WriteOptions,
        mode: MergeMode,
    ) -> Result<Modified> {
        let table = schema.name.as_str();
        let engine = &store.inner.engine;
        let keys = [key.to_string()];
        let current = store
            .load(schema, &keys, Some(&self.locks))
            .await?
            .remove(key)
            .ok_or_else(|| DbError::not_found(table, keys.to_vec()))?;
        self.locks.set_snapshot(table, key, Some(current.clone()));

        if auth.has_conditions() && !engine.permits(auth, &current)? {
            return Err(DbError::forbidden(
                table,
                Action::Update.as_str(),
                "row condition not met",
            ));
        }

        let mut changes = if auth.has_property_masks() {
            engine.authorized_properties(auth, &data, Some(&current))?
        } else {
            data
        };
        if !options.ignore_read_only {
            defaults::strip_read_only(schema, &mut changes, false);
        }
        let mut next = match mode {
            MergeMode::Shallow => merge::shallow(&current, &changes),
            MergeMode::Deep => merge::deep(&current, &changes, &schema.columns),
        };
        store.validate(schema, &next, options)?;

        let tracked = auth.has_conditions() || schema.audit;
        let audit = if tracked {
            match diff(&Value::Object(current.clone()), &Value::Object(next.clone()))? {
                Some(diff) => Some(diff),
                None => return Ok(Modified::Unchanged(current)),
            }
        } else {
            None
        };

        defaults::stamp(schema, &mut next, false);
        if auth.has_conditions() && !engine.permits(auth, &next)? {
            return Err(DbError::forbidden(
                table,
                Action::Update.as_str(),
                "updated record would not meet the row condition",
            ));
        }

        let changed: Record = next
            .iter()
            .filter(|(name, value)| current.get(*name) != Some(*value))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        if changed.is_empty() {
            return Ok(Modified::Unchanged(current));
        }

        let mut effect = effect(schema, Action::Update, options);
        effect.keys.push(key.to_string());
        effect.records.push((key.to_string(), next.clone()));
        if let (true, Some(diff)) = (schema.audit, audit) {
            effect.audit.push((key.to_string(), diff));
        }
        let statement = Statement::update(schema, key.to_string(), changed);
        self.push(QueuedStatement { statement, effect }).await?;
        self.locks.set_snapshot(table, key, Some(next.clone()));
        Ok(Modified::Written(next))
    }

    pub async fn delete(&mut self, table: &str, key: &str, options: &WriteOptions) -> Result<Vec<Key>> {
        self.remove(table, &[key.to_string()], options)
            .await
            .operation("delete")
    }

    /// Locks and queues the deletion of `keys`. Returns the keys queued.
    pub async fn delete_many(
        &mut self,
        table: &str,
        keys: &[Key],
        options: &WriteOptions,
    ) -> Result<Vec<Key>> {
        self.remove(table, keys, options)
            .await
            .operation("delete_many")
    }

    /// Deletes every row the filter (and the caller's row conditions) select.
    pub async fn delete_by_filter(
        &mut self,
        table: &str,
        filter: impl Into<FilterInput>,
        options: &WriteOptions,
    ) -> Result<Vec<Key>> {
        self.remove_matching(table, filter.into(), options)
            .await
            .operation("delete_by_filter")
    }

    async fn remove_matching(
        &mut self,
        table: &str,
        filter: FilterInput,
        options: &WriteOptions,
    ) -> Result<Vec<Key>> {
        self.ensure_open()?;
        let store = self.store.clone();
        let schema = store.schema(table)?;
        let auth = store.authorize(&options.access, table, Action::Delete)?;
        let filter = store.inner.compiler.parse(table, &filter)?;
        if filter.is_empty() {
            return Err(DbError::Filter(format!(
                "refusing to delete from '{}' without a filter",
                table
            )));
        }
        let keys = store.matching_keys(&schema, &auth, filter).await?;
        if keys.is_empty() {
            return Ok(keys);
        }
        let options = WriteOptions {
            access: Access::Authorization(auth),
            ..options.clone()
        };
        self.remove(table, &keys, &options).await
    }

    async fn remove(&mut self, table: &str, keys: &[Key], options: &WriteOptions) -> Result<Vec<Key>> {
        self.ensure_open()?;
        let store = self.store.clone();
        let schema = store.schema(table)?;
        let auth = store.authorize(&options.access, table, Action::Delete)?;
        let mut keys = keys.to_vec();
        keys.sort();
        keys.dedup();
        if keys.is_empty() {
            return Ok(keys);
        }

        let (ttl, wait) = self.lock_timing();
        let acquired = self
            .locks
            .acquire(store.inner.cache.as_ref(), table, &keys, ttl, wait)
            .await?;
        if let Err(e) = self.check_delete(&store, &schema, &auth, &keys).await {
            self.locks
                .release_keys(store.inner.cache.as_ref(), table, &acquired)
                .await;
            return Err(e);
        }

        let mut effect = effect(&schema, Action::Delete, options);
        effect.keys = keys.clone();
        if schema.audit {
            effect.audit = keys.iter().map(|k| (k.clone(), Value::Null)).collect();
        }
        let statement = Statement::delete(&schema, keys.clone());
        self.push(QueuedStatement { statement, effect }).await?;
        for key in &keys {
            self.locks.set_snapshot(table, key, None);
        }
        Ok(keys)
    }

    /// Every existing row among `keys` must meet the row conditions.
    async fn check_delete(
        &self,
        store: &Store,
        schema: &TableSchema,
        auth: &Authorization,
        keys: &[Key],
    ) -> Result<()> {
        if !auth.has_conditions() {
            return Ok(());
        }
        let current = store.load(schema, keys, Some(&self.locks)).await?;
        for record in current.values() {
            if !store.inner.engine.permits(auth, record)? {
                return Err(DbError::forbidden(
                    &schema.name,
                    Action::Delete.as_str(),
                    "row condition not met",
                ));
            }
        }
        Ok(())
    }
}
