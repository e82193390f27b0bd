//! The data facade: one handle over the relational store, record cache,
//! search index and audit log.
//!
//! Reads go lock snapshot, cache, relational store. Every write runs in a
//! [`Transaction`]; the direct `Store` methods open a one-shot transaction
//! and commit it before returning.

mod defaults;
mod diff;
mod includes;
mod merge;
pub mod options;
mod read;
mod search;
mod table;
mod transaction;
mod write;

pub use diff::diff;
pub use options::{CommitOptions, ReadOptions, SearchOptions, SearchType, WriteOptions};
pub use search::SearchResult;
pub use table::Table;
pub use transaction::{CombineError, Transaction};

use crate::access::{Access, AccessControl, Authorization, AuthorizationEngine};
use crate::config::StoreConfig;
use crate::core::{Action, Key, OperationContext, Record, Result, SchemaRegistry, TableSchema};
use crate::filter::{FilterCompiler, FilterInput};
use crate::rules::RuleEvaluator;
use crate::storage::{
    AuditStore, CacheStore, MemoryAuditStore, MemoryCache, MemoryRelationalStore,
    MemorySearchIndex, MemorySequenceStore, RelationalStore, SearchIndex, SequenceStore,
};
use crate::transaction::{CommitResult, TransactionMode};
use crate::validate::{SchemaValidator, Validator};
use crate::watch::{Watcher, WatcherRegistry};
use std::fmt;
use std::sync::Arc;

struct Inner {
    schemas: SchemaRegistry,
    compiler: FilterCompiler,
    engine: AuthorizationEngine,
    access: Option<AccessControl>,
    validator: Arc<dyn Validator>,
    watchers: WatcherRegistry,
    config: StoreConfig,
    relational: Arc<dyn RelationalStore>,
    cache: Arc<dyn CacheStore>,
    search: Arc<dyn SearchIndex>,
    audit: Arc<dyn AuditStore>,
    sequences: Arc<dyn SequenceStore>,
}

/// Cloneable handle to the data facade.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("tables", &self.inner.schemas.table_names())
            .field("config", &self.inner.config)
            .field("watchers", &self.inner.watchers)
            .finish()
    }
}

impl Store {
    pub fn builder(schemas: SchemaRegistry) -> StoreBuilder {
        StoreBuilder::new(schemas)
    }

    /// A store over in-memory backends with the default configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use polystore::core::{ColumnDef, ColumnType, TableSchema};
    /// use polystore::{ReadOptions, SchemaRegistry, Store, WriteOptions, record};
    ///
    /// # tokio_test::block_on(async {
    /// let schemas = SchemaRegistry::new().with_table(
    ///     TableSchema::new("users", "id")
    ///         .column("id", ColumnDef::new(ColumnType::Text).primary())
    ///         .column("name", ColumnDef::new(ColumnType::Text)),
    /// )?;
    /// let store = Store::in_memory(schemas)?;
    ///
    /// store.insert("users", record!({"id": "u1", "name": "John"}), &WriteOptions::new()).await?;
    /// let user = store.get("users", "u1", &ReadOptions::new()).await?;
    /// assert_eq!(user["name"], "John");
    /// # Ok::<(), polystore::DbError>(())
    /// # }).unwrap();
    /// ```
    pub fn in_memory(schemas: SchemaRegistry) -> Result<Self> {
        StoreBuilder::new(schemas).build()
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.inner.schemas
    }

    pub fn schema(&self, table: &str) -> Result<Arc<TableSchema>> {
        self.inner.schemas.get(table)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn compiler(&self) -> &FilterCompiler {
        &self.inner.compiler
    }

    pub fn access_control(&self) -> Option<&AccessControl> {
        self.inner.access.as_ref()
    }

    pub fn audit_log(&self) -> &Arc<dyn AuditStore> {
        &self.inner.audit
    }

    pub fn sequences(&self) -> &Arc<dyn SequenceStore> {
        &self.inner.sequences
    }

    /// Registers a callback run after every commit that changed `table` with `action`.
    pub fn watch(&self, table: &str, action: Action, watcher: Watcher) {
        self.inner.watchers.watch(table, action, watcher);
    }

    /// Resolves `access` for `(table, action)`.
    pub fn authorize(&self, access: &Access, table: &str, action: Action) -> Result<Authorization> {
        self.inner
            .engine
            .resolve(self.inner.access.as_ref(), access, table, action)
    }

    /// View of one table.
    pub fn table(&self, name: &str) -> Result<Table> {
        Ok(Table::new(self.clone(), self.inner.schemas.get(name)?))
    }

    /// Opens a transaction in the configured mode.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone(), self.inner.config.transaction_mode)
    }

    pub fn transaction_with(&self, mode: TransactionMode) -> Transaction {
        Transaction::new(self.clone(), mode)
    }

    pub async fn get(&self, table: &str, key: &str, options: &ReadOptions) -> Result<Record> {
        self.read_one(table, key, options, None).await.operation("get")
    }

    /// Records in `keys` order. Rows the caller may not read are left out.
    pub async fn get_many(
        &self,
        table: &str,
        keys: &[Key],
        options: &ReadOptions,
    ) -> Result<Vec<Record>> {
        self.read(table, keys, options, None).await.operation("get_many")
    }

    pub async fn insert(&self, table: &str, data: Record, options: &WriteOptions) -> Result<Record> {
        let mut tx = self.transaction();
        let outcome = tx.insert(table, data, options).await;
        finish(tx, outcome).await.map(|(r, _)| r).operation("insert")
    }

    pub async fn insert_many(
        &self,
        table: &str,
        data: Vec<Record>,
        options: &WriteOptions,
    ) -> Result<Vec<Record>> {
        let mut tx = self.transaction();
        let outcome = tx.insert_many(table, data, options).await;
        finish(tx, outcome).await.map(|(r, _)| r).operation("insert_many")
    }

    /// Replaces the given top-level properties of one record.
    pub async fn update(
        &self,
        table: &str,
        key: &str,
        data: Record,
        options: &WriteOptions,
    ) -> Result<Record> {
        let mut tx = self.transaction();
        let outcome = tx.update(table, key, data, options).await;
        finish(tx, outcome).await.map(|(r, _)| r).operation("update")
    }

    /// Each record must carry its primary key.
    pub async fn update_many(
        &self,
        table: &str,
        data: Vec<Record>,
        options: &WriteOptions,
    ) -> Result<Vec<Record>> {
        let mut tx = self.transaction();
        let outcome = tx.update_many(table, data, options).await;
        finish(tx, outcome).await.map(|(r, _)| r).operation("update_many")
    }

    /// Deep-merges `data` into one record.
    pub async fn patch(
        &self,
        table: &str,
        key: &str,
        data: Record,
        options: &WriteOptions,
    ) -> Result<Record> {
        let mut tx = self.transaction();
        let outcome = tx.patch(table, key, data, options).await;
        finish(tx, outcome).await.map(|(r, _)| r).operation("patch")
    }

    pub async fn patch_many(
        &self,
        table: &str,
        data: Vec<Record>,
        options: &WriteOptions,
    ) -> Result<Vec<Record>> {
        let mut tx = self.transaction();
        let outcome = tx.patch_many(table, data, options).await;
        finish(tx, outcome).await.map(|(r, _)| r).operation("patch_many")
    }

    /// Returns the number of deleted rows.
    pub async fn delete(&self, table: &str, key: &str, options: &WriteOptions) -> Result<u64> {
        let mut tx = self.transaction();
        let outcome = tx.delete(table, key, options).await;
        finish(tx, outcome)
            .await
            .map(|(_, result)| result.affected())
            .operation("delete")
    }

    pub async fn delete_many(
        &self,
        table: &str,
        keys: &[Key],
        options: &WriteOptions,
    ) -> Result<u64> {
        let mut tx = self.transaction();
        let outcome = tx.delete_many(table, keys, options).await;
        finish(tx, outcome)
            .await
            .map(|(_, result)| result.affected())
            .operation("delete_many")
    }

    pub async fn delete_by_filter(
        &self,
        table: &str,
        filter: impl Into<FilterInput>,
        options: &WriteOptions,
    ) -> Result<u64> {
        let mut tx = self.transaction();
        let outcome = tx.delete_by_filter(table, filter, options).await;
        finish(tx, outcome)
            .await
            .map(|(_, result)| result.affected())
            .operation("delete_by_filter")
    }
}

/// Commits a one-shot transaction when its work succeeded, rolls it back otherwise.
async fn finish<T>(tx: Transaction, outcome: Result<T>) -> Result<(T, CommitResult)> {
    match outcome {
        Ok(value) => {
            let result = tx.commit_untagged(CommitOptions::default()).await?;
            Ok((value, result))
        }
        Err(e) => {
            let id = tx.id();
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(tx = %id, error = %rollback, "rollback after failed write failed");
            }
            Err(e)
        }
    }
}

/// Builds a [`Store`]. Backends not given default to the in-memory ones.
pub struct StoreBuilder {
    schemas: SchemaRegistry,
    config: StoreConfig,
    rules: Option<Arc<RuleEvaluator>>,
    access: Option<AccessControl>,
    validator: Option<Arc<dyn Validator>>,
    relational: Option<Arc<dyn RelationalStore>>,
    cache: Option<Arc<dyn CacheStore>>,
    search: Option<Arc<dyn SearchIndex>>,
    audit: Option<Arc<dyn AuditStore>>,
    sequences: Option<Arc<dyn SequenceStore>>,
}

impl StoreBuilder {
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self {
            schemas,
            config: StoreConfig::default(),
            rules: None,
            access: None,
            validator: None,
            relational: None,
            cache: None,
            search: None,
            audit: None,
            sequences: None,
        }
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Rule evaluator for row conditions and property masks. Defaults to the
    /// access control's evaluator, or one with the built-in operators.
    pub fn rules(mut self, rules: Arc<RuleEvaluator>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn access_control(mut self, access: AccessControl) -> Self {
        self.access = Some(access);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn relational(mut self, store: Arc<dyn RelationalStore>) -> Self {
        self.relational = Some(store);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn search(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.search = Some(index);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditStore>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn sequences(mut self, sequences: Arc<dyn SequenceStore>) -> Self {
        self.sequences = Some(sequences);
        self
    }

    pub fn build(self) -> Result<Store> {
        self.config.validate()?;
        let rules = self
            .rules
            .or_else(|| self.access.as_ref().map(|a| a.rules().clone()))
            .unwrap_or_default();
        let config = self.config;
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(MemoryCache::with_capacity(config.cache_capacity, config.cache_ttl))
        });

        tracing::debug!(
            tables = self.schemas.table_names().len(),
            access_control = self.access.is_some(),
            mode = ?config.transaction_mode,
            "store built"
        );
        Ok(Store {
            inner: Arc::new(Inner {
                compiler: FilterCompiler::new(self.schemas.clone()),
                schemas: self.schemas,
                engine: AuthorizationEngine::new(rules),
                access: self.access,
                validator: self.validator.unwrap_or_else(|| Arc::new(SchemaValidator)),
                watchers: WatcherRegistry::new(),
                relational: self
                    .relational
                    .unwrap_or_else(|| Arc::new(MemoryRelationalStore::new())),
                cache,
                search: self.search.unwrap_or_else(|| Arc::new(MemorySearchIndex::new())),
                audit: self.audit.unwrap_or_else(|| Arc::new(MemoryAuditStore::new())),
                sequences: self
                    .sequences
                    .unwrap_or_else(|| Arc::new(MemorySequenceStore::new())),
                config,
            }),
        })
    }
}
