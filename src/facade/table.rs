use super::Store;
use super::options::{ReadOptions, SearchOptions, WriteOptions};
use super::search::SearchResult;
use crate::core::{Key, Record, Result, TableSchema};
use crate::filter::FilterInput;
use std::sync::Arc;

/// [`Store`] operations bound to one table.
#[derive(Debug, Clone)]
pub struct Table {
    store: Store,
    schema: Arc<TableSchema>,
}

impl Table {
    pub(super) fn new(store: Store, schema: Arc<TableSchema>) -> Self {
        Self { store, schema }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub async fn get(&self, key: &str, options: &ReadOptions) -> Result<Record> {
        self.store.get(self.name(), key, options).await
    }

    pub async fn get_many(&self, keys: &[Key], options: &ReadOptions) -> Result<Vec<Record>> {
        self.store.get_many(self.name(), keys, options).await
    }

    pub async fn insert(&self, data: Record, options: &WriteOptions) -> Result<Record> {
        self.store.insert(self.name(), data, options).await
    }

    pub async fn insert_many(&self, data: Vec<Record>, options: &WriteOptions) -> Result<Vec<Record>> {
        self.store.insert_many(self.name(), data, options).await
    }

    pub async fn update(&self, key: &str, data: Record, options: &WriteOptions) -> Result<Record> {
        self.store.update(self.name(), key, data, options).await
    }

    pub async fn patch(&self, key: &str, data: Record, options: &WriteOptions) -> Result<Record> {
        self.store.patch(self.name(), key, data, options).await
    }

    pub async fn delete(&self, key: &str, options: &WriteOptions) -> Result<u64> {
        self.store.delete(self.name(), key, options).await
    }

    pub async fn delete_by_filter(
        &self,
        filter: impl Into<FilterInput>,
        options: &WriteOptions,
    ) -> Result<u64> {
        self.store
            .delete_by_filter(self.name(), filter, options)
            .await
    }

    pub async fn search(&self, options: &SearchOptions) -> Result<SearchResult> {
        self.store.search(self.name(), options).await
    }

    pub async fn count(&self, options: &SearchOptions) -> Result<u64> {
        self.store.count(self.name(), options).await
    }
}
