//! Backend contracts and their in-memory implementations.
//!
//! The relational store is the system of record. The cache, search index and
//! audit store are derived stores updated after a relational commit.

pub mod memory;
pub mod query;
pub mod statement;

pub use memory::{
    MemoryAuditStore, MemoryCache, MemoryRelationalStore, MemorySearchIndex, MemorySequenceStore,
};
pub use query::{Aggregate, AggregateFn, Join, Query, RowConditions, SortKey, sort_records};
pub use statement::{Mutation, Statement};

use crate::core::{Action, Key, Record, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn RelationalTransaction>>;

    async fn select(&self, query: &Query) -> Result<Vec<Record>>;

    /// Rows (or groups) the query matches, ignoring limit and offset.
    async fn count(&self, query: &Query) -> Result<u64>;
}

/// A native relational transaction. Nothing is visible to other readers
/// before `commit`.
#[async_trait]
pub trait RelationalTransaction: Send + Sync {
    /// Returns the number of affected rows.
    async fn execute(&mut self, statement: &Statement) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Record cache plus the distributed lock table.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Cached records among `keys`; misses are simply absent.
    async fn get_many(&self, table: &str, keys: &[Key]) -> Result<HashMap<Key, Record>>;

    async fn set_many(&self, table: &str, records: Vec<(Key, Record)>) -> Result<()>;

    async fn remove_many(&self, table: &str, keys: &[Key]) -> Result<()>;

    /// Acquires `resource` for `owner`, waiting at most `wait` for another
    /// owner to release it. Re-acquiring an owned lock refreshes its TTL.
    async fn lock(&self, resource: &str, owner: &str, ttl: Duration, wait: Duration) -> Result<()>;

    /// `false` when `owner` did not hold the lock.
    async fn unlock(&self, resource: &str, owner: &str) -> Result<bool>;

    /// Resources currently locked (expired locks excluded).
    async fn locked(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum BulkOp {
    Index {
        index: String,
        id: Key,
        document: Record,
    },
    Delete {
        index: String,
        id: Key,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub index: String,
    pub query: Value,
    pub sort: Vec<SortKey>,
    pub from: usize,
    pub size: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub total: u64,
    pub items: Vec<Record>,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn bulk(&self, operations: Vec<BulkOp>) -> Result<()>;

    async fn search(&self, request: &SearchRequest) -> Result<SearchHits>;
}

/// One audited write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub table: String,
    pub key: Key,
    pub action: Action,
    /// Typed diff for updates, the full record for inserts, `null` for deletes.
    pub changes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub at: DateTime<Utc>,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entries: Vec<AuditEntry>) -> Result<()>;

    /// Entries for `table` (and `key`, when given) in insertion order.
    async fn entries(&self, table: &str, key: Option<&str>) -> Result<Vec<AuditEntry>>;
}

#[async_trait]
pub trait SequenceStore: Send + Sync {
    /// Next value of the named sequence, starting at 1.
    async fn next(&self, name: &str) -> Result<i64>;

    async fn reset(&self) -> Result<()>;
}
