//! Recommended imports grouped by how deep an application goes.
//!
//! `app` covers day-to-day facade use. `backend` is for code that implements
//! or wraps a storage backend.

pub mod app {
    //! Facade, options, access descriptors and the error type.
    pub use crate::access::{Access, AccessControl, Grant, PropertySpec, Role};
    pub use crate::config::StoreConfig;
    pub use crate::core::{
        Action, ColumnDef, ColumnDefault, ColumnType, DbError, ErrorKind, Key, OperationContext,
        Record, Relation, Result, SchemaRegistry, TableSchema,
    };
    pub use crate::facade::{
        CombineError, CommitOptions, ReadOptions, SearchOptions, SearchResult, SearchType, Store,
        Table, Transaction, WriteOptions,
    };
    pub use crate::record;
    pub use crate::rules::Condition;
    pub use crate::storage::{Aggregate, AggregateFn, Join, SortKey};
    pub use crate::transaction::TransactionMode;
    pub use crate::watch::{WatchEvent, Watcher};
}

pub mod backend {
    //! Backend contracts and the statements and queries they receive.
    pub use crate::storage::{
        AuditEntry, AuditStore, BulkOp, CacheStore, Mutation, Query, RelationalStore,
        RelationalTransaction, SearchHits, SearchIndex, SearchRequest, SequenceStore, Statement,
    };
    pub use crate::storage::{
        MemoryAuditStore, MemoryCache, MemoryRelationalStore, MemorySearchIndex,
        MemorySequenceStore,
    };
}
