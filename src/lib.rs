// ============================================================================
// Polystore Library
// ============================================================================
//
// A relational system of record fronted by one facade that keeps a record
// cache, a search index and an audit log in step with it, compiles a compact
// filter language to SQL or search queries, and enforces row- and
// property-level authorization.
//
// ============================================================================

pub mod access;
pub mod config;
pub mod core;
pub mod facade;
pub mod filter;
pub mod prelude;
pub mod rules;
pub mod storage;
pub mod transaction;
pub mod validate;
pub mod watch;

// Re-export main types for convenience
pub use access::{Access, AccessControl, Authorization, AuthorizationEngine, Grant, Role};
pub use config::StoreConfig;
pub use core::{Action, Backend, DbError, ErrorKind, Key, Record, Result, SchemaRegistry};
pub use facade::{
    CombineError, CommitOptions, ReadOptions, SearchOptions, SearchResult, SearchType, Store,
    StoreBuilder, Table, Transaction, WriteOptions,
};
pub use filter::{Filter, FilterCompiler, FilterInput};
pub use rules::{Condition, RuleEvaluator};
pub use transaction::TransactionMode;

/// Builds a [`Record`] from a `serde_json::json!` object literal.
///
/// # Examples
///
/// ```
/// use polystore::record;
///
/// let user = record!({"id": "u1", "name": "John"});
/// assert_eq!(user["name"], "John");
/// ```
#[macro_export]
macro_rules! record {
    ($($json:tt)+) => {
        match ::serde_json::json!($($json)+) {
            ::serde_json::Value::Object(map) => map,
            _ => ::serde_json::Map::new(),
        }
    };
}
