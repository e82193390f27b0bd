// ============================================================================
// Transaction Management Module
// ============================================================================
//
// A unit of work queues statements and holds record locks. On commit the
// statements run FIFO inside one relational transaction; the cache, search
// index, audit log and watchers are updated only after that commit.
//
// State transitions:
//
//   Open ──commit──> Committed
//     │
//     └──rollback──> RolledBack
//
// ============================================================================

pub mod lock;
pub mod statement;

pub use lock::{ActiveLock, LockSet};
pub use statement::{CommitResult, Effect, QueuedStatement, RollbackResult, StatementResult};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    RolledBack,
}

impl TransactionState {
    pub fn is_open(&self) -> bool {
        matches!(self, TransactionState::Open)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionState::Open => write!(f, "OPEN"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// How statements reach the relational store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Statements are queued and executed together on commit.
    #[default]
    Buffered,
    /// Statements execute immediately on a native relational transaction.
    /// Side effects still wait for commit.
    RealTime,
}

impl TransactionMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buffered" => Some(TransactionMode::Buffered),
            "real_time" | "realtime" => Some(TransactionMode::RealTime),
            _ => None,
        }
    }
}
