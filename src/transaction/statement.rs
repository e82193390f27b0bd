use crate::core::{Action, Key, Record};
use crate::storage::Statement;
use serde::Serialize;
use serde_json::Value;

/// Post-commit side effects of one statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub table: String,
    pub action: Action,
    pub keys: Vec<Key>,
    /// Full records after the write, keyed like `keys`; empty for deletes.
    pub records: Vec<(Key, Record)>,
    /// Audit payload per key; empty when the table is not audited.
    pub audit: Vec<(Key, Value)>,
    pub actor: Option<String>,
    pub indexed: bool,
}

/// A statement waiting for commit, with what to do once it is durable.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedStatement {
    pub statement: Statement,
    pub effect: Effect,
}

/// Outcome of one executed statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementResult {
    pub table: String,
    pub action: Action,
    pub keys: Vec<Key>,
    pub affected: u64,
}

impl StatementResult {
    pub fn new(statement: &Statement, affected: u64) -> Self {
        Self {
            table: statement.table.clone(),
            action: statement.action(),
            keys: statement.keys(),
            affected,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommitResult {
    pub results: Vec<StatementResult>,
}

impl CommitResult {
    pub fn affected(&self) -> u64 {
        self.results.iter().map(|r| r.affected).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RollbackResult {
    pub success: bool,
    /// Queued statements that were never executed.
    pub discarded: usize,
}
