use super::options::{CommitOptions, ReadOptions, SearchOptions};
use super::search::SearchResult;
use super::{Inner, Store};
use crate::core::{DbError, Key, OperationContext, Record, Result};
use crate::storage::{AuditEntry, BulkOp};
use crate::transaction::lock;
use crate::transaction::{
    CommitResult, LockSet, QueuedStatement, RollbackResult, StatementResult, TransactionId,
    TransactionMode, TransactionState,
};
use crate::watch::WatchEvent;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::Instrument;
use uuid::Uuid;

/// A unit of work over a [`Store`].
///
/// Writes are queued and run FIFO in one relational transaction on
/// [`commit`](Transaction::commit). Records read `for_update` stay locked
/// until the transaction ends. Dropping an open transaction discards its
/// queue and releases its locks in the background.
pub struct Transaction {
    id: TransactionId,
    pub(super) store: Store,
    mode: TransactionMode,
    queued: Vec<QueuedStatement>,
    /// Results of statements already run on `native` (real-time mode).
    executed: Vec<StatementResult>,
    native: Option<Box<dyn crate::storage::RelationalTransaction>>,
    pub(super) locks: LockSet,
    state: TransactionState,
}

impl Transaction {
    pub(super) fn new(store: Store, mode: TransactionMode) -> Self {
        let id = TransactionId::new();
        tracing::debug!(tx = %id, ?mode, "transaction opened");
        Self {
            id,
            store,
            mode,
            queued: Vec::new(),
            executed: Vec::new(),
            native: None,
            locks: LockSet::new(id.to_string()),
            state: TransactionState::Open,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Statements waiting for commit.
    pub fn len(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn locks(&self) -> &LockSet {
        &self.locks
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub(super) fn ensure_open(&self) -> Result<()> {
        if self.state.is_open() {
            Ok(())
        } else {
            Err(DbError::Transaction(format!(
                "transaction {} is {}",
                self.id, self.state
            )))
        }
    }

    pub(super) fn lock_timing(&self) -> (std::time::Duration, std::time::Duration) {
        let config = &self.store.inner.config;
        (config.lock_ttl, config.lock_wait_timeout)
    }

    pub async fn get(&mut self, table: &str, key: &str, options: &ReadOptions) -> Result<Record> {
        self.ensure_open().operation("get")?;
        let store = self.store.clone();
        store
            .read_one(table, key, options, Some(&mut self.locks))
            .await
            .operation("get")
    }

    pub async fn get_many(
        &mut self,
        table: &str,
        keys: &[Key],
        options: &ReadOptions,
    ) -> Result<Vec<Record>> {
        self.ensure_open().operation("get_many")?;
        let store = self.store.clone();
        store
            .read(table, keys, options, Some(&mut self.locks))
            .await
            .operation("get_many")
    }

    pub async fn search(&self, table: &str, options: &SearchOptions) -> Result<SearchResult> {
        self.ensure_open().operation("search")?;
        self.store.search(table, options).await
    }

    pub async fn count(&self, table: &str, options: &SearchOptions) -> Result<u64> {
        self.ensure_open().operation("count")?;
        self.store.count(table, options).await
    }

    /// Adds a statement to the queue. In real-time mode it runs immediately.
    pub(super) async fn push(&mut self, queued: QueuedStatement) -> Result<()> {
        tracing::debug!(
            tx = %self.id,
            table = %queued.statement.table,
            action = %queued.effect.action,
            keys = ?queued.effect.keys,
            "statement queued"
        );
        if self.mode == TransactionMode::RealTime {
            if self.native.is_none() {
                self.native = Some(self.store.inner.relational.begin().await?);
            }
            if let Some(native) = self.native.as_mut() {
                match native.execute(&queued.statement).await {
                    Ok(affected) => {
                        self.executed
                            .push(StatementResult::new(&queued.statement, affected));
                    }
                    Err(e) => {
                        if self.store.inner.config.rollback_on_error {
                            if let Some(native) = self.native.take() {
                                if let Err(re) = native.rollback().await {
                                    tracing::warn!(tx = %self.id, error = %re, "relational rollback failed");
                                }
                            }
                            return Err(self.abort(e).await);
                        }
                        return Err(e);
                    }
                }
            }
        }
        self.queued.push(queued);
        Ok(())
    }

    pub async fn commit(self) -> Result<CommitResult> {
        self.commit_with(CommitOptions::default()).await
    }

    /// Runs every queued statement, then updates the cache, search index,
    /// audit log and watchers. Locks are released whatever the outcome.
    pub async fn commit_with(self, options: CommitOptions) -> Result<CommitResult> {
        self.commit_untagged(options).await.operation("commit")
    }

    /// Commit whose errors carry the caller's operation name.
    pub(super) async fn commit_untagged(mut self, options: CommitOptions) -> Result<CommitResult> {
        self.ensure_open()?;
        let span = tracing::info_span!("commit", tx = %self.id);
        self.run_commit(options).instrument(span).await
    }

    async fn run_commit(&mut self, options: CommitOptions) -> Result<CommitResult> {
        let inner = self.store.inner.clone();
        let rollback_on_error = options
            .rollback_on_error
            .unwrap_or(inner.config.rollback_on_error);
        let queued = std::mem::take(&mut self.queued);
        let mut results = std::mem::take(&mut self.executed);

        let native = match self.native.take() {
            Some(native) => Some(native),
            None if queued.is_empty() => None,
            None => match inner.relational.begin().await {
                Ok(native) => Some(native),
                Err(e) => return Err(self.abort(e).await),
            },
        };

        let mut applied = queued.len();
        let mut failure = None;
        if let Some(mut native) = native {
            if self.mode == TransactionMode::Buffered {
                for (index, statement) in queued.iter().enumerate() {
                    match native.execute(&statement.statement).await {
                        Ok(affected) => {
                            results.push(StatementResult::new(&statement.statement, affected))
                        }
                        Err(e) => {
                            tracing::warn!(index, error = %e, "statement failed");
                            applied = index;
                            failure = Some(e);
                            break;
                        }
                    }
                }
            }
            if rollback_on_error {
                if let Some(error) = failure.take() {
                    if let Err(e) = native.rollback().await {
                        tracing::warn!(error = %e, "relational rollback failed");
                    }
                    return Err(self.abort(error).await);
                }
            }
            if let Err(e) = native.commit().await {
                return Err(self.abort(e).await);
            }
        }

        let secondary = apply_effects(&inner, &queued[..applied]).await;
        self.locks.release_all(inner.cache.as_ref()).await;
        self.state = TransactionState::Committed;

        let result = CommitResult { results };
        tracing::info!(
            statements = applied,
            affected = result.affected(),
            "transaction committed"
        );
        if let Some(e) = failure.or(secondary) {
            return Err(e);
        }
        Ok(result)
    }

    /// Releases every lock and marks the transaction rolled back.
    async fn abort(&mut self, error: DbError) -> DbError {
        self.queued.clear();
        self.executed.clear();
        self.locks
            .release_all(self.store.inner.cache.as_ref())
            .await;
        self.state = TransactionState::RolledBack;
        tracing::info!(tx = %self.id, error = %error, "transaction rolled back");
        error
    }

    /// Discards the queue and releases every lock.
    pub async fn rollback(mut self) -> Result<RollbackResult> {
        self.ensure_open().operation("rollback")?;
        let discarded = self.queued.len() - self.executed.len();
        let mut success = true;
        if let Some(native) = self.native.take() {
            if let Err(e) = native.rollback().await {
                tracing::warn!(tx = %self.id, error = %e, "relational rollback failed");
                success = false;
            }
        }
        self.queued.clear();
        self.executed.clear();
        self.locks
            .release_all(self.store.inner.cache.as_ref())
            .await;
        self.state = TransactionState::RolledBack;
        tracing::info!(tx = %self.id, discarded, "transaction rolled back");
        Ok(RollbackResult { success, discarded })
    }

    /// Moves the queue and locks of `other` into this transaction. Returns
    /// the number of statements now queued. Both must be open and buffered;
    /// otherwise the donor comes back untouched inside the error.
    pub fn combine(&mut self, other: Transaction) -> std::result::Result<usize, CombineError> {
        let checked = self
            .ensure_open()
            .and_then(|()| other.ensure_open())
            .and_then(|()| {
                if self.mode == TransactionMode::Buffered && other.mode == TransactionMode::Buffered {
                    Ok(())
                } else {
                    Err(DbError::Transaction(
                        "only buffered transactions can be combined".to_string(),
                    ))
                }
            })
            .operation("combine");
        if let Err(error) = checked {
            return Err(CombineError { error, donor: other });
        }

        let mut other = other;
        let moved = std::mem::take(&mut other.queued);
        let count = moved.len();
        self.queued.extend(moved);
        let donor_locks = std::mem::replace(&mut other.locks, LockSet::new(other.id.to_string()));
        self.locks.absorb(donor_locks);
        other.state = TransactionState::Committed;
        tracing::debug!(tx = %self.id, donor = %other.id, statements = count, "transactions combined");
        Ok(self.queued.len())
    }
}

/// A refused [`Transaction::combine`]. The donor is handed back still open
/// with its queue and locks intact.
pub struct CombineError {
    pub error: DbError,
    pub donor: Transaction,
}

impl CombineError {
    pub fn into_parts(self) -> (DbError, Transaction) {
        (self.error, self.donor)
    }
}

impl std::fmt::Debug for CombineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombineError")
            .field("error", &self.error)
            .field("donor", &self.donor.id)
            .finish()
    }
}

impl std::fmt::Display for CombineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (donor {} returned)", self.error, self.donor.id)
    }
}

impl std::error::Error for CombineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.state.is_open() {
            return;
        }
        if !self.queued.is_empty() {
            tracing::warn!(
                tx = %self.id,
                statements = self.queued.len(),
                "transaction dropped without commit or rollback"
            );
        }
        let held = self.locks.take();
        if held.is_empty() {
            return;
        }
        let cache = self.store.inner.cache.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    join_all(
                        held.iter()
                            .map(|(resource, owner)| lock::release(cache.as_ref(), resource, owner)),
                    )
                    .await;
                });
            }
            Err(_) => tracing::warn!(
                tx = %self.id,
                locks = held.len(),
                "no runtime to release locks of a dropped transaction"
            ),
        }
    }
}

/// Post-commit fan-out: cache, search index, audit log, watchers. Every stage
/// runs; the first failure is returned.
async fn apply_effects(inner: &Arc<Inner>, queued: &[QueuedStatement]) -> Option<DbError> {
    let mut first = None;
    let mut note = |stage: &'static str, e: DbError| {
        tracing::warn!(stage, error = %e, "secondary store update failed");
        first.get_or_insert(e);
    };

    for effect in queued.iter().map(|q| &q.effect) {
        let outcome = if effect.records.is_empty() {
            inner.cache.remove_many(&effect.table, &effect.keys).await
        } else {
            inner
                .cache
                .set_many(&effect.table, effect.records.clone())
                .await
        };
        if let Err(e) = outcome {
            note("cache", e);
        }
    }

    let operations: Vec<BulkOp> = queued
        .iter()
        .map(|q| &q.effect)
        .filter(|effect| effect.indexed)
        .flat_map(|effect| -> Vec<BulkOp> {
            if effect.records.is_empty() {
                effect
                    .keys
                    .iter()
                    .map(|key| BulkOp::Delete {
                        index: effect.table.clone(),
                        id: key.clone(),
                    })
                    .collect()
            } else {
                effect
                    .records
                    .iter()
                    .map(|(key, record)| BulkOp::Index {
                        index: effect.table.clone(),
                        id: key.clone(),
                        document: record.clone(),
                    })
                    .collect()
            }
        })
        .collect();
    if !operations.is_empty() {
        if let Err(e) = inner.search.bulk(operations).await {
            note("search", e);
        }
    }

    let at = Utc::now();
    let entries: Vec<AuditEntry> = queued
        .iter()
        .map(|q| &q.effect)
        .flat_map(|effect| {
            effect.audit.iter().map(move |(key, changes)| AuditEntry {
                id: Uuid::new_v4(),
                table: effect.table.clone(),
                key: key.clone(),
                action: effect.action,
                changes: changes.clone(),
                actor: effect.actor.clone(),
                at,
            })
        })
        .collect();
    if !entries.is_empty() {
        if let Err(e) = inner.audit.append(entries).await {
            note("audit", e);
        }
    }

    let mut events: Vec<(WatchEvent, Vec<Key>)> = Vec::new();
    for effect in queued.iter().map(|q| &q.effect) {
        let event = WatchEvent {
            table: effect.table.clone(),
            action: effect.action,
        };
        match events.iter_mut().find(|(e, _)| *e == event) {
            Some((_, keys)) => keys.extend(effect.keys.iter().cloned()),
            None => events.push((event, effect.keys.clone())),
        }
    }
    for (event, keys) in &events {
        inner.watchers.notify(keys, event);
    }

    first
}
