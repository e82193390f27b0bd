use crate::core::Result;
use crate::storage::{AuditEntry, AuditStore};
use async_trait::async_trait;
use tokio::sync::RwLock;

/// Append-only audit log kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    entries: RwLock<Vec<AuditEntry>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, entries: Vec<AuditEntry>) -> Result<()> {
        self.entries.write().await.extend(entries);
        Ok(())
    }

    async fn entries(&self, table: &str, key: Option<&str>) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.table == table && key.is_none_or(|k| e.key == k))
            .cloned()
            .collect())
    }
}
