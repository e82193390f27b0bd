use crate::core::Result;
use crate::storage::SequenceStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Named counters shared by every handle of one store.
#[derive(Debug, Default)]
pub struct MemorySequenceStore {
    counters: Mutex<HashMap<String, i64>>,
}

impl MemorySequenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceStore for MemorySequenceStore {
    async fn next(&self, name: &str) -> Result<i64> {
        let mut counters = self.counters.lock().await;
        let counter = counters.entry(name.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn reset(&self) -> Result<()> {
        self.counters.lock().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counters_are_independent_and_resettable() {
        let seq = MemorySequenceStore::new();
        assert_eq!(seq.next("a").await.unwrap(), 1);
        assert_eq!(seq.next("a").await.unwrap(), 2);
        assert_eq!(seq.next("b").await.unwrap(), 1);
        seq.reset().await.unwrap();
        assert_eq!(seq.next("a").await.unwrap(), 1);
    }
}
