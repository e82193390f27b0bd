use crate::core::{Action, Key};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

/// What a watcher is told about a committed change.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchEvent {
    pub table: String,
    pub action: Action,
}

/// Callback invoked with every primary key affected by one `(table, action)`
/// pair of a committed transaction.
pub type Watcher = Arc<dyn Fn(&[Key], &WatchEvent) + Send + Sync>;

/// Watchers registered per `(table, action)`.
#[derive(Clone, Default)]
pub struct WatcherRegistry {
    watchers: Arc<RwLock<HashMap<(String, Action), Vec<Watcher>>>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn watch(&self, table: &str, action: Action, watcher: Watcher) {
        // A poisoned lock only means a watcher panicked during notify.
        let mut watchers = self.watchers.write().unwrap_or_else(|e| e.into_inner());
        watchers
            .entry((table.to_string(), action))
            .or_default()
            .push(watcher);
    }

    pub fn is_watched(&self, table: &str, action: Action) -> bool {
        let watchers = self.watchers.read().unwrap_or_else(|e| e.into_inner());
        watchers
            .get(&(table.to_string(), action))
            .is_some_and(|list| !list.is_empty())
    }

    /// Calls every watcher of `event`. Returns the number of calls made.
    pub fn notify(&self, keys: &[Key], event: &WatchEvent) -> usize {
        let list: Vec<Watcher> = {
            let watchers = self.watchers.read().unwrap_or_else(|e| e.into_inner());
            watchers
                .get(&(event.table.clone(), event.action))
                .cloned()
                .unwrap_or_default()
        };
        for watcher in &list {
            watcher(keys, event);
        }
        list.len()
    }
}

impl fmt::Debug for WatcherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let watchers = self.watchers.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("WatcherRegistry")
            .field("watched", &watchers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_notify_reaches_matching_watchers() {
        let registry = WatcherRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            registry.watch(
                "users",
                Action::Create,
                Arc::new(move |keys, _| seen.lock().unwrap().extend(keys.to_vec())),
            );
        }
        let event = WatchEvent {
            table: "users".into(),
            action: Action::Create,
        };
        assert_eq!(registry.notify(&["u1".into(), "u2".into()], &event), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["u1".to_string(), "u2".to_string()]);

        let other = WatchEvent {
            table: "users".into(),
            action: Action::Delete,
        };
        assert_eq!(registry.notify(&["u1".into()], &other), 0);
        assert!(registry.is_watched("users", Action::Create));
    }
}
