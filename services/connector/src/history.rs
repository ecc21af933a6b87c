//! Last-used direct connection, remembered without the password

use common::storage::NamespacedStorage;
use tracing::{debug, warn};

use crate::{
    error::WorkflowResult,
    models::{ConnectionHistory, ConnectionProfile},
};

const HISTORY_KEY: &str = "mysql_sync_history";

/// Stores the most recent connection profile for pre-filling
#[derive(Clone)]
pub struct ConnectionHistoryStore {
    storage: NamespacedStorage,
}

impl ConnectionHistoryStore {
    pub fn new(storage: NamespacedStorage) -> Self {
        Self { storage }
    }

    /// Last saved connection, if any; unreadable values are ignored
    pub fn load(&self) -> Option<ConnectionHistory> {
        match self.storage.get_json::<ConnectionHistory>(HISTORY_KEY) {
            Ok(history) => history,
            Err(e) => {
                warn!("Ignoring unreadable connection history: {}", e);
                None
            }
        }
    }

    pub fn save(&self, profile: &ConnectionProfile) -> WorkflowResult<()> {
        let history = profile.history();
        self.storage.set_json(HISTORY_KEY, &history)?;
        debug!(
            "Saved connection history for {}@{}:{}",
            history.username, history.host, history.port
        );
        Ok(())
    }

    pub fn clear(&self) -> WorkflowResult<()> {
        self.storage.remove(HISTORY_KEY)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::{DurableStorage, MemoryStorage};
    use std::sync::Arc;

    fn store() -> (ConnectionHistoryStore, Arc<MemoryStorage>) {
        let backing = Arc::new(MemoryStorage::new());
        let store = ConnectionHistoryStore::new(NamespacedStorage::new(backing.clone(), ""));
        (store, backing)
    }

    #[test]
    fn test_password_is_never_persisted() {
        let (store, backing) = store();
        let profile = ConnectionProfile::new("10.0.0.5", 3306, "reader", "hunter2");
        store.save(&profile).unwrap();

        let raw = backing.get(HISTORY_KEY).unwrap().unwrap();
        assert!(!raw.contains("hunter2"));

        let history = store.load().unwrap();
        assert_eq!(
            history.into_profile("typed-again"),
            ConnectionProfile::new("10.0.0.5", 3306, "reader", "typed-again")
        );
    }

    #[test]
    fn test_corrupt_history_is_ignored() {
        let (store, backing) = store();
        backing.set(HISTORY_KEY, "{not json").unwrap();
        assert!(store.load().is_none());

        store.clear().unwrap();
        assert!(backing.is_empty());
    }
}
