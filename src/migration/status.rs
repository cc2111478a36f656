// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Persisted migration status.

use std::sync::Arc;
use tracing::warn;

use super::types::MigrationStatus;
use crate::storage::traits::{KeyValueStore, StoreError};

pub const STATUS_KEY: &str = "migration:status";

#[derive(Clone)]
pub(crate) struct StatusStore {
    kv: Arc<dyn KeyValueStore>,
}

impl StatusStore {
    pub(crate) fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// A status that no longer parses counts as absent.
    pub(crate) async fn load(&self) -> Result<Option<MigrationStatus>, StoreError> {
        let Some(json) = self.kv.get(STATUS_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&json) {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                warn!(key = STATUS_KEY, error = %e, "Ignoring unreadable migration status");
                Ok(None)
            }
        }
    }

    pub(crate) async fn save(&self, status: &MigrationStatus) -> Result<(), StoreError> {
        self.kv.put(STATUS_KEY, &serde_json::to_string(status)?).await
    }

    pub(crate) async fn clear(&self) -> Result<(), StoreError> {
        self.kv.delete(STATUS_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemoryKvStore;

    #[tokio::test]
    async fn test_save_load_clear() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        let store = StatusStore::new(kv.clone());
        assert_eq!(store.load().await.unwrap(), None);

        let mut status = MigrationStatus::default();
        status.completed = true;
        status.migrated_ids.insert("message:abc".to_string());
        store.save(&status).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(status));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_garbage_status_is_absent() {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKvStore::new());
        kv.put(STATUS_KEY, "{not json").await.unwrap();
        assert_eq!(StatusStore::new(kv).load().await.unwrap(), None);
    }
}
