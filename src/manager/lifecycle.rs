// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Manager lifecycle: initialize and shutdown.

use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::Cache;
use crate::fallback::FallbackStore;
use crate::migration::migration_pending;
use crate::repository::{
    bootstrap_schema, CachedReads, MessageRepository, PhotoRepository, QuoteRepository, RepoContext,
    VisitRepository,
};
use crate::resilience::retry::{retry, RetryConfig, RetryEngine};
use crate::storage::memory::InMemoryKvStore;
use crate::storage::sql::SqlRemoteStore;
use crate::storage::sqlite_kv::SqliteKvStore;
use crate::storage::traits::{KeyValueStore, RemoteStore};

use super::{ManagerError, ManagerState, Repositories, RepositoryManager};

impl RepositoryManager {
    /// Open the stores and build the repositories.
    ///
    /// Startup flow:
    /// 1. Open the local store (SQLite file, or memory without `local_path`)
    /// 2. Create the remote pool lazily; an unreachable remote store does not
    ///    fail startup, repositories degrade to the fallback store instead
    /// 3. Optionally bootstrap the schema (needs a reachable remote store)
    /// 4. Build the cache and start its sweeper
    /// 5. Build the repositories
    /// 6. Read the migration status once to decide whether migration is
    ///    pending
    ///
    /// Calling it again once `Ready` is a no-op.
    #[tracing::instrument(skip(self), fields(fallback = self.config.fallback_enabled))]
    pub async fn initialize(&mut self) -> Result<(), ManagerError> {
        if self.is_ready() {
            return Ok(());
        }
        let startup_start = Instant::now();
        info!("Initializing repository manager...");
        let _ = self.state.send(ManagerState::Connecting);

        match self.connect_and_build().await {
            Ok(()) => {
                let _ = self.state.send(ManagerState::Ready);
                crate::metrics::record_startup_total(startup_start.elapsed());
                info!(elapsed_ms = startup_start.elapsed().as_millis() as u64, "Repository manager ready");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Repository manager initialization failed");
                let _ = self.state.send(ManagerState::Created);
                Err(e)
            }
        }
    }

    async fn connect_and_build(&mut self) -> Result<(), ManagerError> {
        // ========== PHASE 1: Local store ==========
        let phase_start = Instant::now();
        let local: Arc<dyn KeyValueStore> = match (self.injected_local.clone(), self.config.local_path.clone()) {
            (Some(local), _) => local,
            (None, Some(path)) => {
                let store = retry("local_store_open", &RetryConfig::startup(), || SqliteKvStore::open(&path)).await?;
                info!(path = %path, "Local store opened");
                Arc::new(store)
            }
            (None, None) => {
                warn!("No local_path configured, fallback data lives in memory only");
                Arc::new(InMemoryKvStore::new())
            }
        };
        crate::metrics::record_startup_phase("local_store", phase_start.elapsed());

        // ========== PHASE 2: Remote store ==========
        let phase_start = Instant::now();
        let remote: Arc<dyn RemoteStore> = match (self.injected_remote.clone(), self.config.remote_url.as_deref()) {
            (Some(remote), _) => remote,
            (None, Some(url)) => Arc::new(SqlRemoteStore::connect_lazy(url, self.config.remote_timeout())?),
            (None, None) => return Err(ManagerError::Config("remote_url missing".to_string())),
        };
        if !self.health.check(remote.as_ref()).await {
            warn!("Remote store unreachable at startup, serving from the fallback store");
        }
        if self.config.bootstrap_schema {
            bootstrap_schema(remote.as_ref()).await?;
        }
        crate::metrics::record_startup_phase("remote_store", phase_start.elapsed());

        // ========== PHASE 3: Cache ==========
        let cache = Arc::new(if self.config.cache.mirror {
            Cache::with_mirror(self.config.cache.clone(), local.clone())
        } else {
            Cache::new(self.config.cache.clone())
        });
        self.shutdown_tx.send_replace(false);
        let sweeper = cache.spawn_sweeper(self.shutdown_tx.subscribe());
        if let Some(previous) = self.sweeper.lock().await.replace(sweeper) {
            previous.abort();
        }

        // ========== PHASE 4: Repositories ==========
        let fallback = Arc::new(FallbackStore::new(local.clone()));
        let ctx = RepoContext {
            remote: remote.clone(),
            fallback: self.config.fallback_enabled.then(|| fallback.clone()),
            engine: RetryEngine::new(self.config.retry.clone(), self.error_log.clone()),
            cache: Some(cache.clone()),
            health: self.health.clone(),
            locale: self.config.locale,
            remote_timeout: self.config.remote_timeout(),
        };

        let messages = MessageRepository::new(ctx.clone());
        let photos = PhotoRepository::new(ctx.clone());
        let quotes = QuoteRepository::new(ctx.clone());
        let visits = VisitRepository::new(ctx, self.config.ip_salt.clone(), self.config.session_window());
        let cached = CachedReads::new(
            cache.clone(),
            self.config.cache_ttl(),
            messages.clone(),
            photos.clone(),
            quotes.clone(),
            visits.clone(),
        );

        self.repositories = Some(Repositories {
            messages,
            photos,
            quotes,
            visits,
            cached,
        });
        // ========== PHASE 5: Migration status ==========
        self.migration_pending = match migration_pending(&fallback).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!(error = %e, "Could not read migration status");
                false
            }
        };
        if self.migration_pending {
            info!("Fallback data is waiting for migration");
        }

        self.remote = Some(remote);
        self.local = Some(local);
        self.fallback = Some(fallback);
        self.cache = Some(cache);
        Ok(())
    }

    /// Stop background tasks. Repositories stay usable until the manager is
    /// dropped, but report `NotInitialized` through the accessors.
    pub async fn shutdown(&self) {
        let shutdown_start = Instant::now();
        info!("Shutting down repository manager...");
        let _ = self.state.send(ManagerState::ShuttingDown);

        let _ = self.shutdown_tx.send(true);
        if let Some(sweeper) = self.sweeper.lock().await.take() {
            if let Err(e) = sweeper.await {
                warn!(error = %e, "Cache sweeper ended abnormally");
            }
        }

        let _ = self.state.send(ManagerState::Stopped);
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!("Repository manager stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::model::NewMessage;
    use crate::resilience::fallback::DataSource;
    use std::time::Duration;
    use tempfile::tempdir;

    fn test_config() -> StoreConfig {
        StoreConfig {
            retry: RetryConfig::test(),
            bootstrap_schema: true,
            ..StoreConfig::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_requires_remote_url() {
        let mut manager = RepositoryManager::new(StoreConfig::default());
        let err = manager.initialize().await.unwrap_err();
        assert!(matches!(err, ManagerError::Config(_)));
        assert_eq!(manager.state(), ManagerState::Created);
        assert!(matches!(manager.messages(), Err(ManagerError::NotInitialized(ManagerState::Created))));
    }

    #[tokio::test]
    async fn test_lifecycle_over_sqlite() {
        let dir = tempdir().unwrap();
        let config = StoreConfig {
            remote_url: Some(format!("sqlite://{}?mode=rwc", dir.path().join("remote.db").display())),
            local_path: Some(dir.path().join("local.db").display().to_string()),
            ..test_config()
        };
        let mut manager = RepositoryManager::new(config);
        let mut states = manager.state_receiver();

        manager.initialize().await.unwrap();
        assert!(manager.is_ready());
        assert_eq!(*states.borrow_and_update(), ManagerState::Ready);

        let created = manager
            .messages()
            .unwrap()
            .create(NewMessage::new("hello", "#00ff00"))
            .await
            .unwrap();
        assert_eq!(created.source, DataSource::Remote);

        let report = manager.health_report().await;
        assert!(report.remote_reachable);
        assert!(report.repositories_initialized);
        assert!(report.fallback_available);
        assert!(!report.migration_pending);
        assert_eq!(report.total_recent_errors(), 0);

        manager.shutdown().await;
        assert_eq!(manager.state(), ManagerState::Stopped);
        assert!(manager.messages().is_err());
    }

    #[tokio::test]
    async fn test_initialize_reads_migration_status() {
        let dir = tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("remote.db").display());
        let local = Arc::new(InMemoryKvStore::new());
        local
            .put(
                "messages",
                r##"[{"id":"local-1","content":"offline","color":"#112233","created_at":1,"updated_at":1}]"##,
            )
            .await
            .unwrap();

        let mut manager = RepositoryManager::with_stores(
            test_config(),
            Arc::new(SqlRemoteStore::connect_lazy(&url, Duration::from_secs(5)).unwrap()),
            local.clone(),
        );
        manager.initialize().await.unwrap();
        assert!(manager.migration_pending());
        assert!(manager.health_report().await.migration_pending);
        manager.shutdown().await;

        // A completed run on record means nothing is offered again
        let done = crate::migration::MigrationStatus {
            completed: true,
            ..Default::default()
        };
        local
            .put(crate::migration::STATUS_KEY, &serde_json::to_string(&done).unwrap())
            .await
            .unwrap();
        let mut manager = RepositoryManager::with_stores(
            test_config(),
            Arc::new(SqlRemoteStore::connect_lazy(&url, Duration::from_secs(5)).unwrap()),
            local,
        );
        manager.initialize().await.unwrap();
        assert!(!manager.migration_pending());
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_remote_does_not_fail_startup() {
        let dir = tempdir().unwrap();
        // Parent directory does not exist, so every connection attempt fails
        let url = format!("sqlite://{}?mode=rw", dir.path().join("missing/remote.db").display());
        let config = StoreConfig {
            remote_url: Some(url),
            remote_timeout_ms: 200,
            retry: RetryConfig::test(),
            ..StoreConfig::default()
        };
        let mut manager = RepositoryManager::with_stores(
            config.clone(),
            Arc::new(SqlRemoteStore::connect_lazy(config.remote_url.as_deref().unwrap(), Duration::from_millis(200)).unwrap()),
            Arc::new(InMemoryKvStore::new()),
        );
        manager.initialize().await.unwrap();

        let report = manager.health_report().await;
        assert!(!report.remote_reachable);
        assert!(report.fallback_available);
        assert!(report.is_serving());
        manager.shutdown().await;
    }
}
