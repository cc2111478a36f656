// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Repository manager.
//!
//! The [`RepositoryManager`] owns everything the data layer needs at runtime:
//! - the local key-value store (fallback collections, cache mirror, migration
//!   status)
//! - the remote store connection
//! - the retry engine and its error log
//! - the aggregate cache and its sweeper task
//! - the four repositories and their cached reads
//!
//! It is constructed explicitly and passed to callers; there is no global
//! instance.
//!
//! # Lifecycle
//!
//! ```text
//! Created → Connecting → Ready → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use site_store::{ManagerState, RepositoryManager, StoreConfig};
//! use site_store::model::NewMessage;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StoreConfig::from_file("site-store.toml")?;
//! let mut manager = RepositoryManager::new(config);
//! assert_eq!(manager.state(), ManagerState::Created);
//!
//! manager.initialize().await?;
//! let created = manager.messages()?.create(NewMessage::new("hi", "#ff8800")).await?;
//! println!("stored in {:?}", created.source);
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod lifecycle;
mod types;

pub use types::{HealthReport, ManagerError, ManagerState, RECENT_ERRORS_WINDOW_MS};

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::Cache;
use crate::clock::now_millis;
use crate::config::StoreConfig;
use crate::fallback::FallbackStore;
use crate::migration::MigrationPipeline;
use crate::repository::{CachedReads, MessageRepository, PhotoRepository, QuoteRepository, VisitRepository};
use crate::resilience::error_log::ErrorLog;
use crate::resilience::health::RemoteHealth;
use crate::resilience::lock::{AdvisoryLock, RedisAdvisoryLock, SqlAdvisoryLock};
use crate::storage::traits::{KeyValueStore, RemoteStore};

/// Repositories built by [`RepositoryManager::initialize()`].
#[derive(Clone)]
pub struct Repositories {
    pub messages: MessageRepository,
    pub photos: PhotoRepository,
    pub quotes: QuoteRepository,
    pub visits: VisitRepository,
    pub cached: CachedReads,
}

pub struct RepositoryManager {
    pub(super) config: StoreConfig,
    /// Manager state (broadcast to watchers)
    pub(super) state: watch::Sender<ManagerState>,
    pub(super) state_rx: watch::Receiver<ManagerState>,
    /// Stores supplied by the caller instead of built from the config
    pub(super) injected_remote: Option<Arc<dyn RemoteStore>>,
    pub(super) injected_local: Option<Arc<dyn KeyValueStore>>,
    pub(super) remote: Option<Arc<dyn RemoteStore>>,
    pub(super) local: Option<Arc<dyn KeyValueStore>>,
    pub(super) fallback: Option<Arc<FallbackStore>>,
    pub(super) error_log: Arc<ErrorLog>,
    pub(super) health: Arc<RemoteHealth>,
    pub(super) cache: Option<Arc<Cache>>,
    pub(super) repositories: Option<Repositories>,
    /// Read once during initialize
    pub(super) migration_pending: bool,
    /// Stops background tasks
    pub(super) shutdown_tx: watch::Sender<bool>,
    pub(super) sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl RepositoryManager {
    /// Create a manager that builds its stores from `config`.
    ///
    /// The manager starts in `Created` state. Call
    /// [`initialize()`](Self::initialize) before using any repository.
    pub fn new(config: StoreConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(ManagerState::Created);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            error_log: Arc::new(ErrorLog::new(config.error_log_capacity)),
            config,
            state: state_tx,
            state_rx,
            injected_remote: None,
            injected_local: None,
            remote: None,
            local: None,
            fallback: None,
            health: Arc::new(RemoteHealth::new()),
            cache: None,
            repositories: None,
            migration_pending: false,
            shutdown_tx,
            sweeper: Mutex::new(None),
        }
    }

    /// Create a manager over caller-supplied stores. `remote_url` and
    /// `local_path` in `config` are ignored.
    pub fn with_stores(
        config: StoreConfig,
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn KeyValueStore>,
    ) -> Self {
        let mut manager = Self::new(config);
        manager.injected_remote = Some(remote);
        manager.injected_local = Some(local);
        manager
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> ManagerState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ManagerState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == ManagerState::Ready
    }

    pub fn repositories(&self) -> Result<&Repositories, ManagerError> {
        match (self.state(), &self.repositories) {
            (ManagerState::Ready, Some(repos)) => Ok(repos),
            (state, _) => Err(ManagerError::NotInitialized(state)),
        }
    }

    pub fn messages(&self) -> Result<&MessageRepository, ManagerError> {
        Ok(&self.repositories()?.messages)
    }

    pub fn photos(&self) -> Result<&PhotoRepository, ManagerError> {
        Ok(&self.repositories()?.photos)
    }

    pub fn quotes(&self) -> Result<&QuoteRepository, ManagerError> {
        Ok(&self.repositories()?.quotes)
    }

    pub fn visits(&self) -> Result<&VisitRepository, ManagerError> {
        Ok(&self.repositories()?.visits)
    }

    pub fn cached(&self) -> Result<&CachedReads, ManagerError> {
        Ok(&self.repositories()?.cached)
    }

    pub fn error_log(&self) -> &Arc<ErrorLog> {
        &self.error_log
    }

    pub fn cache(&self) -> Option<&Arc<Cache>> {
        self.cache.as_ref()
    }

    pub fn fallback_store(&self) -> Option<&Arc<FallbackStore>> {
        self.fallback.as_ref()
    }

    /// Whether fallback data was waiting for migration when the manager
    /// initialized. Not refreshed by later migration runs.
    #[must_use]
    pub fn migration_pending(&self) -> bool {
        self.migration_pending
    }

    /// Migration pipeline over the local store and the remote store,
    /// configured from [`StoreConfig`]. Holds the advisory lock during runs:
    /// Redis when `redis_url` is set, otherwise the remote `advisory_locks`
    /// table.
    pub async fn migration(&self) -> Result<MigrationPipeline, ManagerError> {
        let repos = self.repositories()?;
        let (Some(fallback), Some(remote)) = (&self.fallback, &self.remote) else {
            return Err(ManagerError::NotInitialized(self.state()));
        };

        let lease = self.config.lock_lease();
        let lock: Arc<dyn AdvisoryLock> = match self.config.redis_url {
            Some(ref url) => Arc::new(RedisAdvisoryLock::connect(url, lease).await?),
            None => Arc::new(SqlAdvisoryLock::new(remote.clone(), lease)),
        };

        Ok(MigrationPipeline::new(
            fallback.clone(),
            &repos.messages,
            &repos.photos,
            &repos.quotes,
            &repos.visits,
        )
        .batch_size(self.config.migration_batch_size)
        .cleanup(self.config.migration_cleanup)
        .with_lock(lock, self.config.remote_timeout()))
    }

    /// Ping both stores and summarize recent failures.
    pub async fn health_report(&self) -> HealthReport {
        let state = self.state();
        let checked_at = now_millis();

        let (remote_reachable, local_ok) = tokio::join!(
            async {
                match self.remote {
                    Some(ref remote) => self.health.check(remote.as_ref()).await,
                    None => false,
                }
            },
            async {
                match self.local {
                    Some(ref local) => local.ping().await.is_ok(),
                    None => false,
                }
            }
        );

        let report = HealthReport {
            state,
            remote_reachable,
            repositories_initialized: self.repositories.is_some() && state == ManagerState::Ready,
            fallback_available: local_ok && self.config.fallback_enabled,
            migration_pending: self.migration_pending,
            recent_errors: self.error_log.counts_by_kind(checked_at - RECENT_ERRORS_WINDOW_MS),
            checked_at,
        };
        debug!(
            remote_reachable = report.remote_reachable,
            fallback_available = report.fallback_available,
            recent_errors = report.total_recent_errors(),
            "Health report"
        );
        report
    }
}
