// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the repository manager.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::ConfigError;
use crate::resilience::classify::ErrorKind;
use crate::resilience::lock::LockError;
use crate::storage::traits::StoreError;

/// Manager lifecycle state.
///
/// Use [`super::RepositoryManager::state()`] to check the current state or
/// [`super::RepositoryManager::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ManagerState {
    /// Just created, not yet initialized
    Created,
    /// Opening the local store and connecting to the remote store
    Connecting,
    /// Repositories are available
    Ready,
    /// Graceful shutdown in progress
    ShuttingDown,
    Stopped,
}

impl std::fmt::Display for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Read-only status for an external health endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub state: ManagerState,
    /// Live ping of the remote store
    pub remote_reachable: bool,
    pub repositories_initialized: bool,
    /// The local store answers and the fallback path is enabled
    pub fallback_available: bool,
    /// Fallback data awaits migration, as read during initialize
    pub migration_pending: bool,
    /// Failures per kind over [`RECENT_ERRORS_WINDOW_MS`]
    pub recent_errors: BTreeMap<ErrorKind, usize>,
    /// Epoch millis
    pub checked_at: i64,
}

/// Window of `HealthReport::recent_errors`.
pub const RECENT_ERRORS_WINDOW_MS: i64 = 5 * 60 * 1000;

impl HealthReport {
    /// Remote reachable, or degraded onto a working fallback store.
    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.repositories_initialized && (self.remote_reachable || self.fallback_available)
    }

    pub fn total_recent_errors(&self) -> usize {
        self.recent_errors.values().sum()
    }
}

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    ConfigFile(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("repository manager is not initialized (state: {0})")]
    NotInitialized(ManagerState),
}
