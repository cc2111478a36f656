// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the migration pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::model::EntityKind;
use crate::resilience::lock::LockError;
use crate::storage::traits::StoreError;

/// Stage of a migration run.
///
/// A run moves `Detecting → Converting → Migrating → Cleaning → Completed`;
/// `Error` is terminal and reachable from any stage. Watch it through
/// [`super::MigrationPipeline::subscribe()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStage {
    /// No run started yet
    #[default]
    Idle,
    /// Reading fallback collections
    Detecting,
    /// Mapping and validating fallback records
    Converting,
    /// Writing batches to the remote store
    Migrating,
    /// Removing migrated records from the fallback store
    Cleaning,
    Completed,
    Error,
}

impl MigrationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Detecting => "detecting",
            Self::Converting => "converting",
            Self::Migrating => "migrating",
            Self::Cleaning => "cleaning",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl std::fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-entity record counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntityCounts {
    pub messages: usize,
    pub photos: usize,
    pub quotes: usize,
    pub visits: usize,
}

impl EntityCounts {
    pub fn get(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Message => self.messages,
            EntityKind::Photo => self.photos,
            EntityKind::Quote => self.quotes,
            EntityKind::Visit => self.visits,
        }
    }

    pub fn add(&mut self, kind: EntityKind, n: usize) {
        match kind {
            EntityKind::Message => self.messages += n,
            EntityKind::Photo => self.photos += n,
            EntityKind::Quote => self.quotes += n,
            EntityKind::Visit => self.visits += n,
        }
    }

    pub fn total(&self) -> usize {
        self.messages + self.photos + self.quotes + self.visits
    }
}

/// Snapshot published after every stage change and every batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MigrationProgress {
    pub stage: MigrationStage,
    pub message: String,
    /// 0-100
    pub percent: u8,
    /// Records migrated so far in this run
    pub counts: EntityCounts,
}

/// Persisted outcome, stored under [`super::STATUS_KEY`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MigrationStatus {
    /// Set once a run finishes with no failed batch. Later runs short-circuit.
    pub completed: bool,
    /// Cumulative per-entity counts across runs
    pub migrated: EntityCounts,
    pub errors: Vec<String>,
    /// `<entity>:<id>` of every fallback record already written remotely
    #[serde(default)]
    pub migrated_ids: BTreeSet<String>,
    /// Epoch millis of the last persisted run
    pub timestamp: i64,
}

/// Result of one [`super::MigrationPipeline::run()`].
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationReport {
    pub stage: MigrationStage,
    /// Records migrated by this run
    pub migrated: EntityCounts,
    /// Records rejected during conversion
    pub discarded: usize,
    /// Records in failed batches
    pub failed: usize,
    /// Records removed from the fallback store
    pub cleaned: usize,
    pub errors: Vec<String>,
    /// The run was a no-op because an earlier run completed
    pub already_completed: bool,
}

impl MigrationReport {
    pub(crate) fn empty(stage: MigrationStage) -> Self {
        Self {
            stage,
            migrated: EntityCounts::default(),
            discarded: 0,
            failed: 0,
            cleaned: 0,
            errors: Vec::new(),
            already_completed: false,
        }
    }

    /// Check if every batch was written
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stage == MigrationStage::Completed && self.failed == 0
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MigrationError {
    #[error("migration store error: {0}")]
    Store(#[from] StoreError),
    #[error("migration cancelled")]
    Cancelled,
    #[error("migration lock '{0}' is held by another process")]
    LockBusy(String),
    #[error("migration lock error: {0}")]
    Lock(#[from] LockError),
}
