// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-shot migration of fallback data into the remote store.
//!
//! # Stages
//!
//! ```text
//! Detecting ─► Converting ─► Migrating ─► Cleaning ─► Completed
//!     └────────────┴─────────────┴───────────┴──────► Error
//! ```
//!
//! - **Detecting**: read every fallback collection. Nothing to move ends the
//!   run as `Completed` with zero counts.
//! - **Converting**: decode and re-validate each record; invalid ones are
//!   discarded with a named error and left in place.
//! - **Migrating**: write valid records in batches through remote-only
//!   repositories. A failed batch is recorded and the next batch runs.
//! - **Cleaning**: checkpoint the migrated ids, then remove those records
//!   from the fallback store, if any were migrated and cleanup is enabled.
//!   Every collection is cleaned or none is; a failure here ends the run in
//!   `Error` with the fallback store as it was.
//! - **Completed**: persist [`MigrationStatus`] under [`STATUS_KEY`]. Once it
//!   says `completed`, later runs are no-ops.
//!
//! The status also lists every migrated record, so a rerun after a failure
//! or cancellation never writes the same record twice.

mod convert;
mod status;
pub mod types;

pub use status::STATUS_KEY;
pub use types::{EntityCounts, MigrationError, MigrationProgress, MigrationReport, MigrationStage, MigrationStatus};

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::clock::now_millis;
use crate::fallback::{FallbackStore, Removal};
use crate::model::{EntityKind, Message, Photo, Quote, VisitRecord};
use crate::repository::{MessageRepository, PhotoRepository, QuoteRepository, RepoError, VisitRepository};
use crate::resilience::lock::AdvisoryLock;
use convert::{convert, id_fields, Candidate, Converted};
use status::StatusStore;

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const LOCK_NAME: &str = "site-store:migration";

/// No completed run recorded in `fallback`'s store and `fallback` holds data.
pub async fn migration_pending(fallback: &FallbackStore) -> Result<bool, MigrationError> {
    let status = StatusStore::new(fallback.kv().clone());
    if status.load().await?.is_some_and(|s| s.completed) {
        return Ok(false);
    }
    Ok(fallback.has_data().await?)
}

/// Mutable state of one run. Survives a failed stage so the partial result
/// can still be persisted.
#[derive(Default)]
struct Run {
    total: usize,
    processed: usize,
    migrated: EntityCounts,
    migrated_ids: BTreeSet<String>,
    discarded: usize,
    failed: usize,
    cleaned: usize,
    errors: Vec<String>,
}

impl Run {
    fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.processed * 100) / self.total).min(100) as u8
    }
}

pub struct MigrationPipeline {
    fallback: Arc<FallbackStore>,
    messages: MessageRepository,
    photos: PhotoRepository,
    quotes: QuoteRepository,
    visits: VisitRepository,
    status: StatusStore,
    batch_size: usize,
    cleanup: bool,
    lock: Option<(Arc<dyn AdvisoryLock>, Duration)>,
    progress: watch::Sender<MigrationProgress>,
}

impl MigrationPipeline {
    /// Build a pipeline reading `fallback` and writing through remote-only
    /// views of the given repositories.
    pub fn new(
        fallback: Arc<FallbackStore>,
        messages: &MessageRepository,
        photos: &PhotoRepository,
        quotes: &QuoteRepository,
        visits: &VisitRepository,
    ) -> Self {
        let (progress, _) = watch::channel(MigrationProgress::default());
        Self {
            status: StatusStore::new(fallback.kv().clone()),
            fallback,
            messages: messages.remote_only(),
            photos: photos.remote_only(),
            quotes: quotes.remote_only(),
            visits: visits.remote_only(),
            batch_size: DEFAULT_BATCH_SIZE,
            cleanup: true,
            lock: None,
            progress,
        }
    }

    #[must_use]
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Whether migrated records are removed from the fallback store.
    #[must_use]
    pub fn cleanup(mut self, cleanup: bool) -> Self {
        self.cleanup = cleanup;
        self
    }

    /// Hold `lock` for the whole run, waiting at most `timeout` for it.
    #[must_use]
    pub fn with_lock(mut self, lock: Arc<dyn AdvisoryLock>, timeout: Duration) -> Self {
        self.lock = Some((lock, timeout));
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<MigrationProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> MigrationProgress {
        self.progress.borrow().clone()
    }

    pub async fn status(&self) -> Result<Option<MigrationStatus>, MigrationError> {
        Ok(self.status.load().await?)
    }

    /// Forget the persisted status so the next run starts fresh.
    pub async fn reset_status(&self) -> Result<(), MigrationError> {
        self.status.clear().await?;
        info!("Migration status reset");
        Ok(())
    }

    /// No completed run on record and the fallback store holds data.
    pub async fn needs_migration(&self) -> Result<bool, MigrationError> {
        migration_pending(&self.fallback).await
    }

    /// Run to completion without a cancellation signal.
    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        let (_never, cancel) = watch::channel(false);
        self.run_with_cancel(cancel).await
    }

    /// Run, checking `cancel` between batches. A cancelled run ends in
    /// [`MigrationStage::Error`] with [`MigrationError::Cancelled`].
    #[tracing::instrument(skip_all, fields(batch_size = self.batch_size, cleanup = self.cleanup))]
    pub async fn run_with_cancel(&self, cancel: watch::Receiver<bool>) -> Result<MigrationReport, MigrationError> {
        let Some((lock, timeout)) = &self.lock else {
            return self.run_unlocked(&cancel).await;
        };

        if !lock.acquire(LOCK_NAME, *timeout).await? {
            warn!(lock = LOCK_NAME, "Migration already running elsewhere");
            return Err(MigrationError::LockBusy(LOCK_NAME.to_string()));
        }
        let result = self.run_unlocked(&cancel).await;
        if let Err(e) = lock.release(LOCK_NAME).await {
            warn!(lock = LOCK_NAME, error = %e, "Failed to release migration lock");
        }
        result
    }

    async fn run_unlocked(&self, cancel: &watch::Receiver<bool>) -> Result<MigrationReport, MigrationError> {
        let previous = self.status.load().await?.unwrap_or_default();
        if previous.completed {
            info!(timestamp = previous.timestamp, "Migration already completed, nothing to do");
            self.publish(MigrationStage::Completed, "Migration already completed", 100, EntityCounts::default());
            let mut report = MigrationReport::empty(MigrationStage::Completed);
            report.already_completed = true;
            return Ok(report);
        }

        let mut run = Run::default();
        match self.execute(&previous, &mut run, cancel).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, migrated = run.migrated.total(), "Migration failed");
                run.errors.push(e.to_string());
                if !run.migrated_ids.is_empty() {
                    // Checkpoint what did reach the remote store
                    let partial = self.merge_status(&previous, &run, false);
                    if let Err(save_err) = self.status.save(&partial).await {
                        warn!(error = %save_err, "Failed to persist partial migration status");
                    }
                }
                self.publish(MigrationStage::Error, &e.to_string(), run.percent(), run.migrated);
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        previous: &MigrationStatus,
        run: &mut Run,
        cancel: &watch::Receiver<bool>,
    ) -> Result<MigrationReport, MigrationError> {
        // ========== DETECTING ==========
        self.publish(MigrationStage::Detecting, "Reading fallback data", 0, run.migrated);
        let mut raw = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            let records = self.fallback.load_raw(kind.collection()).await?;
            debug!(entity = %kind, records = records.len(), "Fallback collection loaded");
            raw.push(records);
        }
        if raw.iter().all(Vec::is_empty) {
            info!("No fallback data to migrate");
            self.publish(MigrationStage::Completed, "No fallback data", 100, run.migrated);
            return Ok(MigrationReport::empty(MigrationStage::Completed));
        }

        // ========== CONVERTING ==========
        self.publish(MigrationStage::Converting, "Validating fallback records", 0, run.migrated);
        let done = &previous.migrated_ids;
        let mut raw = raw.into_iter();
        let mut next = || raw.next().unwrap_or_default();
        let messages = convert::<Message, _>(next(), done, convert::message_input);
        let photos = convert::<Photo, _>(next(), done, convert::photo_input);
        let quotes = convert::<Quote, _>(next(), done, convert::quote_input);
        let visits = convert::<VisitRecord, _>(next(), done, convert::visit_input);

        self.note_conversion(EntityKind::Message, &messages, run);
        self.note_conversion(EntityKind::Photo, &photos, run);
        self.note_conversion(EntityKind::Quote, &quotes, run);
        self.note_conversion(EntityKind::Visit, &visits, run);
        run.total = messages.candidates.len()
            + photos.candidates.len()
            + quotes.candidates.len()
            + visits.candidates.len();

        // ========== MIGRATING ==========
        self.publish(MigrationStage::Migrating, "Migrating records", 0, run.migrated);
        let repo = &self.messages;
        self.migrate_entity(EntityKind::Message, messages.candidates, run, cancel, move |batch| async move {
            repo.create_many(batch).await.map(|_| ())
        })
        .await?;
        let repo = &self.photos;
        self.migrate_entity(EntityKind::Photo, photos.candidates, run, cancel, move |batch| async move {
            repo.create_many(batch).await.map(|_| ())
        })
        .await?;
        let repo = &self.quotes;
        self.migrate_entity(EntityKind::Quote, quotes.candidates, run, cancel, move |batch| async move {
            repo.create_many(batch).await.map(|_| ())
        })
        .await?;
        // Sessions already present remotely are skipped, not failed
        let repo = &self.visits;
        self.migrate_entity(EntityKind::Visit, visits.candidates, run, cancel, move |batch| async move {
            repo.create_many(batch).await.map(|_| ())
        })
        .await?;

        // Checkpoint before touching the fallback store; a failed clean
        // reruns with these ids already marked as migrated.
        let completed = run.failed == 0;
        let checkpoint = self.merge_status(previous, run, false);
        self.status.save(&checkpoint).await?;

        // ========== CLEANING ==========
        if self.cleanup && !checkpoint.migrated_ids.is_empty() {
            self.publish(MigrationStage::Cleaning, "Removing migrated fallback records", 100, run.migrated);
            run.cleaned = self.clean(&checkpoint.migrated_ids).await?;
            info!(removed = run.cleaned, "Fallback store cleaned");
        }

        if completed {
            let status = self.merge_status(previous, run, true);
            if let Err(e) = self.status.save(&status).await {
                warn!(error = %e, "Failed to mark migration completed");
                run.errors.push(format!("status: {}", e));
            }
        }

        // ========== COMPLETED ==========
        let message = if completed {
            format!("Migrated {} records", run.migrated.total())
        } else {
            format!("Migrated {} records, {} failed", run.migrated.total(), run.failed)
        };
        info!(
            migrated = run.migrated.total(),
            discarded = run.discarded,
            failed = run.failed,
            "Migration finished"
        );
        self.publish(MigrationStage::Completed, &message, 100, run.migrated);

        Ok(MigrationReport {
            stage: MigrationStage::Completed,
            migrated: run.migrated,
            discarded: run.discarded,
            failed: run.failed,
            cleaned: run.cleaned,
            errors: std::mem::take(&mut run.errors),
            already_completed: false,
        })
    }

    fn note_conversion<I>(&self, kind: EntityKind, converted: &Converted<I>, run: &mut Run) {
        for reason in &converted.discarded {
            warn!(entity = %kind, reason = %reason, "Discarding fallback record");
            crate::metrics::record_migration_discard(kind.as_str());
        }
        if converted.skipped > 0 {
            debug!(entity = %kind, skipped = converted.skipped, "Already migrated records skipped");
        }
        run.discarded += converted.discarded.len();
        run.errors.extend(converted.discarded.iter().cloned());
    }

    async fn migrate_entity<I, F, Fut>(
        &self,
        kind: EntityKind,
        candidates: Vec<Candidate<I>>,
        run: &mut Run,
        cancel: &watch::Receiver<bool>,
        create: F,
    ) -> Result<(), MigrationError>
    where
        F: Fn(Vec<I>) -> Fut,
        Fut: Future<Output = Result<(), RepoError>>,
    {
        let mut candidates = candidates.into_iter().peekable();
        let mut batch_no = 0;
        while candidates.peek().is_some() {
            if *cancel.borrow() {
                warn!(entity = %kind, batch = batch_no, "Migration cancelled");
                return Err(MigrationError::Cancelled);
            }
            batch_no += 1;

            let batch: Vec<Candidate<I>> = candidates.by_ref().take(self.batch_size).collect();
            let size = batch.len();
            let (ids, inputs): (Vec<String>, Vec<I>) =
                batch.into_iter().map(|c| (c.source_id, c.input)).unzip();

            match create(inputs).await {
                Ok(()) => {
                    run.migrated.add(kind, size);
                    run.migrated_ids.extend(ids);
                    crate::metrics::record_migrated(kind.as_str(), size);
                    debug!(entity = %kind, batch = batch_no, size, "Batch migrated");
                }
                Err(e) => {
                    warn!(entity = %kind, batch = batch_no, size, error_kind = %e.kind(), error = %e, "Batch failed");
                    run.failed += size;
                    run.errors.push(format!("{}: batch {} ({} records): {}", kind, batch_no, size, e));
                }
            }
            run.processed += size;

            let message = format!("{} batch {} done", kind, batch_no);
            self.publish(MigrationStage::Migrating, &message, run.percent(), run.migrated);
        }
        Ok(())
    }

    /// Remove every migrated record in one unit: either all collections are
    /// cleaned or none are.
    async fn clean(&self, migrated_ids: &BTreeSet<String>) -> Result<usize, MigrationError> {
        let removals: Vec<Removal<'_>> = EntityKind::ALL
            .iter()
            .filter_map(|kind| {
                let prefix = format!("{}:", kind.as_str());
                let ids: HashSet<String> = migrated_ids
                    .iter()
                    .filter_map(|key| key.strip_prefix(&prefix))
                    .map(str::to_string)
                    .collect();
                (!ids.is_empty()).then(|| Removal {
                    collection: kind.collection(),
                    id_fields: id_fields(*kind),
                    ids,
                })
            })
            .collect();
        if removals.is_empty() {
            return Ok(0);
        }
        Ok(self.fallback.remove_ids_across(&removals).await?)
    }

    fn merge_status(&self, previous: &MigrationStatus, run: &Run, completed: bool) -> MigrationStatus {
        let mut migrated = previous.migrated;
        for kind in EntityKind::ALL {
            migrated.add(kind, run.migrated.get(kind));
        }
        let mut migrated_ids = previous.migrated_ids.clone();
        migrated_ids.extend(run.migrated_ids.iter().cloned());
        MigrationStatus {
            completed,
            migrated,
            errors: run.errors.clone(),
            migrated_ids,
            timestamp: now_millis(),
        }
    }

    fn publish(&self, stage: MigrationStage, message: &str, percent: u8, counts: EntityCounts) {
        let changed = self.progress.borrow().stage != stage;
        if changed {
            crate::metrics::record_migration_stage(stage.as_str());
            info!(stage = %stage, "Migration stage");
        }
        self.progress.send_replace(MigrationProgress {
            stage,
            message: message.to_string(),
            percent,
            counts,
        });
    }
}
