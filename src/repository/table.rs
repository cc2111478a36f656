// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared machinery behind every entity repository.
//!
//! A [`Table`] owns one entity's SQL (statements are built from the entity's
//! column list and an allow-listed order field) and the guard that runs each
//! operation: remote call under a timeout, classified retry, fallback on
//! retry exhaustion, health tracking, metrics and cache invalidation.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::{Locale, RepoError};
use crate::cache::Cache;
use crate::clock::now_millis;
use crate::fallback::FallbackStore;
use crate::metrics::LatencyTimer;
use crate::model::query::{Page, QueryOptions, ResolvedQuery, MAX_LIMIT};
use crate::model::validation::ValidationErrors;
use crate::model::{DateRange, Entity, Patchable};
use crate::resilience::classify::classify;
use crate::resilience::fallback::{with_fallback, Sourced};
use crate::resilience::health::RemoteHealth;
use crate::resilience::retry::RetryEngine;
use crate::storage::traits::{RemoteStore, SqlValue, Statement, StoreError};

/// Longest accepted search term, in characters.
pub const MAX_SEARCH_CHARS: usize = 100;

/// Everything a repository needs. Cheap to clone.
#[derive(Clone)]
pub struct RepoContext {
    pub remote: Arc<dyn RemoteStore>,
    /// `None` disables the fallback path.
    pub fallback: Option<Arc<FallbackStore>>,
    pub engine: RetryEngine,
    pub cache: Option<Arc<Cache>>,
    pub health: Arc<RemoteHealth>,
    pub locale: Locale,
    pub remote_timeout: Duration,
}

impl RepoContext {
    /// Same context with the fallback path disabled.
    pub fn remote_only(&self) -> Self {
        Self {
            fallback: None,
            ..self.clone()
        }
    }
}

/// Row filter expressed twice: as a SQL `WHERE` fragment for the remote store
/// and as a predicate for fallback records.
pub(crate) struct Filter<E> {
    clause: String,
    params: Vec<SqlValue>,
    matches: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> Clone for Filter<E> {
    fn clone(&self) -> Self {
        Self {
            clause: self.clause.clone(),
            params: self.params.clone(),
            matches: self.matches.clone(),
        }
    }
}

impl<E: Entity> Filter<E> {
    pub(crate) fn all() -> Self {
        Self {
            clause: String::new(),
            params: Vec::new(),
            matches: Arc::new(|_| true),
        }
    }

    pub(crate) fn new(
        condition: &str,
        params: Vec<SqlValue>,
        matches: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            clause: format!(" WHERE {}", condition),
            params,
            matches: Arc::new(matches),
        }
    }

    /// `created_at` within `[start, end)`.
    pub(crate) fn created_within(range: DateRange) -> Self {
        Self::new(
            "created_at >= ? AND created_at < ?",
            vec![SqlValue::Int(range.start), SqlValue::Int(range.end)],
            move |r: &E| range.contains(r.created_at()),
        )
    }

    /// Case-insensitive substring match on a text column. `term` must
    /// already be trimmed and lower-cased.
    pub(crate) fn contains(
        column: &'static str,
        term: String,
        field: impl Fn(&E) -> &str + Send + Sync + 'static,
    ) -> Self {
        Self::new(
            &format!("INSTR(LOWER({}), ?) > 0", column),
            vec![SqlValue::text(term.clone())],
            move |r: &E| field(r).to_lowercase().contains(&term),
        )
    }

    pub(crate) fn predicate(&self) -> impl Fn(&E) -> bool + Send + Sync + 'static {
        let matches = self.matches.clone();
        move |r: &E| matches(r)
    }
}

/// Trimmed, lower-cased search term, or why it is unusable.
pub(crate) fn search_term(term: &str) -> Result<String, ValidationErrors> {
    let term = term.trim();
    let mut errs = ValidationErrors::new();
    errs.check(!term.is_empty(), "term", "must not be empty");
    errs.check(
        term.chars().count() <= MAX_SEARCH_CHARS,
        "term",
        format!("must be at most {} characters", MAX_SEARCH_CHARS),
    );
    errs.into_result(term.to_lowercase())
}

/// Sample/limit sizes are 1..=100.
pub(crate) fn check_count(field: &'static str, n: u32) -> Result<u32, ValidationErrors> {
    let mut errs = ValidationErrors::new();
    errs.check(
        (1..=MAX_LIMIT).contains(&n),
        field,
        format!("must be between 1 and {}", MAX_LIMIT),
    );
    errs.into_result(n)
}

fn check_id(id: &str) -> Result<(), ValidationErrors> {
    let mut errs = ValidationErrors::new();
    errs.check(!id.trim().is_empty(), "id", "must not be empty");
    errs.into_result(())
}

/// Validate every record of a batch, prefixing each reason with its index.
pub(crate) fn check_batch<T, U>(
    inputs: &[T],
    mut build: impl FnMut(&T) -> Result<U, ValidationErrors>,
) -> Result<Vec<U>, Vec<String>> {
    let mut built = Vec::with_capacity(inputs.len());
    let mut reasons = Vec::new();
    for (idx, input) in inputs.iter().enumerate() {
        match build(input) {
            Ok(record) => built.push(record),
            Err(errs) => reasons.extend(errs.reasons().into_iter().map(|r| format!("[{}] {}", idx, r))),
        }
    }
    if reasons.is_empty() {
        Ok(built)
    } else {
        Err(reasons)
    }
}

pub(crate) struct Table<E> {
    ctx: RepoContext,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for Table<E> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Table<E> {
    pub(crate) fn new(ctx: RepoContext) -> Self {
        Self {
            ctx,
            _entity: PhantomData,
        }
    }

    pub(crate) fn remote_only(&self) -> Self {
        Self::new(self.ctx.remote_only())
    }

    pub(crate) fn invalid(&self, errors: ValidationErrors) -> RepoError {
        RepoError::validation(errors, self.ctx.locale)
    }

    pub(crate) fn invalid_batch(&self, reasons: Vec<String>) -> RepoError {
        RepoError::with_reasons(reasons, self.ctx.locale)
    }

    pub(crate) fn unsupported(&self, operation: &'static str) -> RepoError {
        crate::metrics::record_operation(E::KIND.as_str(), operation, "error");
        warn!(entity = %E::KIND, operation, "Unsupported operation");
        RepoError::unsupported(operation, self.ctx.locale)
    }

    fn table(&self) -> &'static str {
        E::KIND.collection()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Guard
    // ─────────────────────────────────────────────────────────────────────

    /// Run `primary` against the remote store with timeout and retry; on
    /// exhaustion of a retryable failure, run `fallback` against the local
    /// store if one is configured.
    pub(crate) async fn guard<T, P, PFut, F, FFut>(
        &self,
        operation: &'static str,
        id: Option<&str>,
        mut primary: P,
        fallback: F,
    ) -> Result<Sourced<T>, RepoError>
    where
        P: FnMut() -> PFut,
        PFut: Future<Output = Result<T, StoreError>>,
        F: FnOnce(Arc<FallbackStore>) -> FFut,
        FFut: Future<Output = Result<T, StoreError>>,
    {
        let entity = E::KIND.as_str();
        let _timer = LatencyTimer::new(entity, operation);
        let op_name = format!("{}.{}", entity, operation);
        let context = id.map(|id| format!("{}:{}", entity, id)).unwrap_or_default();

        let timeout = self.ctx.remote_timeout;
        let health = self.ctx.health.as_ref();
        let bounded = move || {
            let call = primary();
            async move {
                let outcome = match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result,
                    Err(_) => {
                        crate::metrics::record_timeout("remote");
                        Err(StoreError::Timeout(timeout))
                    }
                };
                match &outcome {
                    Err(e) if classify(e).retryable => health.record_failure(),
                    _ => health.record_success(),
                }
                outcome
            }
        };

        let result = match &self.ctx.fallback {
            Some(store) => {
                let store = store.clone();
                with_fallback(&self.ctx.engine, &op_name, &context, bounded, move || fallback(store)).await
            }
            None => self
                .ctx
                .engine
                .execute_with_context(&op_name, &context, bounded)
                .await
                .map(|done| Sourced::remote(done.value)),
        };

        match result {
            Ok(sourced) => {
                crate::metrics::record_operation(entity, operation, sourced.source.as_str());
                debug!(entity, operation, source = sourced.source.as_str(), "Repository operation complete");
                Ok(sourced)
            }
            Err(failure) => {
                crate::metrics::record_operation(entity, operation, "error");
                warn!(
                    entity,
                    operation,
                    context = %context,
                    attempts = failure.attempts,
                    kind = %failure.classification.kind,
                    error = %failure.error,
                    "Repository operation failed"
                );
                Err(RepoError::from_classified(&failure, id, self.ctx.locale))
            }
        }
    }

    /// Drop cached aggregates of this entity after a write.
    pub(crate) async fn invalidate(&self) {
        if let Some(cache) = &self.ctx.cache {
            cache.invalidate_prefix(&format!("{}:", self.table())).await;
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Remote statements
    // ─────────────────────────────────────────────────────────────────────

    fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table(),
            E::COLUMNS.join(", "),
            vec!["?"; E::COLUMNS.len()].join(", ")
        )
    }

    fn select_sql(&self) -> String {
        format!("SELECT {} FROM {}", E::COLUMNS.join(", "), self.table())
    }

    async fn insert_row(&self, record: &E) -> Result<(), StoreError> {
        self.ctx.remote.execute(&self.insert_sql(), &record.to_params()).await?;
        Ok(())
    }

    async fn insert_rows(&self, records: &[E]) -> Result<(), StoreError> {
        let sql = self.insert_sql();
        let statements: Vec<Statement> = records
            .iter()
            .map(|r| Statement::new(sql.clone(), r.to_params()))
            .collect();
        self.ctx.remote.transaction(&statements).await?;
        Ok(())
    }

    /// Insert unless the primary key exists. Returns rows stored.
    async fn insert_rows_if_absent(&self, records: &[E]) -> Result<u64, StoreError> {
        let sql = self.ctx.remote.dialect().insert_ignore(self.table(), E::COLUMNS);
        let statements: Vec<Statement> = records
            .iter()
            .map(|r| Statement::new(sql.clone(), r.to_params()))
            .collect();
        Ok(self.ctx.remote.transaction(&statements).await?.iter().sum())
    }

    /// Whether every id is already stored.
    async fn all_stored(&self, ids: &[&str]) -> Result<bool, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS total FROM {} WHERE {} IN ({})",
            self.table(),
            E::ID_COLUMN,
            vec!["?"; ids.len()].join(", ")
        );
        let params: Vec<SqlValue> = ids.iter().map(|id| SqlValue::text(*id)).collect();
        let rows = self.ctx.remote.query(&sql, &params).await?;
        let total = rows.first().map(|r| r.get_i64("total")).transpose()?.unwrap_or(0);
        Ok(total == ids.len() as i64)
    }

    /// Insert `records` in one transaction. A retry that hits the primary key
    /// of its own records means an earlier attempt committed and only its
    /// reply was lost, so the insert counts as done once the rows are found.
    async fn insert_attempt(&self, records: &[E], retried: bool) -> Result<(), StoreError> {
        let outcome = match records {
            [record] => self.insert_row(record).await,
            _ => self.insert_rows(records).await,
        };
        match outcome {
            Err(StoreError::Constraint(reason)) if retried => {
                let ids: Vec<&str> = records.iter().map(|r| r.id()).collect();
                if self.all_stored(&ids).await? {
                    debug!(entity = %E::KIND, records = ids.len(), "Earlier insert attempt had committed");
                    Ok(())
                } else {
                    Err(StoreError::Constraint(reason))
                }
            }
            other => other,
        }
    }

    async fn select_by_id(&self, id: &str) -> Result<Option<E>, StoreError> {
        let sql = format!("{} WHERE {} = ?", self.select_sql(), E::ID_COLUMN);
        let rows = self.ctx.remote.query(&sql, &[SqlValue::text(id)]).await?;
        rows.first().map(E::from_row).transpose()
    }

    async fn select_where(&self, filter: &Filter<E>, limit: Option<u32>) -> Result<Vec<E>, StoreError> {
        let mut sql = format!(
            "{}{} ORDER BY created_at DESC, {} DESC",
            self.select_sql(),
            filter.clause,
            E::ID_COLUMN
        );
        let mut params = filter.params.clone();
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            params.push(SqlValue::Int(i64::from(limit)));
        }
        let rows = self.ctx.remote.query(&sql, &params).await?;
        rows.iter().map(E::from_row).collect()
    }

    async fn count_rows(&self, filter: &Filter<E>) -> Result<u64, StoreError> {
        let sql = format!("SELECT COUNT(*) AS total FROM {}{}", self.table(), filter.clause);
        let rows = self.ctx.remote.query(&sql, &filter.params).await?;
        let total = rows.first().map(|r| r.get_i64("total")).transpose()?.unwrap_or(0);
        Ok(total.max(0) as u64)
    }

    async fn select_page(&self, filter: &Filter<E>, query: &ResolvedQuery) -> Result<Page<E>, StoreError> {
        let total = self.count_rows(filter).await?;
        let sql = format!(
            "{}{} {} LIMIT ? OFFSET ?",
            self.select_sql(),
            filter.clause,
            query.order_clause(E::ID_COLUMN)
        );
        let mut params = filter.params.clone();
        params.push(SqlValue::Int(i64::from(query.limit)));
        params.push(SqlValue::Int(query.offset as i64));
        let rows = self.ctx.remote.query(&sql, &params).await?;
        let items = rows.iter().map(E::from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, total, query))
    }

    async fn delete_rows(&self, ids: &[String]) -> Result<u64, StoreError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.table(),
            E::ID_COLUMN,
            vec!["?"; ids.len()].join(", ")
        );
        let params: Vec<SqlValue> = ids.iter().map(SqlValue::text).collect();
        self.ctx.remote.execute(&sql, &params).await
    }

    async fn random_rows(&self, n: u32) -> Result<Vec<E>, StoreError> {
        let sql = format!(
            "{} ORDER BY {} LIMIT ?",
            self.select_sql(),
            self.ctx.remote.dialect().random_fn()
        );
        let rows = self.ctx.remote.query(&sql, &[SqlValue::Int(i64::from(n))]).await?;
        rows.iter().map(E::from_row).collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────

    /// Store `record` remotely, or `local` (same data, local id) on fallback.
    pub(crate) async fn create(&self, record: E, local: E) -> Result<Sourced<E>, RepoError> {
        let rec = &record;
        let mut attempt = 0u32;
        let result = self
            .guard(
                "create",
                None,
                move || {
                    attempt += 1;
                    let retried = attempt > 1;
                    async move {
                        self.insert_attempt(std::slice::from_ref(rec), retried)
                            .await
                            .map(|_| rec.clone())
                    }
                },
                move |store| async move { store.create(local).await },
            )
            .await?;
        self.invalidate().await;
        Ok(result)
    }

    pub(crate) async fn create_many(&self, records: Vec<E>, locals: Vec<E>) -> Result<Sourced<Vec<E>>, RepoError> {
        if records.is_empty() {
            return Ok(Sourced::remote(Vec::new()));
        }
        let recs = &records;
        let mut attempt = 0u32;
        let result = self
            .guard(
                "create_many",
                None,
                move || {
                    attempt += 1;
                    let retried = attempt > 1;
                    async move { self.insert_attempt(recs, retried).await.map(|_| recs.clone()) }
                },
                move |store| async move { store.create_many(locals).await },
            )
            .await?;
        self.invalidate().await;
        Ok(result)
    }

    /// Insert-if-absent for records with derived keys. Returns rows stored.
    pub(crate) async fn insert_if_absent(
        &self,
        operation: &'static str,
        records: Vec<E>,
    ) -> Result<Sourced<u64>, RepoError> {
        if records.is_empty() {
            return Ok(Sourced::remote(0));
        }
        let id = (records.len() == 1).then(|| records[0].id().to_string());
        let recs = &records;
        let local = records.clone();
        let result = self
            .guard(
                operation,
                id.as_deref(),
                move || self.insert_rows_if_absent(recs),
                move |store| async move {
                    let mut stored = 0;
                    for record in local {
                        if store.insert_if_absent(record).await? {
                            stored += 1;
                        }
                    }
                    Ok(stored)
                },
            )
            .await?;
        if result.value > 0 {
            self.invalidate().await;
        }
        Ok(result)
    }

    pub(crate) async fn find_by_id(&self, id: &str) -> Result<Sourced<Option<E>>, RepoError> {
        check_id(id).map_err(|e| self.invalid(e))?;
        self.guard(
            "find_by_id",
            Some(id),
            move || self.select_by_id(id),
            move |store| async move { store.find_by_id::<E>(id).await },
        )
        .await
    }

    pub(crate) async fn find_page(
        &self,
        operation: &'static str,
        options: &QueryOptions,
        filter: Filter<E>,
    ) -> Result<Sourced<Page<E>>, RepoError> {
        let query = options.resolve(E::ORDER_FIELDS).map_err(|e| self.invalid(e))?;
        let q = &query;
        let f = &filter;
        let predicate = filter.predicate();
        self.guard(
            operation,
            None,
            move || self.select_page(f, q),
            move |store| async move { store.page_where::<E, _>(&query, predicate).await },
        )
        .await
    }

    /// Matching records, newest first, optionally limited.
    pub(crate) async fn find_where(
        &self,
        operation: &'static str,
        filter: Filter<E>,
        limit: Option<u32>,
    ) -> Result<Sourced<Vec<E>>, RepoError> {
        let f = &filter;
        let predicate = filter.predicate();
        self.guard(
            operation,
            None,
            move || self.select_where(f, limit),
            move |store| async move {
                let mut records = store.find_where::<E, _>(predicate).await?;
                if let Some(limit) = limit {
                    records.truncate(limit as usize);
                }
                Ok(records)
            },
        )
        .await
    }

    pub(crate) async fn count(&self, operation: &'static str, filter: Filter<E>) -> Result<Sourced<u64>, RepoError> {
        let f = &filter;
        let predicate = filter.predicate();
        self.guard(
            operation,
            None,
            move || self.count_rows(f),
            move |store| async move { store.count_where::<E, _>(predicate).await },
        )
        .await
    }

    pub(crate) async fn random(&self, n: u32) -> Result<Sourced<Vec<E>>, RepoError> {
        let n = check_count("n", n).map_err(|e| self.invalid(e))?;
        self.guard(
            "random",
            None,
            move || self.random_rows(n),
            move |store| async move { store.random::<E>(n as usize).await },
        )
        .await
    }

    /// Returns whether a record was removed.
    pub(crate) async fn delete(&self, id: &str) -> Result<Sourced<bool>, RepoError> {
        check_id(id).map_err(|e| self.invalid(e))?;
        let ids = [id.to_string()];
        let ids_ref = &ids;
        let result = self
            .guard(
                "delete",
                Some(id),
                move || async move { self.delete_rows(ids_ref).await.map(|n| n > 0) },
                move |store| async move { store.delete::<E>(id).await },
            )
            .await?;
        if result.value {
            self.invalidate().await;
        }
        Ok(result)
    }

    pub(crate) async fn delete_many(&self, ids: &[String]) -> Result<Sourced<u64>, RepoError> {
        let mut errs = ValidationErrors::new();
        errs.check(
            ids.iter().all(|id| !id.trim().is_empty()),
            "ids",
            "must not contain empty ids",
        );
        errs.into_result(()).map_err(|e| self.invalid(e))?;
        if ids.is_empty() {
            return Ok(Sourced::remote(0));
        }
        let result = self
            .guard(
                "delete_many",
                None,
                move || self.delete_rows(ids),
                move |store| async move { store.delete_many::<E>(ids).await },
            )
            .await?;
        if result.value > 0 {
            self.invalidate().await;
        }
        Ok(result)
    }
}

impl<E: Patchable> Table<E> {
    async fn update_row(&self, id: &str, patch: &E::Patch, now: i64) -> Result<E, StoreError> {
        let columns = E::patch_columns(patch);
        let assignments: Vec<String> = columns
            .iter()
            .map(|(c, _)| format!("{} = ?", c))
            .chain(std::iter::once("updated_at = ?".to_string()))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table(),
            assignments.join(", "),
            E::ID_COLUMN
        );
        let mut params: Vec<SqlValue> = columns.into_iter().map(|(_, v)| v).collect();
        params.push(SqlValue::Int(now));
        params.push(SqlValue::text(id));
        self.ctx.remote.execute(&sql, &params).await?;
        // MySQL reports zero affected rows for no-op updates, so re-read
        self.select_by_id(id).await?.ok_or(StoreError::NotFound)
    }

    pub(crate) async fn update(&self, id: &str, patch: &E::Patch) -> Result<Sourced<E>, RepoError> {
        let mut errs = ValidationErrors::new();
        if let Err(e) = check_id(id) {
            errs.merge(e);
        }
        if let Err(e) = E::check_patch(patch) {
            errs.merge(e);
        }
        errs.check(!E::patch_columns(patch).is_empty(), "patch", "must change at least one field");
        errs.into_result(()).map_err(|e| self.invalid(e))?;

        let now = now_millis();
        let result = self
            .guard(
                "update",
                Some(id),
                move || self.update_row(id, patch, now),
                move |store| async move { store.update::<E>(id, patch, now).await },
            )
            .await?;
        self.invalidate().await;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_term_normalized() {
        assert_eq!(search_term("  Hello ").unwrap(), "hello");
        assert!(search_term("   ").is_err());
        assert!(search_term(&"x".repeat(MAX_SEARCH_CHARS + 1)).is_err());
    }

    #[test]
    fn test_check_count_bounds() {
        assert!(check_count("n", 0).is_err());
        assert_eq!(check_count("n", 1).unwrap(), 1);
        assert_eq!(check_count("n", 100).unwrap(), 100);
        assert!(check_count("n", 101).is_err());
    }

    #[test]
    fn test_check_batch_prefixes_index() {
        let inputs = vec![1, -1, 2, -2];
        let err = check_batch(&inputs, |n| {
            let mut errs = ValidationErrors::new();
            errs.check(*n > 0, "n", "must be positive");
            errs.into_result(*n)
        })
        .unwrap_err();
        assert_eq!(err, vec!["[1] n: must be positive", "[3] n: must be positive"]);
    }
}
