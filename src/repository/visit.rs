// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Visit record repository.
//!
//! Visits are counted once per session. Uniqueness is left to the stores
//! (primary key + insert-if-absent), never checked before inserting, so two
//! concurrent requests from the same session still produce one record.

use std::time::Duration;

use super::error::RepoError;
use super::table::{check_batch, Filter, RepoContext, Table};
use crate::clock::now_millis;
use crate::model::query::Page;
use crate::model::visit::DEFAULT_SESSION_WINDOW;
use crate::model::{DateRange, Entity, NewVisit, QueryOptions, VisitRecord};
use crate::resilience::fallback::Sourced;
use crate::storage::traits::SqlValue;

#[derive(Clone)]
pub struct VisitRepository {
    table: Table<VisitRecord>,
    ip_salt: String,
    session_window: Duration,
}

impl VisitRepository {
    pub fn new(ctx: RepoContext, ip_salt: impl Into<String>, session_window: Duration) -> Self {
        Self {
            table: Table::new(ctx),
            ip_salt: ip_salt.into(),
            session_window,
        }
    }

    /// Repository with the default 30 minute session window.
    pub fn with_salt(ctx: RepoContext, ip_salt: impl Into<String>) -> Self {
        Self::new(ctx, ip_salt, DEFAULT_SESSION_WINDOW)
    }

    pub fn remote_only(&self) -> Self {
        Self {
            table: self.table.remote_only(),
            ip_salt: self.ip_salt.clone(),
            session_window: self.session_window,
        }
    }

    pub fn session_window(&self) -> Duration {
        self.session_window
    }

    /// Record a visit at the current time. `value` is true when this was the
    /// first visit of its session.
    pub async fn record(&self, input: NewVisit) -> Result<Sourced<bool>, RepoError> {
        self.record_at(input, now_millis()).await
    }

    /// Record a visit at `now` (epoch millis).
    pub async fn record_at(&self, input: NewVisit, now: i64) -> Result<Sourced<bool>, RepoError> {
        let record = VisitRecord::derive(&input, &self.ip_salt, self.session_window, now)
            .map_err(|e| self.table.invalid(e))?;
        let stored = self.table.insert_if_absent("record", vec![record]).await?;
        Ok(stored.map(|n| n > 0))
    }

    pub async fn find_by_id(&self, session_id: &str) -> Result<Sourced<Option<VisitRecord>>, RepoError> {
        self.table.find_by_id(session_id).await
    }

    pub async fn find_all(&self, options: &QueryOptions) -> Result<Sourced<Page<VisitRecord>>, RepoError> {
        self.table.find_page("find_all", options, Filter::all()).await
    }

    /// Always fails with [`RepoError::Unsupported`]; visits are immutable.
    pub async fn update(&self, _session_id: &str, _input: &NewVisit) -> Result<Sourced<VisitRecord>, RepoError> {
        Err(self.table.unsupported("update"))
    }

    pub async fn delete(&self, session_id: &str) -> Result<Sourced<bool>, RepoError> {
        self.table.delete(session_id).await
    }

    pub async fn delete_many(&self, session_ids: &[String]) -> Result<Sourced<u64>, RepoError> {
        self.table.delete_many(session_ids).await
    }

    pub async fn count(&self) -> Result<Sourced<u64>, RepoError> {
        self.table.count("count", Filter::all()).await
    }

    /// Store already-derived records, skipping sessions that exist. Returns
    /// how many were new.
    pub async fn create_many(&self, records: Vec<VisitRecord>) -> Result<Sourced<u64>, RepoError> {
        let records = check_batch(&records, |r| r.validate().map(|_| r.clone()))
            .map_err(|reasons| self.table.invalid_batch(reasons))?;
        self.table.insert_if_absent("create_many", records).await
    }

    pub async fn find_by_date_range(&self, range: DateRange) -> Result<Sourced<Vec<VisitRecord>>, RepoError> {
        self.table
            .find_where("find_by_date_range", Filter::created_within(range), None)
            .await
    }

    /// Sessions started at or after `since` (epoch millis).
    pub async fn count_since(&self, since: i64) -> Result<Sourced<u64>, RepoError> {
        let filter = Filter::new(
            "created_at >= ?",
            vec![SqlValue::Int(since)],
            move |v: &VisitRecord| v.created_at >= since,
        );
        self.table.count("count_since", filter).await
    }
}
