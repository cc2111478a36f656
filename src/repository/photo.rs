// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Gallery photo repository.

use super::error::RepoError;
use super::table::{check_batch, search_term, Filter, RepoContext, Table};
use crate::clock::now_millis;
use crate::model::query::Page;
use crate::model::{new_id, new_local_id, DateRange, NewPhoto, Photo, PhotoPatch, QueryOptions};
use crate::resilience::fallback::Sourced;
use crate::storage::traits::SqlValue;

#[derive(Clone)]
pub struct PhotoRepository {
    table: Table<Photo>,
}

impl PhotoRepository {
    pub fn new(ctx: RepoContext) -> Self {
        Self { table: Table::new(ctx) }
    }

    pub fn remote_only(&self) -> Self {
        Self {
            table: self.table.remote_only(),
        }
    }

    pub async fn create(&self, input: NewPhoto) -> Result<Sourced<Photo>, RepoError> {
        let record = Photo::create(&input, new_id(), now_millis()).map_err(|e| self.table.invalid(e))?;
        let local = Photo {
            id: new_local_id(),
            ..record.clone()
        };
        self.table.create(record, local).await
    }

    pub async fn create_many(&self, inputs: Vec<NewPhoto>) -> Result<Sourced<Vec<Photo>>, RepoError> {
        let now = now_millis();
        let records = check_batch(&inputs, |input| Photo::create(input, new_id(), now))
            .map_err(|reasons| self.table.invalid_batch(reasons))?;
        let locals = records
            .iter()
            .map(|r| Photo {
                id: new_local_id(),
                ..r.clone()
            })
            .collect();
        self.table.create_many(records, locals).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Sourced<Option<Photo>>, RepoError> {
        self.table.find_by_id(id).await
    }

    pub async fn find_all(&self, options: &QueryOptions) -> Result<Sourced<Page<Photo>>, RepoError> {
        self.table.find_page("find_all", options, Filter::all()).await
    }

    pub async fn update(&self, id: &str, patch: &PhotoPatch) -> Result<Sourced<Photo>, RepoError> {
        self.table.update(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> Result<Sourced<bool>, RepoError> {
        self.table.delete(id).await
    }

    pub async fn delete_many(&self, ids: &[String]) -> Result<Sourced<u64>, RepoError> {
        self.table.delete_many(ids).await
    }

    pub async fn count(&self) -> Result<Sourced<u64>, RepoError> {
        self.table.count("count", Filter::all()).await
    }

    pub async fn find_by_date_range(&self, range: DateRange) -> Result<Sourced<Vec<Photo>>, RepoError> {
        self.table
            .find_where("find_by_date_range", Filter::created_within(range), None)
            .await
    }

    /// Visitor uploads (`true`) or the built-in set (`false`).
    pub async fn find_custom(&self, is_custom: bool) -> Result<Sourced<Vec<Photo>>, RepoError> {
        let filter = Filter::new(
            "is_custom = ?",
            vec![SqlValue::bool(is_custom)],
            move |p: &Photo| p.is_custom == is_custom,
        );
        self.table.find_where("find_custom", filter, None).await
    }

    /// Case-insensitive substring search over captions.
    pub async fn search(&self, term: &str) -> Result<Sourced<Vec<Photo>>, RepoError> {
        let term = search_term(term).map_err(|e| self.table.invalid(e))?;
        let filter = Filter::contains("caption", term, |p: &Photo| p.caption.as_str());
        self.table.find_where("search", filter, None).await
    }

    pub async fn random(&self, n: u32) -> Result<Sourced<Vec<Photo>>, RepoError> {
        self.table.random(n).await
    }
}
