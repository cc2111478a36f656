// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quote repository. Quotes are immutable: create and delete only.

use super::error::RepoError;
use super::table::{check_batch, search_term, Filter, RepoContext, Table};
use crate::clock::now_millis;
use crate::model::query::Page;
use crate::model::{new_id, new_local_id, DateRange, NewQuote, QueryOptions, Quote};
use crate::resilience::fallback::Sourced;

#[derive(Clone)]
pub struct QuoteRepository {
    table: Table<Quote>,
}

impl QuoteRepository {
    pub fn new(ctx: RepoContext) -> Self {
        Self { table: Table::new(ctx) }
    }

    pub fn remote_only(&self) -> Self {
        Self {
            table: self.table.remote_only(),
        }
    }

    pub async fn create(&self, input: NewQuote) -> Result<Sourced<Quote>, RepoError> {
        let record = Quote::create(&input, new_id(), now_millis()).map_err(|e| self.table.invalid(e))?;
        let local = Quote {
            id: new_local_id(),
            ..record.clone()
        };
        self.table.create(record, local).await
    }

    pub async fn create_many(&self, inputs: Vec<NewQuote>) -> Result<Sourced<Vec<Quote>>, RepoError> {
        let now = now_millis();
        let records = check_batch(&inputs, |input| Quote::create(input, new_id(), now))
            .map_err(|reasons| self.table.invalid_batch(reasons))?;
        let locals = records
            .iter()
            .map(|r| Quote {
                id: new_local_id(),
                ..r.clone()
            })
            .collect();
        self.table.create_many(records, locals).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Sourced<Option<Quote>>, RepoError> {
        self.table.find_by_id(id).await
    }

    pub async fn find_all(&self, options: &QueryOptions) -> Result<Sourced<Page<Quote>>, RepoError> {
        self.table.find_page("find_all", options, Filter::all()).await
    }

    /// Always fails with [`RepoError::Unsupported`]; no store is touched.
    pub async fn update(&self, _id: &str, _input: &NewQuote) -> Result<Sourced<Quote>, RepoError> {
        Err(self.table.unsupported("update"))
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

    pub async fn find_by_date_range(&self, range: DateRange) -> Result<Sourced<Vec<Quote>>, RepoError> {
        self.table
            .find_where("find_by_date_range", Filter::created_within(range), None)
            .await
    }

    pub async fn search(&self, term: &str) -> Result<Sourced<Vec<Quote>>, RepoError> {
        let term = search_term(term).map_err(|e| self.table.invalid(e))?;
        let filter = Filter::contains("text", term, |q: &Quote| q.text.as_str());
        self.table.find_where("search", filter, None).await
    }

    pub async fn random(&self, n: u32) -> Result<Sourced<Vec<Quote>>, RepoError> {
        self.table.random(n).await
    }
}
