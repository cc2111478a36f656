// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Guestbook message repository.

use super::error::RepoError;
use super::table::{check_batch, check_count, search_term, Filter, RepoContext, Table};
use crate::clock::now_millis;
use crate::model::query::Page;
use crate::model::validation::{normalize_color, ValidationErrors};
use crate::model::{new_id, new_local_id, DateRange, Message, MessagePatch, NewMessage, QueryOptions};
use crate::resilience::fallback::Sourced;
use crate::storage::traits::SqlValue;

#[derive(Clone)]
pub struct MessageRepository {
    table: Table<Message>,
}

impl MessageRepository {
    pub fn new(ctx: RepoContext) -> Self {
        Self { table: Table::new(ctx) }
    }

    /// View of this repository that never falls back to the local store.
    pub fn remote_only(&self) -> Self {
        Self {
            table: self.table.remote_only(),
        }
    }

    pub async fn create(&self, input: NewMessage) -> Result<Sourced<Message>, RepoError> {
        let record = Message::create(&input, new_id(), now_millis()).map_err(|e| self.table.invalid(e))?;
        let local = Message {
            id: new_local_id(),
            ..record.clone()
        };
        self.table.create(record, local).await
    }

    /// All-or-nothing: one invalid input rejects the batch with every reason,
    /// each prefixed by the input's index.
    pub async fn create_many(&self, inputs: Vec<NewMessage>) -> Result<Sourced<Vec<Message>>, RepoError> {
        let now = now_millis();
        let records = check_batch(&inputs, |input| Message::create(input, new_id(), now))
            .map_err(|reasons| self.table.invalid_batch(reasons))?;
        let locals = records
            .iter()
            .map(|r| Message {
                id: new_local_id(),
                ..r.clone()
            })
            .collect();
        self.table.create_many(records, locals).await
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Sourced<Option<Message>>, RepoError> {
        self.table.find_by_id(id).await
    }

    pub async fn find_all(&self, options: &QueryOptions) -> Result<Sourced<Page<Message>>, RepoError> {
        self.table.find_page("find_all", options, Filter::all()).await
    }

    pub async fn update(&self, id: &str, patch: &MessagePatch) -> Result<Sourced<Message>, RepoError> {
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

    pub async fn find_by_date_range(&self, range: DateRange) -> Result<Sourced<Vec<Message>>, RepoError> {
        self.table
            .find_where("find_by_date_range", Filter::created_within(range), None)
            .await
    }

    /// Messages of one color. Accepts any color spelling `create` accepts.
    pub async fn find_by_color(&self, color: &str) -> Result<Sourced<Vec<Message>>, RepoError> {
        let color = normalize_color(color)
            .map_err(|reason| self.table.invalid(ValidationErrors::single("color", reason)))?;
        let wanted = color.clone();
        let filter = Filter::new("color = ?", vec![SqlValue::text(color)], move |m: &Message| {
            m.color == wanted
        });
        self.table.find_where("find_by_color", filter, None).await
    }

    /// Case-insensitive substring search over content.
    pub async fn search(&self, term: &str) -> Result<Sourced<Vec<Message>>, RepoError> {
        let term = search_term(term).map_err(|e| self.table.invalid(e))?;
        let filter = Filter::contains("content", term, |m: &Message| m.content.as_str());
        self.table.find_where("search", filter, None).await
    }

    /// Up to `n` (1..=100) distinct messages in random order.
    pub async fn random(&self, n: u32) -> Result<Sourced<Vec<Message>>, RepoError> {
        self.table.random(n).await
    }

    /// The `n` (1..=100) newest messages.
    pub async fn latest(&self, n: u32) -> Result<Sourced<Vec<Message>>, RepoError> {
        let n = check_count("n", n).map_err(|e| self.table.invalid(e))?;
        self.table.find_where("latest", Filter::all(), Some(n)).await
    }
}
