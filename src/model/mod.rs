// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entities, their inputs, and validation.
//!
//! Every entity is stored both as a row in the remote store and as a JSON
//! object in a fallback collection; [`Entity`] describes both shapes.

pub mod message;
pub mod photo;
pub mod query;
pub mod quote;
pub mod validation;
pub mod visit;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::storage::traits::{Row, SqlValue, StoreError};
use validation::ValidationErrors;

pub use message::{Message, MessagePatch, NewMessage};
pub use photo::{NewPhoto, Photo, PhotoPatch};
pub use query::{DateRange, OrderDirection, Page, QueryOptions};
pub use quote::{NewQuote, Quote};
pub use visit::{NewVisit, VisitRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Message,
    Photo,
    Quote,
    Visit,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Message,
        EntityKind::Photo,
        EntityKind::Quote,
        EntityKind::Visit,
    ];

    /// Remote table name, also the fallback collection key.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Message => "messages",
            EntityKind::Photo => "photos",
            EntityKind::Quote => "quotes",
            EntityKind::Visit => "visits",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Message => "message",
            EntityKind::Photo => "photo",
            EntityKind::Quote => "quote",
            EntityKind::Visit => "visit",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted record.
pub trait Entity: Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static {
    const KIND: EntityKind;
    /// Primary key column.
    const ID_COLUMN: &'static str = "id";
    /// Columns in insert order; `to_params` follows the same order.
    const COLUMNS: &'static [&'static str];
    /// Columns `find_all` may order by.
    const ORDER_FIELDS: &'static [&'static str];

    fn id(&self) -> &str;
    fn created_at(&self) -> i64;

    fn from_row(row: &Row) -> Result<Self, StoreError>;
    fn to_params(&self) -> Vec<SqlValue>;

    /// Re-check a stored record (fallback data, migration input).
    fn validate(&self) -> Result<(), ValidationErrors>;
}

/// Entities that support partial updates.
pub trait Patchable: Entity {
    type Patch: Clone + std::fmt::Debug + Send + Sync;

    /// Validate a patch on its own, before any record is loaded.
    fn check_patch(patch: &Self::Patch) -> Result<(), ValidationErrors>;

    /// Apply `patch` in place, validating the result. `updated_at` is set to
    /// `now` on success; the record is left untouched on failure.
    fn apply(&mut self, patch: &Self::Patch, now: i64) -> Result<(), ValidationErrors>;

    /// Column/value pairs a patch changes, for an `UPDATE ... SET`.
    fn patch_columns(patch: &Self::Patch) -> Vec<(&'static str, SqlValue)>;
}

/// Remote id for a new record.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Id for a record minted by the fallback store.
pub fn new_local_id() -> String {
    format!("local-{}", uuid::Uuid::new_v4())
}

pub fn is_local_id(id: &str) -> bool {
    id.starts_with("local-")
}
