// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Quotes. Immutable once created.

use serde::{Deserialize, Serialize};

use super::validation::{check_text, ValidationErrors};
use super::{Entity, EntityKind};
use crate::storage::traits::{Row, SqlValue, StoreError};

pub const MAX_TEXT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: String,
    pub text: String,
    #[serde(alias = "createdAt")]
    pub created_at: i64,
    #[serde(alias = "updatedAt")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewQuote {
    pub text: String,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl NewQuote {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            created_at: None,
        }
    }
}

impl Quote {
    pub fn create(input: &NewQuote, id: String, now: i64) -> Result<Self, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_text(&mut errs, "text", &input.text, MAX_TEXT_CHARS);
        let created_at = input.created_at.unwrap_or(now);
        errs.into_result(Quote {
            id,
            text: input.text.trim().to_string(),
            created_at,
            updated_at: now.max(created_at),
        })
    }
}

impl Entity for Quote {
    const KIND: EntityKind = EntityKind::Quote;
    const COLUMNS: &'static [&'static str] = &["id", "text", "created_at", "updated_at"];
    const ORDER_FIELDS: &'static [&'static str] = &["created_at", "updated_at"];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get_str("id")?,
            text: row.get_str("text")?,
            created_at: row.get_i64("created_at")?,
            updated_at: row.get_i64("updated_at")?,
        })
    }

    fn to_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(&self.id),
            SqlValue::text(&self.text),
            SqlValue::Int(self.created_at),
            SqlValue::Int(self.updated_at),
        ]
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_text(&mut errs, "text", &self.text, MAX_TEXT_CHARS);
        errs.into_result(())
    }
}
