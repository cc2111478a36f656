// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Guestbook messages.

use serde::{Deserialize, Serialize};

use super::validation::{check_text, normalize_color, ValidationErrors};
use super::{Entity, EntityKind, Patchable};
use crate::storage::traits::{Row, SqlValue, StoreError};

pub const MAX_CONTENT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    /// `#RRGGBB`, upper-case
    pub color: String,
    #[serde(alias = "createdAt")]
    pub created_at: i64,
    #[serde(alias = "updatedAt")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewMessage {
    pub content: String,
    pub color: String,
    /// Preserved timestamp (migration); `None` means now.
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl NewMessage {
    pub fn new(content: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            color: color.into(),
            created_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub color: Option<String>,
}

impl Message {
    /// Validate `input` and build the record.
    pub fn create(input: &NewMessage, id: String, now: i64) -> Result<Self, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_text(&mut errs, "content", &input.content, MAX_CONTENT_CHARS);
        let color = match normalize_color(&input.color) {
            Ok(c) => c,
            Err(reason) => {
                errs.add("color", reason);
                String::new()
            }
        };
        let created_at = input.created_at.unwrap_or(now);
        errs.into_result(Message {
            id,
            content: input.content.trim().to_string(),
            color,
            created_at,
            updated_at: now.max(created_at),
        })
    }
}

impl Entity for Message {
    const KIND: EntityKind = EntityKind::Message;
    const COLUMNS: &'static [&'static str] = &["id", "content", "color", "created_at", "updated_at"];
    const ORDER_FIELDS: &'static [&'static str] = &["created_at", "updated_at", "color"];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get_str("id")?,
            content: row.get_str("content")?,
            color: row.get_str("color")?,
            created_at: row.get_i64("created_at")?,
            updated_at: row.get_i64("updated_at")?,
        })
    }

    fn to_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(&self.id),
            SqlValue::text(&self.content),
            SqlValue::text(&self.color),
            SqlValue::Int(self.created_at),
            SqlValue::Int(self.updated_at),
        ]
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_text(&mut errs, "content", &self.content, MAX_CONTENT_CHARS);
        if let Err(reason) = normalize_color(&self.color) {
            errs.add("color", reason);
        }
        errs.into_result(())
    }
}

impl Patchable for Message {
    type Patch = MessagePatch;

    fn check_patch(patch: &MessagePatch) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        if let Some(ref content) = patch.content {
            check_text(&mut errs, "content", content, MAX_CONTENT_CHARS);
        }
        if let Some(Err(reason)) = patch.color.as_deref().map(normalize_color) {
            errs.add("color", reason);
        }
        errs.into_result(())
    }

    fn apply(&mut self, patch: &MessagePatch, now: i64) -> Result<(), ValidationErrors> {
        Self::check_patch(patch)?;
        if let Some(ref content) = patch.content {
            self.content = content.trim().to_string();
        }
        if let Some(color) = patch.color.as_deref().and_then(|c| normalize_color(c).ok()) {
            self.color = color;
        }
        self.updated_at = now;
        Ok(())
    }

    fn patch_columns(patch: &MessagePatch) -> Vec<(&'static str, SqlValue)> {
        let mut cols = Vec::new();
        if let Some(ref content) = patch.content {
            cols.push(("content", SqlValue::text(content.trim())));
        }
        if let Some(color) = patch.color.as_deref().and_then(|c| normalize_color(c).ok()) {
            cols.push(("color", SqlValue::text(color)));
        }
        cols
    }
}
