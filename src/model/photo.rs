// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Gallery photos. `is_custom` marks visitor uploads as opposed to the
//! site's built-in set.

use serde::{Deserialize, Serialize};

use super::validation::{char_len, check_image_url, ValidationErrors};
use super::{Entity, EntityKind, Patchable};
use crate::storage::traits::{Row, SqlValue, StoreError};

pub const MAX_CAPTION_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default, alias = "isCustom")]
    pub is_custom: bool,
    #[serde(alias = "createdAt")]
    pub created_at: i64,
    #[serde(alias = "updatedAt")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewPhoto {
    pub url: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default)]
    pub created_at: Option<i64>,
}

impl NewPhoto {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = Some(caption.into());
        self
    }

    pub fn custom(mut self, is_custom: bool) -> Self {
        self.is_custom = is_custom;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhotoPatch {
    pub url: Option<String>,
    pub caption: Option<String>,
    pub is_custom: Option<bool>,
}

fn check_fields(errs: &mut ValidationErrors, url: Option<&str>, caption: Option<&str>) {
    if let Some(url) = url {
        if let Err(reason) = check_image_url(url) {
            errs.add("url", reason);
        }
    }
    if let Some(caption) = caption {
        let len = char_len(caption.trim());
        errs.check(
            len <= MAX_CAPTION_CHARS,
            "caption",
            format!("must be at most {} characters (got {})", MAX_CAPTION_CHARS, len),
        );
    }
}

impl Photo {
    pub fn create(input: &NewPhoto, id: String, now: i64) -> Result<Self, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_fields(&mut errs, Some(&input.url), input.caption.as_deref());
        let created_at = input.created_at.unwrap_or(now);
        errs.into_result(Photo {
            id,
            url: input.url.trim().to_string(),
            caption: input.caption.as_deref().unwrap_or("").trim().to_string(),
            is_custom: input.is_custom,
            created_at,
            updated_at: now.max(created_at),
        })
    }
}

impl Entity for Photo {
    const KIND: EntityKind = EntityKind::Photo;
    const COLUMNS: &'static [&'static str] =
        &["id", "url", "caption", "is_custom", "created_at", "updated_at"];
    const ORDER_FIELDS: &'static [&'static str] = &["created_at", "updated_at", "is_custom"];

    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> i64 {
        self.created_at
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.get_str("id")?,
            url: row.get_str("url")?,
            caption: row.get_opt_str("caption")?.unwrap_or_default(),
            is_custom: row.get_bool("is_custom")?,
            created_at: row.get_i64("created_at")?,
            updated_at: row.get_i64("updated_at")?,
        })
    }

    fn to_params(&self) -> Vec<SqlValue> {
        vec![
            SqlValue::text(&self.id),
            SqlValue::text(&self.url),
            SqlValue::text(&self.caption),
            SqlValue::bool(self.is_custom),
            SqlValue::Int(self.created_at),
            SqlValue::Int(self.updated_at),
        ]
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_fields(&mut errs, Some(&self.url), Some(&self.caption));
        errs.into_result(())
    }
}

impl Patchable for Photo {
    type Patch = PhotoPatch;

    fn check_patch(patch: &PhotoPatch) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_fields(&mut errs, patch.url.as_deref(), patch.caption.as_deref());
        errs.into_result(())
    }

    fn apply(&mut self, patch: &PhotoPatch, now: i64) -> Result<(), ValidationErrors> {
        Self::check_patch(patch)?;

        if let Some(ref url) = patch.url {
            self.url = url.trim().to_string();
        }
        if let Some(ref caption) = patch.caption {
            self.caption = caption.trim().to_string();
        }
        if let Some(is_custom) = patch.is_custom {
            self.is_custom = is_custom;
        }
        self.updated_at = now;
        Ok(())
    }

    fn patch_columns(patch: &PhotoPatch) -> Vec<(&'static str, SqlValue)> {
        let mut cols = Vec::new();
        if let Some(ref url) = patch.url {
            cols.push(("url", SqlValue::text(url.trim())));
        }
        if let Some(ref caption) = patch.caption {
            cols.push(("caption", SqlValue::text(caption.trim())));
        }
        if let Some(is_custom) = patch.is_custom {
            cols.push(("is_custom", SqlValue::bool(is_custom)));
        }
        cols
    }
}
