// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pagination and ordering.

use serde::{Deserialize, Serialize};

use super::validation::ValidationErrors;

pub const DEFAULT_LIMIT: u32 = 10;
pub const MAX_LIMIT: u32 = 100;
pub const DEFAULT_ORDER_FIELD: &str = "created_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

impl OrderDirection {
    pub fn as_sql(self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Caller-facing pagination request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// 1-based
    pub page: u32,
    pub limit: u32,
    pub order_by: Option<String>,
    pub direction: OrderDirection,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_LIMIT,
            order_by: None,
            direction: OrderDirection::Desc,
        }
    }
}

impl QueryOptions {
    pub fn page(page: u32, limit: u32) -> Self {
        Self {
            page,
            limit,
            ..Default::default()
        }
    }

    pub fn order_by(mut self, field: &str, direction: OrderDirection) -> Self {
        self.order_by = Some(field.to_string());
        self.direction = direction;
        self
    }

    /// Check bounds and the order field against `allowed`.
    pub fn resolve(&self, allowed: &[&'static str]) -> Result<ResolvedQuery, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        errs.check(self.page >= 1, "page", "must be at least 1");
        errs.check(
            (1..=MAX_LIMIT).contains(&self.limit),
            "limit",
            format!("must be between 1 and {}", MAX_LIMIT),
        );

        let requested = self.order_by.as_deref().unwrap_or(DEFAULT_ORDER_FIELD);
        let order_by = allowed.iter().copied().find(|f| *f == requested);
        if order_by.is_none() {
            errs.add("order_by", format!("cannot order by '{}'", requested));
        }

        errs.into_result(ResolvedQuery {
            page: self.page,
            limit: self.limit,
            offset: u64::from(self.page.saturating_sub(1)) * u64::from(self.limit),
            order_by: order_by.unwrap_or(DEFAULT_ORDER_FIELD),
            direction: self.direction,
        })
    }
}

/// Validated pagination. `order_by` is always an allow-listed column name,
/// so it is safe to interpolate into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedQuery {
    pub page: u32,
    pub limit: u32,
    pub offset: u64,
    pub order_by: &'static str,
    pub direction: OrderDirection,
}

impl ResolvedQuery {
    /// `id_column` breaks ties so equal keys keep a stable order across pages.
    pub fn order_clause(&self, id_column: &str) -> String {
        let dir = self.direction.as_sql();
        if self.order_by == id_column {
            return format!("ORDER BY {} {}", self.order_by, dir);
        }
        format!("ORDER BY {} {}, {} {}", self.order_by, dir, id_column, dir)
    }
}

/// One page of results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, query: &ResolvedQuery) -> Self {
        Self {
            items,
            total,
            page: query.page,
            limit: query.limit,
            has_next: query.offset + u64::from(query.limit) < total,
            has_prev: query.page > 1,
        }
    }

    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit))
    }
}

/// Inclusive start, exclusive end (epoch millis).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: i64,
    pub end: i64,
}

impl DateRange {
    pub fn new(start: i64, end: i64) -> Result<Self, ValidationErrors> {
        let mut errs = ValidationErrors::new();
        errs.check(start <= end, "date_range", "start must not be after end");
        errs.into_result(Self { start, end })
    }

    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }
}
