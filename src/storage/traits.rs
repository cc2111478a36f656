// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Item not found")]
    NotFound,
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Permission denied: {0}")]
    Permission(String),
    #[error("Rate limited: {0}")]
    RateLimited(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// A bound parameter or a decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        SqlValue::Text(value.into())
    }

    pub fn opt_text(value: Option<&str>) -> Self {
        match value {
            Some(v) => SqlValue::Text(v.to_string()),
            None => SqlValue::Null,
        }
    }

    pub fn bool(value: bool) -> Self {
        SqlValue::Int(i64::from(value))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// A result row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: HashMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: SqlValue) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: SqlValue) {
        self.columns.insert(column.to_string(), value);
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(column)
    }

    pub fn get_str(&self, column: &str) -> Result<String, StoreError> {
        match self.columns.get(column) {
            Some(SqlValue::Text(s)) => Ok(s.clone()),
            Some(SqlValue::Int(i)) => Ok(i.to_string()),
            Some(other) => Err(StoreError::Serialization(format!(
                "column '{}' is not text: {:?}",
                column, other
            ))),
            None => Err(StoreError::Serialization(format!("missing column '{}'", column))),
        }
    }

    pub fn get_opt_str(&self, column: &str) -> Result<Option<String>, StoreError> {
        match self.columns.get(column) {
            None | Some(SqlValue::Null) => Ok(None),
            Some(_) => self.get_str(column).map(Some),
        }
    }

    pub fn get_i64(&self, column: &str) -> Result<i64, StoreError> {
        match self.columns.get(column) {
            Some(SqlValue::Int(i)) => Ok(*i),
            Some(SqlValue::Real(f)) => Ok(*f as i64),
            // MySQL DECIMAL aggregates (SUM, COUNT over views) can arrive as text
            Some(SqlValue::Text(s)) => s.trim().parse::<i64>().map_err(|e| {
                StoreError::Serialization(format!("column '{}' is not an integer: {}", column, e))
            }),
            Some(SqlValue::Null) => Err(StoreError::Serialization(format!(
                "column '{}' is NULL",
                column
            ))),
            None => Err(StoreError::Serialization(format!("missing column '{}'", column))),
        }
    }

    pub fn get_bool(&self, column: &str) -> Result<bool, StoreError> {
        self.get_i64(column).map(|v| v != 0)
    }
}

/// SQL flavour of the remote store. Only used to pick between the few
/// statements that differ (insert-if-absent, random ordering, DDL types).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
}

impl Dialect {
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            Dialect::MySql
        } else {
            Dialect::Sqlite
        }
    }

    /// `INSERT` that silently skips rows whose primary key already exists.
    pub fn insert_ignore(self, table: &str, columns: &[&str]) -> String {
        let placeholders = vec!["?"; columns.len()].join(", ");
        match self {
            Dialect::Sqlite => format!(
                "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT DO NOTHING",
                table,
                columns.join(", "),
                placeholders
            ),
            Dialect::MySql => format!(
                "INSERT IGNORE INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                placeholders
            ),
        }
    }

    pub fn random_fn(self) -> &'static str {
        match self {
            Dialect::Sqlite => "RANDOM()",
            Dialect::MySql => "RAND()",
        }
    }
}

/// One statement of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// The primary relational store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    fn dialect(&self) -> Dialect;

    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError>;

    /// Returns the number of rows affected.
    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64, StoreError>;

    /// Run all statements atomically. Returns rows affected per statement.
    async fn transaction(&self, statements: &[Statement]) -> Result<Vec<u64>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Local persistent medium (fallback store, cache mirror, migration status).
/// Values are JSON strings.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError> {
        self.get("__ping__").await.map(|_| ())
    }
}
