// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL backend for the remote store.
//!
//! Generic `query` / `execute` / `transaction` over a sqlx `AnyPool`, so the
//! same code path serves MySQL in production and SQLite files in development
//! and tests. Every call is bounded by the configured timeout; a timeout is
//! reported as [`StoreError::Timeout`].
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver does not expose column types uniformly: MySQL TEXT columns
//! arrive as BLOB, SQLite booleans as INTEGER. Rows are therefore decoded by
//! probing integer → real → text → bytes, and booleans are stored as 0/1.

use async_trait::async_trait;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Column, Row as _};
use std::future::Future;
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info};

use super::traits::{Dialect, RemoteStore, Row, SqlValue, Statement, StoreError};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

pub(crate) fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqlRemoteStore {
    pool: AnyPool,
    dialect: Dialect,
    timeout: Duration,
}

impl SqlRemoteStore {
    /// Create a store without opening a connection. The first query connects,
    /// so an unreachable database at startup does not block the process: the
    /// repositories degrade to the fallback store instead.
    pub fn connect_lazy(connection_string: &str, timeout: Duration) -> Result<Self, StoreError> {
        install_drivers();

        let dialect = Dialect::from_url(connection_string);
        let pool = AnyPoolOptions::new()
            .max_connections(if dialect == Dialect::Sqlite { 4 } else { 20 })
            .acquire_timeout(timeout)
            .idle_timeout(Duration::from_secs(300))
            .connect_lazy(connection_string)
            .map_err(map_sqlx_error)?;

        info!(dialect = ?dialect, timeout_ms = timeout.as_millis() as u64, "Remote store configured");
        Ok(Self { pool, dialect, timeout })
    }

    /// Create a store and verify connectivity immediately.
    pub async fn connect(connection_string: &str, timeout: Duration) -> Result<Self, StoreError> {
        let store = Self::connect_lazy(connection_string, timeout)?;
        if store.dialect == Dialect::Sqlite {
            store.execute("PRAGMA journal_mode = WAL", &[]).await?;
        }
        store.ping().await?;
        Ok(store)
    }

    /// Get a clone of the connection pool.
    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(map_sqlx_error),
            Err(_) => {
                crate::metrics::record_timeout("remote");
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Any, AnyArguments<'q>>,
    params: &[SqlValue],
) -> Query<'q, Any, AnyArguments<'q>> {
    for param in params {
        query = match param {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(v) => query.bind(*v),
            SqlValue::Real(v) => query.bind(*v),
            SqlValue::Text(v) => query.bind(v.clone()),
        };
    }
    query
}

fn decode_row(row: &AnyRow) -> Row {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
            v.map_or(SqlValue::Null, SqlValue::Int)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
            v.map_or(SqlValue::Null, SqlValue::Real)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            v.map_or(SqlValue::Null, SqlValue::Text)
        } else if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
            v.map_or(SqlValue::Null, |bytes| {
                SqlValue::Text(String::from_utf8_lossy(&bytes).into_owned())
            })
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
            v.map_or(SqlValue::Null, SqlValue::bool)
        } else {
            SqlValue::Null
        };
        out.insert(column.name(), value);
    }
    out
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::PoolTimedOut => StoreError::Connection("pool timed out".to_string()),
        sqlx::Error::PoolClosed => StoreError::Connection("pool closed".to_string()),
        sqlx::Error::Io(e) => StoreError::Connection(e.to_string()),
        sqlx::Error::Tls(e) => StoreError::Connection(e.to_string()),
        sqlx::Error::Database(db) => {
            if db.is_unique_violation() {
                StoreError::Constraint(db.message().to_string())
            } else {
                StoreError::Backend(db.message().to_string())
            }
        }
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl RemoteStore for SqlRemoteStore {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, statement: &str, params: &[SqlValue]) -> Result<Vec<Row>, StoreError> {
        let query = bind_all(sqlx::query(statement), params);
        let rows = self.bounded(query.fetch_all(&self.pool)).await?;
        debug!(rows = rows.len(), "Remote query complete");
        Ok(rows.iter().map(decode_row).collect())
    }

    async fn execute(&self, statement: &str, params: &[SqlValue]) -> Result<u64, StoreError> {
        let query = bind_all(sqlx::query(statement), params);
        let result = self.bounded(query.execute(&self.pool)).await?;
        Ok(result.rows_affected())
    }

    async fn transaction(&self, statements: &[Statement]) -> Result<Vec<u64>, StoreError> {
        let work = async {
            let mut tx = self.pool.begin().await?;
            let mut affected = Vec::with_capacity(statements.len());
            for stmt in statements {
                let result = bind_all(sqlx::query(&stmt.sql), &stmt.params)
                    .execute(&mut *tx)
                    .await?;
                affected.push(result.rows_affected());
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(affected)
        };
        self.bounded(work).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.bounded(sqlx::query("SELECT 1").execute(&self.pool))
            .await
            .map(|_| ())
    }
}
