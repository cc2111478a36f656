// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `CREATE TABLE IF NOT EXISTS` bootstrap for development and tests.
//!
//! Production schemas are managed by an external migration tool; these
//! statements only mirror the columns the repositories read and write.

use tracing::info;

use crate::storage::traits::{Dialect, RemoteStore, StoreError};

fn sqlite_statements() -> Vec<&'static str> {
    vec![
        "CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            color TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages (created_at)",
        "CREATE TABLE IF NOT EXISTS photos (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            caption TEXT NOT NULL DEFAULT '',
            is_custom INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_photos_created_at ON photos (created_at)",
        "CREATE TABLE IF NOT EXISTS quotes (
            id TEXT PRIMARY KEY,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_quotes_created_at ON quotes (created_at)",
        "CREATE TABLE IF NOT EXISTS visits (
            session_id TEXT PRIMARY KEY,
            user_agent TEXT,
            ip_hash TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_visits_created_at ON visits (created_at)",
        "CREATE TABLE IF NOT EXISTS advisory_locks (
            name TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )",
    ]
}

fn mysql_statements() -> Vec<&'static str> {
    vec![
        "CREATE TABLE IF NOT EXISTS messages (
            id VARCHAR(64) PRIMARY KEY,
            content VARCHAR(1024) NOT NULL,
            color CHAR(7) NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            INDEX idx_messages_created_at (created_at)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        "CREATE TABLE IF NOT EXISTS photos (
            id VARCHAR(64) PRIMARY KEY,
            url MEDIUMTEXT NOT NULL,
            caption VARCHAR(255) NOT NULL DEFAULT '',
            is_custom TINYINT NOT NULL DEFAULT 0,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            INDEX idx_photos_created_at (created_at)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        "CREATE TABLE IF NOT EXISTS quotes (
            id VARCHAR(64) PRIMARY KEY,
            text VARCHAR(1024) NOT NULL,
            created_at BIGINT NOT NULL,
            updated_at BIGINT NOT NULL,
            INDEX idx_quotes_created_at (created_at)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        "CREATE TABLE IF NOT EXISTS visits (
            session_id CHAR(64) PRIMARY KEY,
            user_agent VARCHAR(2048),
            ip_hash CHAR(64) NOT NULL,
            created_at BIGINT NOT NULL,
            INDEX idx_visits_created_at (created_at)
        ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        "CREATE TABLE IF NOT EXISTS advisory_locks (
            name VARCHAR(255) PRIMARY KEY,
            owner VARCHAR(255) NOT NULL,
            expires_at BIGINT NOT NULL
        ) ENGINE=InnoDB",
    ]
}

/// Create the entity and lock tables if they are missing.
pub async fn bootstrap_schema(remote: &dyn RemoteStore) -> Result<(), StoreError> {
    let dialect = remote.dialect();
    let statements = match dialect {
        Dialect::Sqlite => sqlite_statements(),
        Dialect::MySql => mysql_statements(),
    };
    for statement in &statements {
        remote.execute(statement, &[]).await?;
    }
    info!(dialect = ?dialect, statements = statements.len(), "Schema bootstrapped");
    Ok(())
}
