// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cross-process advisory locks.
//!
//! Used to keep two processes from running the migration pass at the same
//! time. Locks are leases: a holder that dies without releasing loses the
//! lock once the lease expires.
//!
//! - [`SqlAdvisoryLock`]: a row in `advisory_locks` on the remote store.
//! - [`RedisAdvisoryLock`]: `SET NX PX` with a compare-and-delete release.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::clock::now_millis;
use super::retry::{retry, RetryConfig};
use crate::storage::traits::{RemoteStore, SqlValue, StoreError};

/// Interval between acquisition attempts.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LockError {
    #[error("lock store error: {0}")]
    Store(#[from] StoreError),
    #[error("redis error: {0}")]
    Redis(String),
}

impl From<redis::RedisError> for LockError {
    fn from(err: redis::RedisError) -> Self {
        LockError::Redis(err.to_string())
    }
}

#[async_trait]
pub trait AdvisoryLock: Send + Sync {
    /// Try to take `name`, polling until `timeout`. Returns whether the lock
    /// is now held by this instance.
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool, LockError>;

    /// Release `name` if held by this instance. Releasing a lock held by
    /// someone else is a no-op.
    async fn release(&self, name: &str) -> Result<(), LockError>;
}

fn new_owner() -> String {
    uuid::Uuid::new_v4().to_string()
}

async fn poll_until<F, Fut>(timeout: Duration, mut attempt: F) -> Result<bool, LockError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool, LockError>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if attempt().await? {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        sleep(POLL_INTERVAL).await;
    }
}

/// Lease row in the remote store.
pub struct SqlAdvisoryLock {
    remote: Arc<dyn RemoteStore>,
    owner: String,
    lease: Duration,
}

impl SqlAdvisoryLock {
    pub fn new(remote: Arc<dyn RemoteStore>, lease: Duration) -> Self {
        Self {
            remote,
            owner: new_owner(),
            lease,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    async fn try_acquire(&self, name: &str) -> Result<bool, LockError> {
        let now = now_millis();

        // Expired leases are up for grabs
        self.remote
            .execute(
                "DELETE FROM advisory_locks WHERE name = ? AND expires_at <= ?",
                &[SqlValue::text(name), SqlValue::Int(now)],
            )
            .await?;

        let expires_at = now + self.lease.as_millis() as i64;
        let insert = self
            .remote
            .dialect()
            .insert_ignore("advisory_locks", &["name", "owner", "expires_at"]);
        let inserted = self
            .remote
            .execute(
                &insert,
                &[SqlValue::text(name), SqlValue::text(&self.owner), SqlValue::Int(expires_at)],
            )
            .await?;
        if inserted == 1 {
            return Ok(true);
        }

        // Re-acquiring our own lock extends the lease
        let refreshed = self
            .remote
            .execute(
                "UPDATE advisory_locks SET expires_at = ? WHERE name = ? AND owner = ?",
                &[SqlValue::Int(expires_at), SqlValue::text(name), SqlValue::text(&self.owner)],
            )
            .await?;
        Ok(refreshed == 1)
    }
}

#[async_trait]
impl AdvisoryLock for SqlAdvisoryLock {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool, LockError> {
        let acquired = match poll_until(timeout, || self.try_acquire(name)).await {
            Ok(acquired) => acquired,
            Err(e) => {
                crate::metrics::record_lock("sql", "error");
                return Err(e);
            }
        };
        crate::metrics::record_lock("sql", if acquired { "acquired" } else { "busy" });
        debug!(name, owner = %self.owner, acquired, "SQL advisory lock");
        Ok(acquired)
    }

    async fn release(&self, name: &str) -> Result<(), LockError> {
        self.remote
            .execute(
                "DELETE FROM advisory_locks WHERE name = ? AND owner = ?",
                &[SqlValue::text(name), SqlValue::text(&self.owner)],
            )
            .await?;
        Ok(())
    }
}

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lease key in Redis.
pub struct RedisAdvisoryLock {
    connection: ConnectionManager,
    owner: String,
    lease: Duration,
    prefix: String,
}

impl RedisAdvisoryLock {
    pub async fn connect(connection_string: &str, lease: Duration) -> Result<Self, LockError> {
        let client = Client::open(connection_string)?;

        let connection = retry("redis_lock_connect", &RetryConfig::startup(), || async {
            ConnectionManager::new(client.clone()).await
        })
        .await?;

        info!("Redis advisory lock connected");
        Ok(Self::with_connection(connection, lease))
    }

    pub fn with_connection(connection: ConnectionManager, lease: Duration) -> Self {
        Self {
            connection,
            owner: new_owner(),
            lease,
            prefix: "lock:".to_string(),
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    async fn try_acquire(&self, name: &str) -> Result<bool, LockError> {
        let mut conn = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(name))
            .arg(&self.owner)
            .arg("NX")
            .arg("PX")
            .arg(self.lease.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl AdvisoryLock for RedisAdvisoryLock {
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool, LockError> {
        let acquired = match poll_until(timeout, || self.try_acquire(name)).await {
            Ok(acquired) => acquired,
            Err(e) => {
                crate::metrics::record_lock("redis", "error");
                return Err(e);
            }
        };
        crate::metrics::record_lock("redis", if acquired { "acquired" } else { "busy" });
        debug!(name, owner = %self.owner, acquired, "Redis advisory lock");
        Ok(acquired)
    }

    async fn release(&self, name: &str) -> Result<(), LockError> {
        let mut conn = self.connection.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(self.key(name))
            .arg(&self.owner)
            .invoke_async(&mut conn)
            .await?;
        debug!(name, deleted, "Redis advisory lock released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::schema::bootstrap_schema;
    use crate::storage::sql::SqlRemoteStore;
    use tempfile::tempdir;

    async fn remote(dir: &tempfile::TempDir) -> Arc<dyn RemoteStore> {
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("locks.db").display());
        let store: Arc<dyn RemoteStore> =
            Arc::new(SqlRemoteStore::connect(&url, Duration::from_secs(5)).await.unwrap());
        bootstrap_schema(store.as_ref()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_sql_lock_excludes_second_owner() {
        let dir = tempdir().unwrap();
        let store = remote(&dir).await;
        let a = SqlAdvisoryLock::new(store.clone(), Duration::from_secs(30));
        let b = SqlAdvisoryLock::new(store, Duration::from_secs(30));

        assert!(a.acquire("migration", Duration::ZERO).await.unwrap());
        assert!(!b.acquire("migration", Duration::from_millis(120)).await.unwrap());

        // Re-entrant for the holder
        assert!(a.acquire("migration", Duration::ZERO).await.unwrap());

        // b releasing is a no-op
        b.release("migration").await.unwrap();
        assert!(!b.acquire("migration", Duration::ZERO).await.unwrap());

        a.release("migration").await.unwrap();
        assert!(b.acquire("migration", Duration::ZERO).await.unwrap());
    }

    #[tokio::test]
    async fn test_sql_lock_expired_lease_is_taken_over() {
        let dir = tempdir().unwrap();
        let store = remote(&dir).await;
        let a = SqlAdvisoryLock::new(store.clone(), Duration::from_millis(1));
        let b = SqlAdvisoryLock::new(store, Duration::from_secs(30));

        assert!(a.acquire("migration", Duration::ZERO).await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(b.acquire("migration", Duration::from_millis(200)).await.unwrap());
    }
}
