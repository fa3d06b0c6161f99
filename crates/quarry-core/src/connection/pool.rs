//! Connection pooling.
//!
//! A semaphore bounds the number of checked-out connections; idle
//! connections are kept in a stack and reused before new ones are opened.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::{ClosedConnection, Connection, ConnectionManager, DbError, DbErrorKind};
use crate::sql::DialectKind;

/// Configuration for the connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once.
    pub max_connections: usize,
    /// Default timeout for acquiring a connection.
    pub acquire_timeout: Duration,
}

impl PoolConfig {
    /// Create a new pool configuration.
    pub fn new() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    /// Set the maximum connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct PoolInner {
    config: PoolConfig,
    manager: Box<dyn ConnectionManager>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    semaphore: Arc<Semaphore>,
    closed: AtomicBool,
}

impl PoolInner {
    fn release(&self, conn: Box<dyn Connection>) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if !conn.is_healthy() || conn.in_transaction() {
            // A connection dropped mid-transaction holds state nobody owns.
            tracing::debug!(healthy = conn.is_healthy(), "discarding pooled connection");
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.config.max_connections {
            idle.push(conn);
        }
    }
}

/// A connection checked out of the pool.
///
/// Returns itself to the pool when dropped.
pub struct PooledConnection {
    conn: Box<dyn Connection>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let kind = self.conn.kind();
        let conn = std::mem::replace(&mut self.conn, Box::new(ClosedConnection(kind)));
        self.pool.release(conn);
    }
}

/// A bounded pool of connections produced by a [`ConnectionManager`].
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool. Connections are opened lazily.
    pub fn new(manager: impl ConnectionManager, config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_connections));
        Self {
            inner: Arc::new(PoolInner {
                config,
                manager: Box::new(manager),
                idle: Mutex::new(Vec::new()),
                semaphore,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Dialect of the pooled connections.
    pub fn kind(&self) -> DialectKind {
        self.inner.manager.kind()
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquire a connection within the configured acquire timeout.
    pub async fn acquire(&self) -> Result<PooledConnection, DbError> {
        self.acquire_within(self.inner.config.acquire_timeout).await
    }

    /// Acquire a connection, waiting at most `timeout` for a free slot.
    pub async fn acquire_within(&self, timeout: Duration) -> Result<PooledConnection, DbError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(DbError::new(DbErrorKind::Closed, "pool is closed"));
        }

        let permit = tokio::time::timeout(timeout, self.inner.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                DbError::new(
                    DbErrorKind::PoolTimeout,
                    format!("no connection available within {timeout:?}"),
                )
            })?
            .map_err(|_| DbError::new(DbErrorKind::Closed, "pool is closed"))?;

        let reused = {
            let mut idle = self.inner.idle.lock();
            let mut found = None;
            while let Some(conn) = idle.pop() {
                if conn.is_healthy() {
                    found = Some(conn);
                    break;
                }
            }
            found
        };

        let conn = match reused {
            Some(conn) => conn,
            None => {
                tracing::debug!(kind = %self.kind(), "opening new connection");
                self.inner.manager.connect().await?
            }
        };

        Ok(PooledConnection {
            conn,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Close the pool. Checked-out connections are dropped when released.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.semaphore.close();
        self.inner.idle.lock().clear();
    }

    /// Whether the pool has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Number of idle connections.
    pub fn idle_connections(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Number of connections that can still be checked out.
    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("kind", &self.kind())
            .field("max_connections", &self.inner.config.max_connections)
            .field("idle", &self.idle_connections())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::RowSet;
    use crate::sql::RenderedStatement;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct NullConnection {
        in_tx: bool,
    }

    #[async_trait]
    impl Connection for NullConnection {
        fn kind(&self) -> DialectKind {
            DialectKind::Sqlite
        }

        async fn execute(&mut self, statement: &RenderedStatement) -> Result<RowSet, DbError> {
            if statement.sql.starts_with("BEGIN") {
                self.in_tx = true;
            }
            Ok(RowSet::default())
        }

        fn in_transaction(&self) -> bool {
            self.in_tx
        }
    }

    struct CountingManager(Arc<AtomicUsize>);

    #[async_trait]
    impl ConnectionManager for CountingManager {
        fn kind(&self) -> DialectKind {
            DialectKind::Sqlite
        }

        async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NullConnection { in_tx: false }))
        }
    }

    fn pool(max: usize) -> (ConnectionPool, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let pool = ConnectionPool::new(
            CountingManager(opened.clone()),
            PoolConfig::new()
                .with_max_connections(max)
                .with_acquire_timeout(Duration::from_millis(50)),
        );
        (pool, opened)
    }

    #[test]
    fn test_pool_config_builder() {
        let config = PoolConfig::new()
            .with_max_connections(0)
            .with_acquire_timeout(Duration::from_secs(1));
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let (pool, opened) = pool(2);
        drop(pool.acquire().await.unwrap());
        drop(pool.acquire().await.unwrap());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
        assert_eq!(pool.idle_connections(), 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let (pool, _) = pool(1);
        let held = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();
        assert_eq!(err.kind, DbErrorKind::PoolTimeout);
        drop(held);
        assert!(pool.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_in_transaction_is_discarded() {
        let (pool, opened) = pool(1);
        let mut conn = pool.acquire().await.unwrap();
        conn.execute(&RenderedStatement::raw("BEGIN")).await.unwrap();
        drop(conn);
        assert_eq!(pool.idle_connections(), 0);
        drop(pool.acquire().await.unwrap());
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let (pool, _) = pool(1);
        pool.close();
        let err = pool.acquire().await.err().unwrap();
        assert_eq!(err.kind, DbErrorKind::Closed);
    }
}
