//! Connection collaborator and pooling.
//!
//! The engine never talks to a driver directly. It renders statements and
//! hands them to a [`Connection`], which returns raw rows. Drivers are
//! created on demand by a [`ConnectionManager`] and recycled by the
//! [`ConnectionPool`].

pub mod codec;
pub mod pool;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use quarry_proto::{IsolationLevel, Value};
use thiserror::Error;

use crate::sql::{DialectKind, RenderedStatement};

pub use pool::{ConnectionPool, PoolConfig, PooledConnection};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConfig, SqliteConnection, SqliteManager};

/// Rows returned by one statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    /// Output column names.
    pub columns: Vec<String>,
    /// Row values in column order, as stored.
    pub rows: Vec<Vec<Value>>,
    /// Rows changed by a write, or rows returned by a query.
    pub affected: u64,
    /// Row id of the last insert, when the store reports one.
    pub last_insert_id: Option<i64>,
}

impl RowSet {
    /// An empty result for a statement that changed `affected` rows.
    pub fn affected(affected: u64) -> Self {
        Self {
            affected,
            ..Self::default()
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Classification of driver failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbErrorKind {
    /// A unique index rejected the write; `columns` are store column names.
    UniqueViolation {
        /// Columns of the violated index.
        columns: Vec<String>,
    },
    /// A foreign key enforced by the store rejected the write.
    ForeignKeyViolation,
    /// A NOT NULL column received NULL.
    NotNullViolation,
    /// The store is locked by another writer.
    Busy,
    /// The connection could not be established or was lost.
    Connection,
    /// The connection or pool was closed.
    Closed,
    /// No connection became available in time.
    PoolTimeout,
    /// Anything else.
    Other,
}

/// A failure reported by the connection collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct DbError {
    /// Failure class.
    pub kind: DbErrorKind,
    /// Driver message.
    pub message: String,
}

impl DbError {
    /// Create a new error.
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Catch-all error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Other, message)
    }

    /// Whether a fresh attempt on another connection may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, DbErrorKind::Busy | DbErrorKind::Connection)
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbErrorKind::UniqueViolation { columns } => {
                write!(f, "unique violation on ({})", columns.join(", "))
            }
            DbErrorKind::ForeignKeyViolation => f.write_str("foreign key violation"),
            DbErrorKind::NotNullViolation => f.write_str("not null violation"),
            DbErrorKind::Busy => f.write_str("database busy"),
            DbErrorKind::Connection => f.write_str("connection failure"),
            DbErrorKind::Closed => f.write_str("closed"),
            DbErrorKind::PoolTimeout => f.write_str("pool timeout"),
            DbErrorKind::Other => f.write_str("database error"),
        }
    }
}

/// A single database connection.
///
/// Implementations execute one rendered statement at a time and report
/// values in their stored form; decoding to catalog types happens in the
/// engine.
#[async_trait]
pub trait Connection: Send {
    /// Dialect this connection speaks.
    fn kind(&self) -> DialectKind;

    /// Execute a statement.
    async fn execute(&mut self, statement: &RenderedStatement) -> Result<RowSet, DbError>;

    /// Whether a transaction is open on this connection.
    fn in_transaction(&self) -> bool;

    /// Whether the connection can be reused.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Open a transaction at the dialect's nearest isolation level.
    async fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<(), DbError> {
        let dialect = self.kind().dialect();
        for sql in dialect.begin_statements(dialect.effective_isolation(isolation)) {
            self.execute(&RenderedStatement::raw(sql)).await?;
        }
        Ok(())
    }

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), DbError> {
        let sql = self.kind().dialect().commit_statement();
        self.execute(&RenderedStatement::raw(sql)).await.map(|_| ())
    }

    /// Roll back the open transaction.
    async fn rollback(&mut self) -> Result<(), DbError> {
        let sql = self.kind().dialect().rollback_statement();
        self.execute(&RenderedStatement::raw(sql)).await.map(|_| ())
    }
}

/// Opens new connections for a pool.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// Dialect of the connections produced.
    fn kind(&self) -> DialectKind;

    /// Open a new connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, DbError>;
}

/// Placeholder left behind in a pooled slot after its connection is taken.
pub(crate) struct ClosedConnection(pub(crate) DialectKind);

#[async_trait]
impl Connection for ClosedConnection {
    fn kind(&self) -> DialectKind {
        self.0
    }

    async fn execute(&mut self, _statement: &RenderedStatement) -> Result<RowSet, DbError> {
        Err(DbError::new(DbErrorKind::Closed, "connection already released"))
    }

    fn in_transaction(&self) -> bool {
        false
    }

    fn is_healthy(&self) -> bool {
        false
    }
}
