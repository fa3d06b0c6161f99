//! SQLite driver.
//!
//! Statements run on the blocking pool against a `rusqlite` connection.
//! Values are bound and read back in their storage form: booleans as
//! integers; timestamps, JSON documents and scalar lists as text.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quarry_proto::Value;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{ffi, params_from_iter, ErrorCode};
use tracing::{debug, trace};

use super::codec::format_datetime;
use super::{Connection, ConnectionManager, DbError, DbErrorKind, RowSet};
use crate::sql::{DialectKind, RenderedStatement};

/// SQLite connection settings.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file path.
    pub path: PathBuf,
    /// How long a statement waits on a locked database.
    pub busy_timeout: Duration,
    /// Enable write-ahead logging.
    pub wal: bool,
    /// Enforce declared foreign keys in the store as well.
    pub foreign_keys: bool,
}

impl SqliteConfig {
    /// Settings for a database file.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_secs(5),
            wal: true,
            foreign_keys: true,
        }
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Enable or disable write-ahead logging.
    pub fn with_wal(mut self, wal: bool) -> Self {
        self.wal = wal;
        self
    }

    /// Enable or disable store-side foreign keys.
    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }
}

/// Opens [`SqliteConnection`]s for a pool.
#[derive(Debug, Clone)]
pub struct SqliteManager {
    config: SqliteConfig,
}

impl SqliteManager {
    /// Create a manager.
    pub fn new(config: SqliteConfig) -> Self {
        Self { config }
    }

    /// Open a connection directly, outside any pool.
    pub fn open(&self) -> Result<SqliteConnection, DbError> {
        let conn = rusqlite::Connection::open(&self.config.path).map_err(map_error)?;
        conn.busy_timeout(self.config.busy_timeout).map_err(map_error)?;
        if self.config.wal {
            conn.pragma_update(None, "journal_mode", "WAL").map_err(map_error)?;
        }
        conn.pragma_update(None, "foreign_keys", self.config.foreign_keys)
            .map_err(map_error)?;
        debug!(path = %self.config.path.display(), "opened sqlite connection");
        Ok(SqliteConnection {
            conn: Arc::new(Mutex::new(conn)),
            broken: false,
        })
    }
}

#[async_trait]
impl ConnectionManager for SqliteManager {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        Ok(Box::new(self.open()?))
    }
}

/// A SQLite connection.
pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
    broken: bool,
}

impl SqliteConnection {
    /// Run a batch of SQL text without parameters, such as DDL.
    pub async fn execute_batch(&mut self, sql: &str) -> Result<(), DbError> {
        let conn = self.conn.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || conn.lock().execute_batch(&sql).map_err(map_error))
            .await
            .map_err(|e| DbError::new(DbErrorKind::Connection, e.to_string()))?
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    async fn execute(&mut self, statement: &RenderedStatement) -> Result<RowSet, DbError> {
        trace!(sql = %statement.sql, params = statement.params.len(), "sqlite execute");
        let params = statement
            .params
            .iter()
            .map(to_sql_value)
            .collect::<Result<Vec<_>, _>>()?;
        let sql = statement.sql.clone();
        let conn = self.conn.clone();

        let result = tokio::task::spawn_blocking(move || run(&conn.lock(), &sql, &params)).await;
        match result {
            Ok(rows) => rows.map_err(map_error),
            Err(e) => {
                self.broken = true;
                Err(DbError::new(DbErrorKind::Connection, e.to_string()))
            }
        }
    }

    fn in_transaction(&self) -> bool {
        !self.conn.lock().is_autocommit()
    }

    fn is_healthy(&self) -> bool {
        !self.broken
    }
}

fn run(conn: &rusqlite::Connection, sql: &str, params: &[SqlValue]) -> rusqlite::Result<RowSet> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    if columns.is_empty() {
        let affected = stmt.execute(params_from_iter(params.iter()))?;
        return Ok(RowSet {
            columns,
            rows: Vec::new(),
            affected: affected as u64,
            last_insert_id: Some(conn.last_insert_rowid()),
        });
    }

    let width = columns.len();
    let mut out = Vec::new();
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(from_value_ref(row.get_ref(i)?));
        }
        out.push(values);
    }
    drop(rows);

    Ok(RowSet {
        columns,
        affected: out.len() as u64,
        rows: out,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

fn to_sql_value(value: &Value) -> Result<SqlValue, DbError> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(v) => SqlValue::Integer(*v),
        Value::Float(v) => SqlValue::Real(*v),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::DateTime(dt) => SqlValue::Text(format_datetime(dt)),
        Value::Json(v) => SqlValue::Text(v.to_string()),
        Value::StringList(items) => SqlValue::Text(
            serde_json::to_string(items).map_err(|e| DbError::other(e.to_string()))?,
        ),
    })
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::String(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

/// Columns named in a SQLite unique violation message, without table prefix.
fn unique_columns(message: &str) -> Vec<String> {
    let Some((_, list)) = message.split_once("failed: ") else {
        return Vec::new();
    };
    list.split(", ")
        .map(|qualified| {
            qualified
                .rsplit_once('.')
                .map(|(_, column)| column)
                .unwrap_or(qualified)
                .trim()
                .to_string()
        })
        .collect()
}

fn map_error(err: rusqlite::Error) -> DbError {
    let text = err.to_string();
    let kind = match &err {
        rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
            ErrorCode::ConstraintViolation => match failure.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    DbErrorKind::UniqueViolation {
                        columns: unique_columns(message.as_deref().unwrap_or(&text)),
                    }
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => DbErrorKind::ForeignKeyViolation,
                ffi::SQLITE_CONSTRAINT_NOTNULL => DbErrorKind::NotNullViolation,
                _ => DbErrorKind::Other,
            },
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => DbErrorKind::Busy,
            ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure => {
                DbErrorKind::Connection
            }
            _ => DbErrorKind::Other,
        },
        _ => DbErrorKind::Other,
    };
    DbError::new(kind, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_columns() {
        assert_eq!(
            unique_columns("UNIQUE constraint failed: Tag.label, Tag.scope"),
            vec!["label".to_string(), "scope".to_string()]
        );
        assert!(unique_columns("no match").is_empty());
    }

    #[tokio::test]
    async fn test_execute_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqliteManager::new(SqliteConfig::new(dir.path().join("t.db")));
        let mut conn = manager.open().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT UNIQUE, flag INTEGER)")
            .await
            .unwrap();

        let insert = RenderedStatement {
            sql: "INSERT INTO t (name, flag) VALUES (?1, ?2) RETURNING id".into(),
            params: vec![Value::from("a"), Value::Bool(true)],
        };
        let rows = conn.execute(&insert).await.unwrap();
        assert_eq!(rows.columns, vec!["id".to_string()]);
        assert_eq!(rows.rows, vec![vec![Value::Int(1)]]);

        let err = conn.execute(&insert).await.unwrap_err();
        assert_eq!(
            err.kind,
            DbErrorKind::UniqueViolation {
                columns: vec!["name".into()]
            }
        );

        let update = RenderedStatement {
            sql: "UPDATE t SET flag = 0".into(),
            params: vec![],
        };
        assert_eq!(conn.execute(&update).await.unwrap().affected, 1);
        assert!(!conn.in_transaction());
        conn.execute(&RenderedStatement::raw("BEGIN IMMEDIATE")).await.unwrap();
        assert!(conn.in_transaction());
        conn.execute(&RenderedStatement::raw("ROLLBACK")).await.unwrap();
        assert!(!conn.in_transaction());
    }
}
