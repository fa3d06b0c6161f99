//! Execution session.
//!
//! A [`Session`] couples one checked-out connection with the catalog and
//! dialect for the duration of a request or transaction. Planners build
//! IR statements; the session renders and runs them.

use quarry_proto::IsolationLevel;
use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::connection::{Connection, RowSet};
use crate::error::Result;
use crate::sql::{render, Dialect, RenderedStatement, Statement};

/// How a write scope was opened.
#[derive(Debug)]
pub(crate) enum Scope {
    /// A transaction owned by the scope.
    Transaction,
    /// A savepoint inside an enclosing transaction.
    Savepoint(String),
}

/// One connection plus the context needed to plan and run statements.
pub struct Session<'a> {
    conn: &'a mut dyn Connection,
    catalog: &'a Catalog,
    dialect: &'static dyn Dialect,
    config: &'a EngineConfig,
    savepoints: usize,
}

impl<'a> Session<'a> {
    /// Create a session over a connection.
    pub fn new(conn: &'a mut dyn Connection, catalog: &'a Catalog, config: &'a EngineConfig) -> Self {
        let dialect = conn.kind().dialect();
        Self {
            conn,
            catalog,
            dialect,
            config,
            savepoints: 0,
        }
    }

    /// The catalog.
    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    /// The dialect of the connection.
    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect
    }

    /// Engine configuration.
    pub fn config(&self) -> &'a EngineConfig {
        self.config
    }

    /// Whether a transaction is open on the connection.
    pub fn in_transaction(&self) -> bool {
        self.conn.in_transaction()
    }

    /// Render a statement for this session's dialect.
    pub fn render(&self, statement: &Statement) -> RenderedStatement {
        render(statement, self.dialect)
    }

    /// Render and execute a statement.
    pub async fn run(&mut self, statement: impl Into<Statement>) -> Result<RowSet> {
        let rendered = self.render(&statement.into());
        debug!(sql = %rendered.sql, params = rendered.params.len(), "executing statement");
        Ok(self.conn.execute(&rendered).await?)
    }

    /// Open a transaction.
    pub async fn begin(&mut self, isolation: Option<IsolationLevel>) -> Result<()> {
        let effective = self.dialect.effective_isolation(isolation);
        if isolation.is_some() && effective != isolation {
            warn!(
                requested = ?isolation,
                effective = ?effective,
                dialect = %self.dialect.kind(),
                "isolation level not supported; using nearest stronger level"
            );
        }
        self.conn.begin(isolation).await?;
        Ok(())
    }

    /// Commit the open transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.conn.commit().await?;
        Ok(())
    }

    /// Roll back the open transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.conn.rollback().await?;
        Ok(())
    }

    /// Open an atomic scope for a write: a transaction when none is open,
    /// otherwise a savepoint.
    pub(crate) async fn enter_scope(&mut self) -> Result<Scope> {
        if !self.conn.in_transaction() {
            self.begin(None).await?;
            return Ok(Scope::Transaction);
        }
        self.savepoints += 1;
        let name = format!("quarry_sp_{}", self.savepoints);
        let sql = self.dialect.savepoint_statement(&name);
        self.run(Statement::Raw(sql)).await?;
        Ok(Scope::Savepoint(name))
    }

    /// Close a scope, committing when `ok` and rolling back otherwise.
    pub(crate) async fn exit_scope(&mut self, scope: Scope, ok: bool) -> Result<()> {
        match scope {
            Scope::Transaction if ok => self.commit().await,
            Scope::Transaction => self.rollback().await,
            Scope::Savepoint(name) => {
                self.savepoints = self.savepoints.saturating_sub(1);
                if !ok {
                    let sql = self.dialect.rollback_to_savepoint_statement(&name);
                    self.run(Statement::Raw(sql)).await?;
                }
                let sql = self.dialect.release_savepoint_statement(&name);
                self.run(Statement::Raw(sql)).await?;
                Ok(())
            }
        }
    }

    /// Close a scope according to `result` and pass the result through.
    ///
    /// A failure to roll back is logged; the original error wins.
    pub(crate) async fn finish_scope<T: Send>(
        &mut self,
        scope: Scope,
        result: Result<T>,
    ) -> Result<T> {
        match result {
            Ok(value) => {
                self.exit_scope(scope, true).await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.exit_scope(scope, false).await {
                    warn!(error = %rollback_err, "rollback after failed write also failed");
                }
                Err(err)
            }
        }
    }
}
