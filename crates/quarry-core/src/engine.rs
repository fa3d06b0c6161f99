//! The engine handle.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use quarry_proto::{FindManyArgs, Operation, OperationResult, TransactionOptions};
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::client::Client;
use crate::config::EngineConfig;
use crate::connection::{ConnectionManager, ConnectionPool};
use crate::error::{Error, Result};
use crate::handler::PreparedOperation;
use crate::query::{Explain, QueryPlanner};
use crate::session::Session;
use crate::transaction::{self, TransactionClient};

/// State shared by every handle of one engine.
pub(crate) struct Shared {
    pub catalog: Catalog,
    pub pool: ConnectionPool,
    pub config: EngineConfig,
}

/// Query engine over one catalog and one connection pool.
///
/// Cloning is cheap; clones share the catalog and the pool.
#[derive(Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Create an engine. Connections are opened on demand.
    pub fn new(catalog: Catalog, manager: impl ConnectionManager, config: EngineConfig) -> Self {
        let pool = ConnectionPool::new(manager, config.pool.clone());
        info!(
            catalog_version = catalog.version(),
            entities = catalog.entities().len(),
            dialect = %pool.kind(),
            "engine started"
        );
        Self {
            shared: Arc::new(Shared {
                catalog,
                pool,
                config,
            }),
        }
    }

    /// Create an engine over a SQLite database.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(catalog: Catalog, sqlite: crate::connection::SqliteConfig, config: EngineConfig) -> Self {
        Self::new(catalog, crate::connection::SqliteManager::new(sqlite), config)
    }

    /// The catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.shared.catalog
    }

    /// The configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// The connection pool.
    pub fn pool(&self) -> &ConnectionPool {
        &self.shared.pool
    }

    /// Describe how a `findMany` would run, without running it.
    pub fn explain(&self, entity: &str, args: &FindManyArgs) -> Result<Explain> {
        let plan = QueryPlanner::new(&self.shared.catalog).find_many(entity, args)?;
        Ok(plan.explain(self.shared.pool.kind().dialect()))
    }

    /// Run operations in one transaction.
    ///
    /// The operations must be independent: reads run before writes, so
    /// none observes another's effects. Results come back in submission
    /// order; any failure rolls back all of them.
    pub async fn batch(&self, operations: Vec<Operation>, options: TransactionOptions) -> Result<Vec<OperationResult>> {
        transaction::run_batch(&self.shared, &operations, &options).await
    }

    /// Run `body` in an interactive transaction.
    ///
    /// Commits when the body returns `Ok`, rolls back otherwise. A body
    /// that outlives `options.timeout` is dropped and the transaction
    /// rolled back.
    pub async fn transaction<F, Fut, T>(&self, options: TransactionOptions, body: F) -> Result<T>
    where
        F: FnOnce(TransactionClient) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        transaction::run_interactive(self.shared.clone(), &options, body).await
    }

    /// Close the pool. Operations started afterwards fail.
    pub fn shutdown(&self) {
        info!("engine shutting down");
        self.shared.pool.close();
    }

    async fn run_once(&self, prepared: &PreparedOperation) -> Result<OperationResult> {
        let mut conn = self.shared.pool.acquire().await?;
        let mut session = Session::new(&mut *conn, &self.shared.catalog, &self.shared.config);
        prepared.execute(&mut session).await
    }

    async fn run_bounded(&self, prepared: &PreparedOperation) -> Result<OperationResult> {
        match self.shared.config.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.run_once(prepared))
                .await
                .map_err(|_| Error::RequestTimeout(limit))?,
            None => self.run_once(prepared).await,
        }
    }
}

#[async_trait]
impl Client for Engine {
    async fn execute(&self, operation: Operation) -> Result<OperationResult> {
        let prepared = PreparedOperation::compile(&self.shared.catalog, &operation)?;
        let retries = if prepared.is_read() {
            self.shared.config.read_retries
        } else {
            0
        };

        let mut attempt = 0;
        loop {
            match self.run_bounded(&prepared).await {
                Err(err) if attempt < retries && err.is_retryable() => {
                    attempt += 1;
                    warn!(
                        operation = operation.name(),
                        entity = operation.entity(),
                        attempt,
                        error = %err,
                        "retrying read"
                    );
                }
                result => {
                    debug!(operation = operation.name(), entity = operation.entity(), ok = result.is_ok(), "operation finished");
                    return result;
                }
            }
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("catalog_version", &self.shared.catalog.version())
            .field("pool", &self.shared.pool)
            .finish()
    }
}
