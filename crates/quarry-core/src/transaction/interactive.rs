//! Interactive transactions.

use std::sync::Arc;

use async_trait::async_trait;
use quarry_proto::{Operation, OperationResult};
use tokio::sync::Mutex;
use tracing::debug;

use crate::client::Client;
use crate::connection::PooledConnection;
use crate::engine::Shared;
use crate::error::{Error, Result};
use crate::handler::PreparedOperation;
use crate::session::Session;

/// Handle to an open interactive transaction.
///
/// Clones share the transaction. Every operation runs in its own
/// savepoint, so a failed operation leaves the earlier ones in place. Once
/// the transaction has finished, every call fails with
/// [`Error::TransactionClosed`].
#[derive(Clone)]
pub struct TransactionClient {
    shared: Arc<Shared>,
    conn: Arc<Mutex<Option<PooledConnection>>>,
}

impl TransactionClient {
    pub(crate) fn new(shared: Arc<Shared>, conn: PooledConnection) -> Self {
        Self {
            shared,
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    /// Whether the transaction is still open.
    pub async fn is_open(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    /// Take the connection and close the handle for every clone.
    pub(crate) async fn close(&self) -> Option<PooledConnection> {
        self.conn.lock().await.take()
    }
}

#[async_trait]
impl Client for TransactionClient {
    async fn execute(&self, operation: Operation) -> Result<OperationResult> {
        let prepared = PreparedOperation::compile(&self.shared.catalog, &operation)?;
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(Error::TransactionClosed)?;
        let mut session = Session::new(&mut **conn, &self.shared.catalog, &self.shared.config);

        let scope = session.enter_scope().await?;
        let result = prepared.execute(&mut session).await;
        if let Err(err) = &result {
            debug!(operation = operation.name(), error = %err, "operation rolled back to savepoint");
        }
        session.finish_scope(scope, result).await
    }
}

impl std::fmt::Debug for TransactionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionClient").finish_non_exhaustive()
    }
}
