//! Transaction management.
//!
//! Two forms are offered. A batch compiles a list of independent
//! operations and runs them in one transaction. An interactive transaction
//! pins one pooled connection and hands a [`TransactionClient`] to the
//! caller's body.
//!
//! Both forms bound the wait for a connection by `max_wait` and the
//! transaction itself by `timeout`.

mod batch;
mod interactive;

use std::future::Future;
use std::sync::Arc;

use quarry_proto::{Operation, OperationResult, TransactionOptions};
use tracing::{debug, warn};

use crate::connection::{DbErrorKind, PooledConnection};
use crate::engine::Shared;
use crate::error::{Error, Result, TimeoutPhase};
use crate::handler::PreparedOperation;
use crate::session::Session;

pub use batch::check_independent;
pub use interactive::TransactionClient;

async fn acquire(shared: &Shared, options: &TransactionOptions) -> Result<PooledConnection> {
    shared
        .pool
        .acquire_within(options.max_wait)
        .await
        .map_err(|err| match err.kind {
            DbErrorKind::PoolTimeout => Error::TransactionTimeout {
                phase: TimeoutPhase::MaxWait,
                elapsed: options.max_wait,
            },
            _ => Error::Connection(err),
        })
}

/// Roll back after a failure; the original error wins.
async fn abandon(session: &mut Session<'_>, err: Error) -> Error {
    if let Err(rollback_err) = session.rollback().await {
        warn!(error = %rollback_err, "rollback failed");
    }
    err
}

pub(crate) async fn run_batch(
    shared: &Shared,
    operations: &[Operation],
    options: &TransactionOptions,
) -> Result<Vec<OperationResult>> {
    let prepared = operations
        .iter()
        .map(|op| PreparedOperation::compile(&shared.catalog, op))
        .collect::<Result<Vec<_>, _>>()?;
    check_independent(&shared.catalog, operations)?;

    let mut conn = acquire(shared, options).await?;
    let mut session = Session::new(&mut *conn, &shared.catalog, &shared.config);
    session.begin(options.isolation_level).await?;

    let outcome = tokio::time::timeout(options.timeout, batch::execute_batch(&mut session, &prepared)).await;
    match outcome {
        Ok(Ok(results)) => {
            session.commit().await?;
            debug!(operations = results.len(), "batch committed");
            Ok(results)
        }
        Ok(Err(err)) => Err(abandon(&mut session, err).await),
        Err(_) => {
            let err = Error::TransactionTimeout {
                phase: TimeoutPhase::Timeout,
                elapsed: options.timeout,
            };
            Err(abandon(&mut session, err).await)
        }
    }
}

pub(crate) async fn run_interactive<F, Fut, T>(
    shared: Arc<Shared>,
    options: &TransactionOptions,
    body: F,
) -> Result<T>
where
    F: FnOnce(TransactionClient) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut conn = acquire(&shared, options).await?;
    Session::new(&mut *conn, &shared.catalog, &shared.config)
        .begin(options.isolation_level)
        .await?;

    let client = TransactionClient::new(shared.clone(), conn);
    let outcome = tokio::time::timeout(options.timeout, body(client.clone())).await;
    let Some(mut conn) = client.close().await else {
        return Err(Error::TransactionClosed);
    };
    let mut session = Session::new(&mut *conn, &shared.catalog, &shared.config);
    match outcome {
        Ok(Ok(value)) => {
            session.commit().await?;
            debug!("transaction committed");
            Ok(value)
        }
        Ok(Err(err)) => Err(abandon(&mut session, err).await),
        Err(_) => {
            warn!(timeout = ?options.timeout, "transaction timed out; rolling back");
            let err = Error::TransactionTimeout {
                phase: TimeoutPhase::Timeout,
                elapsed: options.timeout,
            };
            Err(abandon(&mut session, err).await)
        }
    }
}
