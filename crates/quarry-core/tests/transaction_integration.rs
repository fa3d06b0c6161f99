//! Integration tests for batched and interactive transactions.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{site_schema, TestContext};
use quarry_core::connection::{
    Connection, ConnectionManager, DbError, DbErrorKind, RowSet, SqliteManager,
};
use quarry_core::proto::{
    CreateArgs, DeleteManyArgs, FindManyArgs, FindUniqueArgs, IsolationLevel, Operation, OperationResult,
    TransactionOptions, UniqueWhere, UpdateArgs, UpdateData, WriteData,
};
use quarry_core::sql::{DialectKind, RenderedStatement};
use quarry_core::{
    Catalog, Client, CompileError, ConsistencyError, Engine, EngineConfig, Error, PoolConfig,
    TimeoutPhase,
};

fn create_project(name: &str) -> Operation {
    Operation::Create {
        entity: "Project".into(),
        args: CreateArgs::new(WriteData::new().set("name", name).set("category", "a")),
    }
}

#[tokio::test]
async fn test_batch_runs_reads_before_writes() {
    let ctx = TestContext::new().await;

    let results = ctx
        .engine
        .batch(
            vec![
                create_project("tower"),
                Operation::Count {
                    entity: "Project".into(),
                    filter: None,
                },
                create_project("annex"),
                Operation::FindMany {
                    entity: "Project".into(),
                    args: FindManyArgs::new(),
                },
            ],
            TransactionOptions::new().with_isolation_level(IsolationLevel::Serializable),
        )
        .await
        .unwrap();

    assert_eq!(results.len(), 4);
    assert!(matches!(&results[0], OperationResult::Written(r) if r.get("name").and_then(|v| v.as_str()) == Some("tower")));
    assert_eq!(results[1], OperationResult::Count(0));
    assert!(matches!(&results[2], OperationResult::Written(r) if r.get("name").and_then(|v| v.as_str()) == Some("annex")));
    assert_eq!(results[3], OperationResult::Records(vec![]));
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_batch_rejects_dependent_operations() {
    let ctx = TestContext::new().await;

    let err = ctx
        .engine
        .batch(
            vec![create_project("tower"), create_project("tower")],
            TransactionOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Compile(CompileError::BatchDependency { first: 0, second: 1, .. })
    ));

    let err = ctx
        .engine
        .batch(
            vec![
                Operation::Update {
                    entity: "Project".into(),
                    args: UpdateArgs::new(UniqueWhere::new("name", "tower"), UpdateData::new().set("category", "b")),
                },
                Operation::FindUnique {
                    entity: "Project".into(),
                    args: FindUniqueArgs::new(UniqueWhere::new("name", "tower")),
                },
            ],
            TransactionOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::BatchDependency { .. })));
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_rejects_filter_scoped_writes_over_touched_entities() {
    let ctx = TestContext::new().await;
    let delete_all = || Operation::DeleteMany {
        entity: "Project".into(),
        args: DeleteManyArgs::new(None),
    };

    for ops in [
        vec![create_project("tower"), delete_all()],
        vec![delete_all(), create_project("tower")],
    ] {
        let err = ctx.engine.batch(ops, TransactionOptions::new()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Compile(CompileError::BatchDependency { first: 0, second: 1, .. })
        ));
    }
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 0);

    let project = ctx.project("tower", "a").await;
    let err = ctx
        .engine
        .batch(
            vec![
                delete_all(),
                Operation::Create {
                    entity: "Floorplan".into(),
                    args: CreateArgs::new(WriteData::new().set("projectId", project).set("label", "ground")),
                },
            ],
            TransactionOptions::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::BatchDependency { .. })));
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 1);
    assert_eq!(ctx.engine.count("Floorplan", None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_batch_failure_rolls_back_everything() {
    let ctx = TestContext::new().await;

    let err = ctx
        .engine
        .batch(
            vec![
                create_project("tower"),
                Operation::Create {
                    entity: "Floorplan".into(),
                    args: CreateArgs::new(WriteData::new().set("projectId", 404).set("label", "ghost")),
                },
            ],
            TransactionOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Consistency(ConsistencyError::DanglingForeignKey { .. })));
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_interactive_transaction_sees_its_own_writes() {
    let ctx = TestContext::new().await;
    let engine = ctx.engine.clone();

    let (inside, outside) = ctx
        .engine
        .transaction(TransactionOptions::new(), |tx| async move {
            tx.create("Project", CreateArgs::new(WriteData::new().set("name", "tower").set("category", "a")))
                .await?;
            let inside = tx.count("Project", None).await?;
            let outside = engine.count("Project", None).await?;
            Ok((inside, outside))
        })
        .await
        .unwrap();

    assert_eq!((inside, outside), (1, 0));
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_operation_keeps_earlier_ones() {
    let ctx = TestContext::new().await;

    let conflict = ctx
        .engine
        .transaction(TransactionOptions::new(), |tx| async move {
            tx.create("Project", CreateArgs::new(WriteData::new().set("name", "tower").set("category", "a")))
                .await?;
            let conflict = tx
                .create("Project", CreateArgs::new(WriteData::new().set("name", "tower").set("category", "b")))
                .await
                .unwrap_err();
            tx.create("Project", CreateArgs::new(WriteData::new().set("name", "annex").set("category", "a")))
                .await?;
            Ok(conflict)
        })
        .await
        .unwrap();

    assert!(matches!(conflict, Error::Conflict { .. }));
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 2);
}

#[tokio::test]
async fn test_error_from_body_rolls_back() {
    let ctx = TestContext::new().await;

    let err = ctx
        .engine
        .transaction(TransactionOptions::new(), |tx| async move {
            tx.create("Project", CreateArgs::new(WriteData::new().set("name", "tower").set("category", "a")))
                .await?;
            Err::<(), _>(Error::InvalidData("abort".into()))
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidData(ref m) if m == "abort"));
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_timeout_rolls_back() {
    let ctx = TestContext::new().await;

    let err = ctx
        .engine
        .transaction(
            TransactionOptions::new().with_timeout(Duration::from_millis(100)),
            |tx| async move {
                tx.create("Project", CreateArgs::new(WriteData::new().set("name", "tower").set("category", "a")))
                    .await?;
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        Error::TransactionTimeout {
            phase: TimeoutPhase::Timeout,
            ..
        }
    ));
    assert_eq!(ctx.engine.count("Project", None).await.unwrap(), 0);
}

#[tokio::test]
async fn test_max_wait_bounds_connection_acquisition() {
    let ctx = TestContext::with_config(
        EngineConfig::default().with_pool(PoolConfig::new().with_max_connections(1)),
    )
    .await;
    let engine = ctx.engine.clone();

    let err = ctx
        .engine
        .transaction(TransactionOptions::new(), |_tx| async move {
            let err = engine
                .transaction(
                    TransactionOptions::new().with_max_wait(Duration::from_millis(50)),
                    |_inner| async { Ok(()) },
                )
                .await
                .unwrap_err();
            Ok(err)
        })
        .await
        .unwrap();

    assert!(matches!(
        err,
        Error::TransactionTimeout {
            phase: TimeoutPhase::MaxWait,
            ..
        }
    ));
}

#[tokio::test]
async fn test_handle_is_closed_after_the_transaction() {
    let ctx = TestContext::new().await;

    let leaked = ctx
        .engine
        .transaction(TransactionOptions::new(), |tx| async move { Ok(tx) })
        .await
        .unwrap();

    assert!(!leaked.is_open().await);
    let err = leaked.count("Project", None).await.unwrap_err();
    assert!(matches!(err, Error::TransactionClosed));
}

/// Fails the next `failures` statements across all its connections.
struct FlakyManager {
    inner: SqliteManager,
    failures: Arc<AtomicUsize>,
}

struct FlakyConnection {
    inner: Box<dyn Connection>,
    failures: Arc<AtomicUsize>,
}

#[async_trait]
impl ConnectionManager for FlakyManager {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    async fn connect(&self) -> Result<Box<dyn Connection>, DbError> {
        Ok(Box::new(FlakyConnection {
            inner: self.inner.connect().await?,
            failures: self.failures.clone(),
        }))
    }
}

#[async_trait]
impl Connection for FlakyConnection {
    fn kind(&self) -> DialectKind {
        self.inner.kind()
    }

    async fn execute(&mut self, statement: &RenderedStatement) -> Result<RowSet, DbError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(DbError::new(DbErrorKind::Connection, "connection reset"));
        }
        self.inner.execute(statement).await
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

#[tokio::test]
async fn test_reads_are_retried_once_and_writes_never() {
    let ctx = TestContext::new().await;
    ctx.project("tower", "a").await;

    let failures = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(
        Catalog::load(site_schema()).unwrap(),
        FlakyManager {
            inner: SqliteManager::new(ctx.sqlite.clone()),
            failures: failures.clone(),
        },
        EngineConfig::default().with_read_retries(1),
    );

    failures.store(1, Ordering::SeqCst);
    let records = engine.find_many("Project", FindManyArgs::new()).await.unwrap();
    assert_eq!(records.len(), 1);

    failures.store(2, Ordering::SeqCst);
    let err = engine.count("Project", None).await.unwrap_err();
    assert!(matches!(err, Error::Connection(ref e) if e.kind == DbErrorKind::Connection));
    assert!(err.is_retryable());

    failures.store(1, Ordering::SeqCst);
    let err = engine
        .create("Project", CreateArgs::new(WriteData::new().set("name", "annex").set("category", "a")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert_eq!(engine.count("Project", None).await.unwrap(), 1);

    engine.shutdown();
    assert!(engine.count("Project", None).await.is_err());
}
