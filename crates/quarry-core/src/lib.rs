//! Quarry core engine.
//!
//! Compiles typed read and write operations against a relational
//! [`Catalog`] into SQL, runs them through a pooled [`Connection`](connection::Connection),
//! and shapes the rows back into nested records.
//!
//! The main entry point is [`Engine`]; operations are issued through the
//! [`Client`] trait, which [`TransactionClient`] also implements.

pub mod catalog;
pub mod client;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod handler;
pub mod mutation;
pub mod query;
pub mod session;
pub mod sql;
pub mod transaction;

pub use catalog::{
    load_catalog_json, Catalog, DefaultValue, DeleteBehavior, EntityDef, FieldDef,
    RelationFieldDef, ScalarType, SchemaBundle,
};
pub use client::Client;
pub use config::EngineConfig;
pub use connection::{Connection, ConnectionManager, ConnectionPool, DbError, DbErrorKind, PoolConfig};
#[cfg(feature = "sqlite")]
pub use connection::{SqliteConfig, SqliteManager};
pub use engine::Engine;
pub use error::{CompileError, ConsistencyError, Error, Result, TimeoutPhase};
pub use mutation::{MutationCoordinator, MAX_CASCADE_DEPTH};
pub use query::{AggregationEngine, Explain, FilterCompiler, FilterEvaluator, QueryPlanner};
pub use sql::{DialectKind, RenderedStatement};
pub use transaction::TransactionClient;

/// Re-export protocol types.
pub use quarry_proto as proto;
