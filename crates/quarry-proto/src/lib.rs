//! Quarry protocol types.
//!
//! This crate defines the stable request and result shapes that a typed
//! client binds to. Everything here is plain data and serializes with serde,
//! so a generated client in another process can submit requests as JSON.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for parameters and results
//! - [`filter`] - The `where` filter tree
//! - [`query`] - Read arguments: ordering, pagination, projection
//! - [`aggregate`] - Aggregate and group-by arguments
//! - [`mutation`] - Write payloads
//! - [`transaction`] - Isolation levels and transaction options
//! - [`operation`] - The operation envelope used by batched transactions
//! - [`result`] - Records, aggregate rows and batch payloads

pub mod aggregate;
pub mod error;
pub mod filter;
pub mod mutation;
pub mod operation;
pub mod query;
pub mod result;
pub mod transaction;
pub mod value;

pub use aggregate::{
    AggregateArgs, AggregateFunction, AggregateSelection, GroupByArgs, GroupOrderBy, Having,
};
pub use error::Error;
pub use filter::{
    Filter, JsonCondition, JsonFilter, JsonPathSegment, NullKind, QueryMode, RelationPredicate,
    ScalarFilter,
};
pub use mutation::{
    CreateArgs, CreateManyArgs, DeleteArgs, DeleteManyArgs, FieldUpdate, UpdateArgs,
    UpdateData, UpdateManyArgs, UpsertArgs, WriteData,
};
pub use operation::{Operation, OperationResult};
pub use query::{
    FieldSelection, FindManyArgs, FindUniqueArgs, Include, NullsOrder, OrderBy, Projection,
    SortOrder, UniqueWhere,
};
pub use result::{AggregateResult, AggregateValue, BatchPayload, Deleted, GroupRow, Record, RelationValue};
pub use transaction::{IsolationLevel, TransactionOptions};
pub use value::Value;
