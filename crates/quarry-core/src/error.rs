//! Core error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema is inconsistent. Raised at catalog load.
    #[error("schema mismatch in {entity}: {message}")]
    SchemaMismatch {
        /// Entity where the inconsistency was found.
        entity: String,
        /// What is wrong.
        message: String,
    },

    /// A request could not be lowered to a valid plan.
    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    /// Stored data violates a relation rule.
    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    /// A unique constraint was violated.
    #[error("unique constraint {constraint} on {entity} failed for ({})", .fields.join(", "))]
    Conflict {
        /// Entity written to.
        entity: String,
        /// Catalog name of the violated constraint.
        constraint: String,
        /// Fields of the constraint.
        fields: Vec<String>,
    },

    /// No row matched a unique lookup that required one.
    #[error("no {entity} record found")]
    NotFound {
        /// Entity looked up.
        entity: String,
    },

    /// A transaction exceeded its max wait or its timeout.
    #[error("transaction {phase} exceeded after {elapsed:?}")]
    TransactionTimeout {
        /// Which budget was exceeded.
        phase: TimeoutPhase,
        /// The configured budget.
        elapsed: Duration,
    },

    /// An interactive transaction handle was used after it finished.
    #[error("transaction already closed")]
    TransactionClosed,

    /// A request exceeded the engine's request timeout.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The connection collaborator failed.
    #[error("connection error: {0}")]
    Connection(#[from] crate::connection::DbError),

    /// A stored value could not be decoded.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Catalog snapshot serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catalog snapshot deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Shorthand for a schema mismatch.
    pub fn schema(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::SchemaMismatch {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Whether the request may be retried on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the error stems from names that do not resolve against
    /// the catalog, either at load or in a request.
    pub fn is_schema_mismatch(&self) -> bool {
        matches!(
            self,
            Error::SchemaMismatch { .. }
                | Error::Compile(CompileError::UnknownEntity(_))
                | Error::Compile(CompileError::UnknownField { .. })
                | Error::Compile(CompileError::UnknownRelation { .. })
        )
    }
}

/// Which transaction budget ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for a connection.
    MaxWait,
    /// Running the body.
    Timeout,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::MaxWait => f.write_str("max wait"),
            TimeoutPhase::Timeout => f.write_str("timeout"),
        }
    }
}

/// Request compilation errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    /// Unknown entity.
    #[error("unknown entity {0}")]
    UnknownEntity(String),

    /// Unknown scalar field.
    #[error("unknown field {field} on {entity}")]
    UnknownField {
        /// Entity searched.
        entity: String,
        /// Field name.
        field: String,
    },

    /// Unknown relation field.
    #[error("unknown relation {relation} on {entity}")]
    UnknownRelation {
        /// Entity searched.
        entity: String,
        /// Relation name.
        relation: String,
    },

    /// A condition does not apply to the field's type or relation shape.
    #[error("invalid predicate on {entity}.{field}: {reason}")]
    InvalidPredicate {
        /// Entity.
        entity: String,
        /// Field or relation.
        field: String,
        /// Why the predicate is invalid.
        reason: String,
    },

    /// A value cannot be coerced to the field's type.
    #[error("invalid value for {entity}.{field}: expected {expected}, found {found}")]
    InvalidValue {
        /// Entity.
        entity: String,
        /// Field.
        field: String,
        /// Declared type.
        expected: &'static str,
        /// Supplied type.
        found: &'static str,
    },

    /// A field that cannot be ordered by was used in an ordering.
    #[error("cannot order {entity} by {field}")]
    NotOrderable {
        /// Entity.
        entity: String,
        /// Field.
        field: String,
    },

    /// `take` with `skip` or `cursor` but no `orderBy`.
    #[error("pagination on {entity} with skip or cursor requires orderBy")]
    PaginationRequiresOrderBy {
        /// Entity.
        entity: String,
    },

    /// Unique lookup values do not cover a unique constraint.
    #[error("{fields:?} do not cover a unique constraint of {entity}")]
    NotUnique {
        /// Entity.
        entity: String,
        /// Supplied fields.
        fields: Vec<String>,
    },

    /// A required field was not supplied and has no default.
    #[error("missing required field {entity}.{field}")]
    MissingRequiredField {
        /// Entity.
        entity: String,
        /// Field.
        field: String,
    },

    /// A relation argument is invalid for this relation.
    #[error("invalid arguments for relation {entity}.{relation}: {reason}")]
    InvalidRelationArgs {
        /// Entity.
        entity: String,
        /// Relation.
        relation: String,
        /// Why.
        reason: String,
    },

    /// `groupBy` with an empty `by`.
    #[error("groupBy on {entity} requires at least one field in by")]
    EmptyGroupBy {
        /// Entity.
        entity: String,
    },

    /// A `having` field is not part of `by`.
    #[error("having field {field} on {entity} is not in by")]
    HavingFieldNotInBy {
        /// Entity.
        entity: String,
        /// Field.
        field: String,
    },

    /// An `orderBy` field of a groupBy is neither in `by` nor a selected aggregate.
    #[error("orderBy field {field} on {entity} must be in by or a selected aggregate")]
    OrderByFieldNotInBy {
        /// Entity.
        entity: String,
        /// Field.
        field: String,
    },

    /// An aggregate function is not valid for the field's type.
    #[error("cannot compute {function} of {entity}.{field}")]
    InvalidAggregate {
        /// Entity.
        entity: String,
        /// Field.
        field: String,
        /// Function name.
        function: &'static str,
    },

    /// Operations in a batched transaction depend on each other.
    #[error("batched operations {first} and {second} are not independent: {reason}")]
    BatchDependency {
        /// Index of the earlier operation.
        first: usize,
        /// Index of the later operation.
        second: usize,
        /// Why they conflict.
        reason: String,
    },
}

/// Referential consistency errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConsistencyError {
    /// A required to-one relation has no related row.
    #[error("required relation {entity}.{relation} has no related row")]
    MissingRelatedRow {
        /// Parent entity.
        entity: String,
        /// Relation field.
        relation: String,
    },

    /// A delete is restricted by existing dependents.
    #[error("cannot delete {entity}: {count} dependent {dependent} rows via {relation}")]
    ForeignKeyViolation {
        /// Entity being deleted.
        entity: String,
        /// Dependent entity.
        dependent: String,
        /// Relation name.
        relation: String,
        /// Number of blocking rows.
        count: usize,
    },

    /// A written foreign key references no row.
    #[error("{entity}.{relation} references a missing {target} row")]
    DanglingForeignKey {
        /// Entity written to.
        entity: String,
        /// Relation field.
        relation: String,
        /// Referenced entity.
        target: String,
    },

    /// Cascade depth limit reached.
    #[error("cascade depth limit exceeded at {entity}")]
    CascadeDepthExceeded {
        /// Entity reached when the limit hit.
        entity: String,
    },
}

/// Result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;
