//! Operation envelope for batched transactions.

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateArgs, GroupByArgs};
use crate::filter::Filter;
use crate::mutation::{
    CreateArgs, CreateManyArgs, DeleteArgs, DeleteManyArgs, UpdateArgs, UpdateManyArgs,
    UpsertArgs,
};
use crate::query::{FindManyArgs, FindUniqueArgs};
use crate::result::{AggregateResult, BatchPayload, Deleted, GroupRow, Record};

/// A single engine operation against one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// `findMany`.
    FindMany {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: FindManyArgs,
    },
    /// `findFirst`.
    FindFirst {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: FindManyArgs,
    },
    /// `findUnique`.
    FindUnique {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: FindUniqueArgs,
    },
    /// `count`.
    Count {
        /// Target entity.
        entity: String,
        /// Row filter.
        filter: Option<Filter>,
    },
    /// `aggregate`.
    Aggregate {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: AggregateArgs,
    },
    /// `groupBy`.
    GroupBy {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: GroupByArgs,
    },
    /// `create`.
    Create {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: CreateArgs,
    },
    /// `createMany`.
    CreateMany {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: CreateManyArgs,
    },
    /// `update`.
    Update {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: UpdateArgs,
    },
    /// `updateMany`.
    UpdateMany {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: UpdateManyArgs,
    },
    /// `upsert`.
    Upsert {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: UpsertArgs,
    },
    /// `delete`.
    Delete {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: DeleteArgs,
    },
    /// `deleteMany`.
    DeleteMany {
        /// Target entity.
        entity: String,
        /// Arguments.
        args: DeleteManyArgs,
    },
}

impl Operation {
    /// The entity this operation targets.
    pub fn entity(&self) -> &str {
        match self {
            Operation::FindMany { entity, .. }
            | Operation::FindFirst { entity, .. }
            | Operation::FindUnique { entity, .. }
            | Operation::Count { entity, .. }
            | Operation::Aggregate { entity, .. }
            | Operation::GroupBy { entity, .. }
            | Operation::Create { entity, .. }
            | Operation::CreateMany { entity, .. }
            | Operation::Update { entity, .. }
            | Operation::UpdateMany { entity, .. }
            | Operation::Upsert { entity, .. }
            | Operation::Delete { entity, .. }
            | Operation::DeleteMany { entity, .. } => entity,
        }
    }

    /// Whether this operation only reads.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Operation::FindMany { .. }
                | Operation::FindFirst { .. }
                | Operation::FindUnique { .. }
                | Operation::Count { .. }
                | Operation::Aggregate { .. }
                | Operation::GroupBy { .. }
        )
    }

    /// Operation name as used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::FindMany { .. } => "findMany",
            Operation::FindFirst { .. } => "findFirst",
            Operation::FindUnique { .. } => "findUnique",
            Operation::Count { .. } => "count",
            Operation::Aggregate { .. } => "aggregate",
            Operation::GroupBy { .. } => "groupBy",
            Operation::Create { .. } => "create",
            Operation::CreateMany { .. } => "createMany",
            Operation::Update { .. } => "update",
            Operation::UpdateMany { .. } => "updateMany",
            Operation::Upsert { .. } => "upsert",
            Operation::Delete { .. } => "delete",
            Operation::DeleteMany { .. } => "deleteMany",
        }
    }
}

/// Result of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationResult {
    /// Rows of a `findMany`.
    Records(Vec<Record>),
    /// Row of a `findFirst`/`findUnique`.
    Record(Option<Record>),
    /// Result of a `count`.
    Count(u64),
    /// Result of an `aggregate`.
    Aggregate(AggregateResult),
    /// Groups of a `groupBy`.
    Groups(Vec<GroupRow>),
    /// Post-image of a `create`/`update`/`upsert`.
    Written(Record),
    /// Pre-image of a `delete`.
    Deleted(Deleted),
    /// Count of a multi-row write.
    Batch(BatchPayload),
}
