//! Operation dispatch.
//!
//! An [`Operation`] is compiled into a [`PreparedOperation`] against the
//! catalog first; only a successfully compiled operation is run on a
//! session.

use quarry_proto::{Operation, OperationResult};

use crate::catalog::Catalog;
use crate::error::{CompileError, Result};
use crate::mutation::{
    CreateManyPlan, CreatePlan, DeleteManyPlan, DeletePlan, MutationCoordinator, UpdateManyPlan,
    UpdatePlan, UpsertPlan,
};
use crate::query::{AggregatePlan, AggregationEngine, GroupByPlan, QueryPlanner, ReadPlan};
use crate::session::Session;

/// A compiled operation, ready to run.
#[derive(Debug, Clone)]
pub enum PreparedOperation {
    /// `findMany`.
    FindMany(ReadPlan),
    /// `findFirst` or `findUnique`.
    FindOne(ReadPlan),
    /// `count`.
    Count(AggregatePlan),
    /// `aggregate`.
    Aggregate(AggregatePlan),
    /// `groupBy`.
    GroupBy(GroupByPlan),
    /// `create`.
    Create(CreatePlan),
    /// `createMany`.
    CreateMany(CreateManyPlan),
    /// `update`.
    Update(UpdatePlan),
    /// `updateMany`.
    UpdateMany(UpdateManyPlan),
    /// `upsert`.
    Upsert(UpsertPlan),
    /// `delete`.
    Delete(DeletePlan),
    /// `deleteMany`.
    DeleteMany(DeleteManyPlan),
}

impl PreparedOperation {
    /// Compile an operation.
    pub fn compile(catalog: &Catalog, operation: &Operation) -> Result<Self, CompileError> {
        let reads = QueryPlanner::new(catalog);
        let aggregates = AggregationEngine::new(catalog);
        let writes = MutationCoordinator::new(catalog);
        Ok(match operation {
            Operation::FindMany { entity, args } => Self::FindMany(reads.find_many(entity, args)?),
            Operation::FindFirst { entity, args } => Self::FindOne(reads.find_first(entity, args)?),
            Operation::FindUnique { entity, args } => Self::FindOne(reads.find_unique(entity, args)?),
            Operation::Count { entity, filter } => Self::Count(aggregates.count(entity, filter.as_ref())?),
            Operation::Aggregate { entity, args } => Self::Aggregate(aggregates.aggregate(entity, args)?),
            Operation::GroupBy { entity, args } => Self::GroupBy(aggregates.group_by(entity, args)?),
            Operation::Create { entity, args } => Self::Create(writes.create(entity, args)?),
            Operation::CreateMany { entity, args } => Self::CreateMany(writes.create_many(entity, args)?),
            Operation::Update { entity, args } => Self::Update(writes.update(entity, args)?),
            Operation::UpdateMany { entity, args } => Self::UpdateMany(writes.update_many(entity, args)?),
            Operation::Upsert { entity, args } => Self::Upsert(writes.upsert(entity, args)?),
            Operation::Delete { entity, args } => Self::Delete(writes.delete(entity, args)?),
            Operation::DeleteMany { entity, args } => Self::DeleteMany(writes.delete_many(entity, args)?),
        })
    }

    /// Whether the operation only reads.
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::FindMany(_) | Self::FindOne(_) | Self::Count(_) | Self::Aggregate(_) | Self::GroupBy(_)
        )
    }

    /// Run the operation on a session.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<OperationResult> {
        Ok(match self {
            Self::FindMany(plan) => OperationResult::Records(plan.execute(session).await?),
            Self::FindOne(plan) => OperationResult::Record(plan.execute_one(session).await?),
            Self::Count(plan) => {
                let result = plan.execute(session).await?;
                OperationResult::Count(result.count_all().unwrap_or(0).max(0) as u64)
            }
            Self::Aggregate(plan) => OperationResult::Aggregate(plan.execute(session).await?),
            Self::GroupBy(plan) => OperationResult::Groups(plan.execute(session).await?),
            Self::Create(plan) => OperationResult::Written(plan.execute(session).await?),
            Self::CreateMany(plan) => OperationResult::Batch(plan.execute(session).await?),
            Self::Update(plan) => OperationResult::Written(plan.execute(session).await?),
            Self::UpdateMany(plan) => OperationResult::Batch(plan.execute(session).await?),
            Self::Upsert(plan) => OperationResult::Written(plan.execute(session).await?),
            Self::Delete(plan) => OperationResult::Deleted(plan.execute(session).await?),
            Self::DeleteMany(plan) => OperationResult::Batch(plan.execute(session).await?),
        })
    }
}
