//! Typed operation surface shared by the engine and transaction handles.

use async_trait::async_trait;
use quarry_proto::{
    AggregateArgs, AggregateResult, BatchPayload, CreateArgs, CreateManyArgs, DeleteArgs,
    DeleteManyArgs, Deleted, Filter, FindManyArgs, FindUniqueArgs, GroupByArgs, GroupRow,
    Operation, OperationResult, Record, UpdateArgs, UpdateManyArgs, UpsertArgs,
};

use crate::error::{Error, Result};

fn unexpected(operation: &'static str, result: OperationResult) -> Error {
    Error::InvalidData(format!("{operation} produced an unexpected result: {result:?}"))
}

fn not_found(entity: &str) -> Error {
    Error::NotFound {
        entity: entity.to_string(),
    }
}

/// Something that runs operations: an [`Engine`](crate::Engine) or a
/// [`TransactionClient`](crate::transaction::TransactionClient).
///
/// Only [`Client::execute`] is required; the typed methods wrap it.
#[async_trait]
pub trait Client: Send + Sync {
    /// Run one operation.
    async fn execute(&self, operation: Operation) -> Result<OperationResult>;

    /// Records matching the arguments, in order.
    async fn find_many(&self, entity: &str, args: FindManyArgs) -> Result<Vec<Record>> {
        let operation = Operation::FindMany {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Records(records) => Ok(records),
            other => Err(unexpected("findMany", other)),
        }
    }

    /// The first record in the requested order.
    async fn find_first(&self, entity: &str, args: FindManyArgs) -> Result<Option<Record>> {
        let operation = Operation::FindFirst {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Record(record) => Ok(record),
            other => Err(unexpected("findFirst", other)),
        }
    }

    /// Like [`Client::find_first`], failing with [`Error::NotFound`].
    async fn find_first_or_throw(&self, entity: &str, args: FindManyArgs) -> Result<Record> {
        self.find_first(entity, args).await?.ok_or_else(|| not_found(entity))
    }

    /// The record identified by a unique key.
    async fn find_unique(&self, entity: &str, args: FindUniqueArgs) -> Result<Option<Record>> {
        let operation = Operation::FindUnique {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Record(record) => Ok(record),
            other => Err(unexpected("findUnique", other)),
        }
    }

    /// Like [`Client::find_unique`], failing with [`Error::NotFound`].
    async fn find_unique_or_throw(&self, entity: &str, args: FindUniqueArgs) -> Result<Record> {
        self.find_unique(entity, args).await?.ok_or_else(|| not_found(entity))
    }

    /// Number of records matching the filter.
    async fn count(&self, entity: &str, filter: Option<Filter>) -> Result<u64> {
        let operation = Operation::Count {
            entity: entity.to_string(),
            filter,
        };
        match self.execute(operation).await? {
            OperationResult::Count(count) => Ok(count),
            other => Err(unexpected("count", other)),
        }
    }

    /// Aggregates over the matching records.
    async fn aggregate(&self, entity: &str, args: AggregateArgs) -> Result<AggregateResult> {
        let operation = Operation::Aggregate {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Aggregate(result) => Ok(result),
            other => Err(unexpected("aggregate", other)),
        }
    }

    /// Aggregates per group.
    async fn group_by(&self, entity: &str, args: GroupByArgs) -> Result<Vec<GroupRow>> {
        let operation = Operation::GroupBy {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Groups(groups) => Ok(groups),
            other => Err(unexpected("groupBy", other)),
        }
    }

    /// Insert one record and return it.
    async fn create(&self, entity: &str, args: CreateArgs) -> Result<Record> {
        let operation = Operation::Create {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Written(record) => Ok(record),
            other => Err(unexpected("create", other)),
        }
    }

    /// Insert many records.
    async fn create_many(&self, entity: &str, args: CreateManyArgs) -> Result<BatchPayload> {
        let operation = Operation::CreateMany {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Batch(payload) => Ok(payload),
            other => Err(unexpected("createMany", other)),
        }
    }

    /// Update one record and return it.
    async fn update(&self, entity: &str, args: UpdateArgs) -> Result<Record> {
        let operation = Operation::Update {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Written(record) => Ok(record),
            other => Err(unexpected("update", other)),
        }
    }

    /// Update every matching record.
    async fn update_many(&self, entity: &str, args: UpdateManyArgs) -> Result<BatchPayload> {
        let operation = Operation::UpdateMany {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Batch(payload) => Ok(payload),
            other => Err(unexpected("updateMany", other)),
        }
    }

    /// Update a record if it exists, create it otherwise.
    async fn upsert(&self, entity: &str, args: UpsertArgs) -> Result<Record> {
        let operation = Operation::Upsert {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Written(record) => Ok(record),
            other => Err(unexpected("upsert", other)),
        }
    }

    /// Delete one record with its cascade closure.
    async fn delete(&self, entity: &str, args: DeleteArgs) -> Result<Deleted> {
        let operation = Operation::Delete {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Deleted(deleted) => Ok(deleted),
            other => Err(unexpected("delete", other)),
        }
    }

    /// Delete every matching record with its cascade closure.
    async fn delete_many(&self, entity: &str, args: DeleteManyArgs) -> Result<BatchPayload> {
        let operation = Operation::DeleteMany {
            entity: entity.to_string(),
            args,
        };
        match self.execute(operation).await? {
            OperationResult::Batch(payload) => Ok(payload),
            other => Err(unexpected("deleteMany", other)),
        }
    }
}
