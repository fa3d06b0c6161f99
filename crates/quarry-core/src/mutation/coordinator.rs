//! Write planning and execution.

use chrono::Utc;
use quarry_proto::{
    BatchPayload, CreateArgs, CreateManyArgs, DeleteArgs, DeleteManyArgs, Deleted, Filter,
    FindManyArgs, NullsOrder, Projection, Record, SortOrder, UniqueWhere, UpdateArgs, UpdateData,
    UpdateManyArgs, UpsertArgs, Value,
};
use tracing::debug;

use super::cascade::{delete_cascading, key_select, match_keys};
use super::input::{assignments, create_row, Assignment};
use super::references::{dedup, reference_checks, verify, ReferenceCheck};
use crate::catalog::{Catalog, EntityDef};
use crate::connection::codec::decode;
use crate::connection::{DbError, DbErrorKind, RowSet};
use crate::error::{CompileError, Error, Result};
use crate::query::{FilterCompiler, QueryPlanner, ReadPlan, ROOT_ALIAS};
use crate::session::Session;
use crate::sql::{Expr, Insert, OrderItem, Select, Update};

/// Map a unique violation reported by the store to [`Error::Conflict`]
/// naming the catalog constraint.
pub(crate) fn map_conflict(catalog: &Catalog, def: &EntityDef, err: Error) -> Error {
    let Error::Connection(DbError {
        kind: DbErrorKind::UniqueViolation { columns },
        ..
    }) = &err
    else {
        return err;
    };
    let fields: Vec<String> = columns
        .iter()
        .map(|column| {
            def.fields
                .iter()
                .find(|f| f.column() == column)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| column.clone())
        })
        .collect();
    let constraint = catalog
        .find_unique(&def.name, &fields)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| format!("{}_{}_key", def.name, fields.join("_")));
    Error::Conflict {
        entity: def.name.clone(),
        constraint,
        fields,
    }
}

fn identity_columns(def: &EntityDef) -> Vec<String> {
    def.identity_fields().map(|f| f.column().to_string()).collect()
}

fn identity_match(def: &EntityDef, alias: &str, identity: &[Value]) -> Expr {
    match_keys(alias, &identity_columns(def), &[identity.to_vec()])
}

fn decode_identity(def: &EntityDef, rows: RowSet) -> Result<Option<Vec<Value>>> {
    let Some(row) = rows.rows.into_iter().next() else {
        return Ok(None);
    };
    def.identity_fields()
        .zip(row)
        .map(|(field, raw)| decode(field.scalar, raw))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

fn identity_select(def: &EntityDef, alias: &str, filter: Expr) -> Select {
    let mut select = Select::from_table(def.table(), alias).and_where(filter);
    for column in identity_columns(def) {
        select = select.column(Expr::column(alias, column));
    }
    select
}

fn identity_order(def: &EntityDef, alias: &str) -> Vec<OrderItem> {
    identity_columns(def)
        .into_iter()
        .map(|column| OrderItem {
            expr: Expr::column(alias, column),
            direction: SortOrder::Asc,
            nulls: NullsOrder::First,
        })
        .collect()
}

/// `SET` clause; an empty update rewrites the identity with itself so the
/// statement still reports matched rows.
fn set_clause(def: &EntityDef, assignments: &[Assignment]) -> Vec<(String, Expr)> {
    if assignments.is_empty() {
        return identity_columns(def)
            .into_iter()
            .map(|c| (c.clone(), Expr::column(ROOT_ALIAS, c)))
            .collect();
    }
    assignments.iter().map(|a| a.to_sql(ROOT_ALIAS)).collect()
}

async fn read_back(session: &mut Session<'_>, plan: &ReadPlan, def: &EntityDef, identity: &[Value]) -> Result<Record> {
    plan.narrowed(identity_match(def, ROOT_ALIAS, identity))
        .execute_one(session)
        .await?
        .ok_or_else(|| Error::NotFound {
            entity: def.name.clone(),
        })
}

/// Run `body` inside a transaction or, when one is open, a savepoint.
macro_rules! atomically {
    ($session:expr, $body:expr) => {{
        let scope = $session.enter_scope().await?;
        let result = $body.await;
        $session.finish_scope(scope, result).await
    }};
}

/// A compiled `create`.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    entity: String,
    insert: Insert,
    checks: Vec<ReferenceCheck>,
    read_back: ReadPlan,
}

impl CreatePlan {
    /// Insert the row and return its post-image.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<Record> {
        atomically!(session, self.run(session))
    }

    async fn run(&self, session: &mut Session<'_>) -> Result<Record> {
        let catalog = session.catalog();
        let def = catalog.require_entity(&self.entity)?;
        verify(session, &def.name, &self.checks).await?;
        let inserted = session
            .run(self.insert.clone())
            .await
            .map_err(|e| map_conflict(catalog, def, e))?;
        let identity = decode_identity(def, inserted)?
            .ok_or_else(|| Error::InvalidData(format!("insert into {} returned no row", def.name)))?;
        debug!(entity = %def.name, "created record");
        read_back(session, &self.read_back, def, &identity).await
    }
}

/// A compiled `createMany`.
#[derive(Debug, Clone)]
pub struct CreateManyPlan {
    entity: String,
    table: String,
    // Rows grouped by the set of columns they write.
    groups: Vec<(Vec<String>, Vec<Vec<Value>>)>,
    skip_duplicates: bool,
    checks: Vec<ReferenceCheck>,
}

impl CreateManyPlan {
    /// Insert every row; returns the number of rows inserted.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<BatchPayload> {
        atomically!(session, self.run(session))
    }

    /// Statements the plan issues for a parameter budget.
    pub fn inserts(&self, max_params: usize) -> Vec<Insert> {
        let mut out = Vec::new();
        for (columns, rows) in &self.groups {
            let per_statement = (max_params / columns.len().max(1)).max(1);
            for chunk in rows.chunks(per_statement) {
                out.push(Insert {
                    table: self.table.clone(),
                    columns: columns.clone(),
                    rows: chunk
                        .iter()
                        .map(|row| row.iter().cloned().map(Expr::Param).collect())
                        .collect(),
                    ignore_conflicts: self.skip_duplicates,
                    returning: Vec::new(),
                });
            }
        }
        out
    }

    async fn run(&self, session: &mut Session<'_>) -> Result<BatchPayload> {
        let catalog = session.catalog();
        let def = catalog.require_entity(&self.entity)?;
        verify(session, &def.name, &self.checks).await?;
        let mut count = 0;
        for insert in self.inserts(session.config().max_params) {
            let inserted = session
                .run(insert)
                .await
                .map_err(|e| map_conflict(catalog, def, e))?;
            count += inserted.affected;
        }
        debug!(entity = %def.name, count, "created records");
        Ok(BatchPayload { count })
    }
}

/// A compiled `update`.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    entity: String,
    target: Select,
    assignments: Vec<Assignment>,
    checks: Vec<ReferenceCheck>,
    read_back: ReadPlan,
}

impl UpdatePlan {
    /// Update the row and return its post-image. Fails with
    /// [`Error::NotFound`] when no row matches.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<Record> {
        atomically!(session, self.run(session))
    }

    async fn find(&self, session: &mut Session<'_>, def: &EntityDef) -> Result<Option<Vec<Value>>> {
        let rows = session.run(self.target.clone()).await?;
        decode_identity(def, rows)
    }

    async fn run(&self, session: &mut Session<'_>) -> Result<Record> {
        let def = session.catalog().require_entity(&self.entity)?;
        let identity = self.find(session, def).await?.ok_or_else(|| Error::NotFound {
            entity: def.name.clone(),
        })?;
        self.apply(session, def, identity).await
    }

    async fn apply(&self, session: &mut Session<'_>, def: &EntityDef, identity: Vec<Value>) -> Result<Record> {
        let catalog = session.catalog();
        verify(session, &def.name, &self.checks).await?;
        session
            .run(Update {
                table: def.table().to_string(),
                alias: ROOT_ALIAS.to_string(),
                assignments: set_clause(def, &self.assignments),
                filter: Some(identity_match(def, ROOT_ALIAS, &identity)),
            })
            .await
            .map_err(|e| map_conflict(catalog, def, e))?;

        // The row may have moved to a new identity.
        let identity: Vec<Value> = def
            .identity
            .iter()
            .zip(identity)
            .map(|(name, old)| {
                self.assignments
                    .iter()
                    .find(|a| a.field() == name)
                    .and_then(Assignment::set_value)
                    .cloned()
                    .unwrap_or(old)
            })
            .collect();
        debug!(entity = %def.name, "updated record");
        read_back(session, &self.read_back, def, &identity).await
    }
}

/// A compiled `updateMany`.
#[derive(Debug, Clone)]
pub struct UpdateManyPlan {
    entity: String,
    update: Update,
    checks: Vec<ReferenceCheck>,
}

impl UpdateManyPlan {
    /// The statement the plan runs.
    pub fn statement(&self) -> &Update {
        &self.update
    }

    /// Update every matching row; returns the number of rows updated.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<BatchPayload> {
        atomically!(session, self.run(session))
    }

    async fn run(&self, session: &mut Session<'_>) -> Result<BatchPayload> {
        let catalog = session.catalog();
        let def = catalog.require_entity(&self.entity)?;
        verify(session, &def.name, &self.checks).await?;
        let updated = session
            .run(self.update.clone())
            .await
            .map_err(|e| map_conflict(catalog, def, e))?;
        debug!(entity = %def.name, count = updated.affected, "updated records");
        Ok(BatchPayload {
            count: updated.affected,
        })
    }
}

/// A compiled `upsert`.
#[derive(Debug, Clone)]
pub struct UpsertPlan {
    create: CreatePlan,
    update: UpdatePlan,
}

impl UpsertPlan {
    /// Update the row if it exists, create it otherwise.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<Record> {
        atomically!(session, self.run(session))
    }

    async fn run(&self, session: &mut Session<'_>) -> Result<Record> {
        let def = session.catalog().require_entity(&self.update.entity)?;
        match self.update.find(session, def).await? {
            Some(identity) => self.update.apply(session, def, identity).await,
            None => self.create.run(session).await,
        }
    }
}

/// A compiled `delete`.
#[derive(Debug, Clone)]
pub struct DeletePlan {
    entity: String,
    pre_image: ReadPlan,
    roots: Select,
}

impl DeletePlan {
    /// Delete the row and its cascade closure. Returns the pre-image and
    /// the number of rows removed.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<Deleted> {
        atomically!(session, self.run(session))
    }

    async fn run(&self, session: &mut Session<'_>) -> Result<Deleted> {
        let def = session.catalog().require_entity(&self.entity)?;
        let record = self.pre_image.execute_one(session).await?.ok_or_else(|| Error::NotFound {
            entity: def.name.clone(),
        })?;
        let affected = delete_cascading(session, def, self.roots.clone()).await?;
        debug!(entity = %def.name, affected, "deleted record");
        Ok(Deleted { record, affected })
    }
}

/// A compiled `deleteMany`.
#[derive(Debug, Clone)]
pub struct DeleteManyPlan {
    entity: String,
    roots: Select,
}

impl DeleteManyPlan {
    /// Delete every matching row and its cascade closure.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<BatchPayload> {
        atomically!(session, self.run(session))
    }

    async fn run(&self, session: &mut Session<'_>) -> Result<BatchPayload> {
        let def = session.catalog().require_entity(&self.entity)?;
        let count = delete_cascading(session, def, self.roots.clone()).await?;
        debug!(entity = %def.name, count, "deleted records");
        Ok(BatchPayload { count })
    }
}

/// Compiles writes against the catalog.
pub struct MutationCoordinator<'c> {
    catalog: &'c Catalog,
}

impl<'c> MutationCoordinator<'c> {
    /// Create a coordinator.
    pub fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }

    fn read_back(&self, entity: &str, projection: &Projection) -> Result<ReadPlan, CompileError> {
        QueryPlanner::new(self.catalog).find_many(entity, &FindManyArgs::new().with_projection(projection.clone()))
    }

    fn insert(def: &EntityDef, row: Vec<(String, Value)>) -> Insert {
        let (columns, values): (Vec<String>, Vec<Value>) = row.into_iter().unzip();
        Insert {
            table: def.table().to_string(),
            columns,
            rows: vec![values.into_iter().map(Expr::Param).collect()],
            ignore_conflicts: false,
            returning: identity_columns(def),
        }
    }

    /// Plan `create`.
    pub fn create(&self, entity: &str, args: &CreateArgs) -> Result<CreatePlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        let row = create_row(def, &args.data, Utc::now())?;
        let checks = reference_checks(self.catalog, def, |f| {
            row.iter().find(|c| c.field == f).map(|c| &c.value)
        });
        let insert = Self::insert(def, row.iter().map(|c| (c.column.clone(), c.value.clone())).collect());
        Ok(CreatePlan {
            entity: def.name.clone(),
            insert,
            checks,
            read_back: self.read_back(entity, &args.projection)?,
        })
    }

    /// Plan `createMany`.
    pub fn create_many(&self, entity: &str, args: &CreateManyArgs) -> Result<CreateManyPlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        let now = Utc::now();
        let mut groups: Vec<(Vec<String>, Vec<Vec<Value>>)> = Vec::new();
        let mut checks = Vec::new();
        for data in &args.data {
            let row = create_row(def, data, now)?;
            checks.extend(reference_checks(self.catalog, def, |f| {
                row.iter().find(|c| c.field == f).map(|c| &c.value)
            }));
            let columns: Vec<String> = row.iter().map(|c| c.column.clone()).collect();
            let values: Vec<Value> = row.into_iter().map(|c| c.value).collect();
            match groups.iter_mut().find(|(c, _)| *c == columns) {
                Some((_, rows)) => rows.push(values),
                None => groups.push((columns, vec![values])),
            }
        }
        Ok(CreateManyPlan {
            entity: def.name.clone(),
            table: def.table().to_string(),
            groups,
            skip_duplicates: args.skip_duplicates,
            checks: dedup(checks),
        })
    }

    fn update_plan(
        &self,
        def: &EntityDef,
        unique: &UniqueWhere,
        data: &UpdateData,
        projection: &Projection,
    ) -> Result<UpdatePlan, CompileError> {
        let assignments = assignments(def, data, Utc::now())?;
        let filter = FilterCompiler::new(self.catalog).compile_unique(&def.name, ROOT_ALIAS, unique)?;
        let checks = reference_checks(self.catalog, def, |f| {
            assignments.iter().find(|a| a.field() == f).and_then(Assignment::set_value)
        });
        Ok(UpdatePlan {
            entity: def.name.clone(),
            target: identity_select(def, ROOT_ALIAS, filter),
            assignments,
            checks,
            read_back: self.read_back(&def.name, projection)?,
        })
    }

    /// Plan `update`.
    pub fn update(&self, entity: &str, args: &UpdateArgs) -> Result<UpdatePlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        self.update_plan(def, &args.unique, &args.data, &args.projection)
    }

    /// Plan `updateMany`. With a limit, the rows updated are the first
    /// matching rows in identity order.
    pub fn update_many(&self, entity: &str, args: &UpdateManyArgs) -> Result<UpdateManyPlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        let assignments = assignments(def, &args.data, Utc::now())?;
        let checks = reference_checks(self.catalog, def, |f| {
            assignments.iter().find(|a| a.field() == f).and_then(Assignment::set_value)
        });
        let filter = self.limited_filter(def, args.filter.as_ref(), args.limit)?;
        Ok(UpdateManyPlan {
            entity: def.name.clone(),
            update: Update {
                table: def.table().to_string(),
                alias: ROOT_ALIAS.to_string(),
                assignments: set_clause(def, &assignments),
                filter,
            },
            checks,
        })
    }

    /// Root filter of a multi-row write; a limit picks the first rows in
    /// identity order through a subquery.
    fn limited_filter(
        &self,
        def: &EntityDef,
        filter: Option<&Filter>,
        limit: Option<u64>,
    ) -> Result<Option<Expr>, CompileError> {
        let mut compiler = FilterCompiler::new(self.catalog);
        let Some(limit) = limit else {
            return compiler.compile_opt(&def.name, ROOT_ALIAS, filter);
        };
        let alias = compiler.alias("t");
        let inner = compiler.compile_opt(&def.name, &alias, filter)?;
        let mut select = identity_select(def, &alias, inner.unwrap_or(Expr::Bool(true)));
        select.order_by = identity_order(def, &alias);
        select.limit = Some(limit);
        Ok(Some(Expr::InSubquery {
            exprs: identity_columns(def)
                .into_iter()
                .map(|c| Expr::column(ROOT_ALIAS, c))
                .collect(),
            query: Box::new(select),
            negated: false,
        }))
    }

    /// Plan `upsert`.
    pub fn upsert(&self, entity: &str, args: &UpsertArgs) -> Result<UpsertPlan, CompileError> {
        let create = self.create(
            entity,
            &CreateArgs::new(args.create.clone()).with_projection(args.projection.clone()),
        )?;
        let def = self.catalog.require_entity(entity)?;
        let update = self.update_plan(def, &args.unique, &args.update, &args.projection)?;
        Ok(UpsertPlan { create, update })
    }

    /// Plan `delete`.
    pub fn delete(&self, entity: &str, args: &DeleteArgs) -> Result<DeletePlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        let pre_image = QueryPlanner::new(self.catalog).unique(entity, &args.unique, &args.projection)?;
        let filter = FilterCompiler::new(self.catalog).compile_unique(entity, ROOT_ALIAS, &args.unique)?;
        Ok(DeletePlan {
            entity: def.name.clone(),
            pre_image,
            roots: key_select(self.catalog, def, ROOT_ALIAS, Some(filter)),
        })
    }

    /// Plan `deleteMany`. With a limit, the rows deleted are the first
    /// matching rows in identity order; cascaded rows do not count
    /// against it.
    pub fn delete_many(&self, entity: &str, args: &DeleteManyArgs) -> Result<DeleteManyPlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        let filter = FilterCompiler::new(self.catalog).compile_opt(entity, ROOT_ALIAS, args.filter.as_ref())?;
        let mut roots = key_select(self.catalog, def, ROOT_ALIAS, filter);
        if let Some(limit) = args.limit {
            roots.order_by = identity_order(def, ROOT_ALIAS);
            roots.limit = Some(limit);
        }
        Ok(DeleteManyPlan {
            entity: def.name.clone(),
            roots,
        })
    }
}
