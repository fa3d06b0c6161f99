//! Query planner for record reads.
//!
//! The planner resolves entities and relations against the catalog,
//! validates arguments and produces a [`ReadPlan`]. Planning needs no
//! connection; a plan is executed against a [`Session`] afterwards.

use std::fmt;

use quarry_proto::{FindManyArgs, FindUniqueArgs, Projection, Record, UniqueWhere};

use super::loader::read_unit;
use super::shape::{check_pagination, ChildPlan, LoadState, PlanBuilder, Shape, UnitPlan};
use crate::catalog::Catalog;
use crate::error::{CompileError, Result};
use crate::session::Session;
use crate::sql::{render, Dialect, Expr, Statement};

/// Alias of the root table of every read.
pub const ROOT_ALIAS: &str = "t0";

/// Which read operation a plan serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadKind {
    /// `findMany`.
    Many,
    /// `findFirst`.
    First,
    /// `findUnique`.
    Unique,
}

impl ReadKind {
    /// Operation name.
    pub fn name(self) -> &'static str {
        match self {
            ReadKind::Many => "findMany",
            ReadKind::First => "findFirst",
            ReadKind::Unique => "findUnique",
        }
    }
}

/// A compiled read.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPlan {
    /// Root entity.
    pub entity: String,
    /// Operation.
    pub kind: ReadKind,
    /// Root statement and its relation tree.
    pub root: UnitPlan,
}

impl ReadPlan {
    /// Run the plan and return records in order.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<Vec<Record>> {
        read_unit(session, &self.root).await
    }

    /// Run a plan that yields at most one record.
    pub async fn execute_one(&self, session: &mut Session<'_>) -> Result<Option<Record>> {
        Ok(self.execute(session).await?.into_iter().next())
    }

    /// The same read with an extra predicate on the root rows.
    pub fn narrowed(&self, predicate: Expr) -> ReadPlan {
        let mut plan = self.clone();
        plan.root.select = plan.root.select.and_where(predicate);
        plan
    }

    /// Describe the statements the plan would run.
    pub fn explain(&self, dialect: &dyn Dialect) -> Explain {
        let mut steps = Vec::new();
        collect_steps(&self.root, None, 0, dialect, &mut steps);
        Explain {
            operation: self.kind,
            entity: self.entity.clone(),
            steps,
        }
    }
}

/// One statement or join of an explained read.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplainStep {
    /// Nesting depth; 0 for the root.
    pub depth: usize,
    /// Relation path segment, `None` for the root.
    pub relation: Option<String>,
    /// Entity read.
    pub entity: String,
    /// How the rows are loaded; `None` for the root.
    pub state: Option<LoadState>,
    /// Rendered statement, for steps that run one.
    pub sql: Option<String>,
    /// In-memory window stage, when not a no-op.
    pub window: Option<String>,
}

/// Result of explaining a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Explain {
    /// Operation.
    pub operation: ReadKind,
    /// Root entity.
    pub entity: String,
    /// Steps in execution order.
    pub steps: Vec<ExplainStep>,
}

impl Explain {
    /// Number of statements the read issues for one chunk of keys.
    pub fn statement_count(&self) -> usize {
        self.steps.iter().filter(|s| s.sql.is_some()).count()
    }
}

impl fmt::Display for Explain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.operation.name(), self.entity)?;
        for step in &self.steps {
            let indent = "  ".repeat(step.depth + 1);
            match (&step.relation, step.state) {
                (Some(relation), Some(state)) => {
                    writeln!(f, "{indent}{relation} -> {} [{state:?}]", step.entity)?
                }
                _ => writeln!(f, "{indent}{}", step.entity)?,
            }
            if let Some(sql) = &step.sql {
                writeln!(f, "{indent}  sql: {sql}")?;
            }
            if let Some(window) = &step.window {
                writeln!(f, "{indent}  window: {window}")?;
            }
        }
        Ok(())
    }
}

fn describe_window(unit: &UnitPlan) -> Option<String> {
    let w = &unit.window;
    if w.is_identity() {
        return None;
    }
    let mut parts = Vec::new();
    if w.reversed {
        parts.push("reversed".to_string());
    }
    if !w.distinct.is_empty() {
        parts.push(format!("distinct({})", w.distinct.join(", ")));
    }
    if w.skip > 0 {
        parts.push(format!("skip {}", w.skip));
    }
    if let Some(take) = w.take {
        parts.push(format!("take {take}"));
    }
    Some(parts.join(", "))
}

fn collect_steps(
    unit: &UnitPlan,
    relation: Option<(&str, LoadState)>,
    depth: usize,
    dialect: &dyn Dialect,
    steps: &mut Vec<ExplainStep>,
) {
    steps.push(ExplainStep {
        depth,
        relation: relation.map(|(name, _)| name.to_string()),
        entity: unit.shape.entity.clone(),
        state: relation.map(|(_, state)| state),
        sql: Some(render(&Statement::Select(unit.select.clone()), dialect).sql),
        window: describe_window(unit),
    });
    collect_relations(&unit.shape, depth + 1, dialect, steps);
}

fn collect_relations(
    shape: &Shape,
    depth: usize,
    dialect: &dyn Dialect,
    steps: &mut Vec<ExplainStep>,
) {
    for relation in &shape.relations {
        match &relation.child {
            ChildPlan::Inline { shape: child, .. } => {
                steps.push(ExplainStep {
                    depth,
                    relation: Some(relation.name.clone()),
                    entity: relation.target.clone(),
                    state: Some(LoadState::InlineJoin),
                    sql: None,
                    window: None,
                });
                collect_relations(child, depth + 1, dialect, steps);
            }
            ChildPlan::Batch(unit) => collect_steps(
                unit,
                Some((relation.name.as_str(), LoadState::BatchLoad)),
                depth,
                dialect,
                steps,
            ),
        }
    }
}

/// Plans record reads against a catalog.
pub struct QueryPlanner<'c> {
    catalog: &'c Catalog,
}

impl<'c> QueryPlanner<'c> {
    /// Create a planner.
    pub fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }

    /// Plan `findMany`.
    pub fn find_many(&self, entity: &str, args: &FindManyArgs) -> Result<ReadPlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        check_pagination(def, args)?;
        let root = PlanBuilder::new(self.catalog).unit(entity, ROOT_ALIAS.into(), args, true, None, &[])?;
        Ok(ReadPlan {
            entity: def.name.clone(),
            kind: ReadKind::Many,
            root,
        })
    }

    /// Plan `findFirst`: `findMany` limited to one row. A negative take
    /// selects the last row of the ordering.
    pub fn find_first(&self, entity: &str, args: &FindManyArgs) -> Result<ReadPlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        check_pagination(def, args)?;
        let mut first = args.clone();
        first.take = Some(if args.take.is_some_and(|t| t < 0) { -1 } else { 1 });
        let root = PlanBuilder::new(self.catalog).unit(entity, ROOT_ALIAS.into(), &first, true, None, &[])?;
        Ok(ReadPlan {
            entity: def.name.clone(),
            kind: ReadKind::First,
            root,
        })
    }

    /// Plan `findUnique`.
    pub fn find_unique(&self, entity: &str, args: &FindUniqueArgs) -> Result<ReadPlan, CompileError> {
        self.unique(entity, &args.unique, &args.projection)
    }

    /// Plan a unique lookup with a projection.
    pub fn unique(
        &self,
        entity: &str,
        unique: &UniqueWhere,
        projection: &Projection,
    ) -> Result<ReadPlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        let args = FindManyArgs::new().with_projection(projection.clone());
        let root =
            PlanBuilder::new(self.catalog).unit(entity, ROOT_ALIAS.into(), &args, true, Some(unique), &[])?;
        Ok(ReadPlan {
            entity: def.name.clone(),
            kind: ReadKind::Unique,
            root,
        })
    }
}
