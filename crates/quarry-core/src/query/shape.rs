//! Compiled read shapes.
//!
//! A [`UnitPlan`] is one SQL statement: a root entity, its selected columns,
//! the to-one (and at most one to-many) relations folded in as `LEFT JOIN`s,
//! and correlated count subqueries. Relations that cannot be joined become
//! their own unit, executed once per level with the parent keys batched.

use quarry_proto::{
    FieldSelection, FindManyArgs, NullsOrder, Projection, SortOrder, UniqueWhere, Value,
};

use super::filter::FilterCompiler;
use super::loader::{build_select, UnitLayout};
use super::order::{effective_order, reverse_order, OrderKey, Window};
use crate::catalog::{Catalog, EntityDef, ScalarType};
use crate::error::CompileError;
use crate::sql::{Expr, OrderItem, Select};

/// A scalar column carried by a shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSlot {
    /// Field name.
    pub name: String,
    /// Column name.
    pub column: String,
    /// Field type.
    pub scalar: ScalarType,
    /// Fetched for joins, grouping or distinct; removed before returning.
    pub hidden: bool,
}

/// `_count` of a to-many relation.
#[derive(Debug, Clone, PartialEq)]
pub struct CountPlan {
    /// Relation field.
    pub relation: String,
    /// Related table.
    pub table: String,
    /// Alias of the count subquery.
    pub alias: String,
    /// `(source column, target column)` pairs.
    pub join: Vec<(String, String)>,
}

/// How a relation's rows are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Folded into the parent statement as a `LEFT JOIN`.
    InlineJoin,
    /// Fetched by a secondary query over the batched parent keys.
    BatchLoad,
}

/// The child side of an included relation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildPlan {
    /// Joined into the parent statement.
    Inline {
        /// Alias of the joined table.
        alias: String,
        /// Table name.
        table: String,
        /// Related shape.
        shape: Shape,
        /// Condition added to the join.
        filter: Option<Expr>,
    },
    /// Secondary statement.
    Batch(Box<UnitPlan>),
}

impl ChildPlan {
    /// The related shape.
    pub fn shape(&self) -> &Shape {
        match self {
            ChildPlan::Inline { shape, .. } => shape,
            ChildPlan::Batch(unit) => &unit.shape,
        }
    }
}

/// An included relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationPlan {
    /// Relation field.
    pub name: String,
    /// Related entity.
    pub target: String,
    /// Whether the relation holds many rows.
    pub to_many: bool,
    /// A to-one relation that must exist.
    pub required: bool,
    /// Join fields on the parent.
    pub source_fields: Vec<String>,
    /// Join fields on the child.
    pub target_fields: Vec<String>,
    /// `(source column, target column)` pairs.
    pub join: Vec<(String, String)>,
    /// Child plan.
    pub child: ChildPlan,
}

impl RelationPlan {
    /// How the relation is loaded.
    pub fn state(&self) -> LoadState {
        match self.child {
            ChildPlan::Inline { .. } => LoadState::InlineJoin,
            ChildPlan::Batch(_) => LoadState::BatchLoad,
        }
    }
}

/// The output shape of one entity in a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    /// Entity name.
    pub entity: String,
    /// Scalar columns; visible ones first.
    pub fields: Vec<FieldSlot>,
    /// Number of visible fields.
    pub visible: usize,
    /// Slots of the identity fields.
    pub identity: Vec<usize>,
    /// Included relations in request order.
    pub relations: Vec<RelationPlan>,
    /// Relation counts in request order.
    pub counts: Vec<CountPlan>,
}

impl Shape {
    /// Whether this shape or a joined descendant needs a secondary query.
    pub fn has_batch(&self) -> bool {
        self.relations.iter().any(|r| match &r.child {
            ChildPlan::Inline { shape, .. } => shape.has_batch(),
            ChildPlan::Batch(_) => true,
        })
    }

    /// Whether a to-many relation is joined into this shape.
    pub fn has_inline_many(&self) -> bool {
        self.relations
            .iter()
            .any(|r| r.to_many && r.state() == LoadState::InlineJoin)
    }
}

/// Anchor lookup for cursor pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct CursorPlan {
    /// Fetches the anchor's ordering values by its unique key.
    pub lookup: Select,
    /// Ordering in SQL order; the anchor columns follow it.
    pub keys: Vec<OrderKey>,
}

/// One compiled statement with everything needed to run and shape it.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitPlan {
    /// Alias of the root table.
    pub alias: String,
    /// Root shape.
    pub shape: Shape,
    /// Statement without cursor or batch-key conditions.
    pub select: Select,
    /// Column positions.
    pub layout: UnitLayout,
    /// Ordering as sent to the store.
    pub order: Vec<OrderKey>,
    /// Cursor anchor.
    pub cursor: Option<CursorPlan>,
    /// In-memory stage applied per result set (per parent for batches).
    pub window: Window,
}

/// Builds unit plans, sharing one alias sequence per read.
pub struct PlanBuilder<'c> {
    filters: FilterCompiler<'c>,
}

impl<'c> PlanBuilder<'c> {
    /// Create a builder.
    pub fn new(catalog: &'c Catalog) -> Self {
        Self {
            filters: FilterCompiler::new(catalog),
        }
    }

    fn catalog(&self) -> &'c Catalog {
        self.filters.catalog()
    }

    /// Compile a read rooted at `entity`.
    ///
    /// `root` marks the outermost statement of a request: only it may push
    /// pagination into SQL or join a to-many relation. `unique` adds a
    /// unique-key lookup to the filter.
    pub fn unit(
        &mut self,
        entity: &str,
        alias: String,
        args: &FindManyArgs,
        root: bool,
        unique: Option<&UniqueWhere>,
        hidden: &[String],
    ) -> Result<UnitPlan, CompileError> {
        let catalog = self.catalog();
        let def = catalog.require_entity(entity)?;
        for field in &args.distinct {
            catalog.require_field(def, field)?;
        }

        let mut filter = self.filters.compile_opt(entity, &alias, args.filter.as_ref())?;
        if let Some(unique) = unique {
            let lookup = self.filters.compile_unique(entity, &alias, unique)?;
            filter = Some(match filter {
                Some(existing) => Expr::and(vec![lookup, existing]),
                None => lookup,
            });
        }

        let reversed = args.take.is_some_and(|t| t < 0);
        let forward = effective_order(def, &args.order_by)?;
        let order = if reversed { reverse_order(&forward) } else { forward };

        let inline_many = root && args.take.is_none() && args.skip.is_none() && args.distinct.is_empty();
        let mut extra_hidden: Vec<String> = hidden.to_vec();
        extra_hidden.extend(args.distinct.iter().cloned());
        let shape = self.shape(def, &args.projection, &extra_hidden, inline_many)?;

        let cursor = match &args.cursor {
            Some(key) => Some(cursor_plan(&mut self.filters, def, key, &order)?),
            None => None,
        };

        let (mut select, layout) = build_select(&shape, def.table(), &alias);
        select.filter = filter;
        select.order_by = order.iter().map(|k| k.item(&alias)).collect();
        append_child_order(&shape, &mut select.order_by, catalog);

        let take = args.take.map(|t| t.unsigned_abs());
        let window = if root && args.distinct.is_empty() && !shape.has_inline_many() {
            select.limit = take;
            select.offset = args.skip.filter(|s| *s > 0);
            Window::passthrough(reversed)
        } else {
            Window {
                reversed,
                distinct: args.distinct.clone(),
                skip: args.skip.unwrap_or(0),
                take,
            }
        };

        Ok(UnitPlan {
            alias,
            shape,
            select,
            layout,
            order,
            cursor,
            window,
        })
    }

    /// Allocate a batch or subquery alias.
    pub fn alias(&mut self, prefix: &str) -> String {
        self.filters.alias(prefix)
    }

    fn shape(
        &mut self,
        def: &EntityDef,
        projection: &Projection,
        hidden: &[String],
        inline_many: bool,
    ) -> Result<Shape, CompileError> {
        let catalog = self.catalog();
        let mut fields: Vec<FieldSlot> = Vec::new();
        let push = |fields: &mut Vec<FieldSlot>, name: &str, hidden: bool| -> Result<(), CompileError> {
            if fields.iter().any(|f| f.name == name) {
                return Ok(());
            }
            let field = catalog.require_field(def, name)?;
            fields.push(FieldSlot {
                name: field.name.clone(),
                column: field.column().to_string(),
                scalar: field.scalar,
                hidden,
            });
            Ok(())
        };

        match &projection.fields {
            FieldSelection::All => {
                for field in &def.fields {
                    push(&mut fields, &field.name, false)?;
                }
            }
            FieldSelection::Select(names) => {
                for name in names {
                    push(&mut fields, name, false)?;
                }
            }
            FieldSelection::Omit(names) => {
                for name in names {
                    catalog.require_field(def, name)?;
                }
                for field in def.fields.iter().filter(|f| !names.contains(&f.name)) {
                    push(&mut fields, &field.name, false)?;
                }
            }
        }
        let visible = fields.len();

        let to_many_includes = projection
            .include
            .iter()
            .filter(|inc| catalog.relation(&def.name, &inc.relation).is_some_and(|v| v.is_to_many()))
            .count();

        let mut relations: Vec<RelationPlan> = Vec::with_capacity(projection.include.len());
        for include in &projection.include {
            if relations.iter().any(|r| r.name == include.relation) {
                return Err(CompileError::InvalidRelationArgs {
                    entity: def.name.clone(),
                    relation: include.relation.clone(),
                    reason: "relation included twice".into(),
                });
            }
            let view = catalog.require_relation(&def.name, &include.relation)?;
            let target = catalog.require_entity(view.target())?;
            let to_many = view.is_to_many();
            let args = &include.args;
            let paged = args.take.is_some()
                || args.skip.is_some()
                || args.cursor.is_some()
                || !args.order_by.is_empty()
                || !args.distinct.is_empty();
            if !to_many && (paged || args.filter.is_some()) {
                return Err(CompileError::InvalidRelationArgs {
                    entity: def.name.clone(),
                    relation: include.relation.clone(),
                    reason: "a to-one relation accepts only a projection".into(),
                });
            }

            let source_fields: Vec<String> = view.source_fields().into_iter().map(String::from).collect();
            let target_fields: Vec<String> = view.target_fields().into_iter().map(String::from).collect();
            let join = view
                .join_pairs()
                .into_iter()
                .map(|(s, t)| (column_of(def, s), column_of(target, t)))
                .collect();
            for name in &source_fields {
                push(&mut fields, name, true)?;
            }

            let inline = if to_many {
                inline_many
                    && to_many_includes == 1
                    && !paged
                    && args.projection.include.is_empty()
                    && args.projection.counts.is_empty()
            } else {
                args.projection.counts.is_empty()
            };

            let child = if inline {
                let alias = self.filters.alias("j");
                let filter = self.filters.compile_opt(&target.name, &alias, args.filter.as_ref())?;
                let shape = self.shape(target, &args.projection, &target_fields, false)?;
                ChildPlan::Inline {
                    alias,
                    table: target.table().to_string(),
                    shape,
                    filter,
                }
            } else {
                check_pagination(target, args)?;
                let alias = self.filters.alias("t");
                ChildPlan::Batch(Box::new(self.unit(
                    &target.name,
                    alias,
                    args,
                    false,
                    None,
                    &target_fields,
                )?))
            };

            relations.push(RelationPlan {
                name: include.relation.clone(),
                target: target.name.clone(),
                to_many,
                required: !to_many && !view.is_nullable(),
                source_fields,
                target_fields,
                join,
                child,
            });
        }

        let mut counts = Vec::with_capacity(projection.counts.len());
        for relation in &projection.counts {
            let view = catalog.require_relation(&def.name, relation)?;
            if !view.is_to_many() {
                return Err(CompileError::InvalidRelationArgs {
                    entity: def.name.clone(),
                    relation: relation.clone(),
                    reason: "_count applies to to-many relations only".into(),
                });
            }
            let target = catalog.require_entity(view.target())?;
            counts.push(CountPlan {
                relation: relation.clone(),
                table: target.table().to_string(),
                alias: self.filters.alias("c"),
                join: view
                    .join_pairs()
                    .into_iter()
                    .map(|(s, t)| (column_of(def, s), column_of(target, t)))
                    .collect(),
            });
        }

        for name in def.identity.iter().chain(hidden) {
            push(&mut fields, name, true)?;
        }
        let identity = def
            .identity
            .iter()
            .filter_map(|name| fields.iter().position(|f| &f.name == name))
            .collect();

        Ok(Shape {
            entity: def.name.clone(),
            fields,
            visible,
            identity,
            relations,
            counts,
        })
    }
}

/// Compile the anchor lookup of a cursor.
pub(crate) fn cursor_plan(
    filters: &mut FilterCompiler<'_>,
    def: &EntityDef,
    key: &[(String, Value)],
    order: &[OrderKey],
) -> Result<CursorPlan, CompileError> {
    let alias = filters.alias("t");
    let values = filters.unique_values(def, key)?;
    let mut lookup = Select::from_table(def.table(), alias.clone());
    for k in order {
        lookup = lookup.column(Expr::column(alias.as_str(), k.column.as_str()));
    }
    let condition = Expr::and(
        values
            .into_iter()
            .map(|(field, value)| Expr::eq(Expr::column(alias.as_str(), field.column()), Expr::param(value)))
            .collect(),
    );
    Ok(CursorPlan {
        lookup: lookup.and_where(condition).limit(1),
        keys: order.to_vec(),
    })
}

/// A page that skips or starts at a cursor needs an explicit ordering.
pub fn check_pagination(def: &EntityDef, args: &FindManyArgs) -> Result<(), CompileError> {
    if args.take.is_some() && (args.skip.is_some() || args.cursor.is_some()) && args.order_by.is_empty() {
        return Err(CompileError::PaginationRequiresOrderBy {
            entity: def.name.clone(),
        });
    }
    Ok(())
}

fn column_of(def: &EntityDef, field: &str) -> String {
    def.field(field)
        .map(|f| f.column().to_string())
        .unwrap_or_else(|| field.to_string())
}

/// Joined to-many children follow their parent, ordered by identity.
fn append_child_order(shape: &Shape, order_by: &mut Vec<OrderItem>, catalog: &Catalog) {
    for relation in &shape.relations {
        if let ChildPlan::Inline { alias, shape: child, .. } = &relation.child {
            if !relation.to_many {
                continue;
            }
            let Some(def) = catalog.entity(&child.entity) else {
                continue;
            };
            for field in def.identity_fields() {
                order_by.push(OrderItem {
                    expr: Expr::column(alias.as_str(), field.column()),
                    direction: SortOrder::Asc,
                    nulls: NullsOrder::First,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, RelationFieldDef, SchemaBundle};
    use quarry_proto::{Filter, OrderBy};

    fn catalog() -> Catalog {
        Catalog::load(
            SchemaBundle::new(1)
                .with_entity(
                    EntityDef::new("Project", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::new("name", ScalarType::String))
                        .with_relation(RelationFieldDef::many("floorplans", "Floorplan"))
                        .with_relation(RelationFieldDef::many("tags", "Tag")),
                )
                .with_entity(
                    EntityDef::new("Floorplan", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::new("projectId", ScalarType::Int))
                        .with_field(FieldDef::optional("label", ScalarType::String))
                        .with_relation(RelationFieldDef::owning("project", "Project", ["projectId"], ["id"])),
                )
                .with_entity(
                    EntityDef::new("Tag", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::new("projectId", ScalarType::Int))
                        .with_relation(RelationFieldDef::owning("project", "Project", ["projectId"], ["id"])),
                ),
        )
        .unwrap()
    }

    fn root(catalog: &Catalog, entity: &str, args: &FindManyArgs) -> Result<UnitPlan, CompileError> {
        PlanBuilder::new(catalog).unit(entity, "t0".into(), args, true, None, &[])
    }

    #[test]
    fn test_to_one_is_joined() {
        let catalog = catalog();
        let args = FindManyArgs::new()
            .with_projection(Projection::select(["label"]).include("project"));
        let unit = root(&catalog, "Floorplan", &args).unwrap();
        let relation = &unit.shape.relations[0];
        assert_eq!(relation.state(), LoadState::InlineJoin);
        assert!(relation.required);
        // label visible; projectId and id hidden.
        assert_eq!(unit.shape.visible, 1);
        assert!(unit.shape.fields.iter().any(|f| f.name == "projectId" && f.hidden));
        assert_eq!(unit.select.joins.len(), 1);
    }

    #[test]
    fn test_to_many_load_state() {
        let catalog = catalog();

        let single = FindManyArgs::new().with_projection(Projection::default().include("floorplans"));
        let unit = root(&catalog, "Project", &single).unwrap();
        assert_eq!(unit.shape.relations[0].state(), LoadState::InlineJoin);
        assert!(unit.window.is_identity());

        // A page at the root forces a secondary query.
        let paged = single.clone().with_take(10);
        let unit = root(&catalog, "Project", &paged).unwrap();
        assert_eq!(unit.shape.relations[0].state(), LoadState::BatchLoad);
        assert_eq!(unit.select.limit, Some(10));

        let two = FindManyArgs::new().with_projection(Projection::default().include("floorplans").include("tags"));
        let unit = root(&catalog, "Project", &two).unwrap();
        assert!(unit
            .shape
            .relations
            .iter()
            .all(|r| r.state() == LoadState::BatchLoad));

        let ordered = FindManyArgs::new().with_projection(
            Projection::default().include_with("floorplans", FindManyArgs::new().order_by(OrderBy::desc("label"))),
        );
        let unit = root(&catalog, "Project", &ordered).unwrap();
        assert_eq!(unit.shape.relations[0].state(), LoadState::BatchLoad);
    }

    #[test]
    fn test_relation_argument_errors() {
        let catalog = catalog();

        let filtered_to_one = FindManyArgs::new().with_projection(Projection::default().include_with(
            "project",
            FindManyArgs::new().with_filter(Filter::eq("name", "x")),
        ));
        assert!(matches!(
            root(&catalog, "Floorplan", &filtered_to_one),
            Err(CompileError::InvalidRelationArgs { .. })
        ));

        let count_to_one = FindManyArgs::new().with_projection(Projection::default().count("project"));
        assert!(matches!(
            root(&catalog, "Floorplan", &count_to_one),
            Err(CompileError::InvalidRelationArgs { .. })
        ));

        let unordered_page = FindManyArgs::new().with_projection(
            Projection::default().include_with("floorplans", FindManyArgs::new().with_take(2).with_skip(1)),
        );
        assert!(matches!(
            root(&catalog, "Project", &unordered_page),
            Err(CompileError::PaginationRequiresOrderBy { .. })
        ));

        let unknown = FindManyArgs::new().with_projection(Projection::select(["nope"]));
        assert!(matches!(
            root(&catalog, "Project", &unknown),
            Err(CompileError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_negative_take_reverses_sql_order() {
        let catalog = catalog();
        let args = FindManyArgs::new().order_by(OrderBy::asc("name")).with_take(-2);
        let unit = root(&catalog, "Project", &args).unwrap();
        assert_eq!(unit.order[0].direction, SortOrder::Desc);
        assert_eq!(unit.order[0].nulls, NullsOrder::Last);
        assert_eq!(unit.select.limit, Some(2));
        assert!(unit.window.reversed);
    }
}
