//! Aggregation and grouping.
//!
//! `aggregate` computes COUNT/SUM/AVG/MIN/MAX over the filtered rows, or
//! over a derived table when the request pages the input. `groupBy`
//! partitions rows by the `by` fields with a `HAVING` filter over groups.
//! Results are normalized: counts are integers, averages floats, sums
//! keep the field's numeric type, and aggregates over no input are null
//! (counts are zero).

use quarry_proto::{
    AggregateArgs, AggregateFunction, AggregateResult, AggregateSelection, AggregateValue, Filter,
    GroupByArgs, GroupOrderBy, GroupRow, Having, NullsOrder, QueryMode, ScalarFilter, SortOrder, Value,
};
use tracing::debug;

use super::filter::{lower_scalar, FilterCompiler};
use super::order::{cursor_predicate, default_nulls, effective_order, reverse_order, OrderKey};
use super::planner::ROOT_ALIAS;
use super::shape::{cursor_plan, CursorPlan};
use crate::catalog::{Catalog, EntityDef, ScalarType};
use crate::connection::codec::{coerce, decode};
use crate::error::{CompileError, Error, Result};
use crate::session::Session;
use crate::sql::{CompareOp, Expr, OrderItem, Select};

const DERIVED_ALIAS: &str = "d";

/// One requested aggregate with its result type.
#[derive(Debug, Clone, PartialEq)]
struct Output {
    selection: AggregateSelection,
    /// Type of the aggregated field; `None` for `COUNT(*)`.
    field: Option<ScalarType>,
}

impl Output {
    fn value(&self, raw: Value) -> Result<AggregateValue> {
        Ok(AggregateValue {
            function: self.selection.function,
            field: self.selection.field.clone(),
            value: normalize(self.selection.function, self.field, raw)?,
        })
    }
}

/// Normalize a raw aggregate result.
pub fn normalize(function: AggregateFunction, field: Option<ScalarType>, raw: Value) -> Result<Value> {
    match function {
        AggregateFunction::Count => Ok(match raw {
            Value::Null => Value::Int(0),
            Value::Float(f) => Value::Int(f as i64),
            other => other,
        }),
        _ if raw.is_null() => Ok(Value::Null),
        AggregateFunction::Avg => match raw {
            Value::Int(v) => Ok(Value::Float(v as f64)),
            Value::Float(v) => Ok(Value::Float(v)),
            Value::String(s) => s
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| Error::InvalidData(format!("non-numeric average {s:?}"))),
            other => Err(Error::InvalidData(format!("non-numeric average {}", other.type_name()))),
        },
        AggregateFunction::Sum | AggregateFunction::Min | AggregateFunction::Max => match field {
            Some(scalar) => decode(scalar, raw),
            None => Ok(raw),
        },
    }
}

/// Type of an aggregate's result, used to coerce `having` operands.
fn result_type(function: AggregateFunction, field: Option<ScalarType>) -> ScalarType {
    match (function, field) {
        (AggregateFunction::Count, _) | (_, None) => ScalarType::Int,
        (AggregateFunction::Avg, _) => ScalarType::Float,
        (_, Some(scalar)) => scalar,
    }
}

fn resolve(
    def: &EntityDef,
    selection: &AggregateSelection,
) -> Result<(Output, Option<String>), CompileError> {
    let function = selection.function;
    let Some(name) = &selection.field else {
        if function != AggregateFunction::Count {
            return Err(CompileError::InvalidAggregate {
                entity: def.name.clone(),
                field: "*".into(),
                function: function.name(),
            });
        }
        return Ok((
            Output {
                selection: selection.clone(),
                field: None,
            },
            None,
        ));
    };
    let field = def.field(name).ok_or_else(|| CompileError::UnknownField {
        entity: def.name.clone(),
        field: name.clone(),
    })?;
    let valid = match function {
        AggregateFunction::Count => true,
        AggregateFunction::Sum | AggregateFunction::Avg => field.scalar.is_numeric(),
        AggregateFunction::Min | AggregateFunction::Max => field.scalar.is_orderable(),
    };
    if !valid {
        return Err(CompileError::InvalidAggregate {
            entity: def.name.clone(),
            field: field.name.clone(),
            function: function.name(),
        });
    }
    Ok((
        Output {
            selection: selection.clone(),
            field: Some(field.scalar),
        },
        Some(field.column().to_string()),
    ))
}

fn aggregate_expr(function: AggregateFunction, column: Option<Expr>) -> Expr {
    Expr::Aggregate {
        function,
        arg: column.map(Box::new),
    }
}

/// A compiled `aggregate`.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    /// Entity.
    pub entity: String,
    /// Rows fed to the aggregates: the filtered table, paged when requested.
    source: Select,
    /// Whether `source` is wrapped as a derived table.
    derived: bool,
    /// Aggregate expressions over the source alias, in request order.
    columns: Vec<Expr>,
    outputs: Vec<Output>,
    cursor: Option<CursorPlan>,
}

impl AggregatePlan {
    fn statement(&self, extra: Option<Expr>) -> Select {
        let mut source = self.source.clone();
        if let Some(extra) = extra {
            source = source.and_where(extra);
        }
        let mut select = if self.derived {
            Select::from_derived(source, DERIVED_ALIAS)
        } else {
            source
        };
        for (i, column) in self.columns.iter().enumerate() {
            select = select.column_as(column.clone(), format!("a{i}"));
        }
        select
    }

    /// The statement without cursor positioning.
    pub fn select(&self) -> Select {
        self.statement(None)
    }

    /// Run the aggregate.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<AggregateResult> {
        let mut extra = None;
        if let Some(cursor) = &self.cursor {
            match anchor(session, cursor).await? {
                Some(predicate) => extra = Some(predicate),
                // No anchor row: aggregate over nothing.
                None => extra = Some(Expr::Bool(false)),
            }
        }
        let rows = session.run(self.statement(extra)).await?;
        let row = rows.rows.into_iter().next().unwrap_or_default();
        let values = self
            .outputs
            .iter()
            .enumerate()
            .map(|(i, output)| {
                let raw = row.get(i).cloned().unwrap_or(Value::Null);
                output.value(raw)
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(entity = %self.entity, aggregates = values.len(), "aggregate computed");
        Ok(AggregateResult { values })
    }
}

async fn anchor(session: &mut Session<'_>, cursor: &CursorPlan) -> Result<Option<Expr>> {
    let found = session.run(cursor.lookup.clone()).await?;
    let Some(row) = found.rows.into_iter().next() else {
        return Ok(None);
    };
    let values = cursor
        .keys
        .iter()
        .zip(row)
        .map(|(key, raw)| decode(key.scalar, raw))
        .collect::<Result<Vec<_>>>()?;
    Ok(Some(cursor_predicate(&cursor.keys, ROOT_ALIAS, &values)))
}

/// A compiled `groupBy`.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByPlan {
    /// Entity.
    pub entity: String,
    /// The grouped statement.
    pub select: Select,
    keys: Vec<(String, ScalarType)>,
    outputs: Vec<Output>,
    reversed: bool,
}

impl GroupByPlan {
    /// Run the grouping.
    pub async fn execute(&self, session: &mut Session<'_>) -> Result<Vec<GroupRow>> {
        let rows = session.run(self.select.clone()).await?;
        let mut groups = Vec::with_capacity(rows.len());
        for row in rows.rows {
            let mut cells = row.into_iter();
            let mut key = Vec::with_capacity(self.keys.len());
            for (name, scalar) in &self.keys {
                let raw = cells.next().unwrap_or(Value::Null);
                key.push((name.clone(), decode(*scalar, raw)?));
            }
            let mut aggregates = Vec::with_capacity(self.outputs.len());
            for output in &self.outputs {
                let raw = cells.next().unwrap_or(Value::Null);
                aggregates.push(output.value(raw)?);
            }
            groups.push(GroupRow { key, aggregates });
        }
        if self.reversed {
            groups.reverse();
        }
        debug!(entity = %self.entity, groups = groups.len(), "groupBy computed");
        Ok(groups)
    }
}

/// Compiles aggregate and grouping requests.
pub struct AggregationEngine<'c> {
    catalog: &'c Catalog,
}

impl<'c> AggregationEngine<'c> {
    /// Create an engine over a catalog.
    pub fn new(catalog: &'c Catalog) -> Self {
        Self { catalog }
    }

    /// Plan `count`: `COUNT(*)` of the filtered rows.
    pub fn count(&self, entity: &str, filter: Option<&Filter>) -> Result<AggregatePlan, CompileError> {
        let args = AggregateArgs {
            filter: filter.cloned(),
            select: vec![AggregateSelection::count_all()],
            ..AggregateArgs::default()
        };
        self.aggregate(entity, &args)
    }

    /// Plan `aggregate`.
    pub fn aggregate(&self, entity: &str, args: &AggregateArgs) -> Result<AggregatePlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        if args.take.is_some() && (args.skip.is_some() || args.cursor.is_some()) && args.order_by.is_empty() {
            return Err(CompileError::PaginationRequiresOrderBy {
                entity: def.name.clone(),
            });
        }

        let mut filters = FilterCompiler::new(self.catalog);
        let filter = filters.compile_opt(entity, ROOT_ALIAS, args.filter.as_ref())?;

        let mut outputs = Vec::with_capacity(args.select.len());
        let mut columns: Vec<Option<String>> = Vec::with_capacity(args.select.len());
        for selection in &args.select {
            let (output, column) = resolve(def, selection)?;
            outputs.push(output);
            columns.push(column);
        }

        let derived = args.take.is_some() || args.skip.is_some() || args.cursor.is_some();
        let mut source = Select::from_table(def.table(), ROOT_ALIAS);
        source.filter = filter;

        let mut cursor = None;
        let exprs = if derived {
            let reversed = args.take.is_some_and(|t| t < 0);
            let forward = effective_order(def, &args.order_by)?;
            let order: Vec<OrderKey> = if reversed { reverse_order(&forward) } else { forward };
            if let Some(key) = &args.cursor {
                cursor = Some(cursor_plan(&mut filters, def, key, &order)?);
            }
            source.order_by = order.iter().map(|k| k.item(ROOT_ALIAS)).collect();
            source.limit = args.take.map(|t| t.unsigned_abs());
            source.offset = args.skip.filter(|s| *s > 0);

            let mut needed: Vec<String> = columns.iter().flatten().cloned().collect();
            needed.sort();
            needed.dedup();
            // The derived table needs at least one column.
            if needed.is_empty() {
                source = source.column(Expr::Bool(true));
            }
            for column in &needed {
                source = source.column_as(Expr::column(ROOT_ALIAS, column.as_str()), column.as_str());
            }
            outputs
                .iter()
                .zip(&columns)
                .map(|(output, column)| {
                    aggregate_expr(
                        output.selection.function,
                        column.as_ref().map(|c| Expr::column(DERIVED_ALIAS, c.as_str())),
                    )
                })
                .collect()
        } else {
            outputs
                .iter()
                .zip(&columns)
                .map(|(output, column)| {
                    aggregate_expr(
                        output.selection.function,
                        column.as_ref().map(|c| Expr::column(ROOT_ALIAS, c.as_str())),
                    )
                })
                .collect()
        };

        Ok(AggregatePlan {
            entity: def.name.clone(),
            source,
            derived,
            columns: exprs,
            outputs,
            cursor,
        })
    }

    /// Plan `groupBy`.
    pub fn group_by(&self, entity: &str, args: &GroupByArgs) -> Result<GroupByPlan, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        if args.by.is_empty() {
            return Err(CompileError::EmptyGroupBy {
                entity: def.name.clone(),
            });
        }
        if (args.take.is_some() || args.skip.is_some()) && args.order_by.is_empty() {
            return Err(CompileError::PaginationRequiresOrderBy {
                entity: def.name.clone(),
            });
        }

        let mut filters = FilterCompiler::new(self.catalog);
        let mut select = Select::from_table(def.table(), ROOT_ALIAS);
        select.filter = filters.compile_opt(entity, ROOT_ALIAS, args.filter.as_ref())?;

        let mut keys = Vec::with_capacity(args.by.len());
        for (i, name) in args.by.iter().enumerate() {
            let field = self.catalog.require_field(def, name)?;
            let column = Expr::column(ROOT_ALIAS, field.column());
            select = select.column_as(column.clone(), format!("g{i}"));
            select.group_by.push(column);
            keys.push((field.name.clone(), field.scalar));
        }

        let mut outputs = Vec::with_capacity(args.aggregates.len());
        for (i, selection) in args.aggregates.iter().enumerate() {
            let (output, column) = resolve(def, selection)?;
            let expr = aggregate_expr(
                selection.function,
                column.map(|c| Expr::column(ROOT_ALIAS, c)),
            );
            select = select.column_as(expr, format!("a{i}"));
            outputs.push(output);
        }

        if let Some(having) = &args.having {
            select.having = Some(lower_having(def, args, having)?);
        }

        let reversed = args.take.is_some_and(|t| t < 0);
        let mut order = Vec::with_capacity(args.order_by.len() + args.by.len());
        for item in &args.order_by {
            match item {
                GroupOrderBy::Field(order_by) => {
                    if !args.by.contains(&order_by.field) {
                        return Err(CompileError::OrderByFieldNotInBy {
                            entity: def.name.clone(),
                            field: order_by.field.clone(),
                        });
                    }
                    let field = self.catalog.require_field(def, &order_by.field)?;
                    order.push(OrderItem {
                        expr: Expr::column(ROOT_ALIAS, field.column()),
                        direction: order_by.direction,
                        nulls: order_by.nulls.unwrap_or_else(|| default_nulls(order_by.direction)),
                    });
                }
                GroupOrderBy::Aggregate {
                    aggregate,
                    direction,
                } => {
                    if !args.aggregates.contains(aggregate) {
                        return Err(CompileError::OrderByFieldNotInBy {
                            entity: def.name.clone(),
                            field: aggregate_label(aggregate),
                        });
                    }
                    let (_, column) = resolve(def, aggregate)?;
                    order.push(OrderItem {
                        expr: aggregate_expr(
                            aggregate.function,
                            column.map(|c| Expr::column(ROOT_ALIAS, c)),
                        ),
                        direction: *direction,
                        nulls: default_nulls(*direction),
                    });
                }
            }
        }
        // Group keys make the order total.
        for (name, _) in &keys {
            if let Some(field) = def.field(name) {
                order.push(OrderItem {
                    expr: Expr::column(ROOT_ALIAS, field.column()),
                    direction: SortOrder::Asc,
                    nulls: NullsOrder::First,
                });
            }
        }
        if reversed {
            for item in &mut order {
                item.direction = item.direction.reverse();
                item.nulls = item.nulls.reverse();
            }
        }
        select.order_by = order;
        select.limit = args.take.map(|t| t.unsigned_abs());
        select.offset = args.skip.filter(|s| *s > 0);

        Ok(GroupByPlan {
            entity: def.name.clone(),
            select,
            keys,
            outputs,
            reversed,
        })
    }
}

fn aggregate_label(selection: &AggregateSelection) -> String {
    match &selection.field {
        Some(field) => format!("{}.{field}", selection.function.name()),
        None => format!("{}.*", selection.function.name()),
    }
}

fn lower_having(def: &EntityDef, args: &GroupByArgs, having: &Having) -> Result<Expr, CompileError> {
    match having {
        Having::And(items) => Ok(Expr::and(
            items
                .iter()
                .map(|h| lower_having(def, args, h))
                .collect::<Result<_, _>>()?,
        )),
        Having::Or(items) => Ok(Expr::or(
            items
                .iter()
                .map(|h| lower_having(def, args, h))
                .collect::<Result<_, _>>()?,
        )),
        Having::Not(inner) => Ok(Expr::not(lower_having(def, args, inner)?)),
        Having::Field { field, condition } => {
            if !args.by.contains(field) {
                return Err(CompileError::HavingFieldNotInBy {
                    entity: def.name.clone(),
                    field: field.clone(),
                });
            }
            let field = def.field(field).ok_or_else(|| CompileError::UnknownField {
                entity: def.name.clone(),
                field: field.clone(),
            })?;
            lower_scalar(def, field, ROOT_ALIAS, condition, QueryMode::Default)
        }
        Having::Aggregate {
            aggregate,
            condition,
        } => {
            let allowed = aggregate.field.is_none()
                || aggregate.field.as_ref().is_some_and(|f| args.by.contains(f))
                || args.aggregates.contains(aggregate);
            if !allowed {
                return Err(CompileError::HavingFieldNotInBy {
                    entity: def.name.clone(),
                    field: aggregate_label(aggregate),
                });
            }
            let (output, column) = resolve(def, aggregate)?;
            let expr = aggregate_expr(
                aggregate.function,
                column.map(|c| Expr::column(ROOT_ALIAS, c)),
            );
            lower_aggregate_condition(def, aggregate, result_type(aggregate.function, output.field), expr, condition)
        }
    }
}

fn lower_aggregate_condition(
    def: &EntityDef,
    aggregate: &AggregateSelection,
    scalar: ScalarType,
    expr: Expr,
    condition: &ScalarFilter,
) -> Result<Expr, CompileError> {
    let label = aggregate_label(aggregate);
    let param = |value: &Value| {
        coerce(scalar, value)
            .map(Expr::Param)
            .ok_or_else(|| CompileError::InvalidValue {
                entity: def.name.clone(),
                field: label.clone(),
                expected: scalar.name(),
                found: value.type_name(),
            })
    };
    let compare = |op: CompareOp, value: &Value| -> Result<Expr, CompileError> {
        if value.is_null() {
            return Err(CompileError::InvalidPredicate {
                entity: def.name.clone(),
                field: label.clone(),
                reason: "cannot compare against null".into(),
            });
        }
        Ok(Expr::compare(op, expr.clone(), param(value)?))
    };
    match condition {
        ScalarFilter::Equals(Value::Null) => Ok(Expr::is_null(expr)),
        ScalarFilter::Not(Value::Null) => Ok(Expr::is_not_null(expr)),
        ScalarFilter::Equals(v) => compare(CompareOp::Eq, v),
        ScalarFilter::Not(v) => compare(CompareOp::Ne, v),
        ScalarFilter::Lt(v) => compare(CompareOp::Lt, v),
        ScalarFilter::Lte(v) => compare(CompareOp::Lte, v),
        ScalarFilter::Gt(v) => compare(CompareOp::Gt, v),
        ScalarFilter::Gte(v) => compare(CompareOp::Gte, v),
        ScalarFilter::In(values) | ScalarFilter::NotIn(values) => Ok(Expr::InList {
            expr: Box::new(expr.clone()),
            list: values.iter().map(param).collect::<Result<_, _>>()?,
            negated: matches!(condition, ScalarFilter::NotIn(_)),
        }),
        _ => Err(CompileError::InvalidPredicate {
            entity: def.name.clone(),
            field: label.clone(),
            reason: "aggregate conditions support equality, ranges and in lists".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, SchemaBundle};
    use crate::sql::{render, SqliteDialect, Statement};
    use quarry_proto::OrderBy;

    fn catalog() -> Catalog {
        Catalog::load(
            SchemaBundle::new(1).with_entity(
                EntityDef::new("Floorplan", "id")
                    .with_field(FieldDef::new("id", ScalarType::Int))
                    .with_field(FieldDef::new("kind", ScalarType::String))
                    .with_field(FieldDef::optional("area", ScalarType::Float))
                    .with_field(FieldDef::optional("rooms", ScalarType::Int))
                    .with_field(FieldDef::optional("meta", ScalarType::Json)),
            ),
        )
        .unwrap()
    }

    fn sql(select: Select) -> String {
        render(&Statement::Select(select), &SqliteDialect).sql
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(AggregateFunction::Count, None, Value::Null).unwrap(), Value::Int(0));
        assert_eq!(
            normalize(AggregateFunction::Sum, Some(ScalarType::Int), Value::Int(7)).unwrap(),
            Value::Int(7)
        );
        assert_eq!(
            normalize(AggregateFunction::Sum, Some(ScalarType::Float), Value::Int(7)).unwrap(),
            Value::Float(7.0)
        );
        assert_eq!(
            normalize(AggregateFunction::Avg, Some(ScalarType::Int), Value::Int(2)).unwrap(),
            Value::Float(2.0)
        );
        assert_eq!(
            normalize(AggregateFunction::Max, Some(ScalarType::Int), Value::Null).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_aggregate_validation() {
        let catalog = catalog();
        let engine = AggregationEngine::new(&catalog);
        assert!(matches!(
            engine.aggregate("Floorplan", &AggregateArgs::new().with(AggregateSelection::sum("kind"))),
            Err(CompileError::InvalidAggregate { function: "_sum", .. })
        ));
        assert!(matches!(
            engine.aggregate("Floorplan", &AggregateArgs::new().with(AggregateSelection::max("meta"))),
            Err(CompileError::InvalidAggregate { .. })
        ));
        assert!(engine
            .aggregate("Floorplan", &AggregateArgs::new().with(AggregateSelection::count("meta")))
            .is_ok());
    }

    #[test]
    fn test_paged_aggregate_uses_derived_table() {
        let catalog = catalog();
        let engine = AggregationEngine::new(&catalog);
        let plain = engine
            .aggregate("Floorplan", &AggregateArgs::new().with(AggregateSelection::avg("area")))
            .unwrap();
        assert_eq!(
            sql(plain.select()),
            "SELECT AVG(\"t0\".\"area\") AS \"a0\" FROM \"Floorplan\" AS \"t0\""
        );

        let paged = engine
            .aggregate(
                "Floorplan",
                &AggregateArgs::new()
                    .with(AggregateSelection::sum("rooms"))
                    .with(AggregateSelection::count_all())
                    .order_by(OrderBy::desc("area"))
                    .with_take(3),
            )
            .unwrap();
        let text = sql(paged.select());
        assert!(text.starts_with("SELECT SUM(\"d\".\"rooms\") AS \"a0\", COUNT(*) AS \"a1\" FROM (SELECT"));
        assert!(text.contains("LIMIT 3"));
    }

    #[test]
    fn test_group_by_validation() {
        let catalog = catalog();
        let engine = AggregationEngine::new(&catalog);

        let empty: Vec<String> = Vec::new();
        assert!(matches!(
            engine.group_by("Floorplan", &GroupByArgs::new(empty)),
            Err(CompileError::EmptyGroupBy { .. })
        ));

        let having_outside = GroupByArgs::new(["kind"]).with_having(Having::Field {
            field: "rooms".into(),
            condition: ScalarFilter::Gt(Value::Int(1)),
        });
        assert!(matches!(
            engine.group_by("Floorplan", &having_outside),
            Err(CompileError::HavingFieldNotInBy { .. })
        ));

        let unselected_having = GroupByArgs::new(["kind"])
            .with_having(Having::aggregate(AggregateSelection::avg("area"), ScalarFilter::Gt(Value::Int(1))));
        assert!(matches!(
            engine.group_by("Floorplan", &unselected_having),
            Err(CompileError::HavingFieldNotInBy { .. })
        ));

        let order_outside = GroupByArgs::new(["kind"]).order_by(GroupOrderBy::Field(OrderBy::asc("area")));
        assert!(matches!(
            engine.group_by("Floorplan", &order_outside),
            Err(CompileError::OrderByFieldNotInBy { .. })
        ));

        let unselected = GroupByArgs::new(["kind"]).order_by(GroupOrderBy::Aggregate {
            aggregate: AggregateSelection::sum("rooms"),
            direction: SortOrder::Desc,
        });
        assert!(matches!(
            engine.group_by("Floorplan", &unselected),
            Err(CompileError::OrderByFieldNotInBy { .. })
        ));

        let unordered_page = GroupByArgs::new(["kind"]).with_take(2);
        assert!(matches!(
            engine.group_by("Floorplan", &unordered_page),
            Err(CompileError::PaginationRequiresOrderBy { .. })
        ));
    }

    #[test]
    fn test_group_by_sql() {
        let catalog = catalog();
        let engine = AggregationEngine::new(&catalog);
        let args = GroupByArgs::new(["kind"])
            .with(AggregateSelection::count_all())
            .with_having(Having::count(ScalarFilter::Gte(Value::Int(2))));
        let plan = engine.group_by("Floorplan", &args).unwrap();
        let text = sql(plan.select);
        assert!(text.contains("GROUP BY \"t0\".\"kind\""));
        assert!(text.contains("HAVING (COUNT(*) >= ?1)"));
        assert!(text.ends_with("ORDER BY \"t0\".\"kind\" ASC NULLS FIRST"));
    }
}
