//! Relation loading and row materialization.
//!
//! Runs the statements of a compiled read, turns raw rows into [`Record`]s
//! and fetches batch-loaded relations level by level: one secondary query
//! per relation per level, with parent keys chunked into `IN` lists.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use quarry_proto::{Record, RelationValue, Value};
use tracing::debug;

use super::order::{cursor_predicate, value_key};
use super::shape::{ChildPlan, RelationPlan, Shape, UnitPlan};
use crate::connection::codec::decode;
use crate::error::{ConsistencyError, Error, Result};
use crate::session::Session;
use crate::sql::{Expr, Join, Select, SelectItem};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Output column positions of one shape within a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitLayout {
    /// Column of each field slot.
    pub fields: Vec<usize>,
    /// Column of each count.
    pub counts: Vec<usize>,
    /// Layout of each joined relation, aligned with the shape's relations.
    pub relations: Vec<Option<UnitLayout>>,
}

/// Build the columns and joins of a shape rooted at `alias`.
pub(crate) fn build_select(shape: &Shape, table: &str, alias: &str) -> (Select, UnitLayout) {
    let mut select = Select::from_table(table, alias);
    let mut next = 0;
    let layout = add_columns(&mut select, shape, alias, &mut next);
    (select, layout)
}

fn add_columns(select: &mut Select, shape: &Shape, alias: &str, next: &mut usize) -> UnitLayout {
    let mut push = |select: &mut Select, expr: Expr| {
        let position = *next;
        select.columns.push(SelectItem {
            expr,
            alias: Some(format!("c{position}")),
        });
        *next += 1;
        position
    };

    let mut layout = UnitLayout::default();
    for slot in &shape.fields {
        layout
            .fields
            .push(push(select, Expr::column(alias, slot.column.as_str())));
    }
    for count in &shape.counts {
        let condition = Expr::and(
            count
                .join
                .iter()
                .map(|(source, target)| {
                    Expr::eq(
                        Expr::column(count.alias.as_str(), target.as_str()),
                        Expr::column(alias, source.as_str()),
                    )
                })
                .collect(),
        );
        let subquery = Select::from_table(count.table.as_str(), count.alias.as_str())
            .column(Expr::count_all())
            .and_where(condition);
        layout
            .counts
            .push(push(select, Expr::Subquery(Box::new(subquery))));
    }
    drop(push);

    for relation in &shape.relations {
        let ChildPlan::Inline {
            alias: child_alias,
            table,
            shape: child,
            filter,
        } = &relation.child
        else {
            layout.relations.push(None);
            continue;
        };
        let mut on: Vec<Expr> = relation
            .join
            .iter()
            .map(|(source, target)| {
                Expr::eq(
                    Expr::column(child_alias.as_str(), target.as_str()),
                    Expr::column(alias, source.as_str()),
                )
            })
            .collect();
        on.extend(filter.clone());
        select.joins.push(Join {
            table: table.clone(),
            alias: child_alias.clone(),
            on: Expr::and(on),
        });
        let child_layout = add_columns(select, child, child_alias, next);
        layout.relations.push(Some(child_layout));
    }
    layout
}

fn build_record(shape: &Shape, layout: &UnitLayout, row: &[Value]) -> Result<Record> {
    let cell = |col: usize| row.get(col).cloned().unwrap_or(Value::Null);
    let mut record = Record::default();
    for (slot, &col) in shape.fields.iter().zip(&layout.fields) {
        record.fields.push((slot.name.clone(), decode(slot.scalar, cell(col))?));
    }
    for (count, &col) in shape.counts.iter().zip(&layout.counts) {
        let n = match cell(col) {
            Value::Int(n) => n.max(0) as u64,
            _ => 0,
        };
        record.counts.push((count.relation.clone(), n));
    }
    for (relation, child_layout) in shape.relations.iter().zip(&layout.relations) {
        let value = match (&relation.child, child_layout) {
            (ChildPlan::Inline { shape: child, .. }, Some(child_layout)) => {
                let present = !child.identity.is_empty()
                    && child
                        .identity
                        .iter()
                        .all(|&slot| !cell(child_layout.fields[slot]).is_null());
                if relation.to_many {
                    let mut rows = Vec::new();
                    if present {
                        rows.push(build_record(child, child_layout, row)?);
                    }
                    RelationValue::Many(rows)
                } else if present {
                    RelationValue::One(Some(Box::new(build_record(child, child_layout, row)?)))
                } else if relation.required {
                    return Err(missing(shape, relation));
                } else {
                    RelationValue::One(None)
                }
            }
            _ if relation.to_many => RelationValue::Many(Vec::new()),
            _ => RelationValue::One(None),
        };
        record.relations.push((relation.name.clone(), value));
    }
    Ok(record)
}

fn missing(shape: &Shape, relation: &RelationPlan) -> Error {
    Error::Consistency(ConsistencyError::MissingRelatedRow {
        entity: shape.entity.clone(),
        relation: relation.name.clone(),
    })
}

fn identity_key(shape: &Shape, record: &Record) -> String {
    value_key(shape.identity.iter().map(|&slot| &record.fields[slot].1))
}

/// Turn raw rows into records.
///
/// Rows produced by a joined to-many relation arrive grouped by parent;
/// consecutive rows of the same parent fold into one record.
pub(crate) fn materialize(shape: &Shape, layout: &UnitLayout, rows: Vec<Vec<Value>>) -> Result<Vec<Record>> {
    let folding = shape.has_inline_many();
    let mut records: Vec<Record> = Vec::with_capacity(rows.len());
    let mut last_key: Option<String> = None;
    for row in rows {
        let record = build_record(shape, layout, &row)?;
        if folding {
            let key = identity_key(shape, &record);
            if last_key.as_deref() == Some(key.as_str()) {
                if let Some(previous) = records.last_mut() {
                    fold_children(shape, previous, record);
                }
                continue;
            }
            last_key = Some(key);
        }
        records.push(record);
    }
    Ok(records)
}

fn fold_children(shape: &Shape, into: &mut Record, from: Record) {
    for (i, (_, value)) in from.relations.into_iter().enumerate() {
        let joined_many = shape
            .relations
            .get(i)
            .is_some_and(|r| r.to_many && matches!(r.child, ChildPlan::Inline { .. }));
        if !joined_many {
            continue;
        }
        if let (Some((_, RelationValue::Many(existing))), RelationValue::Many(more)) =
            (into.relations.get_mut(i), value)
        {
            existing.extend(more);
        }
    }
}

/// Run one unit statement, resolving its cursor and extra condition.
pub(crate) async fn fetch_unit(
    session: &mut Session<'_>,
    unit: &UnitPlan,
    extra: Option<Expr>,
) -> Result<Vec<Record>> {
    let mut select = unit.select.clone();
    if let Some(cursor) = &unit.cursor {
        let found = session.run(cursor.lookup.clone()).await?;
        let Some(anchor) = found.rows.into_iter().next() else {
            debug!(entity = %unit.shape.entity, "cursor row not found; empty page");
            return Ok(Vec::new());
        };
        let anchor = cursor
            .keys
            .iter()
            .zip(anchor)
            .map(|(key, raw)| decode(key.scalar, raw))
            .collect::<Result<Vec<_>>>()?;
        select = select.and_where(cursor_predicate(&cursor.keys, &unit.alias, &anchor));
    }
    if let Some(extra) = extra {
        select = select.and_where(extra);
    }
    let rows = session.run(select).await?;
    materialize(&unit.shape, &unit.layout, rows.rows)
}

/// Execute a root unit: fetch, window, load relations, strip hidden fields.
pub(crate) async fn read_unit(session: &mut Session<'_>, unit: &UnitPlan) -> Result<Vec<Record>> {
    let rows = fetch_unit(session, unit, None).await?;
    let mut records = unit.window.apply(rows);
    load_relations(session, &unit.shape, records.iter_mut().collect()).await?;
    strip_hidden(&unit.shape, &mut records);
    Ok(records)
}

/// Load every batch relation below `shape` for the given parents.
pub(crate) fn load_relations<'a, 's: 'a>(
    session: &'a mut Session<'s>,
    shape: &'a Shape,
    mut parents: Vec<&'a mut Record>,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        if parents.is_empty() || !shape.has_batch() {
            return Ok(());
        }
        for (index, relation) in shape.relations.iter().enumerate() {
            match &relation.child {
                ChildPlan::Inline { shape: child, .. } => {
                    if !child.has_batch() {
                        continue;
                    }
                    let mut nested: Vec<&mut Record> = Vec::new();
                    for parent in parents.iter_mut() {
                        match parent.relations.get_mut(index).map(|(_, v)| v) {
                            Some(RelationValue::One(Some(record))) => nested.push(record.as_mut()),
                            Some(RelationValue::Many(records)) => nested.extend(records.iter_mut()),
                            _ => {}
                        }
                    }
                    load_relations(&mut *session, child, nested).await?;
                }
                ChildPlan::Batch(unit) => {
                    load_batch(&mut *session, shape, relation, unit, index, &mut parents).await?;
                }
            }
        }
        Ok(())
    })
}

/// `target IN (keys)` for one chunk of parent keys.
fn key_filter(unit: &UnitPlan, relation: &RelationPlan, keys: &[Vec<Value>]) -> Expr {
    let column = |field: &str| {
        let col = unit
            .shape
            .fields
            .iter()
            .find(|slot| slot.name == field)
            .map(|slot| slot.column.clone())
            .unwrap_or_else(|| field.to_string());
        Expr::column(unit.alias.as_str(), col)
    };
    if let [field] = relation.target_fields.as_slice() {
        return Expr::InList {
            expr: Box::new(column(field)),
            list: keys
                .iter()
                .filter_map(|k| k.first().cloned())
                .map(Expr::Param)
                .collect(),
            negated: false,
        };
    }
    Expr::or(
        keys.iter()
            .map(|key| {
                Expr::and(
                    relation
                        .target_fields
                        .iter()
                        .zip(key)
                        .map(|(field, value)| Expr::eq(column(field), Expr::Param(value.clone())))
                        .collect(),
                )
            })
            .collect(),
    )
}

fn key_of(record: &Record, fields: &[String]) -> Vec<Value> {
    fields
        .iter()
        .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
        .collect()
}

async fn load_batch(
    session: &mut Session<'_>,
    shape: &Shape,
    relation: &RelationPlan,
    unit: &UnitPlan,
    index: usize,
    parents: &mut [&mut Record],
) -> Result<()> {
    let mut seen = HashSet::new();
    let mut keys: Vec<Vec<Value>> = Vec::new();
    for parent in parents.iter() {
        let key = key_of(parent, &relation.source_fields);
        if key.iter().any(Value::is_null) {
            continue;
        }
        if seen.insert(value_key(&key)) {
            keys.push(key);
        }
    }

    let mut children: Vec<Record> = Vec::new();
    let chunk_size = session.config().batch_chunk_size.max(1);
    for chunk in keys.chunks(chunk_size) {
        let filter = key_filter(unit, relation, chunk);
        children.extend(fetch_unit(&mut *session, unit, Some(filter)).await?);
    }
    debug!(
        entity = %shape.entity,
        relation = %relation.name,
        parents = keys.len(),
        rows = children.len(),
        "batch loaded relation"
    );

    load_relations(&mut *session, &unit.shape, children.iter_mut().collect()).await?;

    let mut groups: HashMap<String, Vec<Record>> = HashMap::new();
    for child in children {
        let key = value_key(&key_of(&child, &relation.target_fields));
        groups.entry(key).or_default().push(child);
    }

    for parent in parents.iter_mut() {
        let key = key_of(parent, &relation.source_fields);
        let absent = key.iter().any(Value::is_null);
        let rows = groups.get(&value_key(&key)).cloned().unwrap_or_default();
        let mut rows = unit.window.apply(rows);
        let value = if relation.to_many {
            RelationValue::Many(rows)
        } else if !rows.is_empty() {
            RelationValue::One(Some(Box::new(rows.swap_remove(0))))
        } else if relation.required && !absent {
            return Err(missing(shape, relation));
        } else {
            RelationValue::One(None)
        };
        if let Some(slot) = parent.relations.get_mut(index) {
            slot.1 = value;
        }
    }
    Ok(())
}

/// Remove fields fetched only for internal use, recursively.
pub(crate) fn strip_hidden(shape: &Shape, records: &mut [Record]) {
    for record in records.iter_mut() {
        record.fields.truncate(shape.visible);
        for (relation, (_, value)) in shape.relations.iter().zip(record.relations.iter_mut()) {
            let child = relation.child.shape();
            match value {
                RelationValue::One(Some(inner)) => strip_hidden(child, std::slice::from_mut(inner.as_mut())),
                RelationValue::One(None) => {}
                RelationValue::Many(items) => strip_hidden(child, items),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, EntityDef, FieldDef, RelationFieldDef, ScalarType, SchemaBundle};
    use crate::query::shape::PlanBuilder;
    use crate::sql::{render, SqliteDialect, Statement};
    use quarry_proto::{FindManyArgs, Projection};

    fn catalog() -> Catalog {
        Catalog::load(
            SchemaBundle::new(1)
                .with_entity(
                    EntityDef::new("Project", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::new("name", ScalarType::String))
                        .with_relation(RelationFieldDef::many("floorplans", "Floorplan")),
                )
                .with_entity(
                    EntityDef::new("Floorplan", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::new("projectId", ScalarType::Int))
                        .with_relation(RelationFieldDef::owning("project", "Project", ["projectId"], ["id"])),
                ),
        )
        .unwrap()
    }

    #[test]
    fn test_joined_select_and_materialize() {
        let catalog = catalog();
        let args = FindManyArgs::new()
            .with_projection(Projection::select(["name"]).include("floorplans").count("floorplans"));
        let unit = PlanBuilder::new(&catalog)
            .unit("Project", "t0".into(), &args, true, None, &[])
            .unwrap();

        let sql = render(&Statement::Select(unit.select.clone()), &SqliteDialect).sql;
        assert!(sql.contains("LEFT JOIN"));
        assert!(sql.contains("SELECT COUNT(*)"));

        // Columns: name, id, count, floorplan id, floorplan projectId.
        let rows = vec![
            vec!["a".into(), Value::Int(1), Value::Int(2), Value::Int(10), Value::Int(1)],
            vec!["a".into(), Value::Int(1), Value::Int(2), Value::Int(11), Value::Int(1)],
            vec!["b".into(), Value::Int(2), Value::Int(0), Value::Null, Value::Null],
        ];
        let mut records = materialize(&unit.shape, &unit.layout, rows).unwrap();
        strip_hidden(&unit.shape, &mut records);

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields.len(), 1);
        assert_eq!(records[0].many("floorplans").len(), 2);
        assert_eq!(records[0].count("floorplans"), Some(2));
        assert!(records[1].many("floorplans").is_empty());
    }

    #[test]
    fn test_missing_required_to_one() {
        let catalog = catalog();
        let args = FindManyArgs::new().with_projection(Projection::default().include("project"));
        let unit = PlanBuilder::new(&catalog)
            .unit("Floorplan", "t0".into(), &args, true, None, &[])
            .unwrap();
        // Floorplan id, projectId, then project id and name, all absent.
        let rows = vec![vec![Value::Int(10), Value::Int(99), Value::Null, Value::Null]];
        assert!(matches!(
            materialize(&unit.shape, &unit.layout, rows),
            Err(Error::Consistency(ConsistencyError::MissingRelatedRow { .. }))
        ));
    }
}
