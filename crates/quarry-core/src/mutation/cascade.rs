//! Cascade planning for deletes.
//!
//! A delete first walks the dependents of the target rows and computes
//! the full cascade closure. Restrict dependents outside the closure fail
//! the delete before anything is written. SetNull dependents outside the
//! closure are nulled, then the closure is deleted in waves, deepest rows
//! first, so no statement removes a row that is still referenced.

use std::collections::{BTreeMap, HashMap, HashSet};

use quarry_proto::Value;
use tracing::debug;

use crate::catalog::{Catalog, DeleteBehavior, EntityDef, FieldDef, RelationDef};
use crate::connection::codec::decode;
use crate::error::{ConsistencyError, Result};
use crate::query::order::value_key;
use crate::session::Session;
use crate::sql::{Delete, Expr, Select, Update};

/// Longest chain of cascaded rows below a deleted row.
pub const MAX_CASCADE_DEPTH: usize = 32;

const ALIAS: &str = "t0";

/// Fields of `def` the cascade needs: identity plus every field a
/// dependent relation references.
pub(crate) fn key_fields<'e>(catalog: &Catalog, def: &'e EntityDef) -> Vec<&'e FieldDef> {
    let mut fields: Vec<&FieldDef> = def.identity_fields().collect();
    for relation in catalog.dependents_of(&def.name) {
        for name in &relation.referenced_fields {
            if let Some(field) = def.field(name) {
                if !fields.iter().any(|f| f.name == field.name) {
                    fields.push(field);
                }
            }
        }
    }
    fields
}

/// Select the cascade key fields of the rows matching `filter`.
pub(crate) fn key_select(catalog: &Catalog, def: &EntityDef, alias: &str, filter: Option<Expr>) -> Select {
    let mut select = Select::from_table(def.table(), alias);
    for field in key_fields(catalog, def) {
        select = select.column(Expr::column(alias, field.column()));
    }
    if let Some(filter) = filter {
        select = select.and_where(filter);
    }
    select
}

/// `columns` matches one of `keys`: `IN` for a single column, an OR of
/// conjunctions otherwise.
pub(crate) fn match_keys(alias: &str, columns: &[String], keys: &[Vec<Value>]) -> Expr {
    if let [column] = columns {
        return Expr::InList {
            expr: Box::new(Expr::column(alias, column.as_str())),
            list: keys.iter().filter_map(|k| k.first().cloned()).map(Expr::Param).collect(),
            negated: false,
        };
    }
    Expr::or(
        keys.iter()
            .map(|key| {
                Expr::and(
                    columns
                        .iter()
                        .zip(key)
                        .map(|(c, v)| Expr::eq(Expr::column(alias, c.as_str()), Expr::Param(v.clone())))
                        .collect(),
                )
            })
            .collect(),
    )
}

fn columns_of(def: &EntityDef, fields: &[String]) -> Vec<String> {
    fields
        .iter()
        .map(|name| def.field(name).map(|f| f.column().to_string()).unwrap_or_else(|| name.clone()))
        .collect()
}

#[derive(Debug, Clone)]
struct Node {
    entity: String,
    identity: Vec<Value>,
    values: HashMap<String, Value>,
    level: usize,
}

fn row_id(entity: &str, identity: &[Value]) -> String {
    format!("{entity}:{}", value_key(identity.iter()))
}

fn decode_rows(def: &EntityDef, fields: &[&FieldDef], rows: Vec<Vec<Value>>) -> Result<Vec<(Vec<Value>, HashMap<String, Value>)>> {
    rows.into_iter()
        .map(|row| {
            let mut values = HashMap::with_capacity(fields.len());
            for (field, raw) in fields.iter().zip(row) {
                values.insert(field.name.clone(), decode(field.scalar, raw)?);
            }
            let identity = def
                .identity
                .iter()
                .map(|f| values.get(f).cloned().unwrap_or(Value::Null))
                .collect();
            Ok((identity, values))
        })
        .collect()
}

/// Rows a delete affects, before anything is written.
#[derive(Debug, Default)]
struct Closure {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    // (relation, dependent row id)
    restricted: Vec<(RelationDef, String)>,
    nulled: Vec<(RelationDef, String, Vec<Value>)>,
    seen_edges: HashSet<String>,
}

impl Closure {
    /// Add or deepen a row. Returns its index when its dependents must be
    /// (re)visited.
    fn visit(&mut self, entity: &str, identity: Vec<Value>, values: HashMap<String, Value>, level: usize) -> Option<usize> {
        let id = row_id(entity, &identity);
        match self.index.get(&id) {
            Some(&i) if self.nodes[i].level >= level => None,
            Some(&i) => {
                self.nodes[i].level = level;
                Some(i)
            }
            None => {
                self.nodes.push(Node {
                    entity: entity.to_string(),
                    identity,
                    values,
                    level,
                });
                let i = self.nodes.len() - 1;
                self.index.insert(id, i);
                Some(i)
            }
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }
}

async fn expand(session: &mut Session<'_>, closure: &mut Closure, frontier: Vec<usize>) -> Result<Vec<usize>> {
    let catalog = session.catalog();
    let chunk = session.config().batch_chunk_size.max(1);

    let mut by_entity: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for i in frontier {
        by_entity.entry(closure.nodes[i].entity.clone()).or_default().push(i);
    }

    let mut next = Vec::new();
    for (entity, parents) in by_entity {
        let relations: Vec<RelationDef> = catalog.dependents_of(&entity).cloned().collect();
        for relation in relations {
            let Some(owner) = catalog.entity(&relation.owner) else {
                continue;
            };
            let mut level_of: HashMap<String, usize> = HashMap::new();
            let mut keys: Vec<Vec<Value>> = Vec::new();
            for &i in &parents {
                let node = &closure.nodes[i];
                let key: Vec<Value> = relation
                    .referenced_fields
                    .iter()
                    .map(|f| node.values.get(f).cloned().unwrap_or(Value::Null))
                    .collect();
                if key.iter().any(Value::is_null) {
                    continue;
                }
                let k = value_key(key.iter());
                match level_of.get(&k) {
                    Some(&l) if l >= node.level => {}
                    Some(_) => {
                        level_of.insert(k, node.level);
                    }
                    None => {
                        level_of.insert(k, node.level);
                        keys.push(key);
                    }
                }
            }

            let mut fields = key_fields(catalog, owner);
            for field in relation.owner_fields.iter().filter_map(|f| owner.field(f)) {
                if !fields.iter().any(|f| f.name == field.name) {
                    fields.push(field);
                }
            }
            let fk_columns = columns_of(owner, &relation.owner_fields);
            for keys in keys.chunks(chunk) {
                let mut select = Select::from_table(owner.table(), ALIAS);
                for field in &fields {
                    select = select.column(Expr::column(ALIAS, field.column()));
                }
                let rows = session.run(select.and_where(match_keys(ALIAS, &fk_columns, keys))).await?;
                for (identity, values) in decode_rows(owner, &fields, rows.rows)? {
                    let fk: Vec<Value> = relation
                        .owner_fields
                        .iter()
                        .map(|f| values.get(f).cloned().unwrap_or(Value::Null))
                        .collect();
                    let parent_level = level_of.get(&value_key(fk.iter())).copied().unwrap_or(0);
                    let id = row_id(&owner.name, &identity);
                    match relation.on_delete {
                        DeleteBehavior::Cascade => {
                            let level = parent_level + 1;
                            if level > MAX_CASCADE_DEPTH {
                                return Err(ConsistencyError::CascadeDepthExceeded {
                                    entity: owner.name.clone(),
                                }
                                .into());
                            }
                            if let Some(i) = closure.visit(&owner.name, identity, values, level) {
                                next.push(i);
                            }
                        }
                        DeleteBehavior::Restrict => {
                            if closure.seen_edges.insert(format!("{}|{id}", relation.name)) {
                                closure.restricted.push((relation.clone(), id));
                            }
                        }
                        DeleteBehavior::SetNull => {
                            if closure.seen_edges.insert(format!("{}|{id}", relation.name)) {
                                closure.nulled.push((relation.clone(), id, identity));
                            }
                        }
                    }
                }
            }
        }
    }
    next.sort_unstable();
    next.dedup();
    Ok(next)
}

/// Delete the rows selected by `roots` together with their cascade
/// closure. `roots` must select [`key_fields`] of `def`.
///
/// Returns the number of deleted rows, cascaded rows included.
pub(crate) async fn delete_cascading(session: &mut Session<'_>, def: &EntityDef, roots: Select) -> Result<u64> {
    let catalog = session.catalog();
    let chunk = session.config().batch_chunk_size.max(1);

    let fields = key_fields(catalog, def);
    let rows = session.run(roots).await?;
    let mut closure = Closure::default();
    let mut frontier = Vec::new();
    for (identity, values) in decode_rows(def, &fields, rows.rows)? {
        if let Some(i) = closure.visit(&def.name, identity, values, 0) {
            frontier.push(i);
        }
    }
    if frontier.is_empty() {
        return Ok(0);
    }

    while !frontier.is_empty() {
        frontier = expand(session, &mut closure, frontier).await?;
    }

    let mut blocked: Vec<(&RelationDef, usize)> = Vec::new();
    for (relation, id) in &closure.restricted {
        if closure.contains(id) {
            continue;
        }
        match blocked.iter_mut().find(|(r, _)| r.name == relation.name) {
            Some((_, count)) => *count += 1,
            None => blocked.push((relation, 1)),
        }
    }
    if let Some((relation, count)) = blocked.first() {
        return Err(ConsistencyError::ForeignKeyViolation {
            entity: relation.referenced.clone(),
            dependent: relation.owner.clone(),
            relation: relation.name.clone(),
            count: *count,
        }
        .into());
    }

    let mut nulls: BTreeMap<String, (RelationDef, Vec<Vec<Value>>)> = BTreeMap::new();
    for (relation, id, identity) in &closure.nulled {
        if closure.contains(id) {
            continue;
        }
        nulls
            .entry(relation.name.clone())
            .or_insert_with(|| (relation.clone(), Vec::new()))
            .1
            .push(identity.clone());
    }
    for (relation, identities) in nulls.values() {
        let Some(owner) = catalog.entity(&relation.owner) else {
            continue;
        };
        let identity_columns = columns_of(owner, &owner.identity);
        let assignments: Vec<(String, Expr)> = columns_of(owner, &relation.owner_fields)
            .into_iter()
            .map(|c| (c, Expr::Null))
            .collect();
        for keys in identities.chunks(chunk) {
            let nulled = session
                .run(Update {
                    table: owner.table().to_string(),
                    alias: ALIAS.to_string(),
                    assignments: assignments.clone(),
                    filter: Some(match_keys(ALIAS, &identity_columns, keys)),
                })
                .await?;
            debug!(relation = %relation.name, rows = nulled.affected, "nulled dependent foreign keys");
        }
    }

    let mut waves: BTreeMap<usize, BTreeMap<String, Vec<Vec<Value>>>> = BTreeMap::new();
    for node in &closure.nodes {
        waves
            .entry(node.level)
            .or_default()
            .entry(node.entity.clone())
            .or_default()
            .push(node.identity.clone());
    }

    let mut affected = 0;
    for (level, entities) in waves.into_iter().rev() {
        for (entity, identities) in entities {
            let Some(target) = catalog.entity(&entity) else {
                continue;
            };
            let identity_columns = columns_of(target, &target.identity);
            for keys in identities.chunks(chunk) {
                let deleted = session
                    .run(Delete {
                        table: target.table().to_string(),
                        alias: ALIAS.to_string(),
                        filter: Some(match_keys(ALIAS, &identity_columns, keys)),
                    })
                    .await?;
                affected += deleted.affected;
            }
            debug!(%entity, level, "deleted cascade wave");
        }
    }
    Ok(affected)
}
