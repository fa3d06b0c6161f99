//! Ordering, cursor positioning and the in-memory window stage.

use std::collections::HashSet;

use quarry_proto::{NullsOrder, OrderBy, Record, SortOrder, Value};

use crate::catalog::{EntityDef, ScalarType};
use crate::error::CompileError;
use crate::sql::{CompareOp, Expr, OrderItem};

/// One key of an effective ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderKey {
    /// Field name.
    pub field: String,
    /// Column name.
    pub column: String,
    /// Field type.
    pub scalar: ScalarType,
    /// Direction.
    pub direction: SortOrder,
    /// NULL placement.
    pub nulls: NullsOrder,
}

impl OrderKey {
    /// The same key in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            direction: self.direction.reverse(),
            nulls: self.nulls.reverse(),
            ..self.clone()
        }
    }

    /// `ORDER BY` term on a table alias.
    pub fn item(&self, alias: &str) -> OrderItem {
        OrderItem {
            expr: Expr::column(alias, &self.column),
            direction: self.direction,
            nulls: self.nulls,
        }
    }
}

/// Default NULL placement: first ascending, last descending.
pub fn default_nulls(direction: SortOrder) -> NullsOrder {
    match direction {
        SortOrder::Asc => NullsOrder::First,
        SortOrder::Desc => NullsOrder::Last,
    }
}

/// Resolve requested ordering keys and append the identity as tiebreaker.
pub fn effective_order(def: &EntityDef, order_by: &[OrderBy]) -> Result<Vec<OrderKey>, CompileError> {
    let mut keys: Vec<OrderKey> = Vec::with_capacity(order_by.len() + def.identity.len());
    for order in order_by {
        let field = def.field(&order.field).ok_or_else(|| CompileError::UnknownField {
            entity: def.name.clone(),
            field: order.field.clone(),
        })?;
        if !field.scalar.is_orderable() {
            return Err(CompileError::NotOrderable {
                entity: def.name.clone(),
                field: field.name.clone(),
            });
        }
        if keys.iter().any(|k| k.field == field.name) {
            continue;
        }
        keys.push(OrderKey {
            field: field.name.clone(),
            column: field.column().to_string(),
            scalar: field.scalar,
            direction: order.direction,
            nulls: order.nulls.unwrap_or_else(|| default_nulls(order.direction)),
        });
    }
    for field in def.identity_fields() {
        if keys.iter().any(|k| k.field == field.name) {
            continue;
        }
        keys.push(OrderKey {
            field: field.name.clone(),
            column: field.column().to_string(),
            scalar: field.scalar,
            direction: SortOrder::Asc,
            nulls: NullsOrder::First,
        });
    }
    Ok(keys)
}

/// Reverse every key.
pub fn reverse_order(keys: &[OrderKey]) -> Vec<OrderKey> {
    keys.iter().map(OrderKey::reversed).collect()
}

fn equal_to(column: Expr, anchor: &Value) -> Expr {
    if anchor.is_null() {
        Expr::is_null(column)
    } else {
        Expr::eq(column, Expr::Param(anchor.clone()))
    }
}

fn strictly_after(key: &OrderKey, column: Expr, anchor: &Value) -> Expr {
    let op = match key.direction {
        SortOrder::Asc => CompareOp::Gt,
        SortOrder::Desc => CompareOp::Lt,
    };
    match (anchor.is_null(), key.nulls) {
        (true, NullsOrder::First) => Expr::is_not_null(column),
        (true, NullsOrder::Last) => Expr::Bool(false),
        (false, NullsOrder::First) => Expr::compare(op, column, Expr::Param(anchor.clone())),
        (false, NullsOrder::Last) => Expr::or(vec![
            Expr::compare(op, column.clone(), Expr::Param(anchor.clone())),
            Expr::is_null(column),
        ]),
    }
}

/// Rows positioned at or after the anchor under `keys`.
///
/// `anchor` holds the anchor row's values in key order. The last key is
/// unique, so the expression is a lexicographic comparison that is never
/// unknown for rows that belong on the page.
pub fn cursor_predicate(keys: &[OrderKey], alias: &str, anchor: &[Value]) -> Expr {
    let mut branches = Vec::with_capacity(keys.len() + 1);
    for i in 0..keys.len() {
        let mut parts: Vec<Expr> = keys[..i]
            .iter()
            .zip(anchor)
            .map(|(k, v)| equal_to(Expr::column(alias, &k.column), v))
            .collect();
        parts.push(strictly_after(&keys[i], Expr::column(alias, &keys[i].column), &anchor[i]));
        branches.push(Expr::and(parts));
    }
    branches.push(Expr::and(
        keys.iter()
            .zip(anchor)
            .map(|(k, v)| equal_to(Expr::column(alias, &k.column), v))
            .collect(),
    ));
    Expr::or(branches)
}

/// Post-query stage: distinct, skip and signed take over rows that arrive
/// in SQL order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Window {
    /// Rows arrive in reversed order (negative take).
    pub reversed: bool,
    /// Fields whose first combination is kept.
    pub distinct: Vec<String>,
    /// Rows to skip after distinct.
    pub skip: u64,
    /// Rows to keep after skip.
    pub take: Option<u64>,
}

impl Window {
    /// A window that only restores forward order.
    pub fn passthrough(reversed: bool) -> Self {
        Self {
            reversed,
            ..Self::default()
        }
    }

    /// Whether applying the window changes nothing.
    pub fn is_identity(&self) -> bool {
        !self.reversed && self.distinct.is_empty() && self.skip == 0 && self.take.is_none()
    }

    /// Apply to rows in SQL order and return them in forward order.
    pub fn apply(&self, mut rows: Vec<Record>) -> Vec<Record> {
        if self.reversed {
            rows.reverse();
        }
        if !self.distinct.is_empty() {
            let mut seen = HashSet::new();
            rows.retain(|row| seen.insert(distinct_key(row, &self.distinct)));
        }
        if self.skip == 0 && self.take.is_none() {
            return rows;
        }
        let take = self.take.map(|t| t as usize).unwrap_or(usize::MAX);
        if self.reversed {
            rows.reverse();
            let mut page: Vec<Record> = rows.into_iter().skip(self.skip as usize).take(take).collect();
            page.reverse();
            page
        } else {
            rows.into_iter().skip(self.skip as usize).take(take).collect()
        }
    }
}

/// Stable text key of a set of field values.
pub(crate) fn value_key<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    let values: Vec<&Value> = values.into_iter().collect();
    serde_json::to_string(&values).unwrap_or_default()
}

fn distinct_key(row: &Record, fields: &[String]) -> String {
    value_key(fields.iter().map(|f| row.get(f).unwrap_or(&Value::Null)))
}
