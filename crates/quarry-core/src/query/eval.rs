//! In-memory filter evaluation.
//!
//! [`FilterEvaluator`] applies a filter tree to rows held in a [`Dataset`]
//! with the same three-valued semantics the compiled SQL has on SQLite.
//! It is the ground truth the compiler is checked against.

use std::cmp::Ordering;
use std::collections::HashMap;

use quarry_proto::{
    Filter, JsonCondition, JsonFilter, JsonPathSegment, NullKind, QueryMode, Record,
    RelationPredicate, ScalarFilter, Value,
};
use serde_json::Value as JsonValue;

use super::filter::coerce_value;
use crate::catalog::{Catalog, EntityDef, FieldDef, RelationView, ScalarType};
use crate::error::CompileError;

/// SQL truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    /// True.
    True,
    /// False.
    False,
    /// NULL.
    Unknown,
}

impl Truth {
    fn from_bool(b: bool) -> Self {
        if b {
            Truth::True
        } else {
            Truth::False
        }
    }

    fn and(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::False, _) | (_, Truth::False) => Truth::False,
            (Truth::True, Truth::True) => Truth::True,
            _ => Truth::Unknown,
        }
    }

    fn or(self, other: Truth) -> Truth {
        match (self, other) {
            (Truth::True, _) | (_, Truth::True) => Truth::True,
            (Truth::False, Truth::False) => Truth::False,
            _ => Truth::Unknown,
        }
    }

    fn not(self) -> Truth {
        match self {
            Truth::True => Truth::False,
            Truth::False => Truth::True,
            Truth::Unknown => Truth::Unknown,
        }
    }

    /// Whether a `WHERE` clause keeps the row.
    pub fn is_true(self) -> bool {
        self == Truth::True
    }
}

/// Rows per entity.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    tables: HashMap<String, Vec<Record>>,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a row.
    pub fn insert(&mut self, entity: impl Into<String>, row: Record) {
        self.tables.entry(entity.into()).or_default().push(row);
    }

    /// Add every row of an entity.
    pub fn extend(&mut self, entity: impl Into<String>, rows: impl IntoIterator<Item = Record>) {
        self.tables.entry(entity.into()).or_default().extend(rows);
    }

    /// Rows of an entity.
    pub fn rows(&self, entity: &str) -> &[Record] {
        self.tables.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Evaluates filters against a [`Dataset`].
pub struct FilterEvaluator<'a> {
    catalog: &'a Catalog,
    data: &'a Dataset,
}

impl<'a> FilterEvaluator<'a> {
    /// Create an evaluator.
    pub fn new(catalog: &'a Catalog, data: &'a Dataset) -> Self {
        Self { catalog, data }
    }

    /// Rows of `entity` for which `filter` is true, in dataset order.
    pub fn select(&self, entity: &str, filter: &Filter) -> Result<Vec<&'a Record>, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        let mut out = Vec::new();
        for row in self.data.rows(entity) {
            if self.eval(def, row, filter)?.is_true() {
                out.push(row);
            }
        }
        Ok(out)
    }

    /// Evaluate a filter on one row.
    pub fn evaluate(&self, entity: &str, row: &Record, filter: &Filter) -> Result<Truth, CompileError> {
        let def = self.catalog.require_entity(entity)?;
        self.eval(def, row, filter)
    }

    fn eval(&self, def: &EntityDef, row: &Record, filter: &Filter) -> Result<Truth, CompileError> {
        match filter {
            Filter::And(children) => {
                let mut acc = Truth::True;
                for child in children {
                    acc = acc.and(self.eval(def, row, child)?);
                }
                Ok(acc)
            }
            Filter::Or(children) => {
                let mut acc = Truth::False;
                for child in children {
                    acc = acc.or(self.eval(def, row, child)?);
                }
                Ok(acc)
            }
            Filter::Not(inner) => Ok(self.eval(def, row, inner)?.not()),
            Filter::Field {
                field,
                condition,
                mode,
            } => {
                let field_def = self.catalog.require_field(def, field)?;
                let value = row.get(field).unwrap_or(&Value::Null);
                eval_scalar(def, field_def, value, condition, *mode)
            }
            Filter::Relation { field, predicate } => {
                let view = self.catalog.require_relation(&def.name, field)?;
                let target = self.catalog.require_entity(view.target())?;
                let related = self.related(&view, row);

                let any = |f: &Filter, want: Truth| -> Result<bool, CompileError> {
                    for candidate in &related {
                        if self.eval(target, candidate, f)? == want {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                };
                let truth = match predicate {
                    RelationPredicate::Some(f) => any(f, Truth::True)?,
                    RelationPredicate::None(f) => !any(f, Truth::True)?,
                    RelationPredicate::Every(f) => !any(f, Truth::False)?,
                    RelationPredicate::Is(Some(f)) => any(f, Truth::True)?,
                    RelationPredicate::Is(None) => related.is_empty(),
                    RelationPredicate::IsNot(Some(f)) => !any(f, Truth::True)?,
                    RelationPredicate::IsNot(None) => !related.is_empty(),
                };
                Ok(Truth::from_bool(truth))
            }
        }
    }

    /// Rows of the relation target joined to `row`. NULL keys join nothing.
    fn related(&self, view: &RelationView<'_>, row: &Record) -> Vec<&'a Record> {
        let pairs = view.join_pairs();
        self.data
            .rows(view.target())
            .iter()
            .filter(|candidate| {
                pairs.iter().all(|(source, target)| {
                    match (row.get(source), candidate.get(target)) {
                        (Some(a), Some(b)) if !a.is_null() && !b.is_null() => {
                            compare_values(a, b) == Some(Ordering::Equal)
                        }
                        _ => false,
                    }
                })
            })
            .collect()
    }
}

/// Compare two values of compatible types.
///
/// Integers and floats compare numerically; timestamps chronologically;
/// strings bytewise. Returns `None` for NULL or incompatible types.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn fold(value: Value, insensitive: bool) -> Value {
    match value {
        Value::String(s) if insensitive => Value::String(s.to_ascii_lowercase()),
        other => other,
    }
}

fn eval_scalar(
    def: &EntityDef,
    field: &FieldDef,
    stored: &Value,
    condition: &ScalarFilter,
    mode: QueryMode,
) -> Result<Truth, CompileError> {
    let insensitive = mode == QueryMode::Insensitive;
    let operand = fold(stored.clone(), insensitive);
    let coerce = |value: &Value| coerce_value(def, field, value).map(|v| fold(v, insensitive));
    let cmp = |value: &Value, test: fn(Ordering) -> bool| -> Result<Truth, CompileError> {
        if operand.is_null() {
            return Ok(Truth::Unknown);
        }
        let rhs = coerce(value)?;
        Ok(compare_values(&operand, &rhs)
            .map(|o| Truth::from_bool(test(o)))
            .unwrap_or(Truth::Unknown))
    };

    let truth = match condition {
        ScalarFilter::Equals(Value::Null) => Truth::from_bool(stored.is_null()),
        ScalarFilter::Not(Value::Null) => Truth::from_bool(!stored.is_null()),
        ScalarFilter::Equals(value) | ScalarFilter::Not(value) if field.scalar == ScalarType::Json => {
            let json = match coerce_value(def, field, value)? {
                Value::Json(json) => json,
                other => other.to_json(),
            };
            let condition = match condition {
                ScalarFilter::Equals(_) => JsonCondition::Equals(json),
                _ => JsonCondition::Not(json),
            };
            eval_json(
                stored,
                &JsonFilter {
                    path: Vec::new(),
                    condition,
                },
            )
        }
        ScalarFilter::Equals(value) => {
            if stored.is_null() {
                Truth::Unknown
            } else {
                let rhs = coerce(value)?;
                Truth::from_bool(values_equal(&operand, &rhs))
            }
        }
        ScalarFilter::Not(value) => {
            if stored.is_null() {
                Truth::Unknown
            } else {
                let rhs = coerce(value)?;
                Truth::from_bool(!values_equal(&operand, &rhs))
            }
        }
        ScalarFilter::In(values) | ScalarFilter::NotIn(values) => {
            let negated = matches!(condition, ScalarFilter::NotIn(_));
            if values.is_empty() {
                Truth::from_bool(negated)
            } else if stored.is_null() {
                Truth::Unknown
            } else {
                let mut found = false;
                for value in values {
                    if values_equal(&operand, &coerce(value)?) {
                        found = true;
                        break;
                    }
                }
                Truth::from_bool(found != negated)
            }
        }
        ScalarFilter::Lt(v) => cmp(v, Ordering::is_lt)?,
        ScalarFilter::Lte(v) => cmp(v, Ordering::is_le)?,
        ScalarFilter::Gt(v) => cmp(v, Ordering::is_gt)?,
        ScalarFilter::Gte(v) => cmp(v, Ordering::is_ge)?,
        ScalarFilter::Contains(s) | ScalarFilter::StartsWith(s) | ScalarFilter::EndsWith(s) => {
            match operand.as_str() {
                None => Truth::Unknown,
                Some(text) => {
                    let needle = if insensitive {
                        s.to_ascii_lowercase()
                    } else {
                        s.clone()
                    };
                    Truth::from_bool(match condition {
                        ScalarFilter::Contains(_) => text.contains(&needle),
                        ScalarFilter::StartsWith(_) => text.starts_with(&needle),
                        _ => text.ends_with(&needle),
                    })
                }
            }
        }
        ScalarFilter::Has(v) => Truth::from_bool(list_of(stored).iter().any(|item| item == v)),
        ScalarFilter::HasEvery(values) => {
            let items = list_of(stored);
            Truth::from_bool(values.iter().all(|v| items.contains(v)))
        }
        ScalarFilter::HasSome(values) => {
            let items = list_of(stored);
            Truth::from_bool(values.iter().any(|v| items.contains(v)))
        }
        ScalarFilter::IsEmpty(empty) => match stored.as_string_list() {
            Some(items) => Truth::from_bool(items.is_empty() == *empty),
            None => Truth::Unknown,
        },
        ScalarFilter::Json(filter) => eval_json(stored, filter),
    };
    Ok(truth)
}

fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

fn list_of(value: &Value) -> &[String] {
    value.as_string_list().unwrap_or(&[])
}

/// The value at `path`, or `None` when the column is NULL or the path is absent.
fn walk<'v>(stored: &'v Value, path: &[JsonPathSegment]) -> Option<&'v JsonValue> {
    let mut current = stored.as_json()?;
    for segment in path {
        current = match (segment, current) {
            (JsonPathSegment::Key(key), JsonValue::Object(map)) => map.get(key)?,
            (JsonPathSegment::Index(i), JsonValue::Array(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

fn json_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn json_order(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.as_bytes().cmp(y.as_bytes())),
        _ => None,
    }
}

fn eval_json(stored: &Value, filter: &JsonFilter) -> Truth {
    let found = walk(stored, &filter.path);
    let is_null_of = |kind: NullKind| match kind {
        NullKind::DbNull => found.is_none(),
        NullKind::JsonNull => matches!(found, Some(JsonValue::Null)),
        NullKind::AnyNull => matches!(found, None | Some(JsonValue::Null)),
    };
    let text = |f: fn(&str, &str) -> bool, needle: &str| match found {
        Some(JsonValue::String(s)) => f(s, needle),
        _ => false,
    };
    let ordered = |rhs: &JsonValue, test: fn(Ordering) -> bool| {
        found
            .and_then(|lhs| json_order(lhs, rhs))
            .map(test)
            .unwrap_or(false)
    };

    let matched = match &filter.condition {
        JsonCondition::Equals(value) => found.is_some_and(|v| json_equal(v, value)),
        JsonCondition::Not(value) => found.is_some_and(|v| !json_equal(v, value)),
        JsonCondition::IsNull(kind) => is_null_of(*kind),
        JsonCondition::IsNotNull(kind) => !is_null_of(*kind),
        JsonCondition::StringContains(s) => text(|h, n| h.contains(n), s),
        JsonCondition::StringStartsWith(s) => text(|h, n| h.starts_with(n), s),
        JsonCondition::StringEndsWith(s) => text(|h, n| h.ends_with(n), s),
        JsonCondition::ArrayContains(value) => {
            let wanted: Vec<&JsonValue> = match value {
                JsonValue::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            match found {
                Some(JsonValue::Array(items)) => wanted
                    .iter()
                    .all(|w| items.iter().any(|item| json_equal(item, w))),
                _ => false,
            }
        }
        JsonCondition::Lt(v) => ordered(v, Ordering::is_lt),
        JsonCondition::Lte(v) => ordered(v, Ordering::is_le),
        JsonCondition::Gt(v) => ordered(v, Ordering::is_gt),
        JsonCondition::Gte(v) => ordered(v, Ordering::is_ge),
    };
    Truth::from_bool(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RelationFieldDef, SchemaBundle};
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::load(
            SchemaBundle::new(1)
                .with_entity(
                    EntityDef::new("Project", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::optional("name", ScalarType::String))
                        .with_field(FieldDef::optional("meta", ScalarType::Json))
                        .with_relation(RelationFieldDef::many("floorplans", "Floorplan")),
                )
                .with_entity(
                    EntityDef::new("Floorplan", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::optional("area", ScalarType::Float))
                        .with_field(FieldDef::new("projectId", ScalarType::Int))
                        .with_relation(RelationFieldDef::owning(
                            "project",
                            "Project",
                            ["projectId"],
                            ["id"],
                        )),
                ),
        )
        .unwrap()
    }

    fn row(fields: Vec<(&str, Value)>) -> Record {
        Record {
            fields: fields.into_iter().map(|(n, v)| (n.to_string(), v)).collect(),
            ..Default::default()
        }
    }

    fn dataset() -> Dataset {
        let mut data = Dataset::new();
        data.insert(
            "Project",
            row(vec![("id", 1.into()), ("name", "Alpha".into()), ("meta", json!({"size": 3}).into())]),
        );
        data.insert(
            "Project",
            row(vec![("id", 2.into()), ("name", Value::Null), ("meta", Value::json_null())]),
        );
        data.insert("Project", row(vec![("id", 3.into()), ("name", "beta".into()), ("meta", Value::Null)]));
        data.insert("Floorplan", row(vec![("id", 10.into()), ("area", 50.0.into()), ("projectId", 1.into())]));
        data.insert("Floorplan", row(vec![("id", 11.into()), ("area", Value::Null), ("projectId", 1.into())]));
        data.insert("Floorplan", row(vec![("id", 12.into()), ("area", 80.0.into()), ("projectId", 3.into())]));
        data
    }

    fn ids(rows: Vec<&Record>) -> Vec<i64> {
        rows.iter().map(|r| r.get_as::<i64>("id").unwrap()).collect()
    }

    #[test]
    fn test_three_valued_not() {
        let catalog = catalog();
        let data = dataset();
        let eval = FilterEvaluator::new(&catalog, &data);

        let eq = Filter::eq("name", "Alpha");
        assert_eq!(ids(eval.select("Project", &eq).unwrap()), vec![1]);
        // NULL name is unknown on both sides of the negation.
        assert_eq!(ids(eval.select("Project", &Filter::not(eq)).unwrap()), vec![3]);
    }

    #[test]
    fn test_insensitive_and_patterns() {
        let catalog = catalog();
        let data = dataset();
        let eval = FilterEvaluator::new(&catalog, &data);

        let f = Filter::field_insensitive("name", ScalarFilter::StartsWith("AL".into()));
        assert_eq!(ids(eval.select("Project", &f).unwrap()), vec![1]);
        let f = Filter::field("name", ScalarFilter::Contains("ta".into()));
        assert_eq!(ids(eval.select("Project", &f).unwrap()), vec![3]);
    }

    #[test]
    fn test_relation_quantifiers() {
        let catalog = catalog();
        let data = dataset();
        let eval = FilterEvaluator::new(&catalog, &data);
        let big = Filter::field("area", ScalarFilter::Gt(60.into()));

        assert_eq!(ids(eval.select("Project", &Filter::some("floorplans", big.clone())).unwrap()), vec![3]);
        assert_eq!(ids(eval.select("Project", &Filter::none("floorplans", big.clone())).unwrap()), vec![1, 2]);
        // Unknown (NULL area) does not fail `every`.
        let small = Filter::field("area", ScalarFilter::Lt(60.into()));
        assert_eq!(ids(eval.select("Project", &Filter::every("floorplans", small)).unwrap()), vec![1, 2]);
        assert_eq!(
            ids(eval.select("Floorplan", &Filter::is("project", Filter::eq("name", "beta"))).unwrap()),
            vec![12]
        );
    }

    #[test]
    fn test_json_null_kinds() {
        let catalog = catalog();
        let data = dataset();
        let eval = FilterEvaluator::new(&catalog, &data);
        let null_check = |kind| Filter::json("meta", vec![], JsonCondition::IsNull(kind));

        assert_eq!(ids(eval.select("Project", &null_check(NullKind::DbNull)).unwrap()), vec![3]);
        assert_eq!(ids(eval.select("Project", &null_check(NullKind::JsonNull)).unwrap()), vec![2]);
        assert_eq!(ids(eval.select("Project", &null_check(NullKind::AnyNull)).unwrap()), vec![2, 3]);

        let size = Filter::json("meta", vec![JsonPathSegment::key("size")], JsonCondition::Gte(json!(3)));
        assert_eq!(ids(eval.select("Project", &size).unwrap()), vec![1]);
        // JSON predicates are two-valued: negation keeps rows with no value.
        assert_eq!(ids(eval.select("Project", &Filter::not(size)).unwrap()), vec![2, 3]);
    }

    #[test]
    fn test_compare_values() {
        assert_eq!(compare_values(&Value::Int(1), &Value::Float(1.0)), Some(Ordering::Equal));
        assert_eq!(compare_values(&Value::from("a"), &Value::from("b")), Some(Ordering::Less));
        assert_eq!(compare_values(&Value::Null, &Value::Int(1)), None);
        assert_eq!(compare_values(&Value::Bool(true), &Value::Int(1)), None);
    }
}
