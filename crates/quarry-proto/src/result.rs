//! Result types returned to callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::aggregate::{AggregateFunction, AggregateSelection};
use crate::error::Error;
use crate::value::Value;

/// A materialized row shaped by its projection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Scalar fields in projection order.
    pub fields: Vec<(String, Value)>,
    /// Included relations in request order.
    pub relations: Vec<(String, RelationValue)>,
    /// Related-row counts.
    pub counts: Vec<(String, u64)>,
}

/// A materialized relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationValue {
    /// A to-one relation; `None` when absent.
    One(Option<Box<Record>>),
    /// A to-many relation.
    Many(Vec<Record>),
}

impl Record {
    /// Get a scalar field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }

    /// Get a scalar field converted to a Rust type.
    pub fn get_as<T>(&self, field: &str) -> Result<T, Error>
    where
        T: TryFrom<Value, Error = Error>,
    {
        let value = self
            .get(field)
            .ok_or_else(|| Error::MissingField(field.to_string()))?;
        T::try_from(value.clone())
    }

    /// Get a relation.
    pub fn relation(&self, name: &str) -> Option<&RelationValue> {
        self.relations
            .iter()
            .find(|(rel, _)| rel == name)
            .map(|(_, v)| v)
    }

    /// Get a to-one relation; `None` if absent or not included.
    pub fn one(&self, name: &str) -> Option<&Record> {
        match self.relation(name) {
            Some(RelationValue::One(Some(record))) => Some(record),
            _ => None,
        }
    }

    /// Get a to-many relation; empty if not included.
    pub fn many(&self, name: &str) -> &[Record] {
        match self.relation(name) {
            Some(RelationValue::Many(records)) => records,
            _ => &[],
        }
    }

    /// Get a related-row count.
    pub fn count(&self, name: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|(rel, _)| rel == name)
            .map(|(_, c)| *c)
    }

    /// Set a scalar field, replacing any existing value.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Render as a JSON object, with counts under `_count`.
    pub fn to_json(&self) -> JsonValue {
        let mut obj = Map::new();
        for (name, value) in &self.fields {
            obj.insert(name.clone(), value.to_json());
        }
        for (name, relation) in &self.relations {
            let rendered = match relation {
                RelationValue::One(Some(record)) => record.to_json(),
                RelationValue::One(None) => JsonValue::Null,
                RelationValue::Many(records) => {
                    JsonValue::Array(records.iter().map(Record::to_json).collect())
                }
            };
            obj.insert(name.clone(), rendered);
        }
        if !self.counts.is_empty() {
            let counts = self
                .counts
                .iter()
                .map(|(name, c)| (name.clone(), JsonValue::from(*c)))
                .collect();
            obj.insert("_count".to_string(), JsonValue::Object(counts));
        }
        JsonValue::Object(obj)
    }
}

/// Affected-row count of a multi-row write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchPayload {
    /// Number of rows affected.
    pub count: u64,
}

/// Result of a single-row delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deleted {
    /// The row as it was before deletion.
    pub record: Record,
    /// Rows removed, including cascaded dependents.
    pub affected: u64,
}

/// One computed aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateValue {
    /// The function.
    pub function: AggregateFunction,
    /// The field, `None` for `COUNT(*)`.
    pub field: Option<String>,
    /// The normalized result.
    pub value: Value,
}

fn find_aggregate<'a>(
    values: &'a [AggregateValue],
    function: AggregateFunction,
    field: Option<&str>,
) -> Option<&'a Value> {
    values
        .iter()
        .find(|a| a.function == function && a.field.as_deref() == field)
        .map(|a| &a.value)
}

/// Result of `aggregate`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Aggregates in request order.
    pub values: Vec<AggregateValue>,
}

impl AggregateResult {
    /// Look up an aggregate.
    pub fn get(&self, selection: &AggregateSelection) -> Option<&Value> {
        find_aggregate(&self.values, selection.function, selection.field.as_deref())
    }

    /// `COUNT(*)`, if requested.
    pub fn count_all(&self) -> Option<i64> {
        find_aggregate(&self.values, AggregateFunction::Count, None).and_then(Value::as_i64)
    }
}

/// One group of a `groupBy`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupRow {
    /// Values of the grouping fields.
    pub key: Vec<(String, Value)>,
    /// Aggregates in request order.
    pub aggregates: Vec<AggregateValue>,
}

impl GroupRow {
    /// Get a grouping field value.
    pub fn key(&self, field: &str) -> Option<&Value> {
        self.key
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
    }

    /// Look up an aggregate.
    pub fn get(&self, selection: &AggregateSelection) -> Option<&Value> {
        find_aggregate(&self.aggregates, selection.function, selection.field.as_deref())
    }

    /// `COUNT(*)`, if requested.
    pub fn count_all(&self) -> Option<i64> {
        find_aggregate(&self.aggregates, AggregateFunction::Count, None).and_then(Value::as_i64)
    }
}
