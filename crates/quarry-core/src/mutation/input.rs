//! Write payload validation.
//!
//! Turns caller payloads into typed column values: unknown fields are
//! rejected, values are coerced to the field type, defaults are filled in
//! and `updatedAt` fields are stamped.

use chrono::{DateTime, Utc};
use quarry_proto::{FieldUpdate, UpdateData, Value, WriteData};
use uuid::Uuid;

use crate::catalog::{DefaultValue, EntityDef, FieldDef};
use crate::connection::codec::coerce;
use crate::error::CompileError;
use crate::query::filter::coerce_value;
use crate::sql::{ArithOp, Expr};

/// A validated value for one column.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnValue {
    pub field: String,
    pub column: String,
    pub value: Value,
}

/// A validated update of one column.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Assignment {
    Set(ColumnValue),
    Atomic {
        field: String,
        column: String,
        op: ArithOp,
        operand: Value,
    },
}

impl Assignment {
    pub fn field(&self) -> &str {
        match self {
            Assignment::Set(c) => &c.field,
            Assignment::Atomic { field, .. } => field,
        }
    }

    /// Value written when the assignment is a plain set.
    pub fn set_value(&self) -> Option<&Value> {
        match self {
            Assignment::Set(c) => Some(&c.value),
            Assignment::Atomic { .. } => None,
        }
    }

    /// `SET` pair for a statement whose target table is bound to `alias`.
    pub fn to_sql(&self, alias: &str) -> (String, Expr) {
        match self {
            Assignment::Set(c) => (c.column.clone(), Expr::Param(c.value.clone())),
            Assignment::Atomic {
                column, op, operand, ..
            } => (
                column.clone(),
                Expr::Arith {
                    op: *op,
                    left: Box::new(Expr::column(alias, column.as_str())),
                    right: Box::new(Expr::Param(operand.clone())),
                },
            ),
        }
    }
}

fn require_field<'e>(def: &'e EntityDef, name: &str) -> Result<&'e FieldDef, CompileError> {
    def.field(name).ok_or_else(|| CompileError::UnknownField {
        entity: def.name.clone(),
        field: name.to_string(),
    })
}

fn written_twice(def: &EntityDef, field: &str) -> CompileError {
    CompileError::InvalidPredicate {
        entity: def.name.clone(),
        field: field.to_string(),
        reason: "field written more than once".into(),
    }
}

fn checked(def: &EntityDef, field: &FieldDef, value: &Value) -> Result<Value, CompileError> {
    let value = coerce_value(def, field, value)?;
    if value.is_null() && field.required {
        return Err(CompileError::MissingRequiredField {
            entity: def.name.clone(),
            field: field.name.clone(),
        });
    }
    Ok(value)
}

fn default_value(default: &DefaultValue, now: DateTime<Utc>) -> Option<Value> {
    let value = match default {
        DefaultValue::Bool(b) => Value::Bool(*b),
        DefaultValue::Int(v) => Value::Int(*v),
        DefaultValue::Float(v) => Value::Float(*v),
        DefaultValue::String(s) => Value::String(s.clone()),
        DefaultValue::Json(text) => {
            Value::Json(serde_json::from_str(text).unwrap_or(serde_json::Value::String(text.clone())))
        }
        DefaultValue::Now => Value::DateTime(now),
        DefaultValue::Uuid => Value::String(Uuid::new_v4().to_string()),
        DefaultValue::Autoincrement => return None,
    };
    Some(value)
}

/// Validate a create payload and fill in defaults.
///
/// Autoincrement fields the caller leaves out are omitted so the store
/// assigns them. Optional fields without a value are written as NULL.
pub(crate) fn create_row(
    def: &EntityDef,
    data: &WriteData,
    now: DateTime<Utc>,
) -> Result<Vec<ColumnValue>, CompileError> {
    let mut supplied: Vec<(&FieldDef, Value)> = Vec::with_capacity(data.values.len());
    for (name, value) in &data.values {
        let field = require_field(def, name)?;
        if supplied.iter().any(|(f, _)| f.name == field.name) {
            return Err(written_twice(def, name));
        }
        supplied.push((field, checked(def, field, value)?));
    }

    let mut row = Vec::with_capacity(def.fields.len());
    for field in &def.fields {
        let value = match supplied.iter().position(|(f, _)| f.name == field.name) {
            Some(i) => supplied[i].1.clone(),
            None if field.updated_at => Value::DateTime(now),
            None => match &field.default {
                Some(default) => match default_value(default, now) {
                    Some(value) => coerce(field.scalar, &value).unwrap_or(value),
                    None => continue,
                },
                None if field.required => {
                    return Err(CompileError::MissingRequiredField {
                        entity: def.name.clone(),
                        field: field.name.clone(),
                    })
                }
                None => Value::Null,
            },
        };
        row.push(ColumnValue {
            field: field.name.clone(),
            column: field.column().to_string(),
            value,
        });
    }
    Ok(row)
}

/// Validate an update payload. `updatedAt` fields not set explicitly are
/// stamped with `now`.
pub(crate) fn assignments(
    def: &EntityDef,
    data: &UpdateData,
    now: DateTime<Utc>,
) -> Result<Vec<Assignment>, CompileError> {
    let mut out: Vec<Assignment> = Vec::with_capacity(data.updates.len() + 1);
    for (name, update) in &data.updates {
        let field = require_field(def, name)?;
        if out.iter().any(|a| a.field() == field.name) {
            return Err(written_twice(def, name));
        }
        let (op, operand) = match update {
            FieldUpdate::Set(value) => {
                out.push(Assignment::Set(ColumnValue {
                    field: field.name.clone(),
                    column: field.column().to_string(),
                    value: checked(def, field, value)?,
                }));
                continue;
            }
            FieldUpdate::Increment(v) => (ArithOp::Add, v),
            FieldUpdate::Decrement(v) => (ArithOp::Sub, v),
            FieldUpdate::Multiply(v) => (ArithOp::Mul, v),
            FieldUpdate::Divide(v) => (ArithOp::Div, v),
        };
        out.push(atomic(def, field, op, operand)?);
    }
    for field in def.fields.iter().filter(|f| f.updated_at) {
        if !out.iter().any(|a| a.field() == field.name) {
            out.push(Assignment::Set(ColumnValue {
                field: field.name.clone(),
                column: field.column().to_string(),
                value: Value::DateTime(now),
            }));
        }
    }
    Ok(out)
}

fn atomic(def: &EntityDef, field: &FieldDef, op: ArithOp, operand: &Value) -> Result<Assignment, CompileError> {
    let invalid = |reason: &str| CompileError::InvalidPredicate {
        entity: def.name.clone(),
        field: field.name.clone(),
        reason: reason.to_string(),
    };
    if !field.scalar.is_numeric() {
        return Err(invalid("atomic updates apply to numeric fields only"));
    }
    if def.is_identity(&field.name) {
        return Err(invalid("identity fields cannot be updated atomically"));
    }
    let operand = coerce_value(def, field, operand)?;
    match operand {
        Value::Null => Err(invalid("atomic operand cannot be null")),
        Value::Int(0) if op == ArithOp::Div => Err(invalid("division by zero")),
        Value::Float(v) if op == ArithOp::Div && v == 0.0 => Err(invalid("division by zero")),
        operand => Ok(Assignment::Atomic {
            field: field.name.clone(),
            column: field.column().to_string(),
            op,
            operand,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;
    use chrono::TimeZone;
    use serde_json::json;

    fn project() -> EntityDef {
        EntityDef::new("Project", "id")
            .with_field(FieldDef::new("id", ScalarType::Int).with_default(DefaultValue::Autoincrement))
            .with_field(FieldDef::new("name", ScalarType::String))
            .with_field(FieldDef::new("slug", ScalarType::String).with_default(DefaultValue::Uuid))
            .with_field(FieldDef::new("budget", ScalarType::Float).with_default(DefaultValue::Int(0)))
            .with_field(FieldDef::optional("meta", ScalarType::Json))
            .with_field(FieldDef::new("createdAt", ScalarType::DateTime).with_default(DefaultValue::Now))
            .with_field(FieldDef::new("updatedAt", ScalarType::DateTime).updated_at())
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn value<'a>(row: &'a [ColumnValue], field: &str) -> Option<&'a Value> {
        row.iter().find(|c| c.field == field).map(|c| &c.value)
    }

    #[test]
    fn test_create_fills_defaults() {
        let def = project();
        let row = create_row(&def, &WriteData::new().set("name", "hq"), now()).unwrap();

        assert!(value(&row, "id").is_none());
        assert_eq!(value(&row, "budget"), Some(&Value::Float(0.0)));
        assert_eq!(value(&row, "meta"), Some(&Value::Null));
        assert_eq!(value(&row, "createdAt"), Some(&Value::DateTime(now())));
        assert_eq!(value(&row, "updatedAt"), Some(&Value::DateTime(now())));
        assert!(matches!(value(&row, "slug"), Some(Value::String(s)) if s.len() == 36));
    }

    #[test]
    fn test_create_validation() {
        let def = project();
        assert!(matches!(
            create_row(&def, &WriteData::new(), now()),
            Err(CompileError::MissingRequiredField { field, .. }) if field == "name"
        ));
        assert!(matches!(
            create_row(&def, &WriteData::new().set("name", "a").set("color", "red"), now()),
            Err(CompileError::UnknownField { .. })
        ));
        assert!(matches!(
            create_row(&def, &WriteData::new().set("name", Value::Null), now()),
            Err(CompileError::MissingRequiredField { .. })
        ));
        assert!(matches!(
            create_row(&def, &WriteData::new().set("name", "a").set("budget", "lots"), now()),
            Err(CompileError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_json_null_kinds_are_kept_apart() {
        let def = project();
        let db_null = create_row(&def, &WriteData::new().set("name", "a").set("meta", Value::Null), now()).unwrap();
        let json_null = create_row(
            &def,
            &WriteData::new().set("name", "a").set("meta", Value::Json(json!(null))),
            now(),
        )
        .unwrap();
        assert_eq!(value(&db_null, "meta"), Some(&Value::Null));
        assert_eq!(value(&json_null, "meta"), Some(&Value::Json(json!(null))));
    }

    #[test]
    fn test_update_assignments() {
        let def = project();
        let data = UpdateData::new().set("name", "b").increment("budget", 5);
        let out = assignments(&def, &data, now()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].field(), "updatedAt");

        let (column, expr) = out[1].to_sql("t0");
        assert_eq!(column, "budget");
        assert!(matches!(expr, Expr::Arith { op: ArithOp::Add, .. }));

        assert!(assignments(&def, &UpdateData::new().increment("name", 1), now()).is_err());
        assert!(assignments(&def, &UpdateData::new().increment("id", 1), now()).is_err());
        assert!(assignments(&def, &UpdateData::new().with("budget", FieldUpdate::Divide(Value::Int(0))), now()).is_err());
    }
}
