//! Conversion between stored values and catalog types.
//!
//! Drivers report values in their storage form. SQLite keeps booleans as
//! integers and timestamps, JSON documents and scalar lists as text;
//! [`decode`] turns those back into typed [`Value`]s. [`coerce`] does the
//! opposite direction for request input, widening and parsing where a
//! lossless conversion exists.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use quarry_proto::Value;
use serde_json::Value as JsonValue;

use crate::catalog::ScalarType;
use crate::error::Error;

/// Text form used for stored timestamps.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // CURRENT_TIMESTAMP and other store-side defaults.
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn invalid(scalar: ScalarType, value: &Value) -> Error {
    Error::InvalidData(format!(
        "cannot decode stored {} as {}",
        value.type_name(),
        scalar.name()
    ))
}

/// Decode a stored value into the catalog type of its field.
pub fn decode(scalar: ScalarType, raw: Value) -> Result<Value, Error> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let decoded = match (scalar, raw) {
        (ScalarType::String, Value::String(s)) => Value::String(s),
        (ScalarType::Int, Value::Int(v)) => Value::Int(v),
        (ScalarType::Int, Value::Float(v)) if v.fract() == 0.0 => Value::Int(v as i64),
        (ScalarType::Float, Value::Float(v)) => Value::Float(v),
        (ScalarType::Float, Value::Int(v)) => Value::Float(v as f64),
        (ScalarType::Bool, Value::Bool(b)) => Value::Bool(b),
        (ScalarType::Bool, Value::Int(v)) => Value::Bool(v != 0),
        (ScalarType::DateTime, Value::DateTime(dt)) => Value::DateTime(dt),
        (ScalarType::DateTime, Value::String(s)) => match parse_datetime(&s) {
            Some(dt) => Value::DateTime(dt),
            None => return Err(Error::InvalidData(format!("invalid stored timestamp {s:?}"))),
        },
        (ScalarType::Json, Value::Json(v)) => Value::Json(v),
        (ScalarType::Json, Value::String(s)) => Value::Json(
            serde_json::from_str(&s)
                .map_err(|e| Error::InvalidData(format!("invalid stored JSON: {e}")))?,
        ),
        (ScalarType::StringList, Value::StringList(v)) => Value::StringList(v),
        (ScalarType::StringList, Value::String(s)) => Value::StringList(
            serde_json::from_str(&s)
                .map_err(|e| Error::InvalidData(format!("invalid stored list: {e}")))?,
        ),
        (ScalarType::StringList, Value::Json(JsonValue::Array(items))) => Value::StringList(
            items
                .into_iter()
                .map(|item| match item {
                    JsonValue::String(s) => Ok(s),
                    other => Err(Error::InvalidData(format!("non-string list element {other}"))),
                })
                .collect::<Result<_, _>>()?,
        ),
        (scalar, raw) => return Err(invalid(scalar, &raw)),
    };
    Ok(decoded)
}

/// Coerce request input to a field's type.
///
/// Returns `None` when no lossless conversion exists. SQL NULL passes
/// through; callers check nullability separately.
pub fn coerce(scalar: ScalarType, value: &Value) -> Option<Value> {
    match (scalar, value) {
        (_, Value::Null) => Some(Value::Null),
        (ScalarType::String, Value::String(_))
        | (ScalarType::Int, Value::Int(_))
        | (ScalarType::Float, Value::Float(_))
        | (ScalarType::Bool, Value::Bool(_))
        | (ScalarType::DateTime, Value::DateTime(_))
        | (ScalarType::Json, Value::Json(_))
        | (ScalarType::StringList, Value::StringList(_)) => Some(value.clone()),
        (ScalarType::Float, Value::Int(v)) => Some(Value::Float(*v as f64)),
        (ScalarType::Int, Value::Float(v)) if v.fract() == 0.0 => Some(Value::Int(*v as i64)),
        (ScalarType::DateTime, Value::String(s)) => parse_datetime(s).map(Value::DateTime),
        // Any plain value is a valid JSON document.
        (ScalarType::Json, other) => Some(Value::Json(other.to_json())),
        _ => None,
    }
}
