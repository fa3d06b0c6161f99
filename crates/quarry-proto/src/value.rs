//! Runtime value types for parameters and results.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// A runtime value bound as a parameter or read back from a row.
///
/// `Null` is SQL NULL. A JSON document that is itself `null` is
/// `Json(JsonValue::Null)`; the two are kept apart so JSON fields can
/// round-trip the distinction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
    /// Structured JSON document.
    Json(JsonValue),
    /// List of strings (scalar list field).
    StringList(Vec<String>),
}

impl Value {
    /// The JSON `null` document, as opposed to SQL NULL.
    pub fn json_null() -> Self {
        Value::Json(JsonValue::Null)
    }

    /// Check if this value is SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Json(_) => "json",
            Value::StringList(_) => "string list",
        }
    }

    /// Try to get as bool.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get as f64, widening integers.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as a timestamp.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Try to get as a JSON document.
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Value::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Try to get as a string list.
    pub fn as_string_list(&self) -> Option<&[String]> {
        match self {
            Value::StringList(v) => Some(v),
            _ => None,
        }
    }

    /// Parse an RFC 3339 timestamp into a `DateTime` value.
    pub fn parse_datetime(s: &str) -> Result<Self, Error> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Value::DateTime(dt.with_timezone(&Utc)))
            .map_err(|_| Error::InvalidDateTime(s.to_string()))
    }

    /// Convert to a plain JSON value for display or transport.
    ///
    /// SQL NULL and JSON null both become `null` here; use the typed value
    /// when the distinction matters.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(v) => JsonValue::from(*v),
            Value::Float(v) => JsonValue::from(*v),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::DateTime(dt) => {
                JsonValue::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            Value::Json(v) => v.clone(),
            Value::StringList(items) => {
                JsonValue::Array(items.iter().cloned().map(JsonValue::String).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::Json(v)
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::StringList(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

macro_rules! impl_try_from_value {
    ($ty:ty, $expected:literal, $pat:pat => $out:expr) => {
        impl TryFrom<Value> for $ty {
            type Error = Error;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                match value {
                    $pat => Ok($out),
                    other => Err(Error::TypeMismatch {
                        expected: $expected,
                        found: other.type_name(),
                    }),
                }
            }
        }
    };
}

impl_try_from_value!(bool, "bool", Value::Bool(v) => v);
impl_try_from_value!(i64, "int", Value::Int(v) => v);
impl_try_from_value!(String, "string", Value::String(v) => v);
impl_try_from_value!(DateTime<Utc>, "datetime", Value::DateTime(v) => v);
impl_try_from_value!(JsonValue, "json", Value::Json(v) => v);
impl_try_from_value!(Vec<String>, "string list", Value::StringList(v) => v);

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64().ok_or(Error::TypeMismatch {
            expected: "float",
            found: value.type_name(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_kinds_are_distinct() {
        assert_ne!(Value::Null, Value::json_null());
        assert!(Value::Null.is_null());
        assert!(!Value::json_null().is_null());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(3), Value::Int(3));
        assert_eq!(Value::from("a"), Value::String("a".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(i64::try_from(Value::Int(7)).unwrap(), 7);
        assert_eq!(f64::try_from(Value::Int(2)).unwrap(), 2.0);
        assert!(bool::try_from(Value::Int(1)).is_err());
    }

    #[test]
    fn test_parse_datetime() {
        let v = Value::parse_datetime("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(
            v.to_json(),
            json!("2024-01-02T03:04:05.000Z")
        );
        assert!(Value::parse_datetime("yesterday").is_err());
    }

    #[test]
    fn test_to_json() {
        let list = Value::StringList(vec!["a".into(), "b".into()]);
        assert_eq!(list.to_json(), json!(["a", "b"]));
        assert_eq!(Value::Json(json!({"k": 1})).to_json(), json!({"k": 1}));
    }
}
