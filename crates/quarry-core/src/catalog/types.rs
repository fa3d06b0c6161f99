//! Scalar types and field defaults.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Scalar data types a field can hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Archive, Serialize, Deserialize, SerdeSerialize,
    SerdeDeserialize,
)]
pub enum ScalarType {
    /// UTF-8 string.
    String,
    /// 64-bit signed integer.
    Int,
    /// 64-bit floating point.
    Float,
    /// Boolean.
    Bool,
    /// UTC timestamp.
    DateTime,
    /// Structured JSON document.
    Json,
    /// List of strings.
    StringList,
}

impl ScalarType {
    /// Check if this type is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarType::Int | ScalarType::Float)
    }

    /// Check if values of this type have a total order usable in `orderBy`.
    pub fn is_orderable(&self) -> bool {
        !matches!(self, ScalarType::Json | ScalarType::StringList)
    }

    /// Type name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
            ScalarType::DateTime => "datetime",
            ScalarType::Json => "json",
            ScalarType::StringList => "string list",
        }
    }
}

/// Default value for a field, applied on create when no value is given.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum DefaultValue {
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    String(String),
    /// JSON literal, stored as its text.
    Json(String),
    /// Current timestamp at insert time.
    Now,
    /// Random UUID v4 string.
    Uuid,
    /// Assigned by the store on insert.
    Autoincrement,
}

impl DefaultValue {
    /// Whether this default can populate a field of the given type.
    pub fn fits(&self, scalar: ScalarType) -> bool {
        matches!(
            (self, scalar),
            (DefaultValue::Bool(_), ScalarType::Bool)
                | (DefaultValue::Int(_), ScalarType::Int)
                | (DefaultValue::Int(_), ScalarType::Float)
                | (DefaultValue::Float(_), ScalarType::Float)
                | (DefaultValue::String(_), ScalarType::String)
                | (DefaultValue::Json(_), ScalarType::Json)
                | (DefaultValue::Now, ScalarType::DateTime)
                | (DefaultValue::Uuid, ScalarType::String)
                | (DefaultValue::Autoincrement, ScalarType::Int)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_classification() {
        assert!(ScalarType::Int.is_numeric());
        assert!(ScalarType::Float.is_numeric());
        assert!(!ScalarType::String.is_numeric());
        assert!(ScalarType::DateTime.is_orderable());
        assert!(!ScalarType::Json.is_orderable());
        assert!(!ScalarType::StringList.is_orderable());
    }

    #[test]
    fn test_default_fits() {
        assert!(DefaultValue::Autoincrement.fits(ScalarType::Int));
        assert!(!DefaultValue::Autoincrement.fits(ScalarType::String));
        assert!(DefaultValue::Now.fits(ScalarType::DateTime));
        assert!(DefaultValue::Uuid.fits(ScalarType::String));
        assert!(DefaultValue::Int(1).fits(ScalarType::Float));
    }
}
