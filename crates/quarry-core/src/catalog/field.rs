//! Field definitions for entities.

use super::types::{DefaultValue, ScalarType};
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A scalar field definition within an entity.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Column name in the store; the field name when unset.
    #[serde(default)]
    pub db_name: Option<String>,
    /// Field data type.
    pub scalar: ScalarType,
    /// Whether the field is non-nullable.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Whether the field alone forms a unique constraint.
    #[serde(default)]
    pub unique: bool,
    /// Default value if not provided on create.
    #[serde(default)]
    pub default: Option<DefaultValue>,
    /// Stamped with the current time on every create and update.
    #[serde(default)]
    pub updated_at: bool,
}

fn default_required() -> bool {
    true
}

impl FieldDef {
    /// Create a new required field.
    pub fn new(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            name: name.into(),
            db_name: None,
            scalar,
            required: true,
            unique: false,
            default: None,
            updated_at: false,
        }
    }

    /// Create a nullable field.
    pub fn optional(name: impl Into<String>, scalar: ScalarType) -> Self {
        Self {
            required: false,
            ..Self::new(name, scalar)
        }
    }

    /// Set the column name.
    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark as unique.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Mark as an updated-at timestamp.
    pub fn updated_at(mut self) -> Self {
        self.updated_at = true;
        self
    }

    /// Column name in the store.
    pub fn column(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.name)
    }

    /// Whether the store assigns this field on insert.
    pub fn is_autoincrement(&self) -> bool {
        matches!(self.default, Some(DefaultValue::Autoincrement))
    }

    /// Whether a create may leave this field out.
    pub fn is_optional_on_create(&self) -> bool {
        !self.required || self.default.is_some() || self.updated_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_builder() {
        let field = FieldDef::new("createdAt", ScalarType::DateTime)
            .with_default(DefaultValue::Now)
            .with_db_name("created_at");

        assert_eq!(field.column(), "created_at");
        assert!(field.required);
        assert!(field.is_optional_on_create());
    }

    #[test]
    fn test_optional_field() {
        let field = FieldDef::optional("bio", ScalarType::String);
        assert!(!field.required);
        assert_eq!(field.column(), "bio");
        assert!(!field.is_autoincrement());
    }
}
