//! Schema bundle - versioned declarative description of the schema.

use super::EntityDef;
use crate::error::Error;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// A versioned snapshot of the declared schema.
///
/// This is the catalog's input format. It is produced by a schema loader
/// (as JSON) or restored from a binary snapshot, then resolved and validated
/// by [`Catalog::load`](super::Catalog::load).
#[derive(Debug, Clone, PartialEq, Default, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct SchemaBundle {
    /// Schema version.
    #[serde(default)]
    pub version: u64,
    /// Entity definitions in declaration order.
    pub entities: Vec<EntityDef>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            entities: Vec::new(),
        }
    }

    /// Add an entity to the schema.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.push(entity);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// List all entity names.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.name.as_str()).collect()
    }

    /// Parse a schema bundle from its JSON form.
    pub fn from_json(source: &str) -> Result<Self, Error> {
        serde_json::from_str(source).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Render the schema bundle as JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serialize the schema bundle to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a schema bundle from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes)
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DefaultValue, FieldDef, RelationFieldDef, ScalarType};

    fn sample_schema() -> SchemaBundle {
        let user = EntityDef::new("User", "id")
            .with_field(FieldDef::new("id", ScalarType::String).with_default(DefaultValue::Uuid))
            .with_field(FieldDef::new("email", ScalarType::String).unique())
            .with_relation(RelationFieldDef::many("posts", "Post"));

        let post = EntityDef::new("Post", "id")
            .with_field(FieldDef::new("id", ScalarType::Int).with_default(DefaultValue::Autoincrement))
            .with_field(FieldDef::new("authorId", ScalarType::String))
            .with_relation(RelationFieldDef::owning("author", "User", ["authorId"], ["id"]));

        SchemaBundle::new(1).with_entity(user).with_entity(post)
    }

    #[test]
    fn test_schema_bundle_builder() {
        let schema = sample_schema();

        assert_eq!(schema.version, 1);
        assert_eq!(schema.entities.len(), 2);
        assert_eq!(schema.entity_names(), vec!["User", "Post"]);
        assert!(schema.get_entity("Post").is_some());
        assert!(schema.get_entity("NonExistent").is_none());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let schema = sample_schema();
        let bytes = schema.to_bytes().unwrap();
        let decoded = SchemaBundle::from_bytes(&bytes).unwrap();

        assert_eq!(schema, decoded);
    }

    #[test]
    fn test_json_roundtrip() {
        let schema = sample_schema();
        let json = schema.to_json().unwrap();
        assert_eq!(SchemaBundle::from_json(&json).unwrap(), schema);
    }

    #[test]
    fn test_json_defaults() {
        let source = r#"{
            "entities": [
                {"name": "Tag", "identity": ["id"], "fields": [
                    {"name": "id", "scalar": "Int"},
                    {"name": "label", "scalar": "String", "required": false}
                ]}
            ]
        }"#;
        let schema = SchemaBundle::from_json(source).unwrap();
        let tag = schema.get_entity("Tag").unwrap();

        assert_eq!(schema.version, 0);
        assert!(tag.field("id").unwrap().required);
        assert!(!tag.field("label").unwrap().required);
        assert!(tag.relations.is_empty());
    }
}
