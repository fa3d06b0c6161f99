//! Entity definitions.

use super::field::FieldDef;
use super::relation::DeleteBehavior;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// An entity definition (table schema).
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct EntityDef {
    /// Entity name (unique within schema).
    pub name: String,
    /// Table name in the store; the entity name when unset.
    #[serde(default)]
    pub db_name: Option<String>,
    /// Fields forming the primary identity.
    pub identity: Vec<String>,
    /// Scalar field definitions in declaration order.
    pub fields: Vec<FieldDef>,
    /// Relation field definitions.
    #[serde(default)]
    pub relations: Vec<RelationFieldDef>,
    /// Composite unique constraints.
    #[serde(default)]
    pub uniques: Vec<UniqueDef>,
}

/// A relation field as declared on one side of a relation.
///
/// Exactly one side of every relation carries `fields`/`references`; that
/// side owns the foreign key.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct RelationFieldDef {
    /// Relation field name.
    pub name: String,
    /// Target entity name.
    pub target: String,
    /// Whether the field holds many related rows.
    #[serde(default)]
    pub list: bool,
    /// Whether the related row may be absent.
    #[serde(default)]
    pub optional: bool,
    /// Disambiguating relation name when two entities share several relations.
    #[serde(default)]
    pub relation_name: Option<String>,
    /// Foreign-key fields on this entity (owning side only).
    #[serde(default)]
    pub fields: Vec<String>,
    /// Referenced fields on the target (owning side only).
    #[serde(default)]
    pub references: Vec<String>,
    /// Referential action on delete of the target (owning side only).
    #[serde(default)]
    pub on_delete: Option<DeleteBehavior>,
}

/// A composite unique constraint.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct UniqueDef {
    /// Constraint name; derived from the fields when unset.
    #[serde(default)]
    pub name: Option<String>,
    /// Fields of the constraint.
    pub fields: Vec<String>,
}

impl EntityDef {
    /// Create a new entity definition with a single identity field.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_name: None,
            identity: vec![identity_field.into()],
            fields: Vec::new(),
            relations: Vec::new(),
            uniques: Vec::new(),
        }
    }

    /// Replace the identity with a composite one.
    pub fn with_identity(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.identity = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the table name.
    pub fn with_db_name(mut self, db_name: impl Into<String>) -> Self {
        self.db_name = Some(db_name.into());
        self
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDef>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add a relation field.
    pub fn with_relation(mut self, relation: RelationFieldDef) -> Self {
        self.relations.push(relation);
        self
    }

    /// Add a composite unique constraint.
    pub fn with_unique(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.uniques.push(UniqueDef {
            name: None,
            fields: fields.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Table name in the store.
    pub fn table(&self) -> &str {
        self.db_name.as_deref().unwrap_or(&self.name)
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get a relation field by name.
    pub fn relation_field(&self, name: &str) -> Option<&RelationFieldDef> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Check if a field is part of the identity.
    pub fn is_identity(&self, name: &str) -> bool {
        self.identity.iter().any(|f| f == name)
    }

    /// Iterate over the identity field definitions.
    pub fn identity_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.identity.iter().filter_map(|name| self.field(name))
    }
}

impl RelationFieldDef {
    /// A to-one relation field owning the foreign key.
    pub fn owning(
        name: impl Into<String>,
        target: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
        references: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            list: false,
            optional: false,
            relation_name: None,
            fields: fields.into_iter().map(Into::into).collect(),
            references: references.into_iter().map(Into::into).collect(),
            on_delete: None,
        }
    }

    /// A to-many back-relation field.
    pub fn many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            list: true,
            optional: false,
            relation_name: None,
            fields: Vec::new(),
            references: Vec::new(),
            on_delete: None,
        }
    }

    /// An optional to-one back-relation field.
    pub fn back_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            list: false,
            optional: true,
            ..Self::many(name, target)
        }
    }

    /// Mark the related row as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Set the relation name.
    pub fn named(mut self, relation_name: impl Into<String>) -> Self {
        self.relation_name = Some(relation_name.into());
        self
    }

    /// Set the delete behavior.
    pub fn on_delete(mut self, behavior: DeleteBehavior) -> Self {
        self.on_delete = Some(behavior);
        self
    }

    /// Whether this side declares the foreign key.
    pub fn is_owning(&self) -> bool {
        !self.fields.is_empty() || !self.references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;

    #[test]
    fn test_entity_builder() {
        let entity = EntityDef::new("Floorplan", "id")
            .with_db_name("floorplans")
            .with_field(FieldDef::new("id", ScalarType::Int))
            .with_field(FieldDef::new("projectId", ScalarType::Int))
            .with_field(FieldDef::new("name", ScalarType::String))
            .with_relation(RelationFieldDef::owning("project", "Project", ["projectId"], ["id"]))
            .with_unique(["projectId", "name"]);

        assert_eq!(entity.table(), "floorplans");
        assert_eq!(entity.fields.len(), 3);
        assert!(entity.is_identity("id"));
        assert!(!entity.is_identity("name"));
        assert!(entity.relation_field("project").unwrap().is_owning());
        assert_eq!(entity.uniques[0].fields, vec!["projectId", "name"]);
    }

    #[test]
    fn test_get_field() {
        let entity = EntityDef::new("User", "id")
            .with_field(FieldDef::new("id", ScalarType::String))
            .with_field(FieldDef::new("name", ScalarType::String));

        assert!(entity.field("id").is_some());
        assert!(entity.field("nonexistent").is_none());
        assert_eq!(entity.identity_fields().count(), 1);
    }
}
