//! Resolved relation edges.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

use super::entity::RelationFieldDef;

/// Cardinality of a relation, seen from the referenced side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// One-to-one relation (unique foreign key).
    OneToOne,
    /// One-to-many relation (foreign key on the many side).
    OneToMany,
}

/// Behavior when a referenced row is deleted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize,
    SerdeDeserialize,
)]
pub enum DeleteBehavior {
    /// Delete dependent rows.
    Cascade,
    /// Prevent deletion if dependent rows exist.
    Restrict,
    /// Set the foreign key of dependent rows to null.
    SetNull,
}

/// A relation resolved from its two declared sides.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationDef {
    /// Relation name (unique within schema).
    pub name: String,
    /// Entity holding the foreign key.
    pub owner: String,
    /// Relation field on the owner.
    pub owner_field: String,
    /// Foreign-key fields on the owner.
    pub owner_fields: Vec<String>,
    /// Referenced entity.
    pub referenced: String,
    /// Relation field on the referenced entity.
    pub referenced_field: String,
    /// Referenced fields (identity or unique) on the referenced entity.
    pub referenced_fields: Vec<String>,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Delete behavior.
    pub on_delete: DeleteBehavior,
    /// Whether every foreign-key field is non-nullable.
    pub required: bool,
}

impl RelationDef {
    /// Check if this is a self-relation.
    pub fn is_self_relation(&self) -> bool {
        self.owner == self.referenced
    }
}

/// Which side of a relation a relation field sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationSide {
    /// The field's entity holds the foreign key.
    Owner,
    /// The field's entity is referenced.
    Referenced,
}

/// A relation seen through one of its fields.
#[derive(Debug, Clone, Copy)]
pub struct RelationView<'a> {
    /// The resolved edge.
    pub def: &'a RelationDef,
    /// The declared field.
    pub field: &'a RelationFieldDef,
    /// Which side the field is on.
    pub side: RelationSide,
}

impl<'a> RelationView<'a> {
    /// Entity the relation field is declared on.
    pub fn source(&self) -> &'a str {
        match self.side {
            RelationSide::Owner => &self.def.owner,
            RelationSide::Referenced => &self.def.referenced,
        }
    }

    /// Entity the relation field points to.
    pub fn target(&self) -> &'a str {
        match self.side {
            RelationSide::Owner => &self.def.referenced,
            RelationSide::Referenced => &self.def.owner,
        }
    }

    /// Whether the field holds many related rows.
    pub fn is_to_many(&self) -> bool {
        self.side == RelationSide::Referenced && self.def.cardinality == Cardinality::OneToMany
    }

    /// Whether a to-one relation may be absent.
    pub fn is_nullable(&self) -> bool {
        match self.side {
            RelationSide::Owner => !self.def.required,
            RelationSide::Referenced => true,
        }
    }

    /// Field pairs `(source field, target field)` joining the two entities.
    pub fn join_pairs(&self) -> Vec<(&'a str, &'a str)> {
        let pairs = self.def.owner_fields.iter().zip(&self.def.referenced_fields);
        match self.side {
            RelationSide::Owner => pairs.map(|(o, r)| (o.as_str(), r.as_str())).collect(),
            RelationSide::Referenced => pairs.map(|(o, r)| (r.as_str(), o.as_str())).collect(),
        }
    }

    /// Source-side join fields.
    pub fn source_fields(&self) -> Vec<&'a str> {
        self.join_pairs().into_iter().map(|(s, _)| s).collect()
    }

    /// Target-side join fields.
    pub fn target_fields(&self) -> Vec<&'a str> {
        self.join_pairs().into_iter().map(|(_, t)| t).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_floorplans() -> (RelationDef, RelationFieldDef, RelationFieldDef) {
        let def = RelationDef {
            name: "FloorplanToProject".into(),
            owner: "Floorplan".into(),
            owner_field: "project".into(),
            owner_fields: vec!["projectId".into()],
            referenced: "Project".into(),
            referenced_field: "floorplans".into(),
            referenced_fields: vec!["id".into()],
            cardinality: Cardinality::OneToMany,
            on_delete: DeleteBehavior::Cascade,
            required: true,
        };
        let owning = RelationFieldDef::owning("project", "Project", ["projectId"], ["id"]);
        let back = RelationFieldDef::many("floorplans", "Floorplan");
        (def, owning, back)
    }

    #[test]
    fn test_owner_view() {
        let (def, owning, _) = project_floorplans();
        let view = RelationView {
            def: &def,
            field: &owning,
            side: RelationSide::Owner,
        };

        assert_eq!(view.source(), "Floorplan");
        assert_eq!(view.target(), "Project");
        assert!(!view.is_to_many());
        assert!(!view.is_nullable());
        assert_eq!(view.join_pairs(), vec![("projectId", "id")]);
    }

    #[test]
    fn test_referenced_view() {
        let (def, _, back) = project_floorplans();
        let view = RelationView {
            def: &def,
            field: &back,
            side: RelationSide::Referenced,
        };

        assert_eq!(view.target(), "Floorplan");
        assert!(view.is_to_many());
        assert_eq!(view.join_pairs(), vec![("id", "projectId")]);
        assert!(!def.is_self_relation());
    }
}
