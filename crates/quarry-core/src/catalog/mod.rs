//! Schema catalog.
//!
//! The catalog holds entities, scalar fields, resolved relations and unique
//! constraints. It is loaded once from a declarative [`SchemaBundle`] and is
//! immutable afterwards.

mod catalog;
mod entity;
mod field;
mod graph;
mod relation;
mod schema;
mod types;

pub use catalog::{load_catalog_json, Catalog, UniqueConstraint};
pub use entity::{EntityDef, RelationFieldDef, UniqueDef};
pub use field::FieldDef;
pub use relation::{Cardinality, DeleteBehavior, RelationDef, RelationSide, RelationView};
pub use schema::SchemaBundle;
pub use types::{DefaultValue, ScalarType};
