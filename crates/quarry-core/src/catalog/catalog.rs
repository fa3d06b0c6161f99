//! The resolved, immutable schema catalog.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::graph::DependencyGraph;
use super::{
    Cardinality, DeleteBehavior, EntityDef, FieldDef, RelationDef, RelationFieldDef,
    RelationSide, RelationView, SchemaBundle,
};
use crate::error::{CompileError, Error};

/// A unique constraint with its catalog name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,
    /// Fields of the constraint, in declaration order.
    pub fields: Vec<String>,
}

impl UniqueConstraint {
    /// Whether `fields` is exactly this constraint's field set.
    pub fn matches<S: AsRef<str>>(&self, fields: &[S]) -> bool {
        fields.len() == self.fields.len()
            && fields
                .iter()
                .all(|f| self.fields.iter().any(|own| own == f.as_ref()))
    }
}

/// The schema catalog.
///
/// Built once from a [`SchemaBundle`], validated, and read-only afterwards.
/// Share it as `Arc<Catalog>`; no locking is involved in lookups.
#[derive(Debug)]
pub struct Catalog {
    version: u64,
    entities: Vec<EntityDef>,
    index: HashMap<String, usize>,
    relations: Vec<RelationDef>,
    relation_fields: HashMap<(String, String), (usize, RelationSide)>,
    uniques: HashMap<String, Vec<UniqueConstraint>>,
    ranks: HashMap<String, usize>,
}

/// Parse and load a catalog from the JSON form of a [`SchemaBundle`].
pub fn load_catalog_json(source: &str) -> Result<Catalog, Error> {
    Catalog::load(SchemaBundle::from_json(source)?)
}

impl Catalog {
    /// Resolve and validate a schema bundle.
    pub fn load(bundle: SchemaBundle) -> Result<Self, Error> {
        let mut index = HashMap::new();
        for (i, entity) in bundle.entities.iter().enumerate() {
            if index.insert(entity.name.clone(), i).is_some() {
                return Err(Error::schema(&entity.name, "entity declared twice"));
            }
        }

        let mut uniques = HashMap::new();
        for entity in &bundle.entities {
            validate_entity(entity)?;
            uniques.insert(entity.name.clone(), unique_constraints_of(entity));
        }

        let mut catalog = Self {
            version: bundle.version,
            entities: bundle.entities,
            index,
            relations: Vec::new(),
            relation_fields: HashMap::new(),
            uniques,
            ranks: HashMap::new(),
        };
        catalog.resolve_relations()?;
        catalog.check_required_cycles()?;
        catalog.compute_ranks();

        debug!(
            version = catalog.version,
            entities = catalog.entities.len(),
            relations = catalog.relations.len(),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Schema version of the loaded bundle.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Get an entity definition.
    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.index.get(name).map(|&i| &self.entities[i])
    }

    /// Get an entity definition or fail with a compile error.
    pub fn require_entity(&self, name: &str) -> Result<&EntityDef, CompileError> {
        self.entity(name)
            .ok_or_else(|| CompileError::UnknownEntity(name.to_string()))
    }

    /// Get a scalar field or fail with a compile error.
    pub fn require_field<'a>(
        &'a self,
        entity: &'a EntityDef,
        field: &str,
    ) -> Result<&'a FieldDef, CompileError> {
        entity.field(field).ok_or_else(|| CompileError::UnknownField {
            entity: entity.name.clone(),
            field: field.to_string(),
        })
    }

    /// All entity definitions in declaration order.
    pub fn entities(&self) -> &[EntityDef] {
        &self.entities
    }

    /// All resolved relations.
    pub fn relations(&self) -> &[RelationDef] {
        &self.relations
    }

    /// Look up a relation through one of its fields.
    pub fn relation(&self, entity: &str, field: &str) -> Option<RelationView<'_>> {
        let &(idx, side) = self
            .relation_fields
            .get(&(entity.to_string(), field.to_string()))?;
        let def = &self.relations[idx];
        let field_def = self.entity(entity)?.relation_field(field)?;
        Some(RelationView {
            def,
            field: field_def,
            side,
        })
    }

    /// Look up a relation or fail with a compile error.
    pub fn require_relation(
        &self,
        entity: &str,
        field: &str,
    ) -> Result<RelationView<'_>, CompileError> {
        self.relation(entity, field)
            .ok_or_else(|| CompileError::UnknownRelation {
                entity: entity.to_string(),
                relation: field.to_string(),
            })
    }

    /// Unique constraints of an entity, identity first.
    pub fn unique_constraints(&self, entity: &str) -> &[UniqueConstraint] {
        self.uniques.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Find the unique constraint whose fields are exactly `fields`.
    pub fn find_unique<S: AsRef<str>>(&self, entity: &str, fields: &[S]) -> Option<&UniqueConstraint> {
        self.unique_constraints(entity)
            .iter()
            .find(|c| c.matches(fields))
    }

    /// Relations in which `entity` is the referenced side.
    pub fn dependents_of<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a RelationDef> + 'a {
        self.relations.iter().filter(move |r| r.referenced == entity)
    }

    /// Relations in which `entity` holds the foreign key.
    pub fn owned_by<'a>(&'a self, entity: &'a str) -> impl Iterator<Item = &'a RelationDef> + 'a {
        self.relations.iter().filter(move |r| r.owner == entity)
    }

    /// Position of an entity in children-before-parents order.
    pub fn deletion_rank(&self, entity: &str) -> usize {
        self.ranks.get(entity).copied().unwrap_or(usize::MAX)
    }

    fn resolve_relations(&mut self) -> Result<(), Error> {
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut resolved = Vec::new();

        for entity in &self.entities {
            for field in &entity.relations {
                let key = (entity.name.clone(), field.name.clone());
                if seen.contains(&key) {
                    continue;
                }

                let target = self.entity(&field.target).ok_or_else(|| {
                    Error::schema(
                        &entity.name,
                        format!("relation {} targets unknown entity {}", field.name, field.target),
                    )
                })?;

                let candidates: Vec<&RelationFieldDef> = target
                    .relations
                    .iter()
                    .filter(|other| {
                        other.target == entity.name
                            && other.relation_name == field.relation_name
                            && !(target.name == entity.name && other.name == field.name)
                    })
                    .collect();
                let counterpart = match candidates.as_slice() {
                    [one] => *one,
                    [] => {
                        return Err(Error::schema(
                            &entity.name,
                            format!(
                                "relation {} has no counterpart field on {}",
                                field.name, target.name
                            ),
                        ))
                    }
                    _ => {
                        return Err(Error::schema(
                            &entity.name,
                            format!(
                                "relation {} is ambiguous; name the relation to pair it",
                                field.name
                            ),
                        ))
                    }
                };

                seen.insert(key);
                seen.insert((target.name.clone(), counterpart.name.clone()));

                let (owner, owner_field, referenced, referenced_field) =
                    match (field.is_owning(), counterpart.is_owning()) {
                        (true, false) => (entity, field, target, counterpart),
                        (false, true) => (target, counterpart, entity, field),
                        (true, true) => {
                            return Err(Error::schema(
                                &entity.name,
                                format!(
                                    "both sides of relation {} declare fields/references",
                                    field.name
                                ),
                            ))
                        }
                        (false, false) => {
                            return Err(Error::schema(
                                &entity.name,
                                format!(
                                    "neither side of relation {} declares fields/references",
                                    field.name
                                ),
                            ))
                        }
                    };

                resolved.push(self.resolve_pair(owner, owner_field, referenced, referenced_field)?);
            }
        }
        self.relations = resolved;

        for (idx, def) in self.relations.iter().enumerate() {
            self.relation_fields.insert(
                (def.owner.clone(), def.owner_field.clone()),
                (idx, RelationSide::Owner),
            );
            self.relation_fields.insert(
                (def.referenced.clone(), def.referenced_field.clone()),
                (idx, RelationSide::Referenced),
            );
        }
        Ok(())
    }

    fn resolve_pair(
        &self,
        owner: &EntityDef,
        owner_field: &RelationFieldDef,
        referenced: &EntityDef,
        referenced_field: &RelationFieldDef,
    ) -> Result<RelationDef, Error> {
        let fail = |message: String| Err(Error::schema(&owner.name, message));

        if owner_field.list {
            return fail(format!(
                "relation field {} owns a foreign key and cannot be a list",
                owner_field.name
            ));
        }
        if owner_field.fields.is_empty() || owner_field.fields.len() != owner_field.references.len()
        {
            return fail(format!(
                "relation {} must declare matching fields and references",
                owner_field.name
            ));
        }
        if referenced_field.on_delete.is_some() {
            return Err(Error::schema(
                &referenced.name,
                format!(
                    "onDelete belongs on the foreign-key side, not on {}",
                    referenced_field.name
                ),
            ));
        }

        let mut required = true;
        for (fk, reference) in owner_field.fields.iter().zip(&owner_field.references) {
            let Some(fk_def) = owner.field(fk) else {
                return fail(format!(
                    "relation {} uses unknown field {}",
                    owner_field.name, fk
                ));
            };
            let Some(ref_def) = referenced.field(reference) else {
                return fail(format!(
                    "relation {} references unknown field {}.{}",
                    owner_field.name, referenced.name, reference
                ));
            };
            if fk_def.scalar != ref_def.scalar {
                return fail(format!(
                    "{}.{} is {} but references {}.{} of type {}",
                    owner.name,
                    fk,
                    fk_def.scalar.name(),
                    referenced.name,
                    reference,
                    ref_def.scalar.name()
                ));
            }
            required &= fk_def.required;
        }

        if self
            .find_unique(&referenced.name, &owner_field.references)
            .is_none()
        {
            return fail(format!(
                "relation {} references {:?}, which is not a unique constraint of {}",
                owner_field.name, owner_field.references, referenced.name
            ));
        }

        if owner_field.optional == required {
            return fail(format!(
                "relation {} is declared {} but its foreign key is {}",
                owner_field.name,
                if owner_field.optional { "optional" } else { "required" },
                if required { "non-nullable" } else { "nullable" }
            ));
        }

        let cardinality = if referenced_field.list {
            Cardinality::OneToMany
        } else {
            if self.find_unique(&owner.name, &owner_field.fields).is_none() {
                return fail(format!(
                    "one-to-one relation {} needs a unique foreign key",
                    owner_field.name
                ));
            }
            if !referenced_field.optional {
                return Err(Error::schema(
                    &referenced.name,
                    format!(
                        "back side {} of a one-to-one relation must be optional",
                        referenced_field.name
                    ),
                ));
            }
            Cardinality::OneToOne
        };

        let on_delete = owner_field.on_delete.unwrap_or(if required {
            DeleteBehavior::Restrict
        } else {
            DeleteBehavior::SetNull
        });
        if on_delete == DeleteBehavior::SetNull && required {
            return fail(format!(
                "relation {} uses SetNull on a non-nullable foreign key",
                owner_field.name
            ));
        }

        let name = owner_field.relation_name.clone().unwrap_or_else(|| {
            let mut names = [owner.name.as_str(), referenced.name.as_str()];
            names.sort_unstable();
            format!("{}To{}", names[0], names[1])
        });

        Ok(RelationDef {
            name,
            owner: owner.name.clone(),
            owner_field: owner_field.name.clone(),
            owner_fields: owner_field.fields.clone(),
            referenced: referenced.name.clone(),
            referenced_field: referenced_field.name.clone(),
            referenced_fields: owner_field.references.clone(),
            cardinality,
            on_delete,
            required,
        })
    }

    fn check_required_cycles(&self) -> Result<(), Error> {
        let mut graph = DependencyGraph::new(self.entities.iter().map(|e| e.name.clone()));
        for rel in self.relations.iter().filter(|r| r.required) {
            graph.add_edge(&rel.owner, &rel.referenced);
        }
        match graph.find_cycle() {
            Some(cycle) => Err(Error::schema(
                &cycle[0],
                format!("cycle of required relations: {}", cycle.join(" -> ")),
            )),
            None => Ok(()),
        }
    }

    fn compute_ranks(&mut self) {
        let mut graph = DependencyGraph::new(self.entities.iter().map(|e| e.name.clone()));
        for rel in &self.relations {
            graph.add_edge(&rel.owner, &rel.referenced);
        }
        self.ranks = graph
            .topological_order()
            .into_iter()
            .enumerate()
            .map(|(rank, name)| (name, rank))
            .collect();
    }
}

fn validate_entity(entity: &EntityDef) -> Result<(), Error> {
    let fail = |message: String| Err(Error::schema(&entity.name, message));

    let mut names = HashSet::new();
    let all_names = entity
        .fields
        .iter()
        .map(|f| &f.name)
        .chain(entity.relations.iter().map(|r| &r.name));
    for name in all_names {
        if !names.insert(name) {
            return fail(format!("field {name} declared twice"));
        }
    }

    if entity.identity.is_empty() {
        return fail("entity has no identity".to_string());
    }
    for id in &entity.identity {
        match entity.field(id) {
            Some(field) if field.required => {}
            Some(_) => return fail(format!("identity field {id} must be non-nullable")),
            None => return fail(format!("identity field {id} is not declared")),
        }
    }

    for field in &entity.fields {
        if let Some(default) = &field.default {
            if !default.fits(field.scalar) {
                return fail(format!(
                    "default of {} does not fit type {}",
                    field.name,
                    field.scalar.name()
                ));
            }
        }
        if field.updated_at && field.scalar != super::ScalarType::DateTime {
            return fail(format!("updatedAt field {} must be a datetime", field.name));
        }
    }

    for unique in &entity.uniques {
        if unique.fields.is_empty() {
            return fail("empty unique constraint".to_string());
        }
        if let Some(missing) = unique.fields.iter().find(|f| entity.field(f).is_none()) {
            return fail(format!("unique constraint uses unknown field {missing}"));
        }
    }
    Ok(())
}

fn unique_constraints_of(entity: &EntityDef) -> Vec<UniqueConstraint> {
    let mut out = vec![UniqueConstraint {
        name: format!("{}_pkey", entity.name),
        fields: entity.identity.clone(),
    }];
    let mut push = |name: String, fields: Vec<String>| {
        if !out.iter().any(|c| c.matches(&fields)) {
            out.push(UniqueConstraint { name, fields });
        }
    };
    for field in entity.fields.iter().filter(|f| f.unique) {
        push(
            format!("{}_{}_key", entity.name, field.name),
            vec![field.name.clone()],
        );
    }
    for unique in &entity.uniques {
        let name = unique
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_{}_key", entity.name, unique.fields.join("_")));
        push(name, unique.fields.clone());
    }
    out
}
