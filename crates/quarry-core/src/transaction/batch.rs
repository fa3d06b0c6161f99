//! Batched transactions.
//!
//! A batch is checked statically before it runs: operations that read a
//! unique key another operation writes, or that both write the same key,
//! are rejected. Writes scoped by a filter rather than a unique key
//! (`updateMany`, `deleteMany`, cascades, arithmetic on unique fields)
//! claim their whole entity. Independent operations can then run reads
//! first and writes second without any of them observing another's
//! effects.

use std::collections::HashSet;

use quarry_proto::{FieldUpdate, Operation, OperationResult, UniqueWhere, UpdateData, Value, WriteData};

use crate::catalog::{Catalog, DeleteBehavior, EntityDef};
use crate::connection::codec::coerce;
use crate::error::{CompileError, Result};
use crate::handler::PreparedOperation;
use crate::session::Session;

/// A row of one entity identified by a unique key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyRef {
    entity: String,
    key: String,
}

impl std::fmt::Display for KeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.entity, self.key)
    }
}

/// Unique keys an operation reads and writes, plus the entities it
/// writes without knowing which rows.
#[derive(Debug, Default)]
struct Footprint {
    reads: HashSet<KeyRef>,
    writes: HashSet<KeyRef>,
    scans: HashSet<String>,
}

impl Footprint {
    /// Every entity the operation reads or writes.
    fn touches(&self, entity: &str) -> bool {
        self.scans.contains(entity)
            || self.reads.iter().chain(&self.writes).any(|k| k.entity == entity)
    }

    /// An entity written by one side by filter and touched by the other.
    fn scan_overlap<'a>(&'a self, other: &Footprint) -> Option<&'a str> {
        self.scans.iter().find(|e| other.touches(e)).map(String::as_str)
    }
}

fn key_ref<'v>(def: &EntityDef, pairs: impl IntoIterator<Item = (&'v str, &'v Value)>) -> KeyRef {
    let mut pairs: Vec<(&str, Value)> = pairs
        .into_iter()
        .map(|(name, value)| {
            let value = def
                .field(name)
                .and_then(|f| coerce(f.scalar, value))
                .unwrap_or_else(|| value.clone());
            (name, value)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    KeyRef {
        entity: def.name.clone(),
        key: pairs
            .iter()
            .map(|(name, value)| format!("{name}={}", value.to_json()))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

fn unique_key(catalog: &Catalog, entity: &str, unique: &UniqueWhere) -> Option<KeyRef> {
    let def = catalog.entity(entity)?;
    Some(key_ref(def, unique.key.iter().map(|(n, v)| (n.as_str(), v))))
}

/// Keys of the unique constraints fully covered by non-null written values.
fn written_keys<'v>(catalog: &Catalog, def: &EntityDef, lookup: &dyn Fn(&str) -> Option<&'v Value>) -> Vec<KeyRef> {
    catalog
        .unique_constraints(&def.name)
        .iter()
        .filter_map(|constraint| {
            let pairs = constraint
                .fields
                .iter()
                .map(|f| lookup(f).filter(|v| !v.is_null()).map(|v| (f.as_str(), v)))
                .collect::<Option<Vec<_>>>()?;
            Some(key_ref(def, pairs))
        })
        .collect()
}

/// Keys of the rows that written foreign keys point at.
fn referenced_keys<'v>(catalog: &Catalog, def: &EntityDef, lookup: &dyn Fn(&str) -> Option<&'v Value>) -> Vec<KeyRef> {
    catalog
        .owned_by(&def.name)
        .filter_map(|relation| {
            let target = catalog.entity(&relation.referenced)?;
            let pairs = relation
                .owner_fields
                .iter()
                .zip(&relation.referenced_fields)
                .map(|(own, other)| lookup(own).filter(|v| !v.is_null()).map(|v| (other.as_str(), v)))
                .collect::<Option<Vec<_>>>()?;
            Some(key_ref(target, pairs))
        })
        .collect()
}

fn record_write(fp: &mut Footprint, catalog: &Catalog, def: &EntityDef, data: &WriteData) {
    let lookup = |f: &str| data.get(f);
    fp.writes.extend(written_keys(catalog, def, &lookup));
    fp.reads.extend(referenced_keys(catalog, def, &lookup));
}

fn record_update(fp: &mut Footprint, catalog: &Catalog, def: &EntityDef, data: &UpdateData) {
    let arithmetic_on_unique = data.updates.iter().any(|(name, update)| {
        !matches!(update, FieldUpdate::Set(_))
            && catalog
                .unique_constraints(&def.name)
                .iter()
                .any(|c| c.fields.iter().any(|f| f == name))
    });
    if arithmetic_on_unique {
        fp.scans.insert(def.name.clone());
    }
    let lookup = |f: &str| {
        data.updates.iter().find(|(name, _)| name == f).and_then(|(_, u)| match u {
            FieldUpdate::Set(v) => Some(v),
            _ => None,
        })
    };
    fp.writes.extend(written_keys(catalog, def, &lookup));
    fp.reads.extend(referenced_keys(catalog, def, &lookup));
}

/// Entities a delete on `entity` reaches through cascades and nulling.
fn record_delete_closure(fp: &mut Footprint, catalog: &Catalog, entity: &str) {
    let mut pending = vec![entity.to_string()];
    let mut seen = HashSet::new();
    while let Some(current) = pending.pop() {
        if !seen.insert(current.clone()) {
            continue;
        }
        for relation in catalog.dependents_of(&current) {
            match relation.on_delete {
                DeleteBehavior::Cascade => {
                    fp.scans.insert(relation.owner.clone());
                    pending.push(relation.owner.clone());
                }
                DeleteBehavior::SetNull => {
                    fp.scans.insert(relation.owner.clone());
                }
                DeleteBehavior::Restrict => {}
            }
        }
    }
}

fn footprint(catalog: &Catalog, operation: &Operation) -> Footprint {
    let mut fp = Footprint::default();
    let Some(def) = catalog.entity(operation.entity()) else {
        return fp;
    };
    match operation {
        Operation::FindUnique { entity, args } => {
            fp.reads.extend(unique_key(catalog, entity, &args.unique));
        }
        Operation::Create { args, .. } => record_write(&mut fp, catalog, def, &args.data),
        Operation::CreateMany { args, .. } => {
            for data in &args.data {
                record_write(&mut fp, catalog, def, data);
            }
        }
        Operation::Update { entity, args } => {
            fp.writes.extend(unique_key(catalog, entity, &args.unique));
            record_update(&mut fp, catalog, def, &args.data);
        }
        Operation::UpdateMany { entity, args } => {
            fp.scans.insert(entity.clone());
            record_update(&mut fp, catalog, def, &args.data);
        }
        Operation::Upsert { entity, args } => {
            fp.writes.extend(unique_key(catalog, entity, &args.unique));
            record_write(&mut fp, catalog, def, &args.create);
            record_update(&mut fp, catalog, def, &args.update);
        }
        Operation::Delete { entity, args } => {
            fp.writes.extend(unique_key(catalog, entity, &args.unique));
            record_delete_closure(&mut fp, catalog, entity);
        }
        Operation::DeleteMany { entity, .. } => {
            fp.scans.insert(entity.clone());
            record_delete_closure(&mut fp, catalog, entity);
        }
        Operation::FindMany { .. }
        | Operation::FindFirst { .. }
        | Operation::Count { .. }
        | Operation::Aggregate { .. }
        | Operation::GroupBy { .. } => {}
    }
    fp
}

/// Reject a batch whose operations depend on each other.
pub fn check_independent(catalog: &Catalog, operations: &[Operation]) -> Result<(), CompileError> {
    let footprints: Vec<Footprint> = operations.iter().map(|op| footprint(catalog, op)).collect();
    for (second, later) in footprints.iter().enumerate() {
        for (first, earlier) in footprints[..second].iter().enumerate() {
            let conflict = |reason: String| CompileError::BatchDependency { first, second, reason };
            if let Some(entity) = earlier.scan_overlap(later) {
                return Err(conflict(format!("{} writes {entity} by filter", operations[first].name())));
            }
            if let Some(entity) = later.scan_overlap(earlier) {
                return Err(conflict(format!("{} writes {entity} by filter", operations[second].name())));
            }
            if let Some(key) = earlier.writes.intersection(&later.writes).next() {
                return Err(conflict(format!("both write {key}")));
            }
            if let Some(key) = earlier.writes.intersection(&later.reads).next() {
                return Err(conflict(format!("{} reads {key} written by {}", operations[second].name(), operations[first].name())));
            }
            if let Some(key) = earlier.reads.intersection(&later.writes).next() {
                return Err(conflict(format!("{} writes {key} read by {}", operations[second].name(), operations[first].name())));
            }
        }
    }
    Ok(())
}

/// Run prepared operations on an open transaction: reads first, then
/// writes, each group in submission order. Results are returned in
/// submission order.
pub(crate) async fn execute_batch(session: &mut Session<'_>, prepared: &[PreparedOperation]) -> Result<Vec<OperationResult>> {
    let mut results: Vec<Option<OperationResult>> = vec![None; prepared.len()];
    let reads = prepared.iter().enumerate().filter(|(_, op)| op.is_read());
    let writes = prepared.iter().enumerate().filter(|(_, op)| !op.is_read());
    for (index, operation) in reads.chain(writes) {
        results[index] = Some(operation.execute(session).await?);
    }
    Ok(results.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, RelationFieldDef, ScalarType, SchemaBundle};
    use quarry_proto::{
        CreateArgs, DeleteArgs, DeleteManyArgs, FindManyArgs, FindUniqueArgs, UpdateArgs,
        UpdateManyArgs,
    };

    fn catalog() -> Catalog {
        Catalog::load(
            SchemaBundle::new(1)
                .with_entity(
                    EntityDef::new("Project", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::new("name", ScalarType::String).unique())
                        .with_field(FieldDef::optional("code", ScalarType::Int).unique())
                        .with_relation(RelationFieldDef::many("floorplans", "Floorplan")),
                )
                .with_entity(
                    EntityDef::new("Floorplan", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::new("projectId", ScalarType::Int))
                        .with_relation(
                            RelationFieldDef::owning("project", "Project", ["projectId"], ["id"])
                                .on_delete(DeleteBehavior::Cascade),
                        ),
                ),
        )
        .unwrap()
    }

    fn create(entity: &str, data: WriteData) -> Operation {
        Operation::Create {
            entity: entity.into(),
            args: CreateArgs::new(data),
        }
    }

    #[test]
    fn test_independent_batch_passes() {
        let ops = vec![
            Operation::FindMany {
                entity: "Project".into(),
                args: FindManyArgs::new(),
            },
            create("Project", WriteData::new().set("id", 1).set("name", "a")),
            create("Project", WriteData::new().set("id", 2).set("name", "b")),
            Operation::FindUnique {
                entity: "Project".into(),
                args: FindUniqueArgs::new(UniqueWhere::new("name", "c")),
            },
        ];
        assert!(check_independent(&catalog(), &ops).is_ok());
    }

    #[test]
    fn test_consuming_a_produced_key_is_rejected() {
        let ops = vec![
            create("Project", WriteData::new().set("id", 1).set("name", "a")),
            create("Floorplan", WriteData::new().set("id", 10).set("projectId", 1)),
        ];
        assert!(matches!(
            check_independent(&catalog(), &ops),
            Err(CompileError::BatchDependency { first: 0, second: 1, .. })
        ));
    }

    #[test]
    fn test_same_unique_key_twice_is_rejected() {
        let ops = vec![
            Operation::Update {
                entity: "Project".into(),
                args: UpdateArgs::new(UniqueWhere::new("name", "a"), UpdateData::new().set("id", 5)),
            },
            Operation::Delete {
                entity: "Project".into(),
                args: DeleteArgs::new(UniqueWhere::new("name", "a")),
            },
        ];
        let err = check_independent(&catalog(), &ops).unwrap_err();
        assert!(err.to_string().contains("both write Project (name=\"a\")"));

        let reads = vec![
            Operation::FindUnique {
                entity: "Project".into(),
                args: FindUniqueArgs::new(UniqueWhere::new("id", 1)),
            },
            Operation::FindUnique {
                entity: "Project".into(),
                args: FindUniqueArgs::new(UniqueWhere::new("id", 1.0)),
            },
        ];
        assert!(check_independent(&catalog(), &reads).is_ok());
    }

    fn delete_many(entity: &str) -> Operation {
        Operation::DeleteMany {
            entity: entity.into(),
            args: DeleteManyArgs::new(None),
        }
    }

    #[test]
    fn test_filter_scoped_writes_claim_the_entity() {
        let catalog = catalog();
        let created = create("Project", WriteData::new().set("name", "a"));

        for ops in [
            vec![created.clone(), delete_many("Project")],
            vec![delete_many("Project"), created.clone()],
        ] {
            assert!(matches!(
                check_independent(&catalog, &ops),
                Err(CompileError::BatchDependency { first: 0, second: 1, .. })
            ));
        }

        let update_many = Operation::UpdateMany {
            entity: "Project".into(),
            args: UpdateManyArgs::new(None, UpdateData::new().set("name", "b")),
        };
        assert!(check_independent(&catalog, &[created.clone(), update_many]).is_err());

        let unrelated = create("Floorplan", WriteData::new().set("id", 10).set("projectId", 7));
        assert!(check_independent(&catalog, &[delete_many("Floorplan"), created]).is_ok());
        assert!(check_independent(&catalog, &[unrelated.clone(), delete_many("Floorplan")]).is_err());
    }

    #[test]
    fn test_cascade_closure_is_claimed() {
        let catalog = catalog();
        let child = create("Floorplan", WriteData::new().set("id", 10).set("projectId", 7));

        assert!(check_independent(&catalog, &[delete_many("Project"), child.clone()]).is_err());

        let delete = Operation::Delete {
            entity: "Project".into(),
            args: DeleteArgs::new(UniqueWhere::new("name", "a")),
        };
        let err = check_independent(&catalog, &[child, delete]).unwrap_err();
        assert!(err.to_string().contains("writes Floorplan by filter"));
    }

    #[test]
    fn test_arithmetic_on_unique_field_claims_the_entity() {
        let catalog = catalog();
        let bump = Operation::Update {
            entity: "Project".into(),
            args: UpdateArgs::new(UniqueWhere::new("name", "a"), UpdateData::new().increment("code", 1)),
        };
        let read = Operation::FindUnique {
            entity: "Project".into(),
            args: FindUniqueArgs::new(UniqueWhere::new("code", 2)),
        };
        assert!(check_independent(&catalog, &[bump, read]).is_err());

        let plain = Operation::Update {
            entity: "Project".into(),
            args: UpdateArgs::new(UniqueWhere::new("name", "a"), UpdateData::new().set("name", "z")),
        };
        let other = Operation::FindUnique {
            entity: "Project".into(),
            args: FindUniqueArgs::new(UniqueWhere::new("id", 2)),
        };
        assert!(check_independent(&catalog, &[plain, other]).is_ok());
    }
}
