//! Foreign key checks on write.

use std::collections::HashSet;

use quarry_proto::Value;

use crate::catalog::{Catalog, EntityDef, RelationDef};
use crate::error::{ConsistencyError, Result};
use crate::query::order::value_key;
use crate::session::Session;
use crate::sql::{Expr, Select};

/// Verifies that a written foreign key points at an existing row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ReferenceCheck {
    relation: String,
    target: String,
    key: String,
    lookup: Select,
}

fn column(def: Option<&EntityDef>, field: &str) -> String {
    def.and_then(|d| d.field(field))
        .map(|f| f.column().to_string())
        .unwrap_or_else(|| field.to_string())
}

fn check_for(catalog: &Catalog, relation: &RelationDef, values: Vec<Value>) -> ReferenceCheck {
    let target = catalog.entity(&relation.referenced);
    let table = target.map(|t| t.table().to_string()).unwrap_or_else(|| relation.referenced.clone());
    let columns: Vec<String> = relation
        .referenced_fields
        .iter()
        .map(|f| column(target, f))
        .collect();
    let mut lookup = Select::from_table(table, "r0").limit(1);
    for (col, value) in columns.iter().zip(&values) {
        lookup = lookup.and_where(Expr::eq(Expr::column("r0", col.as_str()), Expr::param(value.clone())));
    }
    lookup = lookup.column(Expr::column("r0", columns.first().cloned().unwrap_or_default()));
    ReferenceCheck {
        relation: relation.owner_field.clone(),
        target: relation.referenced.clone(),
        key: format!("{}:{}", relation.name, value_key(values.iter())),
        lookup,
    }
}

/// Checks for every owning relation whose foreign key is fully written
/// with non-null values. `written` yields the value written to a field.
///
/// A composite key written only in part is left to the store.
pub(crate) fn reference_checks<'v>(
    catalog: &Catalog,
    def: &EntityDef,
    written: impl Fn(&str) -> Option<&'v Value>,
) -> Vec<ReferenceCheck> {
    catalog
        .owned_by(&def.name)
        .filter_map(|relation| {
            let values = relation
                .owner_fields
                .iter()
                .map(|f| written(f).filter(|v| !v.is_null()).cloned())
                .collect::<Option<Vec<_>>>()?;
            Some(check_for(catalog, relation, values))
        })
        .collect()
}

/// Drop checks that repeat an earlier one.
pub(crate) fn dedup(checks: Vec<ReferenceCheck>) -> Vec<ReferenceCheck> {
    let mut seen = HashSet::new();
    checks.into_iter().filter(|c| seen.insert(c.key.clone())).collect()
}

/// Run the checks; the first missing target fails the write.
pub(crate) async fn verify(session: &mut Session<'_>, entity: &str, checks: &[ReferenceCheck]) -> Result<()> {
    for check in checks {
        if session.run(check.lookup.clone()).await?.is_empty() {
            return Err(ConsistencyError::DanglingForeignKey {
                entity: entity.to_string(),
                relation: check.relation.clone(),
                target: check.target.clone(),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDef, RelationFieldDef, ScalarType, SchemaBundle};
    use crate::sql::{render, SqliteDialect, Statement};

    fn catalog() -> Catalog {
        Catalog::load(
            SchemaBundle::new(1)
                .with_entity(
                    EntityDef::new("Project", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_relation(RelationFieldDef::many("floorplans", "Floorplan")),
                )
                .with_entity(
                    EntityDef::new("Floorplan", "id")
                        .with_field(FieldDef::new("id", ScalarType::Int))
                        .with_field(FieldDef::optional("projectId", ScalarType::Int).with_db_name("project_id"))
                        .with_relation(
                            RelationFieldDef::owning("project", "Project", ["projectId"], ["id"]).optional(),
                        ),
                ),
        )
        .unwrap()
    }

    #[test]
    fn test_checks_only_written_keys() {
        let catalog = catalog();
        let def = catalog.entity("Floorplan").unwrap();
        let seven = Value::Int(7);

        let checks = reference_checks(&catalog, def, |f| (f == "projectId").then_some(&seven));
        assert_eq!(checks.len(), 1);
        assert_eq!(
            render(&Statement::Select(checks[0].lookup.clone()), &SqliteDialect).sql,
            "SELECT \"r0\".\"id\" FROM \"Project\" AS \"r0\" WHERE (\"r0\".\"id\" = ?1) LIMIT 1"
        );

        let null = Value::Null;
        assert!(reference_checks(&catalog, def, |_| Some(&null)).is_empty());
        assert!(reference_checks(&catalog, def, |_| None).is_empty());
        assert_eq!(dedup(vec![checks[0].clone(), checks[0].clone()]).len(), 1);
    }
}
