//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use quarry_core::catalog::{
    Catalog, DefaultValue, DeleteBehavior, EntityDef, FieldDef, RelationFieldDef, ScalarType,
    SchemaBundle,
};
use quarry_core::connection::{SqliteConfig, SqliteManager};
use quarry_core::proto::{CreateArgs, FindManyArgs, Record, WriteData};
use quarry_core::{Client, Engine, EngineConfig};
use tracing_subscriber::EnvFilter;

pub struct TestContext {
    pub engine: Engine,
    pub sqlite: SqliteConfig,
    _dir: tempfile::TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteConfig::new(dir.path().join("quarry.db"));
        let catalog = Catalog::load(site_schema()).unwrap();
        create_tables(&sqlite, &catalog).await;

        Self {
            engine: Engine::sqlite(catalog, sqlite.clone(), config),
            sqlite,
            _dir: dir,
        }
    }

    pub async fn create(&self, entity: &str, data: WriteData) -> Record {
        self.engine.create(entity, CreateArgs::new(data)).await.unwrap()
    }

    /// Insert a project and return its id.
    pub async fn project(&self, name: &str, category: &str) -> i64 {
        let record = self
            .create(
                "Project",
                WriteData::new().set("name", name).set("category", category),
            )
            .await;
        id_of(&record)
    }

    /// Insert a floorplan under a project and return its id.
    pub async fn floorplan(&self, project_id: i64, label: &str) -> i64 {
        let record = self
            .create(
                "Floorplan",
                WriteData::new().set("projectId", project_id).set("label", label),
            )
            .await;
        id_of(&record)
    }

    /// Insert a model under a floorplan and return its id.
    pub async fn model(&self, floorplan_id: i64, name: &str) -> i64 {
        let record = self
            .create(
                "Model3D",
                WriteData::new().set("floorplanId", floorplan_id).set("name", name),
            )
            .await;
        id_of(&record)
    }

    pub async fn all(&self, entity: &str) -> Vec<Record> {
        self.engine.find_many(entity, FindManyArgs::new()).await.unwrap()
    }
}

pub fn id_of(record: &Record) -> i64 {
    record.get("id").and_then(|v| v.as_i64()).unwrap()
}

pub fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().map(id_of).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Projects with floorplans, 3D models, notes, approvals and settings.
///
/// Floorplans and models cascade, approvals restrict, notes are nulled.
pub fn site_schema() -> SchemaBundle {
    let id = || FieldDef::new("id", ScalarType::Int).with_default(DefaultValue::Autoincrement);

    SchemaBundle::new(1)
        .with_entity(
            EntityDef::new("Project", "id")
                .with_field(id())
                .with_field(FieldDef::new("name", ScalarType::String).unique())
                .with_field(FieldDef::new("category", ScalarType::String))
                .with_field(FieldDef::optional("budget", ScalarType::Float))
                .with_field(FieldDef::optional("meta", ScalarType::Json))
                .with_field(FieldDef::optional("tags", ScalarType::StringList))
                .with_field(FieldDef::new("archived", ScalarType::Bool).with_default(DefaultValue::Bool(false)))
                .with_field(FieldDef::new("createdAt", ScalarType::DateTime).with_default(DefaultValue::Now))
                .with_field(FieldDef::new("updatedAt", ScalarType::DateTime).updated_at())
                .with_relation(RelationFieldDef::many("floorplans", "Floorplan"))
                .with_relation(RelationFieldDef::many("approvals", "Approval"))
                .with_relation(RelationFieldDef::back_one("settings", "ProjectSettings")),
        )
        .with_entity(
            EntityDef::new("Floorplan", "id")
                .with_field(id())
                .with_field(FieldDef::new("projectId", ScalarType::Int))
                .with_field(FieldDef::new("label", ScalarType::String))
                .with_field(FieldDef::optional("area", ScalarType::Float))
                .with_unique(["projectId", "label"])
                .with_relation(
                    RelationFieldDef::owning("project", "Project", ["projectId"], ["id"])
                        .on_delete(DeleteBehavior::Cascade),
                )
                .with_relation(RelationFieldDef::many("models", "Model3D"))
                .with_relation(RelationFieldDef::many("notes", "Note")),
        )
        .with_entity(
            EntityDef::new("Model3D", "id")
                .with_field(id())
                .with_field(FieldDef::new("floorplanId", ScalarType::Int))
                .with_field(FieldDef::new("name", ScalarType::String))
                .with_relation(
                    RelationFieldDef::owning("floorplan", "Floorplan", ["floorplanId"], ["id"])
                        .on_delete(DeleteBehavior::Cascade),
                ),
        )
        .with_entity(
            EntityDef::new("Note", "id")
                .with_field(id())
                .with_field(FieldDef::optional("floorplanId", ScalarType::Int))
                .with_field(FieldDef::new("text", ScalarType::String))
                .with_relation(
                    RelationFieldDef::owning("floorplan", "Floorplan", ["floorplanId"], ["id"])
                        .optional(),
                ),
        )
        .with_entity(
            EntityDef::new("Approval", "id")
                .with_field(id())
                .with_field(FieldDef::new("projectId", ScalarType::Int))
                .with_field(FieldDef::new("reviewer", ScalarType::String))
                .with_relation(RelationFieldDef::owning(
                    "project",
                    "Project",
                    ["projectId"],
                    ["id"],
                )),
        )
        .with_entity(
            EntityDef::new("ProjectSettings", "id")
                .with_field(id())
                .with_field(FieldDef::new("projectId", ScalarType::Int).unique())
                .with_field(FieldDef::new("theme", ScalarType::String))
                .with_relation(
                    RelationFieldDef::owning("project", "Project", ["projectId"], ["id"])
                        .on_delete(DeleteBehavior::Cascade),
                ),
        )
}

/// Create the store tables for a catalog.
pub async fn create_tables(sqlite: &SqliteConfig, catalog: &Catalog) {
    let mut conn = SqliteManager::new(sqlite.clone()).open().unwrap();
    conn.execute_batch(&schema_statements(catalog).join(";\n"))
        .await
        .unwrap();
}

fn column_type(scalar: ScalarType) -> &'static str {
    match scalar {
        ScalarType::Int | ScalarType::Bool => "INTEGER",
        ScalarType::Float => "REAL",
        ScalarType::String | ScalarType::DateTime | ScalarType::Json | ScalarType::StringList => {
            "TEXT"
        }
    }
}

fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names.into_iter().map(quote).collect::<Vec<_>>().join(", ")
}

/// `CREATE TABLE` and index statements mirroring a catalog.
///
/// One table per entity, unique indexes per unique constraint and foreign
/// keys per owned relation. Referential actions are left to the engine.
pub fn schema_statements(catalog: &Catalog) -> Vec<String> {
    let mut statements = Vec::new();

    for entity in catalog.entities() {
        let column_of = |name: &str| {
            entity
                .field(name)
                .map(|f| f.column().to_string())
                .unwrap_or_else(|| name.to_string())
        };
        let rowid_identity = entity.identity.len() == 1
            && entity
                .field(&entity.identity[0])
                .is_some_and(|f| f.is_autoincrement());

        let mut parts = Vec::new();
        for field in &entity.fields {
            let mut column = format!("{} {}", quote(field.column()), column_type(field.scalar));
            if rowid_identity && entity.is_identity(&field.name) {
                column.push_str(" PRIMARY KEY AUTOINCREMENT");
            } else if field.required {
                column.push_str(" NOT NULL");
            }
            parts.push(column);
        }
        if !rowid_identity {
            let identity: Vec<String> = entity.identity.iter().map(|f| column_of(f)).collect();
            parts.push(format!(
                "PRIMARY KEY ({})",
                quote_list(identity.iter().map(String::as_str))
            ));
        }
        for relation in catalog.owned_by(&entity.name) {
            let Some(referenced) = catalog.entity(&relation.referenced) else {
                continue;
            };
            let own: Vec<String> = relation.owner_fields.iter().map(|f| column_of(f)).collect();
            let other: Vec<String> = relation
                .referenced_fields
                .iter()
                .map(|f| {
                    referenced
                        .field(f)
                        .map(|d| d.column().to_string())
                        .unwrap_or_else(|| f.clone())
                })
                .collect();
            parts.push(format!(
                "FOREIGN KEY ({}) REFERENCES {} ({}) DEFERRABLE INITIALLY DEFERRED",
                quote_list(own.iter().map(String::as_str)),
                quote(referenced.table()),
                quote_list(other.iter().map(String::as_str)),
            ));
        }
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(entity.table()),
            parts.join(", ")
        ));

        for constraint in catalog.unique_constraints(&entity.name).iter().skip(1) {
            let columns: Vec<String> = constraint.fields.iter().map(|f| column_of(f)).collect();
            statements.push(format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&constraint.name),
                quote(entity.table()),
                quote_list(columns.iter().map(String::as_str)),
            ));
        }
        for relation in catalog.owned_by(&entity.name) {
            let columns: Vec<String> = relation.owner_fields.iter().map(|f| column_of(f)).collect();
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(&format!("{}_{}_idx", entity.name, relation.owner_field)),
                quote(entity.table()),
                quote_list(columns.iter().map(String::as_str)),
            ));
        }
    }

    statements
}
