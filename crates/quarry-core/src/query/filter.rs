//! Filter compilation.
//!
//! Lowers a [`Filter`] tree rooted at one entity into a boolean [`Expr`].
//! Relation quantifiers become correlated `EXISTS` subqueries, so the
//! result never multiplies the rows of the outer query.

use quarry_proto::{
    Filter, JsonCondition, JsonFilter, JsonPathSegment, QueryMode, RelationPredicate,
    ScalarFilter, UniqueWhere, Value,
};
use serde_json::Value as JsonValue;

use crate::catalog::{Catalog, EntityDef, FieldDef, RelationView, ScalarType};
use crate::connection::codec::coerce;
use crate::error::CompileError;
use crate::sql::{CompareOp, Expr, JsonPredicate, ListPredicate, PatternKind, Select};

/// Generates table aliases unique within one statement tree.
#[derive(Debug, Default)]
pub struct Aliases {
    next: usize,
}

impl Aliases {
    /// Start after the root alias `t0`.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Next alias with the given prefix.
    pub fn next(&mut self, prefix: &str) -> String {
        let alias = format!("{prefix}{}", self.next);
        self.next += 1;
        alias
    }
}

/// Compiles filter trees against the catalog.
pub struct FilterCompiler<'c> {
    catalog: &'c Catalog,
    aliases: Aliases,
}

impl<'c> FilterCompiler<'c> {
    /// Create a compiler.
    pub fn new(catalog: &'c Catalog) -> Self {
        Self {
            catalog,
            aliases: Aliases::new(),
        }
    }

    /// The catalog.
    pub fn catalog(&self) -> &'c Catalog {
        self.catalog
    }

    /// Allocate a fresh alias from the shared sequence.
    pub fn alias(&mut self, prefix: &str) -> String {
        self.aliases.next(prefix)
    }

    /// Compile `filter` for rows of `entity` bound to `alias`.
    pub fn compile(&mut self, entity: &str, alias: &str, filter: &Filter) -> Result<Expr, CompileError> {
        let catalog = self.catalog;
        let def = catalog.require_entity(entity)?;
        self.lower(def, alias, filter)
    }

    /// Compile an optional filter; `None` when absent.
    pub fn compile_opt(
        &mut self,
        entity: &str,
        alias: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<Expr>, CompileError> {
        filter.map(|f| self.compile(entity, alias, f)).transpose()
    }

    /// Compile a unique lookup. The fields must form a unique constraint.
    pub fn compile_unique(
        &mut self,
        entity: &str,
        alias: &str,
        unique: &UniqueWhere,
    ) -> Result<Expr, CompileError> {
        let catalog = self.catalog;
        let def = catalog.require_entity(entity)?;
        let values = self.unique_values(def, &unique.key)?;
        let mut parts: Vec<Expr> = values
            .into_iter()
            .map(|(field, value)| Expr::eq(Expr::column(alias, field.column()), Expr::param(value)))
            .collect();
        if let Some(filter) = &unique.filter {
            parts.push(self.lower(def, alias, filter)?);
        }
        Ok(Expr::and(parts))
    }

    /// Resolve and coerce the values of a unique key.
    pub fn unique_values<'e>(
        &self,
        def: &'e EntityDef,
        key: &[(String, Value)],
    ) -> Result<Vec<(&'e FieldDef, Value)>, CompileError> {
        let names: Vec<&str> = key.iter().map(|(name, _)| name.as_str()).collect();
        if self.catalog.find_unique(&def.name, &names).is_none() {
            for name in &names {
                self.catalog.require_field(def, name)?;
            }
            return Err(CompileError::NotUnique {
                entity: def.name.clone(),
                fields: names.iter().map(|n| n.to_string()).collect(),
            });
        }
        key.iter()
            .map(|(name, value)| {
                let field = def.field(name).ok_or_else(|| CompileError::UnknownField {
                    entity: def.name.clone(),
                    field: name.clone(),
                })?;
                if value.is_null() {
                    return Err(invalid_predicate(def, name, "unique lookup value cannot be null"));
                }
                Ok((field, coerce_value(def, field, value)?))
            })
            .collect()
    }

    fn lower(&mut self, def: &EntityDef, alias: &str, filter: &Filter) -> Result<Expr, CompileError> {
        match filter {
            Filter::And(children) => {
                let parts = children
                    .iter()
                    .map(|c| self.lower(def, alias, c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::and(parts))
            }
            Filter::Or(children) => {
                let parts = children
                    .iter()
                    .map(|c| self.lower(def, alias, c))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Expr::or(parts))
            }
            Filter::Not(inner) => Ok(Expr::not(self.lower(def, alias, inner)?)),
            Filter::Field {
                field,
                condition,
                mode,
            } => {
                let field_def = match def.field(field) {
                    Some(f) => f,
                    None if def.relation_field(field).is_some() => {
                        return Err(invalid_predicate(
                            def,
                            field,
                            "relation fields take a relation filter",
                        ))
                    }
                    None => {
                        return Err(CompileError::UnknownField {
                            entity: def.name.clone(),
                            field: field.clone(),
                        })
                    }
                };
                lower_scalar(def, field_def, alias, condition, *mode)
            }
            Filter::Relation { field, predicate } => self.lower_relation(def, alias, field, predicate),
        }
    }

    fn lower_relation(
        &mut self,
        def: &EntityDef,
        alias: &str,
        field: &str,
        predicate: &RelationPredicate,
    ) -> Result<Expr, CompileError> {
        if def.field(field).is_some() {
            return Err(invalid_predicate(def, field, "scalar fields take a field filter"));
        }
        let catalog = self.catalog;
        let view = catalog.require_relation(&def.name, field)?;
        let to_many = view.is_to_many();
        let target = catalog.require_entity(view.target())?;
        let sub_alias = self.alias("t");

        let quantifier_ok = match predicate {
            RelationPredicate::Some(_) | RelationPredicate::Every(_) | RelationPredicate::None(_) => {
                to_many
            }
            RelationPredicate::Is(_) | RelationPredicate::IsNot(_) => !to_many,
        };
        if !quantifier_ok {
            let reason = if to_many {
                "to-many relations take some/every/none"
            } else {
                "to-one relations take is/isNot"
            };
            return Err(invalid_predicate(def, field, reason));
        }

        let correlated = |inner: Option<Expr>| {
            let mut select = Select::from_table(target.table(), sub_alias.clone())
                .and_where(join_condition(catalog, &view, alias, &sub_alias));
            if let Some(inner) = inner {
                select = select.and_where(inner);
            }
            select
        };

        let expr = match predicate {
            RelationPredicate::Some(f) => {
                let inner = self.lower(target, &sub_alias, f)?;
                Expr::exists(correlated(Some(inner)))
            }
            RelationPredicate::None(f) => {
                let inner = self.lower(target, &sub_alias, f)?;
                Expr::not_exists(correlated(Some(inner)))
            }
            RelationPredicate::Every(f) => {
                let inner = self.lower(target, &sub_alias, f)?;
                Expr::not_exists(correlated(Some(Expr::not(inner))))
            }
            RelationPredicate::Is(Some(f)) => {
                let inner = self.lower(target, &sub_alias, f)?;
                Expr::exists(correlated(Some(inner)))
            }
            RelationPredicate::Is(None) => Expr::not_exists(correlated(None)),
            RelationPredicate::IsNot(Some(f)) => {
                let inner = self.lower(target, &sub_alias, f)?;
                Expr::not_exists(correlated(Some(inner)))
            }
            RelationPredicate::IsNot(None) => Expr::exists(correlated(None)),
        };
        Ok(expr)
    }
}

/// `target.col = source.col` for every join pair of a relation.
pub(crate) fn join_condition(
    catalog: &Catalog,
    view: &RelationView<'_>,
    source_alias: &str,
    target_alias: &str,
) -> Expr {
    let source = catalog.entity(view.source());
    let target = catalog.entity(view.target());
    let column = |def: Option<&EntityDef>, field: &str| {
        def.and_then(|d| d.field(field))
            .map(|f| f.column().to_string())
            .unwrap_or_else(|| field.to_string())
    };
    Expr::and(
        view.join_pairs()
            .into_iter()
            .map(|(s, t)| {
                Expr::eq(
                    Expr::column(target_alias, column(target, t)),
                    Expr::column(source_alias, column(source, s)),
                )
            })
            .collect(),
    )
}

fn invalid_predicate(def: &EntityDef, field: &str, reason: impl Into<String>) -> CompileError {
    CompileError::InvalidPredicate {
        entity: def.name.clone(),
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Coerce a request value to a field's type.
pub(crate) fn coerce_value(def: &EntityDef, field: &FieldDef, value: &Value) -> Result<Value, CompileError> {
    coerce(field.scalar, value).ok_or_else(|| CompileError::InvalidValue {
        entity: def.name.clone(),
        field: field.name.clone(),
        expected: field.scalar.name(),
        found: value.type_name(),
    })
}

pub(crate) fn lower_scalar(
    def: &EntityDef,
    field: &FieldDef,
    alias: &str,
    condition: &ScalarFilter,
    mode: QueryMode,
) -> Result<Expr, CompileError> {
    let insensitive = mode == QueryMode::Insensitive;
    if insensitive && field.scalar != ScalarType::String {
        return Err(invalid_predicate(def, &field.name, "insensitive mode applies to strings only"));
    }
    let column = Expr::column(alias, field.column());
    let operand = || {
        if insensitive {
            Expr::Lower(Box::new(column.clone()))
        } else {
            column.clone()
        }
    };
    let param = |value: &Value| -> Result<Expr, CompileError> {
        let value = coerce_value(def, field, value)?;
        Ok(Expr::Param(match (insensitive, value) {
            (true, Value::String(s)) => Value::String(s.to_ascii_lowercase()),
            (_, v) => v,
        }))
    };
    let require = |ok: bool, reason: &str| -> Result<(), CompileError> {
        if ok {
            Ok(())
        } else {
            Err(invalid_predicate(def, &field.name, reason))
        }
    };

    match condition {
        ScalarFilter::Equals(Value::Null) => Ok(Expr::is_null(column)),
        ScalarFilter::Not(Value::Null) => Ok(Expr::is_not_null(column)),
        ScalarFilter::Equals(value) | ScalarFilter::Not(value) if field.scalar == ScalarType::Json => {
            let json = match coerce_value(def, field, value)? {
                Value::Json(json) => json,
                other => other.to_json(),
            };
            let condition = match condition {
                ScalarFilter::Equals(_) => JsonCondition::Equals(json),
                _ => JsonCondition::Not(json),
            };
            lower_json(def, field, &column, &JsonFilter { path: Vec::new(), condition })
        }
        ScalarFilter::Equals(value) => Ok(Expr::eq(operand(), param(value)?)),
        ScalarFilter::Not(value) => Ok(Expr::compare(CompareOp::Ne, operand(), param(value)?)),
        ScalarFilter::In(values) | ScalarFilter::NotIn(values) => {
            require(field.scalar != ScalarType::Json, "json fields do not support in/notIn")?;
            if values.iter().any(Value::is_null) {
                return Err(invalid_predicate(def, &field.name, "in/notIn lists cannot contain null"));
            }
            let list = values.iter().map(param).collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::InList {
                expr: Box::new(operand()),
                list,
                negated: matches!(condition, ScalarFilter::NotIn(_)),
            })
        }
        ScalarFilter::Lt(value)
        | ScalarFilter::Lte(value)
        | ScalarFilter::Gt(value)
        | ScalarFilter::Gte(value) => {
            require(
                field.scalar.is_orderable() && field.scalar != ScalarType::Bool,
                "range comparisons need a numeric, string or datetime field",
            )?;
            if value.is_null() {
                return Err(invalid_predicate(def, &field.name, "cannot compare against null"));
            }
            let op = match condition {
                ScalarFilter::Lt(_) => CompareOp::Lt,
                ScalarFilter::Lte(_) => CompareOp::Lte,
                ScalarFilter::Gt(_) => CompareOp::Gt,
                _ => CompareOp::Gte,
            };
            Ok(Expr::compare(op, operand(), param(value)?))
        }
        ScalarFilter::Contains(s) | ScalarFilter::StartsWith(s) | ScalarFilter::EndsWith(s) => {
            require(field.scalar == ScalarType::String, "pattern conditions need a string field")?;
            let kind = match condition {
                ScalarFilter::Contains(_) => PatternKind::Contains,
                ScalarFilter::StartsWith(_) => PatternKind::StartsWith,
                _ => PatternKind::EndsWith,
            };
            Ok(Expr::Pattern {
                expr: Box::new(column),
                kind,
                value: s.clone(),
                insensitive,
            })
        }
        ScalarFilter::Has(_)
        | ScalarFilter::HasEvery(_)
        | ScalarFilter::HasSome(_)
        | ScalarFilter::IsEmpty(_) => {
            require(field.scalar == ScalarType::StringList, "list conditions need a list field")?;
            let predicate = match condition {
                ScalarFilter::Has(v) => ListPredicate::Has(v.clone()),
                ScalarFilter::HasEvery(v) if v.is_empty() => return Ok(Expr::Bool(true)),
                ScalarFilter::HasEvery(v) => ListPredicate::HasEvery(v.clone()),
                ScalarFilter::HasSome(v) if v.is_empty() => return Ok(Expr::Bool(false)),
                ScalarFilter::HasSome(v) => ListPredicate::HasSome(v.clone()),
                other => ListPredicate::IsEmpty(matches!(other, ScalarFilter::IsEmpty(true))),
            };
            Ok(Expr::List {
                column: Box::new(column),
                predicate,
            })
        }
        ScalarFilter::Json(filter) => {
            require(field.scalar == ScalarType::Json, "path conditions need a json field")?;
            lower_json(def, field, &column, filter)
        }
    }
}

fn lower_json(
    def: &EntityDef,
    field: &FieldDef,
    column: &Expr,
    filter: &JsonFilter,
) -> Result<Expr, CompileError> {
    // JSON1 paths quote keys with no escape syntax.
    let quoted = filter.path.iter().any(|segment| match segment {
        JsonPathSegment::Key(key) => key.contains('"'),
        JsonPathSegment::Index(_) => false,
    });
    if quoted {
        return Err(invalid_predicate(def, &field.name, "JSON path keys cannot contain '\"'"));
    }
    let node = |predicate: JsonPredicate| Expr::Json {
        column: Box::new(column.clone()),
        path: filter.path.clone(),
        predicate,
    };
    let non_null = |value: &JsonValue| {
        if value.is_null() {
            Err(invalid_predicate(def, &field.name, "use isNull with a null kind to match JSON null"))
        } else {
            Ok(())
        }
    };

    let expr = match &filter.condition {
        JsonCondition::Equals(value) => {
            non_null(value)?;
            node(JsonPredicate::Equals(value.clone()))
        }
        JsonCondition::Not(value) => {
            non_null(value)?;
            Expr::and(vec![
                node(JsonPredicate::Present),
                Expr::not(node(JsonPredicate::Equals(value.clone()))),
            ])
        }
        JsonCondition::IsNull(kind) => node(JsonPredicate::Null(*kind)),
        JsonCondition::IsNotNull(kind) => Expr::not(node(JsonPredicate::Null(*kind))),
        JsonCondition::StringContains(s) => node(JsonPredicate::Pattern(PatternKind::Contains, s.clone())),
        JsonCondition::StringStartsWith(s) => {
            node(JsonPredicate::Pattern(PatternKind::StartsWith, s.clone()))
        }
        JsonCondition::StringEndsWith(s) => node(JsonPredicate::Pattern(PatternKind::EndsWith, s.clone())),
        JsonCondition::ArrayContains(value) => {
            let elements = match value {
                JsonValue::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            if elements
                .iter()
                .any(|e| e.is_null() || e.is_array() || e.is_object())
            {
                return Err(invalid_predicate(
                    def,
                    &field.name,
                    "arrayContains takes non-null scalar elements",
                ));
            }
            node(JsonPredicate::ArrayContains(elements))
        }
        JsonCondition::Lt(value)
        | JsonCondition::Lte(value)
        | JsonCondition::Gt(value)
        | JsonCondition::Gte(value) => {
            if !(value.is_number() || value.is_string()) {
                return Err(invalid_predicate(
                    def,
                    &field.name,
                    "JSON range comparisons take a number or a string",
                ));
            }
            let op = match &filter.condition {
                JsonCondition::Lt(_) => CompareOp::Lt,
                JsonCondition::Lte(_) => CompareOp::Lte,
                JsonCondition::Gt(_) => CompareOp::Gt,
                _ => CompareOp::Gte,
            };
            node(JsonPredicate::Compare(op, value.clone()))
        }
    };
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, RelationFieldDef, SchemaBundle};
    use crate::sql::{render, SqliteDialect, Statement};
    use quarry_proto::{JsonPathSegment, NullKind};
    use serde_json::json;

    fn catalog() -> Catalog {
        let bundle = SchemaBundle::new(1)
            .with_entity(
                EntityDef::new("Project", "id")
                    .with_field(FieldDef::new("id", ScalarType::Int))
                    .with_field(FieldDef::new("name", ScalarType::String))
                    .with_field(FieldDef::optional("meta", ScalarType::Json))
                    .with_field(FieldDef::new("tags", ScalarType::StringList))
                    .with_relation(RelationFieldDef::many("floorplans", "Floorplan")),
            )
            .with_entity(
                EntityDef::new("Floorplan", "id")
                    .with_field(FieldDef::new("id", ScalarType::Int))
                    .with_field(FieldDef::new("area", ScalarType::Float))
                    .with_field(FieldDef::new("projectId", ScalarType::Int))
                    .with_relation(RelationFieldDef::owning(
                        "project",
                        "Project",
                        ["projectId"],
                        ["id"],
                    )),
            );
        Catalog::load(bundle).unwrap()
    }

    fn where_sql(expr: Expr) -> String {
        let select = Select::from_table("Project", "t0").and_where(expr);
        let sql = render(&Statement::Select(select), &SqliteDialect).sql;
        sql.split_once(" WHERE ").map(|(_, w)| w.to_string()).unwrap_or_default()
    }

    #[test]
    fn test_scalar_lowering() {
        let catalog = catalog();
        let mut compiler = FilterCompiler::new(&catalog);
        let expr = compiler
            .compile(
                "Project",
                "t0",
                &Filter::and(vec![
                    Filter::eq("name", "a"),
                    Filter::field("meta", ScalarFilter::Equals(Value::Null)),
                ]),
            )
            .unwrap();
        assert_eq!(
            where_sql(expr),
            "((\"t0\".\"name\" = ?1) AND (\"t0\".\"meta\" IS NULL))"
        );
    }

    #[test]
    fn test_insensitive_requires_string() {
        let catalog = catalog();
        let mut compiler = FilterCompiler::new(&catalog);
        let err = compiler
            .compile(
                "Project",
                "t0",
                &Filter::field_insensitive("id", ScalarFilter::Equals(1.into())),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidPredicate { .. }));

        let expr = compiler
            .compile(
                "Project",
                "t0",
                &Filter::field_insensitive("name", ScalarFilter::Equals("AbC".into())),
            )
            .unwrap();
        assert_eq!(
            expr,
            Expr::eq(
                Expr::Lower(Box::new(Expr::column("t0", "name"))),
                Expr::param("abc")
            )
        );
    }

    #[test]
    fn test_relation_quantifiers() {
        let catalog = catalog();
        let mut compiler = FilterCompiler::new(&catalog);
        let every = compiler
            .compile(
                "Project",
                "t0",
                &Filter::every("floorplans", Filter::field("area", ScalarFilter::Gt(10.into()))),
            )
            .unwrap();
        assert_eq!(
            where_sql(every),
            "(NOT EXISTS (SELECT 1 FROM \"Floorplan\" AS \"t1\" WHERE ((\"t1\".\"projectId\" = \"t0\".\"id\") \
             AND (NOT (\"t1\".\"area\" > ?1)))))"
        );

        let err = compiler
            .compile("Project", "t0", &Filter::is_absent("floorplans"))
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidPredicate { .. }));

        let is_absent = compiler
            .compile("Floorplan", "t0", &Filter::is_absent("project"))
            .unwrap();
        assert!(matches!(is_absent, Expr::Exists { negated: true, .. }));
    }

    #[test]
    fn test_unknown_names() {
        let catalog = catalog();
        let mut compiler = FilterCompiler::new(&catalog);
        assert!(matches!(
            compiler.compile("Project", "t0", &Filter::eq("nope", 1)),
            Err(CompileError::UnknownField { .. })
        ));
        assert!(matches!(
            compiler.compile("Project", "t0", &Filter::some("nope", Filter::all())),
            Err(CompileError::UnknownRelation { .. })
        ));
        assert!(matches!(
            compiler.compile("Nope", "t0", &Filter::all()),
            Err(CompileError::UnknownEntity(_))
        ));
    }

    #[test]
    fn test_json_conditions() {
        let catalog = catalog();
        let mut compiler = FilterCompiler::new(&catalog);
        let err = compiler
            .compile(
                "Project",
                "t0",
                &Filter::json("meta", vec![], JsonCondition::Equals(JsonValue::Null)),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidPredicate { .. }));

        let expr = compiler
            .compile(
                "Project",
                "t0",
                &Filter::json(
                    "meta",
                    vec![JsonPathSegment::key("size")],
                    JsonCondition::IsNull(NullKind::JsonNull),
                ),
            )
            .unwrap();
        assert!(matches!(
            expr,
            Expr::Json {
                predicate: JsonPredicate::Null(NullKind::JsonNull),
                ..
            }
        ));

        let expr = compiler
            .compile(
                "Project",
                "t0",
                &Filter::field("meta", ScalarFilter::Equals(Value::Json(json!({"a": 1})))),
            )
            .unwrap();
        assert!(matches!(expr, Expr::Json { .. }));
    }

    #[test]
    fn test_json_path_key_with_quote_is_rejected() {
        let catalog = catalog();
        let mut compiler = FilterCompiler::new(&catalog);
        let err = compiler
            .compile(
                "Project",
                "t0",
                &Filter::json(
                    "meta",
                    vec![JsonPathSegment::key("size"), JsonPathSegment::key("a\"b")],
                    JsonCondition::Equals(json!(1)),
                ),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::InvalidPredicate { ref field, .. } if field == "meta"
        ));
    }

    #[test]
    fn test_list_and_in_edge_cases() {
        let catalog = catalog();
        let mut compiler = FilterCompiler::new(&catalog);
        let expr = compiler
            .compile("Project", "t0", &Filter::field("tags", ScalarFilter::HasEvery(vec![])))
            .unwrap();
        assert_eq!(expr, Expr::Bool(true));
        let err = compiler
            .compile(
                "Project",
                "t0",
                &Filter::field("id", ScalarFilter::In(vec![Value::Null])),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidPredicate { .. }));
    }

    #[test]
    fn test_unique_lookup() {
        let catalog = catalog();
        let mut compiler = FilterCompiler::new(&catalog);
        let expr = compiler
            .compile_unique("Project", "t0", &UniqueWhere::new("id", 3))
            .unwrap();
        assert_eq!(expr, Expr::eq(Expr::column("t0", "id"), Expr::param(3)));
        assert!(matches!(
            compiler.compile_unique("Project", "t0", &UniqueWhere::new("name", "x")),
            Err(CompileError::NotUnique { .. })
        ));
    }
}
