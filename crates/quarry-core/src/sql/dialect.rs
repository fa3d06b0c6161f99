//! Dialect strategies.
//!
//! The renderer handles everything portable; a [`Dialect`] supplies
//! placeholders, pagination syntax, string patterns, JSON path predicates,
//! scalar-list predicates and transaction control for one store.

use std::fmt;
use std::str::FromStr;

use quarry_proto::{IsolationLevel, JsonPathSegment, NullKind, Value};
use serde_json::Value as JsonValue;

use super::ast::{Expr, JsonPredicate, ListPredicate, PatternKind};
use super::render::SqlWriter;

/// Identifier of a supported dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    /// SQLite 3.35 or newer.
    Sqlite,
    /// PostgreSQL 12 or newer.
    Postgres,
}

impl DialectKind {
    /// The rendering strategy for this dialect.
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            DialectKind::Sqlite => &SqliteDialect,
            DialectKind::Postgres => &PostgresDialect,
        }
    }

    /// Identifier string.
    pub fn as_str(self) -> &'static str {
        match self {
            DialectKind::Sqlite => "sqlite",
            DialectKind::Postgres => "postgresql",
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DialectKind::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

/// A store-specific rendering strategy.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Dialect identifier.
    fn kind(&self) -> DialectKind;

    /// Placeholder for the parameter at 1-based `index`.
    fn placeholder(&self, index: usize) -> String;

    /// Type name used for float casts.
    fn float_type(&self) -> &'static str;

    /// Append `LIMIT`/`OFFSET`.
    fn write_limit(&self, w: &mut SqlWriter<'_>, limit: Option<u64>, offset: Option<u64>);

    /// Append a string pattern predicate.
    fn write_pattern(
        &self,
        w: &mut SqlWriter<'_>,
        expr: &Expr,
        kind: PatternKind,
        value: &str,
        insensitive: bool,
    );

    /// Append a JSON path predicate.
    fn write_json(
        &self,
        w: &mut SqlWriter<'_>,
        column: &Expr,
        path: &[JsonPathSegment],
        predicate: &JsonPredicate,
    );

    /// Append a scalar-list predicate.
    fn write_list(&self, w: &mut SqlWriter<'_>, column: &Expr, predicate: &ListPredicate);

    /// The isolation level actually used for a requested level.
    fn effective_isolation(&self, requested: Option<IsolationLevel>) -> Option<IsolationLevel>;

    /// Statements that open a transaction.
    fn begin_statements(&self, level: Option<IsolationLevel>) -> Vec<String>;

    /// Statement that commits.
    fn commit_statement(&self) -> &'static str {
        "COMMIT"
    }

    /// Statement that rolls back.
    fn rollback_statement(&self) -> &'static str {
        "ROLLBACK"
    }

    /// Statement that opens a savepoint.
    fn savepoint_statement(&self, name: &str) -> String {
        format!("SAVEPOINT {name}")
    }

    /// Statement that releases a savepoint.
    fn release_savepoint_statement(&self, name: &str) -> String {
        format!("RELEASE SAVEPOINT {name}")
    }

    /// Statement that rolls back to a savepoint.
    fn rollback_to_savepoint_statement(&self, name: &str) -> String {
        format!("ROLLBACK TO SAVEPOINT {name}")
    }
}

fn pattern_text(kind: PatternKind, escaped: &str, any: char) -> String {
    match kind {
        PatternKind::Contains => format!("{any}{escaped}{any}"),
        PatternKind::StartsWith => format!("{escaped}{any}"),
        PatternKind::EndsWith => format!("{any}{escaped}"),
    }
}

fn json_param(value: &JsonValue) -> Value {
    Value::String(value.to_string())
}

fn json_scalar_param(value: &JsonValue) -> Value {
    match value {
        JsonValue::String(s) => Value::String(s.clone()),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::Bool(b) => Value::Bool(*b),
        other => json_param(other),
    }
}

/// SQLite: `?N` placeholders, JSON1 functions over text columns, scalar
/// lists stored as JSON arrays. Case-sensitive patterns use `GLOB`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl SqliteDialect {
    fn path_literal(path: &[JsonPathSegment]) -> String {
        let mut out = String::from("$");
        for segment in path {
            match segment {
                JsonPathSegment::Key(key) => {
                    out.push_str(".\"");
                    out.push_str(key);
                    out.push('"');
                }
                JsonPathSegment::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }

    fn json_fn(w: &mut SqlWriter<'_>, name: &str, column: &Expr, path: &str) {
        w.push(name);
        w.push("(");
        w.expr(column);
        w.push(", ");
        w.string_literal(path);
        w.push(")");
    }

    /// SQLite `json_type` names matching a JSON value's kind.
    fn type_names(value: &JsonValue) -> &'static str {
        match value {
            JsonValue::String(_) => "('text')",
            JsonValue::Number(_) => "('integer', 'real')",
            JsonValue::Bool(true) => "('true')",
            JsonValue::Bool(false) => "('false')",
            JsonValue::Array(_) => "('array')",
            JsonValue::Object(_) => "('object')",
            JsonValue::Null => "('null')",
        }
    }

    fn glob_escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            match c {
                '*' | '?' | '[' => {
                    out.push('[');
                    out.push(c);
                    out.push(']');
                }
                _ => out.push(c),
            }
        }
        out
    }

    fn write_contains_element(w: &mut SqlWriter<'_>, column: &Expr, path: &str, element: &JsonValue) {
        w.push("EXISTS (SELECT 1 FROM ");
        Self::json_fn(w, "json_each", column, path);
        w.push(" WHERE json_each.type IN ");
        w.push(Self::type_names(element));
        if !matches!(element, JsonValue::Bool(_)) {
            w.push(" AND json_each.value = ");
            w.param(json_scalar_param(element));
        }
        w.push(")");
    }
}

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{index}")
    }

    fn float_type(&self) -> &'static str {
        "REAL"
    }

    fn write_limit(&self, w: &mut SqlWriter<'_>, limit: Option<u64>, offset: Option<u64>) {
        match limit {
            Some(limit) => w.push(&format!(" LIMIT {limit}")),
            None => w.push(" LIMIT -1"),
        }
        if let Some(offset) = offset {
            w.push(&format!(" OFFSET {offset}"));
        }
    }

    fn write_pattern(
        &self,
        w: &mut SqlWriter<'_>,
        expr: &Expr,
        kind: PatternKind,
        value: &str,
        insensitive: bool,
    ) {
        w.push("(");
        if insensitive {
            w.push("LOWER(");
            w.expr(expr);
            w.push(")");
        } else {
            w.expr(expr);
        }
        w.push(" GLOB ");
        let value = if insensitive {
            value.to_ascii_lowercase()
        } else {
            value.to_string()
        };
        w.param(Value::String(pattern_text(kind, &Self::glob_escape(&value), '*')));
        w.push(")");
    }

    fn write_json(
        &self,
        w: &mut SqlWriter<'_>,
        column: &Expr,
        path: &[JsonPathSegment],
        predicate: &JsonPredicate,
    ) {
        let path = Self::path_literal(path);
        match predicate {
            JsonPredicate::Null(kind) => {
                w.push("(");
                match kind {
                    NullKind::DbNull => {
                        Self::json_fn(w, "json_type", column, &path);
                        w.push(" IS NULL");
                    }
                    NullKind::JsonNull => {
                        w.push("COALESCE(");
                        Self::json_fn(w, "json_type", column, &path);
                        w.push(" = 'null', FALSE)");
                    }
                    NullKind::AnyNull => {
                        Self::json_fn(w, "json_type", column, &path);
                        w.push(" IS NULL OR ");
                        Self::json_fn(w, "json_type", column, &path);
                        w.push(" = 'null'");
                    }
                }
                w.push(")");
            }
            JsonPredicate::Present => {
                w.push("(");
                Self::json_fn(w, "json_type", column, &path);
                w.push(" IS NOT NULL)");
            }
            JsonPredicate::Equals(value) => {
                w.push("COALESCE(");
                Self::json_fn(w, "json_type", column, &path);
                w.push(" IN ");
                w.push(Self::type_names(value));
                match value {
                    JsonValue::Bool(_) | JsonValue::Null => {}
                    JsonValue::Array(_) | JsonValue::Object(_) => {
                        w.push(" AND ");
                        Self::json_fn(w, "json_extract", column, &path);
                        w.push(" = json(");
                        w.param(json_param(value));
                        w.push(")");
                    }
                    _ => {
                        w.push(" AND ");
                        Self::json_fn(w, "json_extract", column, &path);
                        w.push(" = ");
                        w.param(json_scalar_param(value));
                    }
                }
                w.push(", FALSE)");
            }
            JsonPredicate::Compare(op, value) => {
                w.push("COALESCE(");
                Self::json_fn(w, "json_type", column, &path);
                w.push(" IN ");
                w.push(Self::type_names(value));
                w.push(" AND ");
                Self::json_fn(w, "json_extract", column, &path);
                w.push(" ");
                w.push(op.as_sql());
                w.push(" ");
                w.param(json_scalar_param(value));
                w.push(", FALSE)");
            }
            JsonPredicate::Pattern(kind, value) => {
                w.push("COALESCE(");
                Self::json_fn(w, "json_type", column, &path);
                w.push(" = 'text' AND ");
                Self::json_fn(w, "json_extract", column, &path);
                w.push(" GLOB ");
                w.param(Value::String(pattern_text(*kind, &Self::glob_escape(value), '*')));
                w.push(", FALSE)");
            }
            JsonPredicate::ArrayContains(elements) => {
                w.push("COALESCE(");
                Self::json_fn(w, "json_type", column, &path);
                w.push(" = 'array'");
                for element in elements {
                    w.push(" AND ");
                    Self::write_contains_element(w, column, &path, element);
                }
                w.push(", FALSE)");
            }
        }
    }

    fn write_list(&self, w: &mut SqlWriter<'_>, column: &Expr, predicate: &ListPredicate) {
        let has = |w: &mut SqlWriter<'_>, value: &str| {
            w.push("EXISTS (SELECT 1 FROM json_each(");
            w.expr(column);
            w.push(") WHERE json_each.value = ");
            w.param(Value::String(value.to_string()));
            w.push(")");
        };
        let joined = |w: &mut SqlWriter<'_>, values: &[String], sep: &str, empty: &str| {
            if values.is_empty() {
                w.push(empty);
                return;
            }
            w.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    w.push(sep);
                }
                has(w, value);
            }
            w.push(")");
        };
        match predicate {
            ListPredicate::Has(value) => {
                w.push("(");
                has(w, value);
                w.push(")");
            }
            ListPredicate::HasEvery(values) => joined(w, values, " AND ", "TRUE"),
            ListPredicate::HasSome(values) => joined(w, values, " OR ", "FALSE"),
            ListPredicate::IsEmpty(empty) => {
                w.push("(json_array_length(");
                w.expr(column);
                w.push(if *empty { ") = 0)" } else { ") > 0)" });
            }
        }
    }

    fn effective_isolation(&self, requested: Option<IsolationLevel>) -> Option<IsolationLevel> {
        // SQLite transactions are always serializable.
        requested.map(|_| IsolationLevel::Serializable)
    }

    fn begin_statements(&self, _level: Option<IsolationLevel>) -> Vec<String> {
        vec!["BEGIN IMMEDIATE".to_string()]
    }
}

/// PostgreSQL: `$N` placeholders, `jsonb` path operators, `text[]` lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    fn path_literal(path: &[JsonPathSegment]) -> String {
        let parts: Vec<String> = path
            .iter()
            .map(|segment| match segment {
                JsonPathSegment::Key(key) => {
                    format!("\"{}\"", key.replace('\\', "\\\\").replace('"', "\\\""))
                }
                JsonPathSegment::Index(i) => i.to_string(),
            })
            .collect();
        format!("{{{}}}", parts.join(","))
    }

    fn extract(w: &mut SqlWriter<'_>, column: &Expr, path: &str, as_text: bool) {
        w.push("(");
        w.expr(column);
        w.push(if as_text { " #>> " } else { " #> " });
        w.string_literal(path);
        w.push(")");
    }

    fn typeof_(w: &mut SqlWriter<'_>, column: &Expr, path: &str) {
        w.push("jsonb_typeof");
        Self::extract(w, column, path, false);
    }

    fn like_escape(s: &str) -> String {
        let mut out = String::with_capacity(s.len());
        for c in s.chars() {
            if matches!(c, '%' | '_' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }
}

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn float_type(&self) -> &'static str {
        "DOUBLE PRECISION"
    }

    fn write_limit(&self, w: &mut SqlWriter<'_>, limit: Option<u64>, offset: Option<u64>) {
        if let Some(limit) = limit {
            w.push(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            w.push(&format!(" OFFSET {offset}"));
        }
    }

    fn write_pattern(
        &self,
        w: &mut SqlWriter<'_>,
        expr: &Expr,
        kind: PatternKind,
        value: &str,
        insensitive: bool,
    ) {
        w.push("(");
        w.expr(expr);
        w.push(if insensitive { " ILIKE " } else { " LIKE " });
        w.param(Value::String(pattern_text(kind, &Self::like_escape(value), '%')));
        w.push(")");
    }

    fn write_json(
        &self,
        w: &mut SqlWriter<'_>,
        column: &Expr,
        path: &[JsonPathSegment],
        predicate: &JsonPredicate,
    ) {
        let path = Self::path_literal(path);
        match predicate {
            JsonPredicate::Null(kind) => {
                w.push("(");
                match kind {
                    NullKind::DbNull => {
                        Self::extract(w, column, &path, false);
                        w.push(" IS NULL");
                    }
                    NullKind::JsonNull => {
                        w.push("COALESCE(");
                        Self::typeof_(w, column, &path);
                        w.push(" = 'null', FALSE)");
                    }
                    NullKind::AnyNull => {
                        Self::extract(w, column, &path, false);
                        w.push(" IS NULL OR ");
                        Self::typeof_(w, column, &path);
                        w.push(" = 'null'");
                    }
                }
                w.push(")");
            }
            JsonPredicate::Present => {
                w.push("(");
                Self::extract(w, column, &path, false);
                w.push(" IS NOT NULL)");
            }
            JsonPredicate::Equals(value) => {
                w.push("COALESCE(");
                Self::extract(w, column, &path, false);
                w.push(" = CAST(");
                w.param(json_param(value));
                w.push(" AS jsonb), FALSE)");
            }
            JsonPredicate::Compare(op, value) => {
                let (type_name, cast) = match value {
                    JsonValue::Number(_) => ("number", "::numeric"),
                    _ => ("string", ""),
                };
                w.push("COALESCE(CASE WHEN ");
                Self::typeof_(w, column, &path);
                w.push(&format!(" = '{type_name}' THEN "));
                Self::extract(w, column, &path, true);
                w.push(cast);
                w.push(" ");
                w.push(op.as_sql());
                w.push(" ");
                w.param(json_scalar_param(value));
                w.push(" ELSE FALSE END, FALSE)");
            }
            JsonPredicate::Pattern(kind, value) => {
                w.push("COALESCE(");
                Self::typeof_(w, column, &path);
                w.push(" = 'string' AND ");
                Self::extract(w, column, &path, true);
                w.push(" LIKE ");
                w.param(Value::String(pattern_text(*kind, &Self::like_escape(value), '%')));
                w.push(", FALSE)");
            }
            JsonPredicate::ArrayContains(elements) => {
                w.push("COALESCE(");
                Self::typeof_(w, column, &path);
                w.push(" = 'array' AND ");
                Self::extract(w, column, &path, false);
                w.push(" @> CAST(");
                w.param(json_param(&JsonValue::Array(elements.clone())));
                w.push(" AS jsonb), FALSE)");
            }
        }
    }

    fn write_list(&self, w: &mut SqlWriter<'_>, column: &Expr, predicate: &ListPredicate) {
        match predicate {
            ListPredicate::Has(value) => {
                w.push("COALESCE(");
                w.param(Value::String(value.clone()));
                w.push(" = ANY(");
                w.expr(column);
                w.push("), FALSE)");
            }
            ListPredicate::HasEvery(values) => {
                w.push("COALESCE(");
                w.expr(column);
                w.push(" @> ");
                w.param(Value::StringList(values.clone()));
                w.push(", FALSE)");
            }
            ListPredicate::HasSome(values) => {
                w.push("COALESCE(");
                w.expr(column);
                w.push(" && ");
                w.param(Value::StringList(values.clone()));
                w.push(", FALSE)");
            }
            ListPredicate::IsEmpty(empty) => {
                w.push("(cardinality(");
                w.expr(column);
                w.push(if *empty { ") = 0)" } else { ") > 0)" });
            }
        }
    }

    fn effective_isolation(&self, requested: Option<IsolationLevel>) -> Option<IsolationLevel> {
        // READ UNCOMMITTED behaves as READ COMMITTED in PostgreSQL.
        requested.map(|level| match level {
            IsolationLevel::ReadUncommitted => IsolationLevel::ReadCommitted,
            other => other,
        })
    }

    fn begin_statements(&self, level: Option<IsolationLevel>) -> Vec<String> {
        match level {
            Some(level) => vec![format!("BEGIN ISOLATION LEVEL {}", level.as_sql())],
            None => vec!["BEGIN".to_string()],
        }
    }
}
