//! Statement rendering.

use quarry_proto::{NullsOrder, SortOrder, Value};

use super::ast::{Delete, Expr, Insert, Select, SelectItem, Statement, TableRef, Update};
use super::dialect::Dialect;

/// SQL text with its bound parameters in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedStatement {
    /// SQL text.
    pub sql: String,
    /// Parameters.
    pub params: Vec<Value>,
}

impl RenderedStatement {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}

/// Render a statement for a dialect.
pub fn render(statement: &Statement, dialect: &dyn Dialect) -> RenderedStatement {
    let mut w = SqlWriter::new(dialect);
    match statement {
        Statement::Select(select) => w.select(select),
        Statement::Insert(insert) => w.insert(insert),
        Statement::Update(update) => w.update(update),
        Statement::Delete(delete) => w.delete(delete),
        Statement::Raw(sql) => w.push(sql),
    }
    w.finish()
}

/// Accumulates SQL text and parameters while walking the IR.
///
/// Dialects receive the writer in their hooks and call back into it for
/// nested expressions, so parameter numbering always follows text order.
pub struct SqlWriter<'d> {
    dialect: &'d dyn Dialect,
    sql: String,
    params: Vec<Value>,
}

impl<'d> SqlWriter<'d> {
    /// Create an empty writer.
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    /// Finish and return the rendered statement.
    pub fn finish(self) -> RenderedStatement {
        RenderedStatement {
            sql: self.sql,
            params: self.params,
        }
    }

    /// Append raw SQL text.
    pub fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    /// Append a quoted identifier.
    pub fn ident(&mut self, name: &str) {
        self.sql.push('"');
        self.sql.push_str(&name.replace('"', "\"\""));
        self.sql.push('"');
    }

    /// Append a single-quoted string literal.
    pub fn string_literal(&mut self, s: &str) {
        self.sql.push('\'');
        self.sql.push_str(&s.replace('\'', "''"));
        self.sql.push('\'');
    }

    /// Bind a parameter and append its placeholder.
    pub fn param(&mut self, value: Value) {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    fn list<T>(&mut self, items: &[T], sep: &str, mut f: impl FnMut(&mut Self, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(sep);
            }
            f(self, item);
        }
    }

    /// Append an expression.
    pub fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column { table, column } => {
                if let Some(table) = table {
                    self.ident(table);
                    self.push(".");
                }
                self.ident(column);
            }
            Expr::Param(value) => self.param(value.clone()),
            Expr::Bool(true) => self.push("TRUE"),
            Expr::Bool(false) => self.push("FALSE"),
            Expr::Null => self.push("NULL"),
            Expr::Compare { op, left, right } => {
                self.push("(");
                self.expr(left);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.expr(right);
                self.push(")");
            }
            Expr::Arith { op, left, right } => {
                self.push("(");
                self.expr(left);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.expr(right);
                self.push(")");
            }
            Expr::And(items) if items.is_empty() => self.push("TRUE"),
            Expr::Or(items) if items.is_empty() => self.push("FALSE"),
            Expr::And(items) => {
                self.push("(");
                self.list(items, " AND ", |w, e| w.expr(e));
                self.push(")");
            }
            Expr::Or(items) => {
                self.push("(");
                self.list(items, " OR ", |w, e| w.expr(e));
                self.push(")");
            }
            Expr::Not(inner) => {
                self.push("(NOT ");
                self.expr(inner);
                self.push(")");
            }
            Expr::IsNull { expr, negated } => {
                self.push("(");
                self.expr(expr);
                self.push(if *negated { " IS NOT NULL)" } else { " IS NULL)" });
            }
            Expr::InList {
                list, negated, ..
            } if list.is_empty() => self.push(if *negated { "TRUE" } else { "FALSE" }),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                self.push("(");
                self.expr(expr);
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.list(list, ", ", |w, e| w.expr(e));
                self.push("))");
            }
            Expr::InSubquery {
                exprs,
                query,
                negated,
            } => {
                self.push("(");
                if exprs.len() == 1 {
                    self.expr(&exprs[0]);
                } else {
                    self.push("(");
                    self.list(exprs, ", ", |w, e| w.expr(e));
                    self.push(")");
                }
                self.push(if *negated { " NOT IN (" } else { " IN (" });
                self.select(query);
                self.push("))");
            }
            Expr::Exists { query, negated } => {
                self.push(if *negated { "(NOT EXISTS (" } else { "(EXISTS (" });
                self.select(query);
                self.push("))");
            }
            Expr::Pattern {
                expr,
                kind,
                value,
                insensitive,
            } => {
                let dialect = self.dialect;
                dialect.write_pattern(self, expr, *kind, value, *insensitive);
            }
            Expr::Lower(inner) => {
                self.push("LOWER(");
                self.expr(inner);
                self.push(")");
            }
            Expr::Json {
                column,
                path,
                predicate,
            } => {
                let dialect = self.dialect;
                dialect.write_json(self, column, path, predicate);
            }
            Expr::List { column, predicate } => {
                let dialect = self.dialect;
                dialect.write_list(self, column, predicate);
            }
            Expr::Aggregate { function, arg } => {
                let name = match function {
                    quarry_proto::AggregateFunction::Count => "COUNT",
                    quarry_proto::AggregateFunction::Sum => "SUM",
                    quarry_proto::AggregateFunction::Avg => "AVG",
                    quarry_proto::AggregateFunction::Min => "MIN",
                    quarry_proto::AggregateFunction::Max => "MAX",
                };
                self.push(name);
                self.push("(");
                match arg {
                    Some(arg) => self.expr(arg),
                    None => self.push("*"),
                }
                self.push(")");
            }
            Expr::ToFloat(inner) => {
                self.push("CAST(");
                self.expr(inner);
                self.push(" AS ");
                let float_type = self.dialect.float_type();
                self.push(float_type);
                self.push(")");
            }
            Expr::Subquery(query) => {
                self.push("(");
                self.select(query);
                self.push(")");
            }
        }
    }

    fn select_item(&mut self, item: &SelectItem) {
        self.expr(&item.expr);
        if let Some(alias) = &item.alias {
            self.push(" AS ");
            self.ident(alias);
        }
    }

    /// Append a `SELECT` statement.
    pub fn select(&mut self, select: &Select) {
        self.push("SELECT ");
        if select.columns.is_empty() {
            self.push("1");
        } else {
            self.list(&select.columns, ", ", |w, item| w.select_item(item));
        }
        self.push(" FROM ");
        match &select.from {
            TableRef::Table { name, alias } => {
                self.ident(name);
                self.push(" AS ");
                self.ident(alias);
            }
            TableRef::Derived { query, alias } => {
                self.push("(");
                self.select(query);
                self.push(") AS ");
                self.ident(alias);
            }
        }
        for join in &select.joins {
            self.push(" LEFT JOIN ");
            self.ident(&join.table);
            self.push(" AS ");
            self.ident(&join.alias);
            self.push(" ON ");
            self.expr(&join.on);
        }
        if let Some(filter) = &select.filter {
            self.push(" WHERE ");
            self.expr(filter);
        }
        if !select.group_by.is_empty() {
            self.push(" GROUP BY ");
            self.list(&select.group_by, ", ", |w, e| w.expr(e));
        }
        if let Some(having) = &select.having {
            self.push(" HAVING ");
            self.expr(having);
        }
        if !select.order_by.is_empty() {
            self.push(" ORDER BY ");
            self.list(&select.order_by, ", ", |w, item| {
                w.expr(&item.expr);
                w.push(match item.direction {
                    SortOrder::Asc => " ASC",
                    SortOrder::Desc => " DESC",
                });
                w.push(match item.nulls {
                    NullsOrder::First => " NULLS FIRST",
                    NullsOrder::Last => " NULLS LAST",
                });
            });
        }
        if select.limit.is_some() || select.offset.is_some() {
            let dialect = self.dialect;
            dialect.write_limit(self, select.limit, select.offset);
        }
    }

    fn insert(&mut self, insert: &Insert) {
        self.push("INSERT INTO ");
        self.ident(&insert.table);
        if insert.columns.is_empty() {
            self.push(" DEFAULT VALUES");
        } else {
            self.push(" (");
            self.list(&insert.columns, ", ", |w, c| w.ident(c));
            self.push(") VALUES ");
            self.list(&insert.rows, ", ", |w, row| {
                w.push("(");
                w.list(row, ", ", |w, e| w.expr(e));
                w.push(")");
            });
        }
        if insert.ignore_conflicts {
            self.push(" ON CONFLICT DO NOTHING");
        }
        if !insert.returning.is_empty() {
            self.push(" RETURNING ");
            self.list(&insert.returning, ", ", |w, c| w.ident(c));
        }
    }

    fn update(&mut self, update: &Update) {
        self.push("UPDATE ");
        self.ident(&update.table);
        self.push(" AS ");
        self.ident(&update.alias);
        self.push(" SET ");
        self.list(&update.assignments, ", ", |w, (column, value)| {
            w.ident(column);
            w.push(" = ");
            w.expr(value);
        });
        if let Some(filter) = &update.filter {
            self.push(" WHERE ");
            self.expr(filter);
        }
    }

    fn delete(&mut self, delete: &Delete) {
        self.push("DELETE FROM ");
        self.ident(&delete.table);
        self.push(" AS ");
        self.ident(&delete.alias);
        if let Some(filter) = &delete.filter {
            self.push(" WHERE ");
            self.expr(filter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::ast::{CompareOp, OrderItem};
    use crate::sql::dialect::{PostgresDialect, SqliteDialect};

    fn sample() -> Select {
        let mut select = Select::from_table("Project", "t0")
            .column(Expr::column("t0", "id"))
            .column_as(Expr::column("t0", "name"), "c1")
            .and_where(Expr::compare(
                CompareOp::Gt,
                Expr::column("t0", "budget"),
                Expr::param(10),
            ));
        select.order_by.push(OrderItem {
            expr: Expr::column("t0", "name"),
            direction: SortOrder::Asc,
            nulls: NullsOrder::First,
        });
        select.limit = Some(5);
        select
    }

    #[test]
    fn test_render_select_sqlite() {
        let rendered = render(&Statement::Select(sample()), &SqliteDialect);
        assert_eq!(
            rendered.sql,
            "SELECT \"t0\".\"id\", \"t0\".\"name\" AS \"c1\" FROM \"Project\" AS \"t0\" \
             WHERE (\"t0\".\"budget\" > ?1) ORDER BY \"t0\".\"name\" ASC NULLS FIRST LIMIT 5"
        );
        assert_eq!(rendered.params, vec![Value::Int(10)]);
    }

    #[test]
    fn test_render_select_postgres() {
        let rendered = render(&Statement::Select(sample()), &PostgresDialect);
        assert!(rendered.sql.contains("> $1"));
        assert!(rendered.sql.ends_with("LIMIT 5"));
    }

    #[test]
    fn test_offset_without_limit() {
        let mut select = Select::from_table("Project", "t0");
        select.offset = Some(3);
        let sqlite = render(&Statement::Select(select.clone()), &SqliteDialect);
        assert!(sqlite.sql.ends_with("LIMIT -1 OFFSET 3"));
        let pg = render(&Statement::Select(select), &PostgresDialect);
        assert!(pg.sql.ends_with("OFFSET 3"));
        assert!(!pg.sql.contains("LIMIT"));
    }

    #[test]
    fn test_empty_in_list() {
        let expr = Expr::InList {
            expr: Box::new(Expr::column("t0", "id")),
            list: vec![],
            negated: false,
        };
        let mut w = SqlWriter::new(&SqliteDialect);
        w.expr(&expr);
        assert_eq!(w.finish().sql, "FALSE");
    }

    #[test]
    fn test_render_insert_update_delete() {
        let insert = Insert {
            table: "Tag".into(),
            columns: vec!["label".into()],
            rows: vec![vec![Expr::param("a")], vec![Expr::param("b")]],
            ignore_conflicts: true,
            returning: vec!["id".into()],
        };
        let rendered = render(&Statement::Insert(insert), &SqliteDialect);
        assert_eq!(
            rendered.sql,
            "INSERT INTO \"Tag\" (\"label\") VALUES (?1), (?2) ON CONFLICT DO NOTHING RETURNING \"id\""
        );

        let update = Update {
            table: "Tag".into(),
            alias: "t0".into(),
            assignments: vec![("label".into(), Expr::param("c"))],
            filter: Some(Expr::eq(Expr::column("t0", "id"), Expr::param(1))),
        };
        let rendered = render(&Statement::Update(update), &PostgresDialect);
        assert_eq!(
            rendered.sql,
            "UPDATE \"Tag\" AS \"t0\" SET \"label\" = $1 WHERE (\"t0\".\"id\" = $2)"
        );

        let delete = Delete {
            table: "Tag".into(),
            alias: "t0".into(),
            filter: None,
        };
        assert_eq!(
            render(&Statement::Delete(delete), &SqliteDialect).sql,
            "DELETE FROM \"Tag\" AS \"t0\""
        );
    }
}
