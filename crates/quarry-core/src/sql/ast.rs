//! Portable intermediate query representation.
//!
//! Statements are built by the planners and turned into SQL text by a
//! [`Dialect`](super::Dialect)-driven renderer. Nothing in this module is
//! specific to one store.

use quarry_proto::{AggregateFunction, JsonPathSegment, NullKind, NullsOrder, SortOrder, Value};
use serde_json::Value as JsonValue;

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
}

impl CompareOp {
    /// SQL operator text.
    pub fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

/// Arithmetic operators used by atomic updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl ArithOp {
    /// SQL operator text.
    pub fn as_sql(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }
}

/// Position of a string pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Substring anywhere.
    Contains,
    /// Prefix.
    StartsWith,
    /// Suffix.
    EndsWith,
}

/// Predicates on the value at a JSON path.
///
/// Every variant except `Null` renders two-valued: a NULL column or a
/// missing path yields false rather than unknown.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonPredicate {
    /// Equal to a non-null JSON value.
    Equals(JsonValue),
    /// Ordered comparison against a number or string.
    Compare(CompareOp, JsonValue),
    /// Null of the given kind.
    Null(NullKind),
    /// Path exists and the column is not NULL.
    Present,
    /// String value matches a pattern.
    Pattern(PatternKind, String),
    /// Array value contains every listed scalar.
    ArrayContains(Vec<JsonValue>),
}

/// Predicates on a scalar-list column.
#[derive(Debug, Clone, PartialEq)]
pub enum ListPredicate {
    /// Contains the value.
    Has(String),
    /// Contains every value.
    HasEvery(Vec<String>),
    /// Contains at least one value.
    HasSome(Vec<String>),
    /// Is empty (`true`) or non-empty (`false`).
    IsEmpty(bool),
}

/// A scalar or boolean expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Column reference, optionally qualified by a table alias.
    Column {
        /// Table alias.
        table: Option<String>,
        /// Column name.
        column: String,
    },
    /// Bound parameter.
    Param(Value),
    /// Boolean literal.
    Bool(bool),
    /// NULL literal.
    Null,
    /// Comparison.
    Compare {
        /// Operator.
        op: CompareOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Arithmetic.
    Arith {
        /// Operator.
        op: ArithOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// Conjunction; empty is true.
    And(Vec<Expr>),
    /// Disjunction; empty is false.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// `IS NULL` / `IS NOT NULL`.
    IsNull {
        /// Operand.
        expr: Box<Expr>,
        /// `IS NOT NULL` when set.
        negated: bool,
    },
    /// `IN (list)`; an empty list is false (true when negated).
    InList {
        /// Operand.
        expr: Box<Expr>,
        /// Members.
        list: Vec<Expr>,
        /// `NOT IN` when set.
        negated: bool,
    },
    /// `(a, b) IN (SELECT ...)`.
    InSubquery {
        /// Row-value operands.
        exprs: Vec<Expr>,
        /// Subquery producing matching rows.
        query: Box<Select>,
        /// `NOT IN` when set.
        negated: bool,
    },
    /// `EXISTS (SELECT ...)`.
    Exists {
        /// Subquery.
        query: Box<Select>,
        /// `NOT EXISTS` when set.
        negated: bool,
    },
    /// String pattern match.
    Pattern {
        /// Operand.
        expr: Box<Expr>,
        /// Pattern position.
        kind: PatternKind,
        /// Literal text to find.
        value: String,
        /// ASCII case folding on both sides.
        insensitive: bool,
    },
    /// `LOWER(expr)`.
    Lower(Box<Expr>),
    /// JSON path predicate.
    Json {
        /// JSON column.
        column: Box<Expr>,
        /// Path into the document.
        path: Vec<JsonPathSegment>,
        /// Predicate on the value found.
        predicate: JsonPredicate,
    },
    /// Scalar-list predicate.
    List {
        /// List column.
        column: Box<Expr>,
        /// Predicate.
        predicate: ListPredicate,
    },
    /// Aggregate call; `COUNT(*)` when `arg` is `None`.
    Aggregate {
        /// Function.
        function: AggregateFunction,
        /// Argument.
        arg: Option<Box<Expr>>,
    },
    /// `CAST(expr AS REAL/DOUBLE PRECISION)`.
    ToFloat(Box<Expr>),
    /// Scalar subquery.
    Subquery(Box<Select>),
}

impl Expr {
    /// Qualified column reference.
    pub fn column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Expr::Column {
            table: Some(table.into()),
            column: column.into(),
        }
    }

    /// Unqualified column reference.
    pub fn bare(column: impl Into<String>) -> Self {
        Expr::Column {
            table: None,
            column: column.into(),
        }
    }

    /// Bound parameter.
    pub fn param(value: impl Into<Value>) -> Self {
        Expr::Param(value.into())
    }

    /// Comparison.
    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Self {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left = right`.
    pub fn eq(left: Expr, right: Expr) -> Self {
        Expr::compare(CompareOp::Eq, left, right)
    }

    /// `expr IS NULL`.
    pub fn is_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    /// `expr IS NOT NULL`.
    pub fn is_not_null(expr: Expr) -> Self {
        Expr::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(expr: Expr) -> Self {
        Expr::Not(Box::new(expr))
    }

    /// Conjunction that flattens trivial cases.
    pub fn and(mut exprs: Vec<Expr>) -> Self {
        exprs.retain(|e| *e != Expr::Bool(true));
        match exprs.len() {
            0 => Expr::Bool(true),
            1 => exprs.remove(0),
            _ => Expr::And(exprs),
        }
    }

    /// Disjunction that flattens trivial cases.
    pub fn or(mut exprs: Vec<Expr>) -> Self {
        exprs.retain(|e| *e != Expr::Bool(false));
        match exprs.len() {
            0 => Expr::Bool(false),
            1 => exprs.remove(0),
            _ => Expr::Or(exprs),
        }
    }

    /// `EXISTS (query)`.
    pub fn exists(query: Select) -> Self {
        Expr::Exists {
            query: Box::new(query),
            negated: false,
        }
    }

    /// `NOT EXISTS (query)`.
    pub fn not_exists(query: Select) -> Self {
        Expr::Exists {
            query: Box::new(query),
            negated: true,
        }
    }

    /// `COUNT(*)`.
    pub fn count_all() -> Self {
        Expr::Aggregate {
            function: AggregateFunction::Count,
            arg: None,
        }
    }
}

/// A `FROM` source.
#[derive(Debug, Clone, PartialEq)]
pub enum TableRef {
    /// Named table.
    Table {
        /// Table name.
        name: String,
        /// Alias.
        alias: String,
    },
    /// Derived table.
    Derived {
        /// Inner query.
        query: Box<Select>,
        /// Alias.
        alias: String,
    },
}

/// A `LEFT JOIN`.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    /// Joined table.
    pub table: String,
    /// Alias.
    pub alias: String,
    /// Join condition.
    pub on: Expr,
}

/// One output column.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    /// Expression.
    pub expr: Expr,
    /// Output alias.
    pub alias: Option<String>,
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    /// Expression.
    pub expr: Expr,
    /// Direction.
    pub direction: SortOrder,
    /// NULL placement, always explicit.
    pub nulls: NullsOrder,
}

/// A `SELECT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    /// Source.
    pub from: TableRef,
    /// Output columns; `SELECT 1` when empty.
    pub columns: Vec<SelectItem>,
    /// Left joins.
    pub joins: Vec<Join>,
    /// `WHERE`.
    pub filter: Option<Expr>,
    /// `GROUP BY`.
    pub group_by: Vec<Expr>,
    /// `HAVING`.
    pub having: Option<Expr>,
    /// `ORDER BY`.
    pub order_by: Vec<OrderItem>,
    /// `LIMIT`.
    pub limit: Option<u64>,
    /// `OFFSET`.
    pub offset: Option<u64>,
}

impl Select {
    /// Select from a named table.
    pub fn from_table(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self::from_ref(TableRef::Table {
            name: name.into(),
            alias: alias.into(),
        })
    }

    /// Select from a derived table.
    pub fn from_derived(query: Select, alias: impl Into<String>) -> Self {
        Self::from_ref(TableRef::Derived {
            query: Box::new(query),
            alias: alias.into(),
        })
    }

    fn from_ref(from: TableRef) -> Self {
        Self {
            from,
            columns: Vec::new(),
            joins: Vec::new(),
            filter: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Add an output column.
    pub fn column(mut self, expr: Expr) -> Self {
        self.columns.push(SelectItem { expr, alias: None });
        self
    }

    /// Add an aliased output column.
    pub fn column_as(mut self, expr: Expr, alias: impl Into<String>) -> Self {
        self.columns.push(SelectItem {
            expr,
            alias: Some(alias.into()),
        });
        self
    }

    /// AND a condition into the `WHERE` clause.
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => Expr::and(vec![existing, expr]),
            None => expr,
        });
        self
    }

    /// Set the limit.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// An `INSERT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    /// Target table.
    pub table: String,
    /// Column names.
    pub columns: Vec<String>,
    /// One value list per row.
    pub rows: Vec<Vec<Expr>>,
    /// `ON CONFLICT DO NOTHING`.
    pub ignore_conflicts: bool,
    /// Columns returned from each inserted row.
    pub returning: Vec<String>,
}

/// An `UPDATE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Target table.
    pub table: String,
    /// Alias the filter refers to.
    pub alias: String,
    /// `SET column = expr` pairs.
    pub assignments: Vec<(String, Expr)>,
    /// `WHERE`.
    pub filter: Option<Expr>,
}

/// A `DELETE` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    /// Target table.
    pub table: String,
    /// Alias the filter refers to.
    pub alias: String,
    /// `WHERE`.
    pub filter: Option<Expr>,
}

/// Any statement the engine issues.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Query.
    Select(Select),
    /// Insert.
    Insert(Insert),
    /// Update.
    Update(Update),
    /// Delete.
    Delete(Delete),
    /// Literal SQL without parameters (transaction control).
    Raw(String),
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
    }
}

impl From<Insert> for Statement {
    fn from(s: Insert) -> Self {
        Statement::Insert(s)
    }
}

impl From<Update> for Statement {
    fn from(s: Update) -> Self {
        Statement::Update(s)
    }
}

impl From<Delete> for Statement {
    fn from(s: Delete) -> Self {
        Statement::Delete(s)
    }
}
