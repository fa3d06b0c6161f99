//! SQL intermediate representation and dialect rendering.

pub mod ast;
pub mod dialect;
pub mod render;

pub use ast::{
    ArithOp, CompareOp, Delete, Expr, Insert, Join, JsonPredicate, ListPredicate, OrderItem,
    PatternKind, Select, SelectItem, Statement, TableRef, Update,
};
pub use dialect::{Dialect, DialectKind, PostgresDialect, SqliteDialect};
pub use render::{render, RenderedStatement, SqlWriter};
