//! The `where` filter tree.
//!
//! Filters are a tagged tree walked by the engine's compiler. Builders on
//! [`Filter`] keep call sites short:
//!
//! ```
//! use quarry_proto::{Filter, ScalarFilter};
//!
//! let f = Filter::and(vec![
//!     Filter::field("status", ScalarFilter::Equals("open".into())),
//!     Filter::some("floorplans", Filter::field("area", ScalarFilter::Gt(50.into()))),
//! ]);
//! assert!(matches!(f, Filter::And(_)));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::value::Value;

/// A boolean expression over an entity's fields and relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// All children must hold. Empty is true.
    And(Vec<Filter>),
    /// At least one child must hold. Empty is false.
    Or(Vec<Filter>),
    /// Negation.
    Not(Box<Filter>),
    /// Scalar condition on a field.
    Field {
        /// Field name.
        field: String,
        /// Condition to apply.
        condition: ScalarFilter,
        /// String comparison mode.
        mode: QueryMode,
    },
    /// Quantified condition over a relation.
    Relation {
        /// Relation field name.
        field: String,
        /// Quantifier and nested filter.
        predicate: RelationPredicate,
    },
}

/// Case sensitivity for string conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueryMode {
    /// Case-sensitive comparison.
    #[default]
    Default,
    /// Both sides are case-folded before comparing.
    Insensitive,
}

/// A condition on a single scalar field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScalarFilter {
    /// Equal to a value. `Equals(Null)` tests for SQL NULL.
    Equals(Value),
    /// Not equal to a value. `Not(Null)` tests for non-NULL.
    Not(Value),
    /// Member of a list.
    In(Vec<Value>),
    /// Not a member of a list.
    NotIn(Vec<Value>),
    /// Less than.
    Lt(Value),
    /// Less than or equal.
    Lte(Value),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal.
    Gte(Value),
    /// String contains substring.
    Contains(String),
    /// String starts with prefix.
    StartsWith(String),
    /// String ends with suffix.
    EndsWith(String),
    /// Scalar list contains the value.
    Has(String),
    /// Scalar list contains every value.
    HasEvery(Vec<String>),
    /// Scalar list contains at least one value.
    HasSome(Vec<String>),
    /// Scalar list is (or is not) empty.
    IsEmpty(bool),
    /// JSON path condition.
    Json(JsonFilter),
}

/// Quantifier over a relation's related rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationPredicate {
    /// At least one related row matches.
    Some(Box<Filter>),
    /// Every related row matches (vacuously true with none).
    Every(Box<Filter>),
    /// No related row matches.
    None(Box<Filter>),
    /// The singular related row exists and matches; `Is(None)` means
    /// the relation is empty.
    Is(Option<Box<Filter>>),
    /// The singular related row does not match; `IsNot(None)` means the
    /// relation is present.
    IsNot(Option<Box<Filter>>),
}

/// Which kind of null a JSON null-check matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullKind {
    /// The column is SQL NULL or the path is absent.
    DbNull,
    /// The value at the path is the JSON literal `null`.
    JsonNull,
    /// Either of the above.
    AnyNull,
}

/// One step of a JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JsonPathSegment {
    /// Object key.
    Key(String),
    /// Array index.
    Index(usize),
}

/// A condition on the value found at a JSON path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonFilter {
    /// Path into the document; empty means the whole document.
    pub path: Vec<JsonPathSegment>,
    /// Condition to apply.
    pub condition: JsonCondition,
}

/// Conditions on a JSON value.
///
/// Apart from the null checks, a JSON condition is false when the column
/// is NULL or the path does not exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JsonCondition {
    /// Equal to a non-null JSON value. Use `IsNull` for nulls.
    Equals(JsonValue),
    /// Present and not equal to a non-null JSON value.
    Not(JsonValue),
    /// Value is null of the given kind.
    IsNull(NullKind),
    /// Value is not null of the given kind.
    IsNotNull(NullKind),
    /// String value contains substring.
    StringContains(String),
    /// String value starts with prefix.
    StringStartsWith(String),
    /// String value ends with suffix.
    StringEndsWith(String),
    /// Array value contains the scalar, or every scalar of an array.
    ArrayContains(JsonValue),
    /// Number or string less than.
    Lt(JsonValue),
    /// Number or string less than or equal.
    Lte(JsonValue),
    /// Number or string greater than.
    Gt(JsonValue),
    /// Number or string greater than or equal.
    Gte(JsonValue),
}

impl Filter {
    /// Conjunction.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Disjunction.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Case-sensitive condition on a field.
    pub fn field(field: impl Into<String>, condition: ScalarFilter) -> Self {
        Filter::Field {
            field: field.into(),
            condition,
            mode: QueryMode::Default,
        }
    }

    /// Case-insensitive condition on a string field.
    pub fn field_insensitive(field: impl Into<String>, condition: ScalarFilter) -> Self {
        Filter::Field {
            field: field.into(),
            condition,
            mode: QueryMode::Insensitive,
        }
    }

    /// Shorthand for `field = value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::field(field, ScalarFilter::Equals(value.into()))
    }

    /// Shorthand for a JSON path condition.
    pub fn json(
        field: impl Into<String>,
        path: Vec<JsonPathSegment>,
        condition: JsonCondition,
    ) -> Self {
        Filter::field(field, ScalarFilter::Json(JsonFilter { path, condition }))
    }

    /// Some related row matches.
    pub fn some(relation: impl Into<String>, filter: Filter) -> Self {
        Filter::relation(relation, RelationPredicate::Some(Box::new(filter)))
    }

    /// Every related row matches.
    pub fn every(relation: impl Into<String>, filter: Filter) -> Self {
        Filter::relation(relation, RelationPredicate::Every(Box::new(filter)))
    }

    /// No related row matches.
    pub fn none(relation: impl Into<String>, filter: Filter) -> Self {
        Filter::relation(relation, RelationPredicate::None(Box::new(filter)))
    }

    /// The singular related row matches.
    pub fn is(relation: impl Into<String>, filter: Filter) -> Self {
        Filter::relation(relation, RelationPredicate::Is(Some(Box::new(filter))))
    }

    /// The singular relation is empty.
    pub fn is_absent(relation: impl Into<String>) -> Self {
        Filter::relation(relation, RelationPredicate::Is(None))
    }

    /// The singular related row does not match.
    pub fn is_not(relation: impl Into<String>, filter: Filter) -> Self {
        Filter::relation(relation, RelationPredicate::IsNot(Some(Box::new(filter))))
    }

    fn relation(field: impl Into<String>, predicate: RelationPredicate) -> Self {
        Filter::Relation {
            field: field.into(),
            predicate,
        }
    }

    /// Always-true filter.
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }
}

impl JsonPathSegment {
    /// Object key segment.
    pub fn key(key: impl Into<String>) -> Self {
        JsonPathSegment::Key(key.into())
    }
}
