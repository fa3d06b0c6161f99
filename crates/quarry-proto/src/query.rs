//! Read arguments: ordering, pagination and projection.

use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::value::Value;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order.
    #[default]
    Asc,
    /// Descending order.
    Desc,
}

impl SortOrder {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// Placement of NULLs in an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    /// NULLs sort before all values.
    First,
    /// NULLs sort after all values.
    Last,
}

impl NullsOrder {
    /// The opposite placement.
    pub fn reverse(self) -> Self {
        match self {
            NullsOrder::First => NullsOrder::Last,
            NullsOrder::Last => NullsOrder::First,
        }
    }
}

/// One ordering key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field to order by.
    pub field: String,
    /// Sort direction.
    pub direction: SortOrder,
    /// NULL placement; defaults to first for ascending, last for descending.
    pub nulls: Option<NullsOrder>,
}

impl OrderBy {
    /// Ascending order on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Asc,
            nulls: None,
        }
    }

    /// Descending order on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortOrder::Desc,
            nulls: None,
        }
    }

    /// Set explicit NULL placement.
    pub fn with_nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

/// A point lookup by a unique constraint, optionally narrowed by a filter.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UniqueWhere {
    /// Values covering every field of one unique constraint.
    pub key: Vec<(String, Value)>,
    /// Extra non-unique conditions.
    pub filter: Option<Filter>,
}

impl UniqueWhere {
    /// Lookup by a single unique field.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: vec![(field.into(), value.into())],
            filter: None,
        }
    }

    /// Add another key field for a composite constraint.
    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.key.push((field.into(), value.into()));
        self
    }

    /// Narrow the lookup with a filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Which scalar fields to return.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum FieldSelection {
    /// Every scalar field.
    #[default]
    All,
    /// Only the listed fields.
    Select(Vec<String>),
    /// Every scalar field except the listed ones.
    Omit(Vec<String>),
}

/// The requested result shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Projection {
    /// Scalar fields.
    pub fields: FieldSelection,
    /// Relations to materialize.
    pub include: Vec<Include>,
    /// To-many relations whose related-row count is returned.
    pub counts: Vec<String>,
}

impl Projection {
    /// Select only the given scalar fields.
    pub fn select(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: FieldSelection::Select(fields.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Return every scalar field except the given ones.
    pub fn omit(fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            fields: FieldSelection::Omit(fields.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Include a relation with default arguments.
    pub fn include(self, relation: impl Into<String>) -> Self {
        self.include_with(relation, FindManyArgs::default())
    }

    /// Include a relation with its own filter, ordering and pagination.
    pub fn include_with(mut self, relation: impl Into<String>, args: FindManyArgs) -> Self {
        self.include.push(Include {
            relation: relation.into(),
            args,
        });
        self
    }

    /// Return the related-row count of a to-many relation.
    pub fn count(mut self, relation: impl Into<String>) -> Self {
        self.counts.push(relation.into());
        self
    }
}

/// A nested relation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Include {
    /// Relation field name.
    pub relation: String,
    /// Arguments applied to the related rows.
    pub args: FindManyArgs,
}

/// Arguments of `findMany`/`findFirst`, also used for included relations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FindManyArgs {
    /// Row filter.
    pub filter: Option<Filter>,
    /// Ordering keys.
    pub order_by: Vec<OrderBy>,
    /// Unique-key anchor for cursor pagination.
    pub cursor: Option<Vec<(String, Value)>>,
    /// Signed page size; negative pages backward.
    pub take: Option<i64>,
    /// Rows to skip.
    pub skip: Option<u64>,
    /// Keep the first row per distinct combination of these fields.
    pub distinct: Vec<String>,
    /// Result shape.
    pub projection: Projection,
}

impl FindManyArgs {
    /// Empty arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Append an ordering key.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the cursor anchor.
    pub fn with_cursor(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.cursor
            .get_or_insert_with(Vec::new)
            .push((field.into(), value.into()));
        self
    }

    /// Set the signed page size.
    pub fn with_take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    /// Set the number of rows to skip.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the distinct fields.
    pub fn with_distinct(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.distinct = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}

/// Arguments of `findUnique`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FindUniqueArgs {
    /// Unique lookup.
    pub unique: UniqueWhere,
    /// Result shape.
    pub projection: Projection,
}

impl FindUniqueArgs {
    /// Lookup by a unique key.
    pub fn new(unique: UniqueWhere) -> Self {
        Self {
            unique,
            projection: Projection::default(),
        }
    }

    /// Set the projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }
}
