//! Aggregate and group-by arguments.

use serde::{Deserialize, Serialize};

use crate::filter::{Filter, ScalarFilter};
use crate::query::{OrderBy, SortOrder};
use crate::value::Value;

/// Aggregate function types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    /// Row count, or non-null count of a field.
    Count,
    /// Sum of numeric values.
    Sum,
    /// Average of numeric values.
    Avg,
    /// Minimum value.
    Min,
    /// Maximum value.
    Max,
}

impl AggregateFunction {
    /// Lowercase name, as used in result keys.
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunction::Count => "_count",
            AggregateFunction::Sum => "_sum",
            AggregateFunction::Avg => "_avg",
            AggregateFunction::Min => "_min",
            AggregateFunction::Max => "_max",
        }
    }
}

/// One requested aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateSelection {
    /// The function.
    pub function: AggregateFunction,
    /// Field to aggregate; `None` only for `COUNT(*)`.
    pub field: Option<String>,
}

impl AggregateSelection {
    /// `COUNT(*)`.
    pub fn count_all() -> Self {
        Self {
            function: AggregateFunction::Count,
            field: None,
        }
    }

    /// Non-null count of a field.
    pub fn count(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Count, field)
    }

    /// Sum of a field.
    pub fn sum(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Sum, field)
    }

    /// Average of a field.
    pub fn avg(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Avg, field)
    }

    /// Minimum of a field.
    pub fn min(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Min, field)
    }

    /// Maximum of a field.
    pub fn max(field: impl Into<String>) -> Self {
        Self::of(AggregateFunction::Max, field)
    }

    fn of(function: AggregateFunction, field: impl Into<String>) -> Self {
        Self {
            function,
            field: Some(field.into()),
        }
    }
}

/// Arguments of `aggregate`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateArgs {
    /// Row filter.
    pub filter: Option<Filter>,
    /// Ordering applied before windowing.
    pub order_by: Vec<OrderBy>,
    /// Unique-key anchor.
    pub cursor: Option<Vec<(String, Value)>>,
    /// Signed window size.
    pub take: Option<i64>,
    /// Rows to skip.
    pub skip: Option<u64>,
    /// Aggregates to compute.
    pub select: Vec<AggregateSelection>,
}

impl AggregateArgs {
    /// Empty arguments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add an aggregate.
    pub fn with(mut self, selection: AggregateSelection) -> Self {
        self.select.push(selection);
        self
    }

    /// Append an ordering key.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the window size.
    pub fn with_take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    /// Set the rows to skip.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Post-grouping condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Having {
    /// All children must hold.
    And(Vec<Having>),
    /// At least one child must hold.
    Or(Vec<Having>),
    /// Negation.
    Not(Box<Having>),
    /// Condition on a grouping field.
    Field {
        /// Field in `by`.
        field: String,
        /// Condition to apply.
        condition: ScalarFilter,
    },
    /// Condition on an aggregate.
    Aggregate {
        /// Aggregate to compare.
        aggregate: AggregateSelection,
        /// Condition to apply.
        condition: ScalarFilter,
    },
}

impl Having {
    /// Condition on an aggregate.
    pub fn aggregate(aggregate: AggregateSelection, condition: ScalarFilter) -> Self {
        Having::Aggregate {
            aggregate,
            condition,
        }
    }

    /// Condition on `COUNT(*)`.
    pub fn count(condition: ScalarFilter) -> Self {
        Having::aggregate(AggregateSelection::count_all(), condition)
    }
}

/// Ordering key of a group-by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GroupOrderBy {
    /// Order by a grouping field.
    Field(OrderBy),
    /// Order by an aggregate.
    Aggregate {
        /// Aggregate to order by.
        aggregate: AggregateSelection,
        /// Sort direction.
        direction: SortOrder,
    },
}

/// Arguments of `groupBy`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupByArgs {
    /// Grouping fields; must be non-empty.
    pub by: Vec<String>,
    /// Row filter applied before grouping.
    pub filter: Option<Filter>,
    /// Group filter.
    pub having: Option<Having>,
    /// Group ordering.
    pub order_by: Vec<GroupOrderBy>,
    /// Number of groups to return.
    pub take: Option<i64>,
    /// Number of groups to skip.
    pub skip: Option<u64>,
    /// Aggregates computed per group.
    pub aggregates: Vec<AggregateSelection>,
}

impl GroupByArgs {
    /// Group by the given fields.
    pub fn new(by: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            by: by.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Set the row filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the group filter.
    pub fn with_having(mut self, having: Having) -> Self {
        self.having = Some(having);
        self
    }

    /// Add an aggregate.
    pub fn with(mut self, selection: AggregateSelection) -> Self {
        self.aggregates.push(selection);
        self
    }

    /// Append an ordering key.
    pub fn order_by(mut self, order: GroupOrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the number of groups to return.
    pub fn with_take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    /// Set the number of groups to skip.
    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }
}
