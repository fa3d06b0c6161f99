//! Read path: filter compilation, planning, relation loading and aggregation.

pub mod aggregate;
pub mod eval;
pub mod filter;
pub mod loader;
pub mod order;
pub mod planner;
pub mod shape;

pub use aggregate::{normalize, AggregatePlan, AggregationEngine, GroupByPlan};
pub use eval::{compare_values, Dataset, FilterEvaluator, Truth};
pub use filter::{Aliases, FilterCompiler};
pub use loader::UnitLayout;
pub use order::{cursor_predicate, effective_order, OrderKey, Window};
pub use planner::{Explain, ExplainStep, QueryPlanner, ReadKind, ReadPlan, ROOT_ALIAS};
pub use shape::{ChildPlan, CountPlan, FieldSlot, LoadState, PlanBuilder, RelationPlan, Shape, UnitPlan};
