//! Integration tests for aggregates and grouping.

mod common;

use common::TestContext;
use quarry_core::proto::{
    AggregateArgs, AggregateSelection, Filter, GroupByArgs, GroupOrderBy, Having, OrderBy,
    ScalarFilter, SortOrder, Value, WriteData,
};
use quarry_core::{Client, CompileError, Error};

/// Categories `{a: 3, b: 1, c: 5}`; budgets are 10, 20, ... in creation order.
async fn seed_categories(ctx: &TestContext) {
    let categories = ["a", "a", "a", "b", "c", "c", "c", "c", "c"];
    for (i, category) in categories.into_iter().enumerate() {
        ctx.create(
            "Project",
            WriteData::new()
                .set("name", format!("project-{i}"))
                .set("category", category)
                .set("budget", (i as f64 + 1.0) * 10.0),
        )
        .await;
    }
}

#[tokio::test]
async fn test_group_by_with_count_having() {
    let ctx = TestContext::new().await;
    seed_categories(&ctx).await;

    let groups = ctx
        .engine
        .group_by(
            "Project",
            GroupByArgs::new(["category"])
                .with(AggregateSelection::count_all())
                .with_having(Having::count(ScalarFilter::Gt(Value::Int(2))))
                .order_by(GroupOrderBy::Field(OrderBy::asc("category"))),
        )
        .await
        .unwrap();

    let summary: Vec<_> = groups
        .iter()
        .map(|g| (g.key("category").cloned().unwrap(), g.count_all().unwrap()))
        .collect();
    assert_eq!(summary, vec![(Value::from("a"), 3), (Value::from("c"), 5)]);
}

#[tokio::test]
async fn test_group_by_orders_by_aggregate() {
    let ctx = TestContext::new().await;
    seed_categories(&ctx).await;

    let sum = AggregateSelection::sum("budget");
    let groups = ctx
        .engine
        .group_by(
            "Project",
            GroupByArgs::new(["category"])
                .with(sum.clone())
                .with(AggregateSelection::avg("budget"))
                .with_filter(Filter::field("budget", ScalarFilter::Gte(Value::Int(20))))
                .with_having(Having::Field {
                    field: "category".into(),
                    condition: ScalarFilter::Not(Value::from("b")),
                })
                .order_by(GroupOrderBy::Aggregate {
                    aggregate: sum.clone(),
                    direction: SortOrder::Desc,
                }),
        )
        .await
        .unwrap();

    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].key("category"), Some(&Value::from("c")));
    assert_eq!(groups[0].get(&sum), Some(&Value::Float(350.0)));
    assert_eq!(groups[1].key("category"), Some(&Value::from("a")));
    assert_eq!(groups[1].get(&sum), Some(&Value::Float(50.0)));
    assert_eq!(groups[1].get(&AggregateSelection::avg("budget")), Some(&Value::Float(25.0)));
}

#[tokio::test]
async fn test_aggregate_values() {
    let ctx = TestContext::new().await;
    seed_categories(&ctx).await;
    ctx.project("unbudgeted", "d").await;

    let result = ctx
        .engine
        .aggregate(
            "Project",
            AggregateArgs::new()
                .with(AggregateSelection::count_all())
                .with(AggregateSelection::count("budget"))
                .with(AggregateSelection::min("budget"))
                .with(AggregateSelection::max("name"))
                .with(AggregateSelection::sum("id")),
        )
        .await
        .unwrap();

    assert_eq!(result.count_all(), Some(10));
    assert_eq!(result.get(&AggregateSelection::count("budget")), Some(&Value::Int(9)));
    assert_eq!(result.get(&AggregateSelection::min("budget")), Some(&Value::Float(10.0)));
    assert_eq!(result.get(&AggregateSelection::max("name")), Some(&Value::from("unbudgeted")));
    assert_eq!(result.get(&AggregateSelection::sum("id")), Some(&Value::Int(55)));

    let window = ctx
        .engine
        .aggregate(
            "Project",
            AggregateArgs::new()
                .with(AggregateSelection::sum("budget"))
                .order_by(OrderBy::asc("budget"))
                .with_skip(1)
                .with_take(2),
        )
        .await
        .unwrap();
    assert_eq!(window.get(&AggregateSelection::sum("budget")), Some(&Value::Float(30.0)));
}

#[tokio::test]
async fn test_empty_input_is_normalized() {
    let ctx = TestContext::new().await;

    let result = ctx
        .engine
        .aggregate(
            "Project",
            AggregateArgs::new()
                .with(AggregateSelection::count_all())
                .with(AggregateSelection::sum("budget"))
                .with(AggregateSelection::avg("budget"))
                .with(AggregateSelection::max("createdAt")),
        )
        .await
        .unwrap();

    assert_eq!(result.count_all(), Some(0));
    assert_eq!(result.get(&AggregateSelection::sum("budget")), Some(&Value::Null));
    assert_eq!(result.get(&AggregateSelection::avg("budget")), Some(&Value::Null));
    assert_eq!(result.get(&AggregateSelection::max("createdAt")), Some(&Value::Null));
}

#[tokio::test]
async fn test_grouping_rules_are_enforced_before_execution() {
    let ctx = TestContext::new().await;

    let err = ctx
        .engine
        .group_by(
            "Project",
            GroupByArgs::new(["category"]).with_having(Having::Field {
                field: "name".into(),
                condition: ScalarFilter::Equals(Value::from("x")),
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Compile(CompileError::HavingFieldNotInBy { ref field, .. }) if field == "name"
    ));

    let err = ctx
        .engine
        .group_by("Project", GroupByArgs::new(Vec::<String>::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::EmptyGroupBy { .. })));

    let err = ctx
        .engine
        .aggregate("Project", AggregateArgs::new().with(AggregateSelection::sum("name")))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Compile(CompileError::InvalidAggregate { .. })));
}
