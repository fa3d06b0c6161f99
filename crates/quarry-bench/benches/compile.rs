//! Planning and rendering benchmarks; no store involved.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use quarry_bench::{blog_schema, init_tracing};
use quarry_core::query::{AggregationEngine, QueryPlanner};
use quarry_core::sql::{PostgresDialect, SqliteDialect};
use quarry_core::Catalog;
use quarry_proto::{
    AggregateSelection, Filter, FindManyArgs, GroupByArgs, Having, OrderBy, Projection,
    ScalarFilter, Value,
};

fn nested_filter() -> Filter {
    Filter::and(vec![
        Filter::eq("status", "active"),
        Filter::or(vec![
            Filter::field("age", ScalarFilter::Gte(Value::Int(30))),
            Filter::field_insensitive("name", ScalarFilter::StartsWith("ali".into())),
        ]),
        Filter::some(
            "posts",
            Filter::and(vec![
                Filter::eq("published", true),
                Filter::every("comments", Filter::field("text", ScalarFilter::Contains("ok".into()))),
            ]),
        ),
    ])
}

fn bench_plan(c: &mut Criterion) {
    init_tracing();
    let catalog = Catalog::load(blog_schema()).unwrap();
    let planner = QueryPlanner::new(&catalog);
    let mut group = c.benchmark_group("compile/plan");

    group.bench_function("eq", |b| {
        let args = FindManyArgs::new().with_filter(Filter::eq("status", "active"));
        b.iter(|| black_box(planner.find_many("User", &args).unwrap()));
    });

    group.bench_function("nested_quantifiers", |b| {
        let args = FindManyArgs::new().with_filter(nested_filter());
        b.iter(|| black_box(planner.find_many("User", &args).unwrap()));
    });

    group.bench_function("include_tree", |b| {
        let args = FindManyArgs::new().order_by(OrderBy::asc("name")).with_take(20).with_projection(
            Projection::default().include_with(
                "posts",
                FindManyArgs::new()
                    .order_by(OrderBy::desc("views"))
                    .with_take(3)
                    .with_projection(Projection::default().include("comments").count("comments")),
            ),
        );
        b.iter(|| black_box(planner.find_many("User", &args).unwrap()));
    });

    group.finish();
}

fn bench_render(c: &mut Criterion) {
    let catalog = Catalog::load(blog_schema()).unwrap();
    let plan = QueryPlanner::new(&catalog)
        .find_many("User", &FindManyArgs::new().with_filter(nested_filter()))
        .unwrap();
    let mut group = c.benchmark_group("compile/render");

    group.bench_function("sqlite", |b| b.iter(|| black_box(plan.explain(&SqliteDialect))));
    group.bench_function("postgres", |b| b.iter(|| black_box(plan.explain(&PostgresDialect))));

    group.finish();
}

fn bench_group_by(c: &mut Criterion) {
    let catalog = Catalog::load(blog_schema()).unwrap();
    let engine = AggregationEngine::new(&catalog);
    let args = GroupByArgs::new(["status"])
        .with(AggregateSelection::count_all())
        .with(AggregateSelection::avg("age"))
        .with_having(Having::count(ScalarFilter::Gt(Value::Int(10))));

    c.bench_function("compile/group_by", |b| {
        b.iter(|| black_box(engine.group_by("User", &args).unwrap()))
    });
}

criterion_group!(benches, bench_plan, bench_render, bench_group_by);
criterion_main!(benches);
