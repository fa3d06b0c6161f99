//! Write benchmarks against SQLite.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use quarry_bench::{generate_posts, generate_users, Scale, TestContext};
use quarry_core::Client;
use quarry_proto::{
    CreateArgs, CreateManyArgs, DeleteArgs, Filter, UniqueWhere, UpdateData, UpdateManyArgs,
};

fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("mutation/create");

    group.bench_function("single", |b| {
        let ctx = TestContext::with_scale(Scale::Tiny);
        let row = generate_posts(1, 1).remove(0);
        b.to_async(&ctx.runtime).iter(|| {
            let engine = ctx.engine.clone();
            let row = row.clone();
            async move { black_box(engine.create("Post", CreateArgs::new(row)).await.unwrap()) }
        });
    });

    group.bench_function("many_100", |b| {
        let ctx = TestContext::with_scale(Scale::Tiny);
        let rows = generate_posts(100, Scale::Tiny.count());
        b.to_async(&ctx.runtime).iter(|| {
            let engine = ctx.engine.clone();
            let rows = rows.clone();
            async move { black_box(engine.create_many("Post", CreateManyArgs::new(rows)).await.unwrap()) }
        });
    });

    group.finish();
}

fn bench_update_many(c: &mut Criterion) {
    let ctx = TestContext::with_scale(Scale::Small);
    let args = UpdateManyArgs::new(
        Some(Filter::eq("published", false)),
        UpdateData::new().increment("views", 1),
    );

    c.bench_function("mutation/update_many", |b| {
        b.to_async(&ctx.runtime)
            .iter(|| {
                let engine = ctx.engine.clone();
                let args = args.clone();
                async move { black_box(engine.update_many("Post", args).await.unwrap()) }
            });
    });
}

fn bench_cascade_delete(c: &mut Criterion) {
    c.bench_function("mutation/delete_cascade", |b| {
        b.iter_batched(
            || {
                let ctx = TestContext::new();
                ctx.insert("User", generate_users(1));
                ctx.insert("Post", generate_posts(20, 1));
                ctx
            },
            |ctx| {
                let deleted = ctx
                    .runtime
                    .block_on(ctx.engine.delete("User", DeleteArgs::new(UniqueWhere::new("id", 1))))
                    .unwrap();
                black_box(deleted.affected)
            },
            BatchSize::PerIteration,
        );
    });
}

criterion_group!(benches, bench_create, bench_update_many, bench_cascade_delete);
criterion_main!(benches);
