//! Quarry benchmark suite.
//!
//! Criterion benchmarks for the engine.
//!
//! # Benchmark Categories
//!
//! - **Compile**: filter lowering, planning and SQL rendering without a store
//! - **Query**: reads, includes, pagination and grouping against SQLite
//! - **Mutation**: inserts, bulk updates and cascading deletes against SQLite

pub mod fixtures;
pub mod harness;

pub use fixtures::{blog_schema, generate_comments, generate_posts, generate_users, Scale};
pub use harness::{init_tracing, TestContext};
