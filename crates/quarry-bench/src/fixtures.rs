//! Data generation for benchmarks.
//!
//! Generators are seeded so every run sees the same rows.

use quarry_core::catalog::{
    DefaultValue, DeleteBehavior, EntityDef, FieldDef, RelationFieldDef, ScalarType, SchemaBundle,
};
use quarry_proto::WriteData;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Scale factor for benchmark data generation.
#[derive(Clone, Copy, Debug, Default)]
pub enum Scale {
    /// 10 users; for quick iteration.
    Tiny,
    /// 100 users.
    Small,
    /// 2,000 users.
    #[default]
    Medium,
}

impl Scale {
    /// Number of users.
    pub fn count(&self) -> usize {
        match self {
            Scale::Tiny => 10,
            Scale::Small => 100,
            Scale::Medium => 2_000,
        }
    }

    /// Posts per user.
    pub fn posts_per_user(&self) -> usize {
        match self {
            Scale::Tiny => 2,
            Scale::Small | Scale::Medium => 5,
        }
    }

    /// Comments per post.
    pub fn comments_per_post(&self) -> usize {
        match self {
            Scale::Tiny => 1,
            Scale::Small => 3,
            Scale::Medium => 2,
        }
    }
}

/// Users with posts and comments. Posts and comments cascade.
pub fn blog_schema() -> SchemaBundle {
    let id = || FieldDef::new("id", ScalarType::Int).with_default(DefaultValue::Autoincrement);

    SchemaBundle::new(1)
        .with_entity(
            EntityDef::new("User", "id")
                .with_field(id())
                .with_field(FieldDef::new("name", ScalarType::String))
                .with_field(FieldDef::new("email", ScalarType::String).unique())
                .with_field(FieldDef::new("age", ScalarType::Int))
                .with_field(FieldDef::new("status", ScalarType::String))
                .with_relation(RelationFieldDef::many("posts", "Post"))
                .with_relation(RelationFieldDef::many("comments", "Comment")),
        )
        .with_entity(
            EntityDef::new("Post", "id")
                .with_field(id())
                .with_field(FieldDef::new("title", ScalarType::String))
                .with_field(FieldDef::new("content", ScalarType::String))
                .with_field(FieldDef::new("authorId", ScalarType::Int))
                .with_field(FieldDef::new("views", ScalarType::Int))
                .with_field(FieldDef::new("published", ScalarType::Bool))
                .with_field(FieldDef::optional("meta", ScalarType::Json))
                .with_relation(
                    RelationFieldDef::owning("author", "User", ["authorId"], ["id"])
                        .on_delete(DeleteBehavior::Cascade),
                )
                .with_relation(RelationFieldDef::many("comments", "Comment")),
        )
        .with_entity(
            EntityDef::new("Comment", "id")
                .with_field(id())
                .with_field(FieldDef::new("text", ScalarType::String))
                .with_field(FieldDef::new("postId", ScalarType::Int))
                .with_field(FieldDef::new("authorId", ScalarType::Int))
                .with_relation(
                    RelationFieldDef::owning("post", "Post", ["postId"], ["id"])
                        .on_delete(DeleteBehavior::Cascade),
                )
                .with_relation(
                    RelationFieldDef::owning("author", "User", ["authorId"], ["id"])
                        .on_delete(DeleteBehavior::Cascade),
                ),
        )
}

fn random_string(rng: &mut StdRng, len: usize) -> String {
    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

/// Users; ids are assigned 1..=count by the store.
pub fn generate_users(count: usize) -> Vec<WriteData> {
    const SEED: u64 = 12345;
    let mut rng = StdRng::seed_from_u64(SEED);

    let statuses = ["active", "inactive", "pending", "admin"];
    let name_prefixes = [
        "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "Grace", "Henry", "Ivy", "Jack",
    ];

    (0..count)
        .map(|i| {
            WriteData::new()
                .set("name", format!("{}_{}", name_prefixes[i % name_prefixes.len()], i))
                .set("email", format!("user{i}@example{}.com", i % 10))
                .set("age", 18 + (rng.gen::<u32>() % 60) as i64)
                .set("status", statuses[i % statuses.len()])
        })
        .collect()
}

/// Posts spread round-robin over `users` authors.
pub fn generate_posts(count: usize, users: usize) -> Vec<WriteData> {
    const SEED: u64 = 54321;
    let mut rng = StdRng::seed_from_u64(SEED);

    (0..count)
        .map(|i| {
            let mut data = WriteData::new()
                .set("title", format!("Post Title {}: {}", i, random_string(&mut rng, 20)))
                .set("content", random_string(&mut rng, 200))
                .set("authorId", (i % users) as i64 + 1)
                .set("views", rng.gen_range(0..1_000_000i64))
                .set("published", rng.gen_bool(0.8));
            if i % 3 == 0 {
                data = data.set("meta", serde_json::json!({"lang": "en", "score": i % 100}));
            }
            data
        })
        .collect()
}

/// Comments spread round-robin over posts and users.
pub fn generate_comments(count: usize, posts: usize, users: usize) -> Vec<WriteData> {
    const SEED: u64 = 98765;
    let mut rng = StdRng::seed_from_u64(SEED);

    (0..count)
        .map(|i| {
            WriteData::new()
                .set("text", random_string(&mut rng, 100))
                .set("postId", (i % posts) as i64 + 1)
                .set("authorId", (i % users) as i64 + 1)
        })
        .collect()
}
