//! Benchmark harness helpers.

use quarry_core::connection::{SqliteConfig, SqliteManager};
use quarry_core::{Catalog, Client, Engine, EngineConfig};
use quarry_proto::{CreateManyArgs, WriteData};
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use crate::fixtures::{blog_schema, generate_comments, generate_posts, generate_users, Scale};

const BLOG_TABLES: &str = r#"
CREATE TABLE "User" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "name" TEXT NOT NULL,
    "email" TEXT NOT NULL,
    "age" INTEGER NOT NULL,
    "status" TEXT NOT NULL
);
CREATE UNIQUE INDEX "User_email_key" ON "User" ("email");
CREATE TABLE "Post" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "title" TEXT NOT NULL,
    "content" TEXT NOT NULL,
    "authorId" INTEGER NOT NULL REFERENCES "User" ("id") DEFERRABLE INITIALLY DEFERRED,
    "views" INTEGER NOT NULL,
    "published" INTEGER NOT NULL,
    "meta" TEXT
);
CREATE INDEX "Post_authorId_idx" ON "Post" ("authorId");
CREATE TABLE "Comment" (
    "id" INTEGER PRIMARY KEY AUTOINCREMENT,
    "text" TEXT NOT NULL,
    "postId" INTEGER NOT NULL REFERENCES "Post" ("id") DEFERRABLE INITIALLY DEFERRED,
    "authorId" INTEGER NOT NULL REFERENCES "User" ("id") DEFERRABLE INITIALLY DEFERRED
);
CREATE INDEX "Comment_postId_idx" ON "Comment" ("postId");
CREATE INDEX "Comment_authorId_idx" ON "Comment" ("authorId");
"#;

/// Install a log subscriber for benchmark runs.
///
/// Honours `RUST_LOG` and defaults to `warn` so statement logging does not
/// skew timings. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Engine over a temporary SQLite database with the blog tables.
pub struct TestContext {
    pub engine: Engine,
    pub runtime: Runtime,
    _dir: tempfile::TempDir,
}

impl TestContext {
    /// An empty database.
    pub fn new() -> Self {
        init_tracing();
        let runtime = Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteConfig::new(dir.path().join("bench.db"));

        runtime.block_on(async {
            let mut conn = SqliteManager::new(sqlite.clone()).open().unwrap();
            conn.execute_batch(BLOG_TABLES).await.unwrap();
        });

        let catalog = Catalog::load(blog_schema()).unwrap();
        let engine = Engine::sqlite(catalog, sqlite, EngineConfig::default());
        Self {
            engine,
            runtime,
            _dir: dir,
        }
    }

    /// A database populated at the given scale.
    pub fn with_scale(scale: Scale) -> Self {
        let ctx = Self::new();
        let users = scale.count();
        let posts = users * scale.posts_per_user();
        let comments = posts * scale.comments_per_post();

        ctx.insert("User", generate_users(users));
        ctx.insert("Post", generate_posts(posts, users));
        ctx.insert("Comment", generate_comments(comments, posts, users));
        tracing::debug!(users, posts, comments, "populated benchmark database");
        ctx
    }

    /// Insert rows through `createMany`.
    pub fn insert(&self, entity: &str, rows: Vec<WriteData>) {
        self.runtime
            .block_on(self.engine.create_many(entity, CreateManyArgs::new(rows)))
            .unwrap();
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
