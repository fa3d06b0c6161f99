//! Write path.
//!
//! The [`MutationCoordinator`] validates write payloads against the catalog
//! and compiles them into plans before a connection is involved. Executing
//! a plan runs it atomically: in its own transaction, or in a savepoint
//! when the session already has one open.
//!
//! Deletes go through the cascade planner in [`cascade`].

pub mod cascade;
mod coordinator;
mod input;
mod references;

pub use cascade::MAX_CASCADE_DEPTH;
pub use coordinator::{
    CreateManyPlan, CreatePlan, DeleteManyPlan, DeletePlan, MutationCoordinator, UpdateManyPlan,
    UpdatePlan, UpsertPlan,
};
