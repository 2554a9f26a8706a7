//! Persistence layer modules.

pub mod commit_repo;
pub mod db;
pub mod mailbox_repo;
pub mod outcome_repo;
pub mod retention;
pub mod schema;

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;
