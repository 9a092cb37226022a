//! SQLite-backed index store

pub mod repo;
pub mod schema;

pub use repo::{Database, RefreshBatch};
pub use schema::INDEX_VERSION;
