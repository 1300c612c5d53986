//! Database layer for segment-core
//!
//! SQLite storage for the durable message queue and the identity store:
//! - Schema migrations
//! - Repository methods for queue and identity rows

pub mod repo;
pub mod schema;

pub use repo::Database;
