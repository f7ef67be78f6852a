//! SurrealDB-backed queue store for the job queue system.
//!
//! This crate provides database connectivity, the schema, and the
//! `QueueStore` that holds queued, running and archived jobs.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod repositories;
mod retry;
mod schema;
mod store;

pub use connection::{Database, DbConfig, DbError, connect};
pub use retry::RetryPolicy;
pub use schema::init_schema;
pub use store::{QueueStore, StoreConfig};

