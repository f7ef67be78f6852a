//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables and indexes. Safe to run on every
/// start.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(JOB_HISTORY_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Active jobs: every queued or running job has exactly one row here.
///
/// `position` orders a queue. It is a ULID minted on enqueue and again on
/// requeue, so it sorts lexicographically in arrival order.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE INDEX IF NOT EXISTS job_queue_status ON job FIELDS queue, status;
DEFINE INDEX IF NOT EXISTS job_position ON job FIELDS position;
"#;

/// Terminal jobs, kept for inspection until purged.
const JOB_HISTORY_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_history SCHEMALESS;

DEFINE INDEX IF NOT EXISTS history_queue ON job_history FIELDS queue;
DEFINE INDEX IF NOT EXISTS history_status ON job_history FIELDS status;
DEFINE INDEX IF NOT EXISTS history_ended ON job_history FIELDS ended_at;
"#;
