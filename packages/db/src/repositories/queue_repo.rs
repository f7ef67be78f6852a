//! Queue repository: aggregate views over the active job table.
//!
//! Queues have no rows of their own. A queue is known while it holds at
//! least one queued job.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{Database, DbError};

/// Repository for queue-level reads.
#[derive(Clone)]
pub(crate) struct QueueRepository {
    db: Database,
}

impl QueueRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Number of queued jobs per queue, keyed and sorted by queue name.
    pub async fn queued_counts(&self) -> Result<BTreeMap<String, u64>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT queue, count() AS count
                FROM job
                WHERE status = "queued"
                GROUP BY queue
                "#,
            )
            .await?;

        #[derive(Deserialize)]
        struct QueueCount {
            queue: String,
            count: i64,
        }

        let counts: Vec<QueueCount> = response.take(0)?;

        Ok(counts
            .into_iter()
            .map(|c| (c.queue, c.count.max(0) as u64))
            .collect())
    }
}
