//! Repository for terminal jobs kept in `job_history`.

use chrono::{DateTime, Utc};
use jobs_core::JobId;

use super::job_repo::{JobRow, timestamp};
use crate::{Database, DbError};

/// Repository for archived job rows.
#[derive(Clone)]
pub(crate) struct HistoryRepository {
    db: Database,
}

impl HistoryRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get an archived row by job ID.
    pub async fn get(&self, id: JobId) -> Result<Option<JobRow>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing('job_history', $id)")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Delete rows that ended before `cutoff`. Returns how many went.
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let mut response = self
            .db
            .query("DELETE job_history WHERE ended_at < $cutoff RETURN BEFORE")
            .bind(("cutoff", timestamp(cutoff)))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.len())
    }
}
