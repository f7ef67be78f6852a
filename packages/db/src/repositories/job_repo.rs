//! Job repository for the active `job` table.

use chrono::{DateTime, SecondsFormat, Utc};
use jobs_core::{Job, JobId, JobResult, JobStatus};
use serde::{Deserialize, Serialize};

use crate::{Database, DbError};

/// Stored form of a job.
///
/// Timestamps are kept as fixed-width RFC 3339 strings so that they compare
/// lexicographically in queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JobRow {
    pub job_id: String,
    pub position: String,
    #[serde(default)]
    pub title: Option<String>,
    pub queue: String,
    pub created: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub worker: Option<String>,
    #[serde(default)]
    pub started_at: Option<String>,
    #[serde(default)]
    pub ended_at: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<JobResult>,
}

impl JobRow {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            position: JobId::new().to_string(),
            title: job.title.clone(),
            queue: job.queue.clone(),
            created: timestamp(job.created),
            payload: job.payload.clone(),
            status: job.status,
            attempts: job.attempts,
            worker: job.worker.clone(),
            started_at: job.started_at.map(timestamp),
            ended_at: job.ended_at.map(timestamp),
            error: job.error.clone(),
            result: job.result.clone(),
        }
    }

    pub fn into_job(self) -> Result<Job, DbError> {
        let id = JobId::parse(&self.job_id)
            .map_err(|e| DbError::Serialization(format!("bad job id '{}': {}", self.job_id, e)))?;
        Ok(Job {
            id,
            title: self.title,
            queue: self.queue,
            created: parse_timestamp(&self.created)?,
            payload: self.payload,
            status: self.status,
            attempts: self.attempts,
            worker: self.worker,
            started_at: self.started_at.as_deref().map(parse_timestamp).transpose()?,
            ended_at: self.ended_at.as_deref().map(parse_timestamp).transpose()?,
            error: self.error,
            result: self.result,
        })
    }
}

pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Serialization(format!("bad timestamp '{}': {}", value, e)))
}

/// Repository for rows of queued and running jobs.
#[derive(Clone)]
pub(crate) struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a new row.
    pub async fn create(&self, row: JobRow) -> Result<(), DbError> {
        self.db
            .query("CREATE type::thing('job', $id) CONTENT $row RETURN NONE")
            .bind(("id", row.job_id.clone()))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    /// Get a row by job ID.
    pub async fn get(&self, id: JobId) -> Result<Option<JobRow>, DbError> {
        let mut response = self
            .db
            .query("SELECT * FROM type::thing('job', $id)")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Oldest queued row of a queue.
    pub async fn head(&self, queue: &str) -> Result<Option<JobRow>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                SELECT * FROM job
                WHERE queue = $queue AND status = "queued"
                ORDER BY position ASC
                LIMIT 1
                "#,
            )
            .bind(("queue", queue.to_string()))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Queued rows, ordered by queue name then arrival. `None` means every
    /// queue.
    pub async fn list_queued(&self, queues: Option<Vec<String>>) -> Result<Vec<JobRow>, DbError> {
        let query = match queues {
            Some(queues) => self
                .db
                .query(
                    r#"
                    SELECT * FROM job
                    WHERE status = "queued" AND queue IN $queues
                    ORDER BY queue ASC, position ASC
                    "#,
                )
                .bind(("queues", queues)),
            None => self.db.query(
                r#"
                SELECT * FROM job
                WHERE status = "queued"
                ORDER BY queue ASC, position ASC
                "#,
            ),
        };
        let mut response = query.await?;
        Ok(response.take(0)?)
    }

    /// Move a row from queued to running. Returns `None` when the row is no
    /// longer queued, which means another worker or a cancel got there first.
    pub async fn mark_running(
        &self,
        id: &str,
        worker_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<Option<JobRow>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET status = "running", worker = $worker, started_at = $started_at, attempts += 1
                WHERE status = "queued"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("worker", worker_id.to_string()))
            .bind(("started_at", timestamp(started_at)))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Put a running row back at the tail of its queue.
    pub async fn requeue(&self, id: JobId, error: &str) -> Result<Option<JobRow>, DbError> {
        let mut response = self
            .db
            .query(
                r#"
                UPDATE type::thing('job', $id)
                SET status = "queued", position = $position, worker = NONE, error = $error
                WHERE status = "running"
                RETURN AFTER
                "#,
            )
            .bind(("id", id.to_string()))
            .bind(("position", JobId::new().to_string()))
            .bind(("error", error.to_string()))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Delete a row regardless of status.
    pub async fn delete(&self, id: JobId) -> Result<Option<JobRow>, DbError> {
        let mut response = self
            .db
            .query("DELETE type::thing('job', $id) RETURN BEFORE")
            .bind(("id", id.to_string()))
            .await?;
        let rows: Vec<JobRow> = response.take(0)?;
        Ok(rows.into_iter().next())
    }

    /// Delete every queued row of the given queues (`None` means all) and
    /// return what was deleted.
    pub async fn delete_all_queued(
        &self,
        queues: Option<Vec<String>>,
    ) -> Result<Vec<JobRow>, DbError> {
        let query = match queues {
            Some(queues) => self
                .db
                .query(r#"DELETE job WHERE status = "queued" AND queue IN $queues RETURN BEFORE"#)
                .bind(("queues", queues)),
            None => self
                .db
                .query(r#"DELETE job WHERE status = "queued" RETURN BEFORE"#),
        };
        let mut response = query.await?;
        Ok(response.take(0)?)
    }

    /// Move a row from the active table into history in one transaction.
    ///
    /// The delete only matches while the active row still has status `from`;
    /// otherwise the transaction is cancelled and nothing changes.
    pub async fn archive(&self, row: JobRow, from: JobStatus) -> Result<(), DbError> {
        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                LET $before = (DELETE type::thing('job', $id) WHERE status = $from RETURN BEFORE);
                IF array::len($before) = 0 {
                    THROW "job is no longer " + <string> $from;
                };
                CREATE type::thing('job_history', $id) CONTENT $row RETURN NONE;
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("id", row.job_id.clone()))
            .bind(("from", from))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_round_trips_job() {
        let mut job = Job::new("default", serde_json::json!({"callable": "noop"})).with_title("t");
        job.status = JobStatus::Failed;
        job.started_at = Some(Utc::now());
        job.ended_at = Some(Utc::now());
        job.error = Some("boom".into());

        let back = JobRow::from_job(&job).into_job().unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.title, job.title);
        assert_eq!(back.status, JobStatus::Failed);
        assert_eq!(back.error.as_deref(), Some("boom"));
        // Microsecond precision is kept.
        assert_eq!(
            back.created.timestamp_micros(),
            job.created.timestamp_micros()
        );
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let early = "2024-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let late = "2024-01-01T00:00:00.5Z".parse::<DateTime<Utc>>().unwrap();
        assert!(timestamp(early) < timestamp(late));
    }

    #[test]
    fn corrupt_row_is_a_serialization_error() {
        let mut row = JobRow::from_job(&Job::new("default", serde_json::json!({})));
        row.created = "yesterday".into();
        assert!(matches!(row.into_job(), Err(DbError::Serialization(_))));
    }
}
