//! Job domain types for work items in the queue.

use std::sync::{LazyLock, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::{Generator, Ulid};

use crate::Payload;

/// Monotonic generator so ids created within one millisecond still sort in
/// creation order. Queue order relies on this.
static ID_GENERATOR: LazyLock<Mutex<Generator>> = LazyLock::new(|| Mutex::new(Generator::new()));

/// Unique identifier for a job, using ULID for chronological sorting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Create a new unique job ID, strictly greater than any previously
    /// generated in this process.
    pub fn new() -> Self {
        let mut generator = ID_GENERATOR.lock().unwrap_or_else(PoisonError::into_inner);
        // Overflow only happens after 2^80 ids in one millisecond.
        Self(generator.generate().unwrap_or_else(|_| Ulid::new()))
    }

    /// Parse a job ID from a string.
    pub fn parse(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current status of a job in its lifecycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting in its queue.
    #[default]
    Queued,
    /// Job has been claimed by a worker.
    Running,
    /// Job completed successfully.
    Finished,
    /// Job failed while decoding or executing.
    Failed,
    /// Job was cancelled before a worker claimed it.
    Cancelled,
}

impl JobStatus {
    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Check if the job may still be cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, JobStatus::Queued)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Cancelled)
                | (JobStatus::Running, JobStatus::Finished)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    /// Get a simple status string for display and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    /// Human-readable summary of the result.
    pub summary: String,
    /// Optional structured output data as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl JobResult {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            output: None,
        }
    }

    pub fn with_output(summary: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            summary: summary.into(),
            output: Some(output),
        }
    }
}

/// A job represents a unit of work to be executed by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier for this job.
    pub id: JobId,
    /// Optional human-readable label.
    #[serde(default)]
    pub title: Option<String>,
    /// Name of the queue holding this job.
    pub queue: String,
    /// When the job was enqueued.
    pub created: DateTime<Utc>,
    /// Encoded callable reference and arguments.
    pub payload: serde_json::Value,
    /// Current status.
    pub status: JobStatus,
    /// Number of times a worker has claimed this job.
    #[serde(default)]
    pub attempts: u32,
    /// Worker that claimed the job, if any.
    #[serde(default)]
    pub worker: Option<String>,
    /// When the job was last claimed.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Failure message recorded for failed jobs.
    #[serde(default)]
    pub error: Option<String>,
    /// Result recorded for finished jobs.
    #[serde(default)]
    pub result: Option<JobResult>,
}

impl Job {
    /// Create a new queued job carrying an already encoded payload.
    pub fn new(queue: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: JobId::new(),
            title: None,
            queue: queue.into(),
            created: Utc::now(),
            payload,
            status: JobStatus::Queued,
            attempts: 0,
            worker: None,
            started_at: None,
            ended_at: None,
            error: None,
            result: None,
        }
    }

    /// Create a new queued job from a payload.
    pub fn from_payload(
        queue: impl Into<String>,
        payload: &Payload,
    ) -> Result<Self, crate::JobError> {
        Ok(Self::new(queue, payload.encode()?))
    }

    /// Set the title for this job.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set an optional title for this job.
    pub fn with_optional_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    /// Listing projection of this job.
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            title: self.title.clone(),
            queue: self.queue.clone(),
            created: self.created,
        }
    }

    /// How long the job ran, if it has both started and ended.
    pub fn duration_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let ended = self.ended_at?;
        Some((ended - started).num_milliseconds().max(0) as u64)
    }
}

/// Summary of a queued job as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: JobId,
    pub title: Option<String>,
    pub queue: String,
    pub created: DateTime<Utc>,
}

impl std::fmt::Display for JobSummary {
    /// `"{created} {id} {queue} {title}"`, with the title quoted and an
    /// absent title rendered as the empty string.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let title = match &self.title {
            Some(title) => format!("\"{}\"", title),
            None => String::new(),
        };
        write!(
            f,
            "{} {} {} {}",
            self.created.to_rfc3339(),
            self.id,
            self.queue,
            title
        )
    }
}
