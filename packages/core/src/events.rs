//! Lifecycle events emitted by the queue store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Events emitted by the job queue system.
///
/// Workers listen for `JobEnqueued` to wake up without waiting for their
/// poll interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// A new job was appended to a queue.
    JobEnqueued {
        job_id: JobId,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// A worker claimed a job.
    JobStarted {
        job_id: JobId,
        queue: String,
        worker_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A job finished successfully.
    JobFinished {
        job_id: JobId,
        queue: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    /// A job failed.
    JobFailed {
        job_id: JobId,
        queue: String,
        error: String,
        will_retry: bool,
        timestamp: DateTime<Utc>,
    },
    /// A queued job was cancelled.
    JobCancelled {
        job_id: JobId,
        queue: String,
        timestamp: DateTime<Utc>,
    },
    /// All queued jobs were removed from these queues.
    QueuesCleared {
        queues: Vec<String>,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            JobEvent::JobEnqueued { timestamp, .. } => *timestamp,
            JobEvent::JobStarted { timestamp, .. } => *timestamp,
            JobEvent::JobFinished { timestamp, .. } => *timestamp,
            JobEvent::JobFailed { timestamp, .. } => *timestamp,
            JobEvent::JobCancelled { timestamp, .. } => *timestamp,
            JobEvent::QueuesCleared { timestamp, .. } => *timestamp,
        }
    }

    /// Get the queue associated with this event, if it concerns one job.
    pub fn queue(&self) -> Option<&str> {
        match self {
            JobEvent::JobEnqueued { queue, .. }
            | JobEvent::JobStarted { queue, .. }
            | JobEvent::JobFinished { queue, .. }
            | JobEvent::JobFailed { queue, .. }
            | JobEvent::JobCancelled { queue, .. } => Some(queue),
            JobEvent::QueuesCleared { .. } => None,
        }
    }

    /// Get the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            JobEvent::JobEnqueued { job_id, .. }
            | JobEvent::JobStarted { job_id, .. }
            | JobEvent::JobFinished { job_id, .. }
            | JobEvent::JobFailed { job_id, .. }
            | JobEvent::JobCancelled { job_id, .. } => Some(*job_id),
            JobEvent::QueuesCleared { .. } => None,
        }
    }

    /// Get a short description of this event for logging.
    pub fn description(&self) -> String {
        match self {
            JobEvent::JobEnqueued { job_id, queue, .. } => {
                format!("Job {} enqueued on '{}'", job_id, queue)
            }
            JobEvent::JobStarted {
                job_id, worker_id, ..
            } => format!("Job {} started by {}", job_id, worker_id),
            JobEvent::JobFinished {
                job_id,
                duration_ms,
                ..
            } => format!("Job {} finished in {}ms", job_id, duration_ms),
            JobEvent::JobFailed {
                job_id,
                error,
                will_retry,
                ..
            } => {
                let retry = if *will_retry { " (will retry)" } else { "" };
                format!("Job {} failed: {}{}", job_id, error, retry)
            }
            JobEvent::JobCancelled { job_id, .. } => format!("Job {} cancelled", job_id),
            JobEvent::QueuesCleared { queues, .. } => {
                format!("Cleared queue(s) {}", queues.join(", "))
            }
        }
    }
}
