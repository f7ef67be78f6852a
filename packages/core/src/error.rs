//! Error taxonomy shared by the store, the worker and the queue manager.

use thiserror::Error;

use crate::{JobId, JobStatus};

/// Errors surfaced by job queue operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// No job with this id exists.
    #[error("There is no job with ID \"{0}\"")]
    NotFound(String),

    /// The job has already been claimed or has ended.
    #[error("Job {id} cannot be cancelled: it is {status}")]
    NotCancellable { id: JobId, status: JobStatus },

    /// The job is not in a state that allows this change.
    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// The backing store failed and retries were exhausted.
    #[error("Queue store unavailable: {0}")]
    StoreUnavailable(String),

    /// The backing store rejected a request.
    #[error("Queue store error: {0}")]
    Store(String),

    /// A payload could not be encoded or decoded.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The payload names a callable the registry does not know.
    #[error("Unknown callable: {0}")]
    UnknownCallable(String),

    /// The callable failed while running.
    #[error("Job execution failed: {0}")]
    ExecutionFailure(String),

    /// Invalid configuration or arguments.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl JobError {
    /// Whether the operation may succeed if tried again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::StoreUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_id() {
        let err = JobError::NotFound("abc".into());
        assert_eq!(err.to_string(), "There is no job with ID \"abc\"");
    }

    #[test]
    fn not_cancellable_reports_status() {
        let id = JobId::new();
        let err = JobError::NotCancellable {
            id,
            status: JobStatus::Running,
        };
        assert!(err.to_string().ends_with("it is running"));
        assert!(!err.is_transient());
    }

    #[test]
    fn only_store_errors_are_transient() {
        assert!(JobError::StoreUnavailable("down".into()).is_transient());
        assert!(!JobError::ExecutionFailure("boom".into()).is_transient());
        assert!(!JobError::Store("record exists".into()).is_transient());
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let err = JobError::InvalidTransition {
            id: JobId::new(),
            from: JobStatus::Queued,
            to: JobStatus::Finished,
        };
        assert!(err.to_string().ends_with("cannot move from queued to finished"));
    }
}
