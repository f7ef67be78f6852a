//! Core domain types for the job queue system.
//!
//! This crate contains shared types used across all packages:
//! - Job, JobStatus and JobSummary for work items
//! - Payload for encoded callable references
//! - Queue naming rules
//! - Events for lifecycle notifications
//! - The JobError taxonomy

mod error;
mod events;
mod job;
mod payload;
mod queue;

pub use error::JobError;
pub use events::JobEvent;
pub use job::{Job, JobId, JobResult, JobStatus, JobSummary};
pub use payload::Payload;
pub use queue::{DEFAULT_QUEUE_NAME, normalize_queue_names, queues_or_default, validate_queue_name};
