//! Repository implementations for database operations.

mod history_repo;
mod job_repo;
mod queue_repo;

pub(crate) use history_repo::HistoryRepository;
pub(crate) use job_repo::{JobRepository, JobRow};
pub(crate) use queue_repo::QueueRepository;
