//! Workers and the queue manager for the job queue.
//!
//! # Architecture
//!
//! - `QueueManager` - Producer entry point and the list / show / cancel /
//!   clear / test-enqueue operations of [`JobActions`]
//! - `Worker` - Claims jobs from its queues and runs them until stopped
//! - `WorkerActor` - The ractor actor behind a running `Worker`
//! - `CallableRegistry` - Resolves the callable named in a job's payload
//!
//! # Usage
//!
//! ```ignore
//! use jobs_actors::{CallableRegistry, JobActions, QueueManager, WorkerConfig};
//!
//! let manager = QueueManager::open(&DbConfig::from_env(), StoreConfig::default(),
//!     CallableRegistry::with_builtins()).await?;
//! manager.enqueue_test_job(&[]).await?;
//!
//! let summary = manager.worker(WorkerConfig::default()).work(&["default"], true).await?;
//! ```

mod callable;
mod encoder;
mod manager;
mod messages;
mod worker;
mod worker_actor;

pub use callable::{CallFuture, CallResult, Callable, CallableRegistry, FnCallable, TEST_JOB};
pub use encoder::{DecodedJob, JobEncoder};
pub use manager::{JobActions, QueueManager, TEST_JOB_TITLE};
pub use messages::WorkerMessage;
pub use worker::{WorkSummary, Worker, WorkerConfig, WorkerPhase, WorkerStatus};
pub use worker_actor::{WorkerActor, WorkerArgs};

pub use jobs_core::{Job, JobError, JobEvent, JobId, JobResult, JobStatus, JobSummary, Payload};
