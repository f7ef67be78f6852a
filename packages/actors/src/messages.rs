//! Message types for actor communication.

use jobs_core::{Job, JobResult};
use ractor::RpcReplyPort;

use crate::worker::WorkerStatus;

/// Messages for the WorkerActor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Try to claim and start the next job.
    Poll,

    /// A job was enqueued on one of the worker's queues.
    Wake,

    /// The running job returned.
    JobDone {
        job: Box<Job>,
        outcome: Result<JobResult, String>,
    },

    /// Report the worker's phase and counters.
    GetStatus { reply: RpcReplyPort<WorkerStatus> },

    /// Stop once the running job, if any, is recorded.
    Shutdown,
}
