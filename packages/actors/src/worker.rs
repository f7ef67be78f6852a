//! Worker entry point: claim and run jobs from a list of queues.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use jobs_core::{JobError, queues_or_default};
use jobs_db::{QueueStore, RetryPolicy};
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef};
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use ulid::Ulid;

use crate::callable::CallableRegistry;
use crate::encoder::JobEncoder;
use crate::messages::WorkerMessage;
use crate::worker_actor::{WorkerActor, WorkerArgs};

/// Worker tunables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long an idle worker waits for an enqueue event before looking
    /// again.
    pub poll_interval: Duration,
    /// Upper bound on a single job's run time. `None` means no limit.
    pub job_timeout: Option<Duration>,
    /// How often a failed job is put back on its queue before it is marked
    /// failed. Zero disables retries.
    pub max_retries: u32,
    /// Backoff between claims while the store is unavailable.
    pub store_backoff: RetryPolicy,
    /// Consecutive failed claims after which the worker gives up.
    pub max_store_failures: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            job_timeout: None,
            max_retries: 0,
            store_backoff: RetryPolicy::default()
                .with_delays(Duration::from_millis(100), Duration::from_secs(5)),
            max_store_failures: 5,
        }
    }
}

impl WorkerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_store_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.store_backoff = backoff;
        self
    }

    pub fn with_max_store_failures(mut self, failures: u32) -> Self {
        self.max_store_failures = failures;
        self
    }

    /// Check that the settings can drive a worker.
    pub fn validate(&self) -> Result<(), JobError> {
        if self.poll_interval.is_zero() {
            return Err(JobError::Config("poll interval must be positive".into()));
        }
        if self.max_store_failures == 0 {
            return Err(JobError::Config(
                "max store failures must be at least 1".into(),
            ));
        }
        if self.job_timeout.is_some_and(|t| t.is_zero()) {
            return Err(JobError::Config("job timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Counters reported when a worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkSummary {
    /// Jobs claimed and run, including runs that were retried.
    pub processed: u64,
    pub finished: u64,
    pub failed: u64,
}

/// What a worker is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    Idle,
    Claiming,
    Running,
    Stopped,
}

/// Snapshot of a running worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub phase: WorkerPhase,
    pub summary: WorkSummary,
}

/// Claims jobs from its queues and runs them, one at a time.
#[derive(Clone)]
pub struct Worker {
    worker_id: String,
    store: Arc<QueueStore>,
    encoder: JobEncoder,
    config: WorkerConfig,
    actor: Arc<Mutex<Option<ActorRef<WorkerMessage>>>>,
}

impl Worker {
    pub fn new(
        store: Arc<QueueStore>,
        registry: Arc<CallableRegistry>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            worker_id: format!("worker-{}", Ulid::new().to_string().to_lowercase()),
            store,
            encoder: JobEncoder::new(registry),
            config,
            actor: Arc::new(Mutex::new(None)),
        }
    }

    /// Use a fixed worker id instead of a generated one.
    pub fn with_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run jobs from `queue_names` (the `default` queue when empty) until
    /// Ctrl-C, or until the queues are empty in burst mode.
    pub async fn work<S: AsRef<str>>(
        &self,
        queue_names: &[S],
        burst: bool,
    ) -> Result<WorkSummary, JobError> {
        self.work_until(queue_names, burst, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run jobs until `shutdown` resolves, or until the queues are empty in
    /// burst mode. A job that is running when `shutdown` resolves is
    /// finished first.
    pub async fn work_until<S, F>(
        &self,
        queue_names: &[S],
        burst: bool,
        shutdown: F,
    ) -> Result<WorkSummary, JobError>
    where
        S: AsRef<str>,
        F: Future<Output = ()>,
    {
        self.config.validate()?;
        let queues = queues_or_default(queue_names)?;

        tracing::info!(
            "Worker {} starting on queue(s) {}{}",
            self.worker_id,
            queues.join(", "),
            if burst { " in burst mode" } else { "" }
        );

        let (report_tx, report_rx) = oneshot::channel();
        let args = WorkerArgs {
            worker_id: self.worker_id.clone(),
            queues,
            burst,
            store: self.store.clone(),
            encoder: self.encoder.clone(),
            config: self.config.clone(),
            report: report_tx,
        };

        let (actor, mut handle) = Actor::spawn(None, WorkerActor, args)
            .await
            .map_err(|e| JobError::Config(format!("Failed to start worker: {}", e)))?;
        *self.actor.lock().await = Some(actor.clone());

        tokio::pin!(shutdown);
        tokio::select! {
            _ = &mut handle => {}
            _ = &mut shutdown => {
                tracing::info!("Worker {} shutting down", self.worker_id);
                if actor.send_message(WorkerMessage::Shutdown).is_ok()
                    && let Err(e) = handle.await
                {
                    tracing::warn!("Worker {} did not stop cleanly: {}", self.worker_id, e);
                }
            }
        }
        self.actor.lock().await.take();

        report_rx.await.map_err(|_| {
            JobError::ExecutionFailure(format!(
                "Worker {} stopped without reporting",
                self.worker_id
            ))
        })?
    }

    /// Status of the running worker, if it is running.
    pub async fn status(&self) -> Option<WorkerStatus> {
        let actor = self.actor.lock().await.clone()?;
        let result = ractor::rpc::call(
            &actor,
            |reply| WorkerMessage::GetStatus { reply },
            Some(Duration::from_secs(5)),
        )
        .await;
        match result {
            Ok(CallResult::Success(status)) => Some(status),
            _ => None,
        }
    }
}
