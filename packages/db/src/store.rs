//! Queue store: named FIFO queues of jobs over SurrealDB.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use jobs_core::{
    Job, JobEvent, JobId, JobResult, JobStatus, JobSummary, normalize_queue_names,
    validate_queue_name,
};
use tokio::sync::{Mutex, broadcast};

use crate::repositories::{HistoryRepository, JobRepository, JobRow, QueueRepository};
use crate::{Database, DbConfig, DbError, RetryPolicy, connect, init_schema};

/// Lost claim races tolerated per queue before moving to the next one.
const MAX_CLAIM_RACES: usize = 8;

/// Tunables of the queue store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Retry policy applied to every store operation.
    pub retry: RetryPolicy,
    /// How long ended jobs stay inspectable. `None` keeps them forever.
    pub result_ttl: Option<Duration>,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            result_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            event_capacity: 1024,
        }
    }
}

impl StoreConfig {
    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set how long ended jobs are retained.
    pub fn with_result_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.result_ttl = ttl;
        self
    }
}

/// Durable, named, FIFO collections of jobs.
///
/// Queued and running jobs live in the `job` table; ended jobs move to
/// `job_history`. Every change to the pending sequence (claim, cancel,
/// clear, remove) is a single statement guarded on `status = "queued"`, so
/// two workers can never take the same job. Within a process those
/// statements are also serialised on `pending_lock`, which makes claims
/// linearizable with cancels and clears.
pub struct QueueStore {
    jobs: JobRepository,
    history: HistoryRepository,
    queues: QueueRepository,
    config: StoreConfig,
    pending_lock: Mutex<()>,
    event_tx: broadcast::Sender<JobEvent>,
}

impl QueueStore {
    /// Connect to the configured database, prepare the schema and open a
    /// store on it.
    pub async fn open(db_config: &DbConfig, config: StoreConfig) -> Result<Self, DbError> {
        let db = connect(db_config).await?;
        init_schema(&db).await?;
        Ok(Self::new(db, config))
    }

    /// Open a store on an existing connection. The schema must exist.
    pub fn new(db: Database, config: StoreConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            jobs: JobRepository::new(db.clone()),
            history: HistoryRepository::new(db.clone()),
            queues: QueueRepository::new(db),
            config,
            pending_lock: Mutex::new(()),
            event_tx,
        }
    }

    /// Store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_tx.subscribe()
    }

    fn broadcast(&self, event: JobEvent) {
        tracing::debug!("{}", event.description());
        // No receivers is fine.
        let _ = self.event_tx.send(event);
    }

    /// Append a queued job to the tail of its queue. The queue is created
    /// implicitly.
    pub async fn enqueue(&self, job: Job) -> Result<JobId, DbError> {
        validate_queue_name(&job.queue).map_err(|e| DbError::Invalid(e.to_string()))?;
        if job.status != JobStatus::Queued {
            return Err(DbError::Invalid(format!(
                "cannot enqueue job {} with status {}",
                job.id, job.status
            )));
        }

        let row = JobRow::from_job(&job);
        self.config
            .retry
            .run("enqueue", move || self.jobs.create(row.clone()))
            .await?;

        self.broadcast(JobEvent::JobEnqueued {
            job_id: job.id,
            queue: job.queue,
            timestamp: Utc::now(),
        });

        Ok(job.id)
    }

    /// Summaries of queued jobs, ordered by queue name then arrival. An
    /// empty filter lists every queue.
    pub async fn list(&self, queues: &[String]) -> Result<Vec<JobSummary>, DbError> {
        let filter = queue_filter(queues)?;
        let rows = self
            .config
            .retry
            .run("list", move || self.jobs.list_queued(filter.clone()))
            .await?;

        rows.into_iter()
            .map(|row| row.into_job().map(|job| job.summary()))
            .collect()
    }

    /// Get a job by ID: the active record, or the archived one while it is
    /// retained.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let row = self
            .config
            .retry
            .run("get", move || self.find_row(id))
            .await?;

        row.ok_or_else(|| DbError::NotFound(id.to_string()))?
            .into_job()
    }

    async fn find_row(&self, id: JobId) -> Result<Option<JobRow>, DbError> {
        match self.jobs.get(id).await? {
            Some(row) => Ok(Some(row)),
            None => self.history.get(id).await,
        }
    }

    /// Delete an active job regardless of its status.
    pub async fn remove(&self, id: JobId) -> Result<Job, DbError> {
        let row = self
            .config
            .retry
            .run("remove", move || async move {
                let _guard = self.pending_lock.lock().await;
                self.jobs.delete(id).await
            })
            .await?;

        let job = row
            .ok_or_else(|| DbError::NotFound(id.to_string()))?
            .into_job()?;
        tracing::debug!("Job {} removed from '{}'", job.id, job.queue);
        Ok(job)
    }

    /// Remove every queued job from the named queues, or from all queues
    /// when none are named. Returns the sorted names of the queues that
    /// held at least one job.
    pub async fn clear(&self, queues: &[String]) -> Result<Vec<String>, DbError> {
        let filter = queue_filter(queues)?;
        let rows = self
            .config
            .retry
            .run("clear", move || {
                let filter = filter.clone();
                async move {
                    let _guard = self.pending_lock.lock().await;
                    self.jobs.delete_all_queued(filter).await
                }
            })
            .await?;

        let cleared: Vec<String> = rows
            .into_iter()
            .map(|row| row.queue)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !cleared.is_empty() {
            tracing::info!("Cleared queue(s) {}", cleared.join(", "));
            self.broadcast(JobEvent::QueuesCleared {
                queues: cleared.clone(),
                timestamp: Utc::now(),
            });
        }

        Ok(cleared)
    }

    /// Claim the head job of the first non-empty queue, in the given order,
    /// and mark it running for `worker_id`.
    pub async fn claim(
        &self,
        queues: &[String],
        worker_id: &str,
    ) -> Result<Option<Job>, DbError> {
        let job = self
            .config
            .retry
            .run("claim", move || self.claim_once(queues, worker_id))
            .await?;

        if let Some(job) = &job {
            self.broadcast(JobEvent::JobStarted {
                job_id: job.id,
                queue: job.queue.clone(),
                worker_id: worker_id.to_string(),
                timestamp: job.started_at.unwrap_or_else(Utc::now),
            });
        }

        Ok(job)
    }

    async fn claim_once(
        &self,
        queues: &[String],
        worker_id: &str,
    ) -> Result<Option<Job>, DbError> {
        let _guard = self.pending_lock.lock().await;

        for queue in queues {
            // The guarded update only loses to another process; look again.
            for _ in 0..MAX_CLAIM_RACES {
                let Some(head) = self.jobs.head(queue).await? else {
                    break;
                };
                if let Some(row) = self
                    .jobs
                    .mark_running(&head.job_id, worker_id, Utc::now())
                    .await?
                {
                    return row.into_job().map(Some);
                }
            }
        }

        Ok(None)
    }

    /// Cancel a queued job: remove it from its queue and archive it as
    /// cancelled.
    pub async fn cancel(&self, id: JobId) -> Result<Job, DbError> {
        let job = self
            .config
            .retry
            .run("cancel", move || self.cancel_once(id))
            .await?;

        tracing::info!("Cancelled job {}", job.id);
        self.broadcast(JobEvent::JobCancelled {
            job_id: job.id,
            queue: job.queue.clone(),
            timestamp: job.ended_at.unwrap_or_else(Utc::now),
        });

        Ok(job)
    }

    async fn cancel_once(&self, id: JobId) -> Result<Job, DbError> {
        let _guard = self.pending_lock.lock().await;

        let Some(row) = self.jobs.get(id).await? else {
            return match self.history.get(id).await? {
                Some(row) => Err(DbError::NotCancellable {
                    id,
                    status: row.status,
                }),
                None => Err(DbError::NotFound(id.to_string())),
            };
        };
        if !row.status.can_transition_to(JobStatus::Cancelled) {
            return Err(DbError::NotCancellable {
                id,
                status: row.status,
            });
        }

        let mut job = row.into_job()?;
        job.status = JobStatus::Cancelled;
        job.ended_at = Some(Utc::now());
        self.jobs
            .archive(JobRow::from_job(&job), JobStatus::Queued)
            .await?;
        Ok(job)
    }

    /// Record a successful run and archive the job.
    pub async fn finish(&self, job: &Job, result: JobResult) -> Result<Job, DbError> {
        let mut finished = job.clone();
        finished.status = JobStatus::Finished;
        finished.ended_at = Some(Utc::now());
        finished.error = None;
        finished.result = Some(result);

        self.archive(&finished, JobStatus::Running).await?;

        self.broadcast(JobEvent::JobFinished {
            job_id: finished.id,
            queue: finished.queue.clone(),
            duration_ms: finished.duration_ms().unwrap_or(0),
            timestamp: Utc::now(),
        });

        Ok(finished)
    }

    /// Record a failed run and archive the job with its error.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<Job, DbError> {
        let mut failed = job.clone();
        failed.status = JobStatus::Failed;
        failed.ended_at = Some(Utc::now());
        failed.error = Some(error.to_string());

        self.archive(&failed, JobStatus::Running).await?;

        tracing::warn!("Job {} failed: {}", failed.id, error);
        self.broadcast(JobEvent::JobFailed {
            job_id: failed.id,
            queue: failed.queue.clone(),
            error: error.to_string(),
            will_retry: false,
            timestamp: Utc::now(),
        });

        Ok(failed)
    }

    /// Put a failed running job back at the tail of its queue, keeping the
    /// error for inspection.
    pub async fn requeue(&self, job: &Job, error: &str) -> Result<Job, DbError> {
        let id = job.id;
        let row = self
            .config
            .retry
            .run("requeue", move || self.requeue_once(id, error))
            .await?;
        let requeued = row.into_job()?;

        tracing::warn!(
            "Job {} failed on attempt {}, re-queued: {}",
            requeued.id,
            requeued.attempts,
            error
        );
        self.broadcast(JobEvent::JobFailed {
            job_id: requeued.id,
            queue: requeued.queue.clone(),
            error: error.to_string(),
            will_retry: true,
            timestamp: Utc::now(),
        });
        self.broadcast(JobEvent::JobEnqueued {
            job_id: requeued.id,
            queue: requeued.queue.clone(),
            timestamp: Utc::now(),
        });

        Ok(requeued)
    }

    async fn requeue_once(&self, id: JobId, error: &str) -> Result<JobRow, DbError> {
        let _guard = self.pending_lock.lock().await;

        if let Some(row) = self.jobs.requeue(id, error).await? {
            return Ok(row);
        }
        match self.find_row(id).await? {
            Some(row) => Err(DbError::InvalidTransition {
                id,
                from: row.status,
                to: JobStatus::Queued,
            }),
            None => Err(DbError::NotFound(id.to_string())),
        }
    }

    /// Archive `job` with its new terminal status, provided its active
    /// record is still `from`.
    async fn archive(&self, job: &Job, from: JobStatus) -> Result<(), DbError> {
        if !job.status.is_terminal() {
            return Err(DbError::Invalid(format!(
                "cannot archive job {} with status {}",
                job.id, job.status
            )));
        }

        let id = job.id;
        let row = JobRow::from_job(job);
        self.config
            .retry
            .run("archive", move || self.archive_once(id, row.clone(), from))
            .await
    }

    async fn archive_once(&self, id: JobId, row: JobRow, from: JobStatus) -> Result<(), DbError> {
        let _guard = self.pending_lock.lock().await;

        let to = row.status;
        let current = match self.find_row(id).await? {
            Some(current) => current.status,
            None => return Err(DbError::NotFound(id.to_string())),
        };
        if current != from || !current.can_transition_to(to) {
            return Err(DbError::InvalidTransition {
                id,
                from: current,
                to,
            });
        }

        self.jobs.archive(row, from).await
    }

    /// Drop archived jobs older than the configured retention. Returns how
    /// many were dropped.
    pub async fn purge_expired(&self) -> Result<usize, DbError> {
        let Some(ttl) = self.config.result_ttl else {
            return Ok(0);
        };
        let Some(cutoff) = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return Ok(0);
        };

        let purged = self
            .config
            .retry
            .run("purge", move || self.history.purge_before(cutoff))
            .await?;
        if purged > 0 {
            tracing::info!("Purged {} expired job(s)", purged);
        }
        Ok(purged)
    }

    /// Number of queued jobs per queue, sorted by queue name.
    pub async fn queue_counts(&self) -> Result<BTreeMap<String, u64>, DbError> {
        self.config
            .retry
            .run("queue_counts", move || self.queues.queued_counts())
            .await
    }

    /// Names of the queues currently holding queued jobs.
    pub async fn queue_names(&self) -> Result<Vec<String>, DbError> {
        Ok(self.queue_counts().await?.into_keys().collect())
    }
}

fn queue_filter(queues: &[String]) -> Result<Option<Vec<String>>, DbError> {
    let queues = normalize_queue_names(queues).map_err(|e| DbError::Invalid(e.to_string()))?;
    Ok((!queues.is_empty()).then_some(queues))
}
