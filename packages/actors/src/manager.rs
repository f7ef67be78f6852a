//! Queue manager: the typed operations offered on the job queue.

use std::future::Future;
use std::sync::Arc;

use jobs_core::{
    Job, JobError, JobEvent, JobId, JobSummary, Payload, normalize_queue_names,
    queues_or_default, validate_queue_name,
};
use jobs_db::{DbConfig, QueueStore, StoreConfig};
use tokio::sync::broadcast;

use crate::callable::{CallableRegistry, TEST_JOB};
use crate::encoder::JobEncoder;
use crate::worker::{Worker, WorkerConfig};

/// Title and argument of the jobs added by [`JobActions::enqueue_test_job`].
pub const TEST_JOB_TITLE: &str = "A test job";

/// Operations on the job queue, one method per action.
pub trait JobActions {
    /// Summaries of queued jobs on the named queues, or on every queue when
    /// none are named. Ordered by queue name, then by arrival.
    fn list_jobs(
        &self,
        queue_names: &[String],
    ) -> impl Future<Output = Result<Vec<JobSummary>, JobError>> + Send;

    /// Full record of a job.
    fn show_job(&self, id: &str) -> impl Future<Output = Result<Job, JobError>> + Send;

    /// Cancel a queued job.
    fn cancel_job(&self, id: &str) -> impl Future<Output = Result<Job, JobError>> + Send;

    /// Remove every queued job from the named queues, or from all queues.
    /// Returns the sorted names of the queues that held jobs.
    fn clear_queues(
        &self,
        queue_names: &[String],
    ) -> impl Future<Output = Result<Vec<String>, JobError>> + Send;

    /// Add one no-op job to each named queue, or to the default queue.
    fn enqueue_test_job(
        &self,
        queue_names: &[String],
    ) -> impl Future<Output = Result<Vec<(String, JobId)>, JobError>> + Send;
}

/// Producer and management façade over a [`QueueStore`].
#[derive(Clone)]
pub struct QueueManager {
    store: Arc<QueueStore>,
    registry: Arc<CallableRegistry>,
    encoder: JobEncoder,
}

impl QueueManager {
    pub fn new(store: Arc<QueueStore>, registry: Arc<CallableRegistry>) -> Self {
        Self {
            encoder: JobEncoder::new(registry.clone()),
            store,
            registry,
        }
    }

    /// Connect to the database and build a manager on a new store.
    pub async fn open(
        db_config: &DbConfig,
        store_config: StoreConfig,
        registry: CallableRegistry,
    ) -> Result<Self, JobError> {
        let store = QueueStore::open(db_config, store_config).await?;
        Ok(Self::new(Arc::new(store), Arc::new(registry)))
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CallableRegistry> {
        &self.registry
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.store.subscribe()
    }

    /// Encode `payload` and append a new job to the tail of `queue`.
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: Payload,
        title: Option<String>,
    ) -> Result<Job, JobError> {
        validate_queue_name(queue)?;
        let encoded = self.encoder.encode(&payload)?;
        let job = Job::new(queue, encoded).with_optional_title(title);

        self.store.enqueue(job.clone()).await?;
        tracing::debug!("Enqueued job {} calling '{}'", job.id, payload.callable);
        Ok(job)
    }

    /// Build a worker sharing this manager's store and callables.
    pub fn worker(&self, config: WorkerConfig) -> Worker {
        Worker::new(self.store.clone(), self.registry.clone(), config)
    }
}

impl JobActions for QueueManager {
    async fn list_jobs(&self, queue_names: &[String]) -> Result<Vec<JobSummary>, JobError> {
        let queues = normalize_queue_names(queue_names)?;
        Ok(self.store.list(&queues).await?)
    }

    async fn show_job(&self, id: &str) -> Result<Job, JobError> {
        let id = parse_id(id)?;
        Ok(self.store.get(id).await?)
    }

    async fn cancel_job(&self, id: &str) -> Result<Job, JobError> {
        let id = parse_id(id)?;
        Ok(self.store.cancel(id).await?)
    }

    async fn clear_queues(&self, queue_names: &[String]) -> Result<Vec<String>, JobError> {
        let queues = normalize_queue_names(queue_names)?;
        Ok(self.store.clear(&queues).await?)
    }

    async fn enqueue_test_job(
        &self,
        queue_names: &[String],
    ) -> Result<Vec<(String, JobId)>, JobError> {
        let queues = queues_or_default(queue_names)?;
        let mut added = Vec::with_capacity(queues.len());

        for queue in queues {
            let payload = Payload::new(TEST_JOB).arg(TEST_JOB_TITLE)?;
            let job = self
                .enqueue(&queue, payload, Some(TEST_JOB_TITLE.to_string()))
                .await?;
            tracing::info!("Added test job {} to queue \"{}\"", job.id, queue);
            added.push((queue, job.id));
        }

        Ok(added)
    }
}

/// Ids that do not parse cannot name a job.
fn parse_id(id: &str) -> Result<JobId, JobError> {
    JobId::parse(id.trim()).map_err(|_| JobError::NotFound(id.to_string()))
}
