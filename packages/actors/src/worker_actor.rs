//! Worker actor: claims jobs from the store and runs them one at a time.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use jobs_core::{Job, JobError, JobEvent, JobResult};
use jobs_db::{DbError, QueueStore};
use ractor::{Actor, ActorProcessingErr, ActorRef};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::encoder::{DecodedJob, JobEncoder};
use crate::messages::WorkerMessage;
use crate::worker::{WorkSummary, WorkerConfig, WorkerPhase, WorkerStatus};

/// Worker actor arguments.
pub struct WorkerArgs {
    pub worker_id: String,
    pub queues: Vec<String>,
    pub burst: bool,
    pub store: Arc<QueueStore>,
    pub encoder: JobEncoder,
    pub config: WorkerConfig,
    pub report: oneshot::Sender<Result<WorkSummary, JobError>>,
}

/// State for the worker actor.
pub struct WorkerActorState {
    worker_id: String,
    queues: Vec<String>,
    burst: bool,
    store: Arc<QueueStore>,
    encoder: JobEncoder,
    config: WorkerConfig,
    phase: WorkerPhase,
    summary: WorkSummary,
    /// Consecutive claims that failed on the store.
    store_failures: u32,
    stopping: bool,
    error: Option<JobError>,
    report: Option<oneshot::Sender<Result<WorkSummary, JobError>>>,
    poll_timer: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl WorkerActorState {
    fn status(&self) -> WorkerStatus {
        WorkerStatus {
            worker_id: self.worker_id.clone(),
            phase: self.phase,
            summary: self.summary,
        }
    }

    fn stop(&mut self, myself: &ActorRef<WorkerMessage>) {
        self.phase = WorkerPhase::Stopped;
        myself.stop(None);
    }

    fn schedule_poll(&mut self, myself: &ActorRef<WorkerMessage>, delay: Duration) {
        if let Some(timer) = self.poll_timer.take() {
            timer.abort();
        }
        let myself = myself.clone();
        self.poll_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = myself.send_message(WorkerMessage::Poll);
        }));
    }
}

/// Worker actor that executes jobs.
pub struct WorkerActor;

impl Actor for WorkerActor {
    type Msg = WorkerMessage;
    type State = WorkerActorState;
    type Arguments = WorkerArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!("Starting worker: {}", args.worker_id);

        // Subscribe before the first claim so no enqueue is missed.
        let listener = (!args.burst).then(|| {
            spawn_listener(myself.clone(), args.store.subscribe(), args.queues.clone())
        });

        Ok(WorkerActorState {
            worker_id: args.worker_id,
            queues: args.queues,
            burst: args.burst,
            store: args.store,
            encoder: args.encoder,
            config: args.config,
            phase: WorkerPhase::Idle,
            summary: WorkSummary::default(),
            store_failures: 0,
            stopping: false,
            error: None,
            report: Some(args.report),
            poll_timer: None,
            listener,
        })
    }

    async fn post_start(
        &self,
        myself: ActorRef<Self::Msg>,
        _state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        myself.send_message(WorkerMessage::Poll)?;
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            WorkerMessage::Poll | WorkerMessage::Wake => {
                if state.phase == WorkerPhase::Idle && !state.stopping {
                    poll(&myself, state).await;
                }
            }

            WorkerMessage::JobDone { job, outcome } => {
                if let Err(e) = record_outcome(state, &job, outcome).await {
                    record_failed(state, &job, e);
                }
                state.phase = WorkerPhase::Idle;
                if state.stopping {
                    state.stop(&myself);
                } else {
                    myself.send_message(WorkerMessage::Poll)?;
                }
            }

            WorkerMessage::GetStatus { reply } => {
                let _ = reply.send(state.status());
            }

            WorkerMessage::Shutdown => {
                tracing::info!("Shutting down worker: {}", state.worker_id);
                state.stopping = true;
                if state.phase != WorkerPhase::Running {
                    state.stop(&myself);
                }
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for task in [state.poll_timer.take(), state.listener.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }

        let summary = state.summary;
        tracing::info!(
            "Worker {} stopped: {} processed, {} finished, {} failed",
            state.worker_id,
            summary.processed,
            summary.finished,
            summary.failed
        );

        let outcome = match state.error.take() {
            Some(e) => Err(e),
            None => Ok(summary),
        };
        if let Some(report) = state.report.take() {
            let _ = report.send(outcome);
        }
        Ok(())
    }
}

/// Forward enqueue events for the worker's queues as wake-ups.
fn spawn_listener(
    myself: ActorRef<WorkerMessage>,
    mut events: tokio::sync::broadcast::Receiver<JobEvent>,
    queues: Vec<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let wake = match events.recv().await {
                Ok(JobEvent::JobEnqueued { queue, .. }) => queues.contains(&queue),
                Ok(_) => false,
                // Missed events may include enqueues.
                Err(RecvError::Lagged(_)) => true,
                Err(RecvError::Closed) => break,
            };
            if wake && myself.send_message(WorkerMessage::Wake).is_err() {
                break;
            }
        }
    })
}

async fn poll(myself: &ActorRef<WorkerMessage>, state: &mut WorkerActorState) {
    if let Some(timer) = state.poll_timer.take() {
        timer.abort();
    }

    state.phase = WorkerPhase::Claiming;
    match state.store.claim(&state.queues, &state.worker_id).await {
        Ok(Some(job)) => {
            state.store_failures = 0;
            start_job(myself, state, job).await;
        }
        Ok(None) => {
            state.store_failures = 0;
            state.phase = WorkerPhase::Idle;
            if state.burst {
                tracing::info!("Worker {}: queues are empty, stopping", state.worker_id);
                state.stop(myself);
            } else {
                let interval = state.config.poll_interval;
                state.schedule_poll(myself, interval);
            }
        }
        Err(e) => claim_failed(myself, state, e),
    }
}

fn claim_failed(myself: &ActorRef<WorkerMessage>, state: &mut WorkerActorState, error: DbError) {
    state.phase = WorkerPhase::Idle;

    if !error.is_transient() {
        tracing::warn!("Worker {} cannot claim jobs: {}", state.worker_id, error);
        state.error = Some(error.into());
        state.stop(myself);
        return;
    }

    state.store_failures += 1;
    if state.store_failures >= state.config.max_store_failures {
        tracing::warn!(
            "Worker {} giving up after {} failed claims: {}",
            state.worker_id,
            state.store_failures,
            error
        );
        state.error = Some(error.into());
        state.stop(myself);
        return;
    }

    let delay = state.config.store_backoff.delay_for(state.store_failures);
    tracing::warn!(
        "Worker {} could not claim a job ({}), retrying in {:?}",
        state.worker_id,
        error,
        delay
    );
    state.schedule_poll(myself, delay);
}

async fn start_job(myself: &ActorRef<WorkerMessage>, state: &mut WorkerActorState, job: Job) {
    tracing::info!(
        "Worker {} started job {} from queue '{}'",
        state.worker_id,
        job.id,
        job.queue
    );
    state.summary.processed += 1;

    let decoded = match state.encoder.decode(&job) {
        Ok(decoded) => decoded,
        Err(e) => {
            // Retrying cannot fix a payload this process cannot decode.
            if let Err(store_err) = fail_job(state, &job, &e.to_string()).await {
                record_failed(state, &job, store_err);
            }
            state.phase = WorkerPhase::Idle;
            if state.stopping {
                state.stop(myself);
            } else {
                let _ = myself.send_message(WorkerMessage::Poll);
            }
            return;
        }
    };

    state.phase = WorkerPhase::Running;
    let timeout = state.config.job_timeout;
    let myself = myself.clone();
    tokio::spawn(async move {
        let outcome = execute(decoded, timeout).await;
        let _ = myself.send_message(WorkerMessage::JobDone {
            job: Box::new(job),
            outcome,
        });
    });
}

/// Run a decoded job in its own task so that a panic fails only the job.
async fn execute(decoded: DecodedJob, timeout: Option<Duration>) -> Result<JobResult, String> {
    let mut handle = tokio::spawn(decoded.call());

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                return Err(format!("Job timed out after {:?}", limit));
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(outcome) => outcome,
        Err(e) if e.is_panic() => Err(format!("Job panicked: {}", panic_message(e.into_panic()))),
        Err(e) => Err(e.to_string()),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn record_outcome(
    state: &mut WorkerActorState,
    job: &Job,
    outcome: Result<JobResult, String>,
) -> Result<(), DbError> {
    match outcome {
        Ok(result) => match state.store.finish(job, result).await {
            Ok(_) => {
                state.summary.finished += 1;
                tracing::info!("Worker {} finished job {}", state.worker_id, job.id);
                Ok(())
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                tracing::warn!("Could not record job {} as finished: {}", job.id, e);
                fail_job(state, job, &format!("Could not record result: {}", e)).await
            }
        },
        Err(error) if job.attempts <= state.config.max_retries => {
            match state.store.requeue(job, &error).await {
                Ok(_) => Ok(()),
                Err(e) => {
                    tracing::warn!("Could not re-queue job {}: {}", job.id, e);
                    fail_job(state, job, &error).await
                }
            }
        }
        Err(error) => fail_job(state, job, &error).await,
    }
}

async fn fail_job(state: &mut WorkerActorState, job: &Job, error: &str) -> Result<(), DbError> {
    state.store.fail(job, error).await?;
    state.summary.failed += 1;
    Ok(())
}

/// The store refused the outcome of a job. An unreachable store stops the
/// worker; a job that is gone or already ended is skipped.
fn record_failed(state: &mut WorkerActorState, job: &Job, error: DbError) {
    if error.is_transient() {
        tracing::warn!(
            "Worker {} cannot record job {}, stopping: {}",
            state.worker_id,
            job.id,
            error
        );
        state.error = Some(error.into());
        state.stopping = true;
    } else {
        tracing::warn!("Could not record outcome of job {}: {}", job.id, error);
    }
}
