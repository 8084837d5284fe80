//! Job worker and runner for processing background jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, Notify, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use interlinear_core::{defaults, Job, JobNotifier, JobType, NoOpNotifier, Result};

use crate::handler::{JobContext, JobHandler, JobResult};
use crate::heartbeat::{HeartbeatRegistry, MIN_HEARTBEAT_INTERVAL};
use crate::queue::JobQueue;
use crate::DEFAULT_POLL_INTERVAL_MS;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrent jobs.
    pub max_concurrent_jobs: usize,
    /// Whether to enable job processing.
    pub enabled: bool,
    /// Heartbeat refresh interval for running jobs.
    pub heartbeat_interval: Duration,
    /// Bounded wait for in-flight jobs on shutdown.
    pub shutdown_timeout: Duration,
    /// Interval between expired-job cleanup passes.
    pub cleanup_interval: Duration,
    /// Whole-job execution timeout.
    pub job_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_concurrent_jobs: defaults::JOB_MAX_CONCURRENT,
            enabled: true,
            heartbeat_interval: Duration::from_secs(defaults::JOB_HEARTBEAT_INTERVAL_SECS),
            shutdown_timeout: Duration::from_secs(defaults::JOB_SHUTDOWN_TIMEOUT_SECS),
            cleanup_interval: Duration::from_secs(defaults::JOB_CLEANUP_INTERVAL_SECS),
            job_timeout: Duration::from_secs(defaults::JOB_TIMEOUT_SECS),
        }
    }
}

fn env_secs(name: &str, default: u64) -> Duration {
    let secs = std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default);
    Duration::from_secs(secs)
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `JOB_MAX_CONCURRENT` | `4` | Max concurrent jobs |
    /// | `JOB_POLL_INTERVAL_MS` | `1000` | Polling interval |
    /// | `JOB_HEARTBEAT_INTERVAL_SECS` | `30` | Heartbeat refresh for running jobs |
    /// | `JOB_SHUTDOWN_TIMEOUT_SECS` | `30` | Wait for in-flight jobs on shutdown |
    /// | `JOB_CLEANUP_INTERVAL_SECS` | `3600` | Expired-job cleanup interval |
    /// | `JOB_TIMEOUT_SECS` | `3600` | Whole-job execution timeout |
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOB_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent_jobs = std::env::var("JOB_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("JOB_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent_jobs,
            enabled,
            heartbeat_interval: env_secs(
                "JOB_HEARTBEAT_INTERVAL_SECS",
                defaults::JOB_HEARTBEAT_INTERVAL_SECS,
            )
            .max(Duration::from_secs(1)),
            shutdown_timeout: env_secs(
                "JOB_SHUTDOWN_TIMEOUT_SECS",
                defaults::JOB_SHUTDOWN_TIMEOUT_SECS,
            ),
            cleanup_interval: env_secs(
                "JOB_CLEANUP_INTERVAL_SECS",
                defaults::JOB_CLEANUP_INTERVAL_SECS,
            ),
            job_timeout: env_secs("JOB_TIMEOUT_SECS", defaults::JOB_TIMEOUT_SECS),
        }
    }

    /// Create a new config with custom poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent jobs.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max.max(1);
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Intervals below [`MIN_HEARTBEAT_INTERVAL`] are raised to it.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(MIN_HEARTBEAT_INTERVAL);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Worker started.
    WorkerStarted,
    /// Orphaned jobs were reset to pending at startup.
    JobsRecovered { count: usize },
    /// A job was started.
    JobStarted { job_id: Uuid, job_type: JobType },
    /// Job progress was updated.
    JobProgress {
        job_id: Uuid,
        progress: i32,
        total_items: i32,
    },
    /// A job completed successfully.
    JobCompleted { job_id: Uuid, job_type: JobType },
    /// A job failed and was rescheduled.
    JobRetryScheduled {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// A job failed for good.
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// Expired terminal jobs were deleted.
    ExpiredJobsCleaned { count: u64 },
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signal the worker to shut down and wait for the loop to exit.
    ///
    /// In-flight jobs get the configured shutdown timeout to finish; anything
    /// still running after that is aborted and later reclaimed through its
    /// stale heartbeat.
    pub async fn shutdown(self) -> Result<()> {
        // The loop may already have exited (disabled worker).
        let _ = self.shutdown_tx.send(()).await;
        self.task.await.map_err(|e| {
            interlinear_core::Error::Internal(format!("worker task failed: {e}"))
        })
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Job worker that processes jobs from the queue.
pub struct JobWorker {
    queue: JobQueue,
    config: WorkerConfig,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    notifier: Arc<dyn JobNotifier>,
    heartbeats: HeartbeatRegistry,
    wake: Option<Arc<Notify>>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(queue: JobQueue, config: WorkerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(defaults::EVENT_BUS_CAPACITY);
        let heartbeats =
            HeartbeatRegistry::new(queue.repository().clone(), config.heartbeat_interval);
        Self {
            queue,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
            notifier: Arc::new(NoOpNotifier),
            heartbeats,
            wake: None,
        }
    }

    /// Register a handler for a job type.
    pub async fn register_handler<H: JobHandler + 'static>(&self, handler: H) {
        let job_type = handler.job_type();
        let mut handlers = self.handlers.write().await;
        handlers.insert(job_type, Arc::new(handler));
        debug!(?job_type, "Registered job handler");
    }

    /// Heartbeat tickers of this worker's running jobs.
    pub fn heartbeats(&self) -> &HeartbeatRegistry {
        &self.heartbeats
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let task = tokio::spawn(async move {
            self.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
            task,
        }
    }

    /// Run the worker loop.
    ///
    /// Recovers orphaned jobs once, then claims new jobs only while fewer
    /// than `max_concurrent_jobs` are in flight. Wakes on the poll tick, on a
    /// finished job, or on a new-job notification.
    #[instrument(skip(self, shutdown_rx), fields(subsystem = "jobs", component = "worker"))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Job worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent_jobs,
            "Job worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        match self.queue.recover_stuck_jobs().await {
            Ok(ids) => {
                let _ = self
                    .event_tx
                    .send(WorkerEvent::JobsRecovered { count: ids.len() });
            }
            Err(e) => error!(error = %e, "Failed to recover stuck jobs"),
        }

        let mut poll = tokio::time::interval(Duration::from_millis(
            self.config.poll_interval_ms.max(1),
        ));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick fires immediately and runs the startup cleanup.
        let mut cleanup =
            tokio::time::interval(self.config.cleanup_interval.max(Duration::from_secs(1)));
        cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let max_concurrent = self.config.max_concurrent_jobs.max(1);
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            while let Some(result) = tasks.try_join_next() {
                log_join(result);
            }

            while tasks.len() < max_concurrent {
                match self.claim_job().await {
                    Some(job) => {
                        let worker = self.clone_refs();
                        tasks.spawn(async move {
                            worker.execute_job(job).await;
                        });
                    }
                    None => break,
                }
            }

            let wake = self.wake.clone();
            let in_flight = tasks.len();
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(in_flight, "Job worker received shutdown signal");
                    break;
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => log_join(result),
                _ = poll.tick() => {}
                _ = async move {
                    match wake {
                        Some(notify) => notify.notified().await,
                        None => std::future::pending().await,
                    }
                } => {
                    debug!("Woken by job notification");
                }
                _ = cleanup.tick() => self.cleanup_expired().await,
            }
        }

        self.drain(tasks).await;
        self.heartbeats.stop_all();

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Job worker stopped");
    }

    /// Wait for in-flight jobs up to the shutdown timeout, then abort the rest.
    async fn drain(&self, mut tasks: JoinSet<()>) {
        if tasks.is_empty() {
            return;
        }
        let waited = tokio::time::timeout(self.config.shutdown_timeout, async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown timeout reached, aborting in-flight jobs"
            );
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }
    }

    async fn cleanup_expired(&self) {
        match self.queue.cleanup_expired_jobs().await {
            Ok(count) => {
                if count > 0 {
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::ExpiredJobsCleaned { count });
                }
            }
            Err(e) => warn!(error = %e, "Expired job cleanup failed"),
        }
    }

    /// Claim the next available job without processing it.
    async fn claim_job(&self) -> Option<Job> {
        let job_types: Vec<JobType> = {
            let handlers = self.handlers.read().await;
            handlers.keys().copied().collect()
        };
        if job_types.is_empty() {
            return None;
        }

        match self.queue.next_pending_job(&job_types).await {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Failed to claim job");
                None
            }
        }
    }

    /// Clone references needed for spawned job tasks.
    fn clone_refs(&self) -> JobWorkerRef {
        JobWorkerRef {
            queue: self.queue.clone(),
            handlers: self.handlers.clone(),
            event_tx: self.event_tx.clone(),
            notifier: self.notifier.clone(),
            heartbeats: self.heartbeats.clone(),
            job_timeout: self.config.job_timeout,
        }
    }
}

fn log_join(result: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if !e.is_cancelled() {
            error!(error = ?e, "Job task panicked");
        }
    }
}

/// Lightweight reference bundle for executing a single job in a spawned task.
struct JobWorkerRef {
    queue: JobQueue,
    handlers: Arc<RwLock<HashMap<JobType, Arc<dyn JobHandler>>>>,
    event_tx: broadcast::Sender<WorkerEvent>,
    notifier: Arc<dyn JobNotifier>,
    heartbeats: HeartbeatRegistry,
    job_timeout: Duration,
}

impl JobWorkerRef {
    /// Execute a single claimed job.
    #[instrument(
        skip(self, job),
        fields(subsystem = "jobs", component = "worker", job_id = %job.id, job_type = %job.job_type)
    )]
    async fn execute_job(self, job: Job) {
        let start = Instant::now();
        let job_id = job.id;
        let job_type = job.job_type;

        info!("Processing job");
        let _ = self
            .event_tx
            .send(WorkerEvent::JobStarted { job_id, job_type });

        // Stopped on every exit path when the guard drops.
        let _heartbeat = self.heartbeats.start(job_id);

        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&job_type).cloned()
        };

        let result = match handler {
            Some(handler) => {
                let event_tx = self.event_tx.clone();
                let ctx = JobContext::new(job).with_progress_callback(move |progress, total_items| {
                    let _ = event_tx.send(WorkerEvent::JobProgress {
                        job_id,
                        progress,
                        total_items,
                    });
                });

                match tokio::time::timeout(self.job_timeout, handler.execute(ctx)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            timeout_secs = self.job_timeout.as_secs(),
                            "Job exceeded execution timeout"
                        );
                        JobResult::Retry(format!(
                            "job exceeded timeout of {}s",
                            self.job_timeout.as_secs()
                        ))
                    }
                }
            }
            None => {
                warn!("No handler registered for job type");
                JobResult::Failed(format!("no handler for job type: {job_type}"))
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        match result {
            JobResult::Success(result_ref) => match self.queue.complete_job(job_id, result_ref).await {
                Ok(job) => {
                    info!(duration_ms, "Job completed successfully");
                    let _ = self
                        .event_tx
                        .send(WorkerEvent::JobCompleted { job_id, job_type });
                    self.notify(&job, true).await;
                }
                Err(e) => error!(error = %e, "Failed to mark job as completed"),
            },
            JobResult::Failed(error) => match self.queue.fail_job(job_id, &error).await {
                Ok(job) => {
                    warn!(%error, duration_ms, "Job failed permanently");
                    let _ = self.event_tx.send(WorkerEvent::JobFailed {
                        job_id,
                        job_type,
                        error,
                    });
                    self.notify(&job, false).await;
                }
                Err(e) => error!(error = %e, "Failed to mark job as failed"),
            },
            JobResult::Retry(error) => match self.queue.mark_for_retry(job_id, &error).await {
                Ok(true) => {
                    warn!(%error, duration_ms, "Job failed, retry scheduled");
                    let _ = self.event_tx.send(WorkerEvent::JobRetryScheduled {
                        job_id,
                        job_type,
                        error,
                    });
                }
                Ok(false) => {
                    warn!(%error, duration_ms, "Job failed, retries exhausted");
                    match self.queue.repository().get(job_id).await {
                        Ok(Some(job)) => {
                            let _ = self.event_tx.send(WorkerEvent::JobFailed {
                                job_id,
                                job_type,
                                error: job.error_message.clone().unwrap_or(error),
                            });
                            self.notify(&job, false).await;
                        }
                        Ok(None) => warn!("Failed job disappeared before notification"),
                        Err(e) => error!(error = %e, "Failed to load failed job"),
                    }
                }
                Err(e) => error!(error = %e, "Failed to schedule job retry"),
            },
        }
    }

    /// Best-effort notification; failures are logged only.
    async fn notify(&self, job: &Job, completed: bool) {
        if job.notify_target.is_none() {
            return;
        }
        let sent = if completed {
            self.notifier.on_job_completed(job).await
        } else {
            self.notifier.on_job_failed(job).await
        };
        match sent {
            Ok(()) => {
                if let Err(e) = self.queue.repository().mark_notified(job.id).await {
                    warn!(error = %e, "Failed to record notification");
                }
            }
            Err(e) => warn!(error = %e, "Job notification failed"),
        }
    }
}

/// Builder for creating a job worker with handlers.
pub struct WorkerBuilder {
    queue: JobQueue,
    config: WorkerConfig,
    handlers: Vec<Box<dyn JobHandler>>,
    notifier: Option<Arc<dyn JobNotifier>>,
    wake: Option<Arc<Notify>>,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(queue: JobQueue) -> Self {
        Self {
            queue,
            config: WorkerConfig::default(),
            handlers: Vec::new(),
            notifier: None,
            wake: None,
        }
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    /// Add a handler.
    pub fn with_handler<H: JobHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Box::new(handler));
        self
    }

    /// Set the completion/failure notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn JobNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Wake the loop early when this is notified (e.g. on job insert).
    pub fn with_wake(mut self, wake: Arc<Notify>) -> Self {
        self.wake = Some(wake);
        self
    }

    /// Build and return the worker.
    pub async fn build(self) -> JobWorker {
        let mut worker = JobWorker::new(self.queue, self.config);
        if let Some(notifier) = self.notifier {
            worker.notifier = notifier;
        }
        worker.wake = self.wake;

        {
            let mut handlers = worker.handlers.write().await;
            for handler in self.handlers {
                handlers.insert(handler.job_type(), Arc::from(handler));
            }
        }

        worker
    }
}
