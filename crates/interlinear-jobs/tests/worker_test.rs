//! Worker loop behavior: claiming, result routing, notification, heartbeats
//! and shutdown, over the in-memory job store.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Notify};
use uuid::Uuid;

use helpers::{MemoryJobs, RecordingNotifier};
use interlinear_core::{
    AuditParams, JobParams, JobStatus, JobType, TranslationParams,
};
use interlinear_jobs::{
    CreateJob, HeartbeatRegistry, JobContext, JobHandler, JobQueue, JobResult, NoOpHandler,
    QueueConfig, WorkerBuilder, WorkerConfig, WorkerEvent, MIN_HEARTBEAT_INTERVAL,
};

const WAIT: Duration = Duration::from_secs(5);

/// Handler that sleeps, tracks concurrency, and returns a fixed result.
#[derive(Clone)]
struct Scripted {
    result: JobResult,
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(result: JobResult) -> Self {
        Self {
            result,
            delay: Duration::ZERO,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl JobHandler for Scripted {
    fn job_type(&self) -> JobType {
        JobType::Translation
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.result.clone()
    }
}

fn fast() -> WorkerConfig {
    WorkerConfig::default().with_poll_interval(10)
}

async fn submit(queue: &JobQueue) -> Uuid {
    submit_with(queue, |r| r).await
}

async fn submit_with(queue: &JobQueue, f: impl FnOnce(CreateJob) -> CreateJob) -> Uuid {
    let request = CreateJob::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        JobParams::Translation(TranslationParams::new("ar", "en")),
    );
    queue.create_job(f(request)).await.unwrap().id
}

/// Receive events until one matches, failing after [`WAIT`].
async fn wait_for(
    events: &mut broadcast::Receiver<WorkerEvent>,
    mut matches: impl FnMut(&WorkerEvent) -> bool,
) -> WorkerEvent {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream closed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for worker event")
}

/// Poll a condition until it holds, failing after [`WAIT`].
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_worker_lifecycle_events() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit(&queue).await;

    let worker = WorkerBuilder::new(queue)
        .with_config(fast())
        .with_handler(NoOpHandler::new(JobType::Translation))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    assert!(matches!(
        wait_for(&mut events, |_| true).await,
        WorkerEvent::WorkerStarted
    ));
    assert!(matches!(
        wait_for(&mut events, |_| true).await,
        WorkerEvent::JobsRecovered { count: 0 }
    ));
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await,
        WorkerEvent::JobStarted { job_id: id, job_type: JobType::Translation } if id == job_id
    ));
    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, WorkerEvent::JobProgress { .. })).await,
        WorkerEvent::JobProgress { progress: 0, total_items: 1, .. }
    ));
    wait_for(&mut events, |e| {
        matches!(e, WorkerEvent::JobCompleted { job_id: id, .. } if *id == job_id)
    })
    .await;

    let stored = jobs.snapshot(job_id);
    assert_eq!(stored.status, JobStatus::Completed);
    assert!(stored.completed_at.is_some());
    assert!(stored.heartbeat_at.is_none());

    handle.shutdown().await.unwrap();
    wait_for(&mut events, |e| matches!(e, WorkerEvent::WorkerStopped)).await;
}

#[tokio::test]
async fn test_disabled_worker_claims_nothing() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit(&queue).await;

    let worker = WorkerBuilder::new(queue)
        .with_config(fast().with_enabled(false))
        .with_handler(NoOpHandler::new(JobType::Translation))
        .build()
        .await;
    let handle = worker.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown().await.unwrap();

    assert_eq!(jobs.snapshot(job_id).status, JobStatus::Pending);
}

#[tokio::test]
async fn test_jobs_without_handler_stay_pending() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let audit = queue
        .create_job(CreateJob::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            JobParams::TranslationAudit(AuditParams::default()),
        ))
        .await
        .unwrap();
    let translation = submit(&queue).await;

    let worker = WorkerBuilder::new(queue)
        .with_config(fast())
        .with_handler(NoOpHandler::new(JobType::Translation))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    wait_for(&mut events, |e| {
        matches!(e, WorkerEvent::JobCompleted { job_id, .. } if *job_id == translation)
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown().await.unwrap();

    assert_eq!(jobs.snapshot(audit.id).status, JobStatus::Pending);
}

#[tokio::test]
async fn test_startup_recovers_orphaned_jobs() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit(&queue).await;
    queue.next_pending_job(&[]).await.unwrap().unwrap();
    jobs.edit(job_id, |j| {
        j.heartbeat_at = Some(Utc::now() - chrono::Duration::minutes(30));
        j.last_checkpoint = Some(12);
    });

    let worker = WorkerBuilder::new(queue)
        .with_config(fast())
        .with_handler(NoOpHandler::new(JobType::Translation))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, WorkerEvent::JobsRecovered { .. })).await,
        WorkerEvent::JobsRecovered { count: 1 }
    ));
    wait_for(&mut events, |e| {
        matches!(e, WorkerEvent::JobCompleted { job_id: id, .. } if *id == job_id)
    })
    .await;
    handle.shutdown().await.unwrap();

    assert_eq!(jobs.snapshot(job_id).status, JobStatus::Completed);
}

#[tokio::test]
async fn test_startup_cleanup_deletes_expired_jobs() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let expired = submit(&queue).await;
    jobs.edit(expired, |j| {
        j.status = JobStatus::Completed;
        j.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
    });

    let worker = WorkerBuilder::new(queue.clone())
        .with_config(fast())
        .with_handler(NoOpHandler::new(JobType::Translation))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    assert!(matches!(
        wait_for(&mut events, |e| matches!(e, WorkerEvent::ExpiredJobsCleaned { .. })).await,
        WorkerEvent::ExpiredJobsCleaned { count: 1 }
    ));
    handle.shutdown().await.unwrap();

    assert_eq!(queue.stats().await.unwrap().total, 0);
}

#[tokio::test]
async fn test_wake_signal_picks_up_new_jobs() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let wake = Arc::new(Notify::new());

    let worker = WorkerBuilder::new(queue.clone())
        .with_config(fast().with_poll_interval(60_000))
        .with_wake(wake.clone())
        .with_handler(NoOpHandler::new(JobType::Translation))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();
    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobsRecovered { .. })).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let job_id = submit(&queue).await;
    wake.notify_one();

    wait_for(&mut events, |e| {
        matches!(e, WorkerEvent::JobCompleted { job_id: id, .. } if *id == job_id)
    })
    .await;
    handle.shutdown().await.unwrap();
}

// ============================================================================
// RESULT ROUTING
// ============================================================================

#[tokio::test]
async fn test_completion_notifies_and_records_delivery() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let notified = submit_with(&queue, |r| r.with_notify_target("hook://done")).await;
    let silent = submit(&queue).await;
    let notifier = RecordingNotifier::new();

    let worker = WorkerBuilder::new(queue)
        .with_config(fast())
        .with_notifier(notifier.clone())
        .with_handler(Scripted::new(JobResult::Success(Some("{\"ok\":true}".into()))))
        .build()
        .await;
    let handle = worker.start();

    eventually(|| jobs.snapshot(notified).notified_at.is_some()).await;
    eventually(|| jobs.snapshot(silent).status == JobStatus::Completed).await;
    handle.shutdown().await.unwrap();

    let stored = jobs.snapshot(notified);
    assert_eq!(stored.result_ref.as_deref(), Some("{\"ok\":true}"));
    assert_eq!(*notifier.completed.lock().unwrap(), vec![notified]);
    assert!(notifier.failed.lock().unwrap().is_empty());
    assert!(jobs.snapshot(silent).notified_at.is_none());
}

#[tokio::test]
async fn test_failed_result_fails_without_retry() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit_with(&queue, |r| r.with_notify_target("hook://failed")).await;
    let notifier = RecordingNotifier::new();

    let worker = WorkerBuilder::new(queue)
        .with_config(fast())
        .with_notifier(notifier.clone())
        .with_handler(Scripted::new(JobResult::Failed("document is gone".into())))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;
    assert!(matches!(
        event,
        WorkerEvent::JobFailed { job_id: id, error, .. } if id == job_id && error == "document is gone"
    ));
    eventually(|| jobs.snapshot(job_id).notified_at.is_some()).await;
    handle.shutdown().await.unwrap();

    let stored = jobs.snapshot(job_id);
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retry_count, 0);
    assert_eq!(*notifier.failed.lock().unwrap(), vec![job_id]);
}

#[tokio::test]
async fn test_retry_result_reschedules_job() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit_with(&queue, |r| r.with_notify_target("hook://x")).await;
    let notifier = RecordingNotifier::new();

    let worker = WorkerBuilder::new(queue)
        .with_config(fast())
        .with_notifier(notifier.clone())
        .with_handler(Scripted::new(JobResult::Retry("provider busy".into())))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    let event =
        wait_for(&mut events, |e| matches!(e, WorkerEvent::JobRetryScheduled { .. })).await;
    assert!(matches!(
        event,
        WorkerEvent::JobRetryScheduled { job_id: id, error, .. } if id == job_id && error == "provider busy"
    ));
    handle.shutdown().await.unwrap();

    let stored = jobs.snapshot(job_id);
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert!(stored.retry_after.unwrap() > Utc::now());
    assert!(notifier.completed.lock().unwrap().is_empty());
    assert!(notifier.failed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_fail_and_notify() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(
        jobs.clone(),
        QueueConfig::default()
            .with_max_retries(1)
            .with_retry_delay(chrono::Duration::zero()),
    );
    let job_id = submit_with(&queue, |r| r.with_notify_target("hook://x")).await;
    let notifier = RecordingNotifier::new();

    let worker = WorkerBuilder::new(queue)
        .with_config(fast())
        .with_notifier(notifier.clone())
        .with_handler(Scripted::new(JobResult::Retry("provider busy".into())))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobRetryScheduled { .. })).await;
    let event = wait_for(&mut events, |e| matches!(e, WorkerEvent::JobFailed { .. })).await;
    assert!(matches!(
        event,
        WorkerEvent::JobFailed { error, .. } if error == "max retries exceeded (1/1): provider busy"
    ));
    eventually(|| !notifier.failed.lock().unwrap().is_empty()).await;
    handle.shutdown().await.unwrap();

    let stored = jobs.snapshot(job_id);
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.retry_count, 1);
}

#[tokio::test]
async fn test_notifier_failure_is_not_fatal() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let first = submit_with(&queue, |r| r.with_notify_target("hook://x")).await;
    let second = submit_with(&queue, |r| r.with_notify_target("hook://x")).await;
    let notifier = RecordingNotifier::failing();

    let worker = WorkerBuilder::new(queue)
        .with_config(fast())
        .with_notifier(notifier.clone())
        .with_handler(NoOpHandler::new(JobType::Translation))
        .build()
        .await;
    let handle = worker.start();

    eventually(|| notifier.completed.lock().unwrap().len() == 2).await;
    handle.shutdown().await.unwrap();

    for id in [first, second] {
        let stored = jobs.snapshot(id);
        assert_eq!(stored.status, JobStatus::Completed);
        assert!(stored.notified_at.is_none());
    }
}

// ============================================================================
// CONCURRENCY AND TIMEOUTS
// ============================================================================

#[tokio::test]
async fn test_concurrency_ceiling_is_respected() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    for _ in 0..6 {
        submit(&queue).await;
    }
    let handler =
        Scripted::new(JobResult::Success(None)).with_delay(Duration::from_millis(40));
    let peak = handler.peak.clone();

    let worker = WorkerBuilder::new(queue.clone())
        .with_config(fast().with_max_concurrent(2))
        .with_handler(handler)
        .build()
        .await;
    let handle = worker.start();

    let stats_queue = queue.clone();
    tokio::time::timeout(WAIT, async move {
        loop {
            if stats_queue.stats().await.unwrap().completed == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("jobs did not finish");
    handle.shutdown().await.unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_job_timeout_schedules_retry() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit(&queue).await;

    let worker = WorkerBuilder::new(queue)
        .with_config(fast().with_job_timeout(Duration::from_millis(50)))
        .with_handler(Scripted::new(JobResult::Success(None)).with_delay(Duration::from_secs(30)))
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    let event =
        wait_for(&mut events, |e| matches!(e, WorkerEvent::JobRetryScheduled { .. })).await;
    assert!(matches!(
        event,
        WorkerEvent::JobRetryScheduled { error, .. } if error.contains("exceeded timeout")
    ));
    handle.shutdown().await.unwrap();

    assert_eq!(jobs.snapshot(job_id).retry_count, 1);
}

#[tokio::test]
async fn test_heartbeats_tick_while_job_runs() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit(&queue).await;

    let worker = WorkerBuilder::new(queue)
        .with_config(fast().with_heartbeat_interval(Duration::from_millis(20)))
        .with_handler(
            Scripted::new(JobResult::Success(None)).with_delay(Duration::from_millis(200)),
        )
        .build()
        .await;
    let heartbeats = worker.heartbeats().clone();
    let mut events = worker.events();
    let handle = worker.start();

    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;
    eventually(|| heartbeats.is_active(job_id)).await;
    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobCompleted { .. })).await;
    eventually(|| heartbeats.active_count() == 0).await;
    handle.shutdown().await.unwrap();

    assert!(jobs.heartbeat_count(job_id) >= 2);
}

#[tokio::test]
async fn test_zero_heartbeat_interval_still_ticks() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit(&queue).await;

    let registry = HeartbeatRegistry::new(jobs.clone(), Duration::ZERO);
    assert_eq!(registry.interval(), MIN_HEARTBEAT_INTERVAL);

    let guard = registry.start(job_id);
    eventually(|| jobs.heartbeat_count(job_id) >= 2).await;
    assert!(registry.is_active(job_id));

    drop(guard);
    assert_eq!(registry.active_count(), 0);
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_jobs() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit(&queue).await;

    let worker = WorkerBuilder::new(queue)
        .with_config(fast().with_shutdown_timeout(Duration::from_secs(5)))
        .with_handler(
            Scripted::new(JobResult::Success(None)).with_delay(Duration::from_millis(100)),
        )
        .build()
        .await;
    let mut events = worker.events();
    let handle = worker.start();

    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;
    handle.shutdown().await.unwrap();

    assert_eq!(jobs.snapshot(job_id).status, JobStatus::Completed);
}

#[tokio::test]
async fn test_shutdown_aborts_jobs_past_timeout() {
    let jobs = MemoryJobs::new();
    let queue = JobQueue::new(jobs.clone(), QueueConfig::default());
    let job_id = submit(&queue).await;

    let worker = WorkerBuilder::new(queue)
        .with_config(fast().with_shutdown_timeout(Duration::from_millis(50)))
        .with_handler(Scripted::new(JobResult::Success(None)).with_delay(Duration::from_secs(30)))
        .build()
        .await;
    let heartbeats = worker.heartbeats().clone();
    let mut events = worker.events();
    let handle = worker.start();

    wait_for(&mut events, |e| matches!(e, WorkerEvent::JobStarted { .. })).await;
    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("shutdown should not wait for the job")
        .unwrap();

    // Left processing; a later start reclaims it through its stale heartbeat
    assert_eq!(jobs.snapshot(job_id).status, JobStatus::Processing);
    assert_eq!(heartbeats.active_count(), 0);
}
