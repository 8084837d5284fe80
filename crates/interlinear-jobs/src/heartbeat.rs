//! Per-job heartbeat tickers.
//!
//! Each running job gets an independent task that refreshes `heartbeat_at`
//! on a fixed interval, decoupled from the handler's own progress. The
//! registry is owned by one worker process and rebuilt on every start.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};
use uuid::Uuid;

use interlinear_core::JobRepository;

/// Shortest tick a registry will use; `tokio::time::interval` rejects zero.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Keyed set of active heartbeat tickers.
#[derive(Clone)]
pub struct HeartbeatRegistry {
    jobs: Arc<dyn JobRepository>,
    interval: Duration,
    active: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl HeartbeatRegistry {
    pub fn new(jobs: Arc<dyn JobRepository>, interval: Duration) -> Self {
        Self {
            jobs,
            interval: interval.max(MIN_HEARTBEAT_INTERVAL),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a ticker for `job_id`.
    ///
    /// The returned guard stops the ticker when dropped, so every exit path
    /// of the job stops its heartbeat. Starting twice for the same job
    /// replaces the earlier ticker.
    pub fn start(&self, job_id: Uuid) -> HeartbeatGuard {
        let jobs = self.jobs.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The claim already stamped the heartbeat
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = jobs.heartbeat(job_id).await {
                    warn!(
                        subsystem = "jobs",
                        component = "heartbeat",
                        job_id = %job_id,
                        error = %e,
                        "Heartbeat update failed"
                    );
                }
            }
        });

        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(subsystem = "jobs", component = "heartbeat", job_id = %job_id, "Heartbeat started");

        HeartbeatGuard {
            registry: self.clone(),
            job_id,
        }
    }

    /// Stop the ticker for `job_id`, if any. Returns whether one was running.
    pub fn stop(&self, job_id: Uuid) -> bool {
        let handle = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&job_id);
        match handle {
            Some(handle) => {
                handle.abort();
                debug!(subsystem = "jobs", component = "heartbeat", job_id = %job_id, "Heartbeat stopped");
                true
            }
            None => false,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of running tickers.
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether a ticker is running for `job_id`.
    pub fn is_active(&self, job_id: Uuid) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&job_id)
    }

    /// Stop every ticker.
    pub fn stop_all(&self) {
        let drained: Vec<JoinHandle<()>> = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in drained {
            handle.abort();
        }
    }
}

/// Stops a job's heartbeat ticker on drop.
pub struct HeartbeatGuard {
    registry: HeartbeatRegistry,
    job_id: Uuid,
}

impl HeartbeatGuard {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }
}

impl Drop for HeartbeatGuard {
    fn drop(&mut self) {
        self.registry.stop(self.job_id);
    }
}
