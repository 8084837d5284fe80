//! Job queue manager.
//!
//! [`JobQueue`] layers queue policy (retry accounting, stale-job recovery,
//! expiry, ownership checks) over a [`JobRepository`]. It is also the surface
//! the host service calls to submit, inspect, list, and manually retry jobs.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use interlinear_core::{
    defaults, Error, Job, JobFilter, JobList, JobParams, JobRepository, JobType,
    JobView, NewJob, Pagination, QueueStats, Result, StatusTransition, SubmittedJob,
};

/// Queue policy settings.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Attempts allowed after the first failure.
    pub max_retries: i32,
    /// Fixed delay before a failed job becomes claimable again.
    pub retry_delay: Duration,
    /// A processing job whose heartbeat is older than this is reclaimed.
    pub stale_after: Duration,
    /// How long a job row is kept once terminal.
    pub ttl: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: defaults::JOB_MAX_RETRIES,
            retry_delay: Duration::seconds(defaults::JOB_RETRY_DELAY_SECS),
            stale_after: Duration::seconds(defaults::JOB_STALE_AFTER_SECS),
            ttl: Duration::days(defaults::JOB_TTL_DAYS),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_MAX_RETRIES` | `3` | Retries before a job fails for good |
    /// | `JOB_RETRY_DELAY_SECS` | `60` | Fixed delay between attempts |
    /// | `JOB_STALE_AFTER_SECS` | `300` | Heartbeat age that marks a job orphaned |
    /// | `JOB_TTL_DAYS` | `7` | Retention for completed and failed jobs |
    pub fn from_env() -> Self {
        let max_retries = std::env::var("JOB_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(defaults::JOB_MAX_RETRIES)
            .max(0);

        let retry_delay_secs = std::env::var("JOB_RETRY_DELAY_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::JOB_RETRY_DELAY_SECS)
            .max(0);

        let stale_after_secs = std::env::var("JOB_STALE_AFTER_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::JOB_STALE_AFTER_SECS)
            .max(1);

        let ttl_days = std::env::var("JOB_TTL_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::JOB_TTL_DAYS)
            .max(1);

        Self {
            max_retries,
            retry_delay: Duration::seconds(retry_delay_secs),
            stale_after: Duration::seconds(stale_after_secs),
            ttl: Duration::days(ttl_days),
        }
    }

    pub fn with_max_retries(mut self, max_retries: i32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Request to create a job with typed parameters.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub owner_id: Uuid,
    pub target_id: Uuid,
    pub params: JobParams,
    /// Defaults to the job type's priority.
    pub priority: Option<i32>,
    /// Defaults to the queue's TTL.
    pub ttl_days: Option<i64>,
    pub notify_target: Option<String>,
}

impl CreateJob {
    pub fn new(owner_id: Uuid, target_id: Uuid, params: JobParams) -> Self {
        Self {
            owner_id,
            target_id,
            params,
            priority: None,
            ttl_days: None,
            notify_target: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_ttl_days(mut self, days: i64) -> Self {
        self.ttl_days = Some(days);
        self
    }

    pub fn with_notify_target(mut self, target: impl Into<String>) -> Self {
        self.notify_target = Some(target.into());
        self
    }
}

/// Queue manager over a job store.
#[derive(Clone)]
pub struct JobQueue {
    jobs: Arc<dyn JobRepository>,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(jobs: Arc<dyn JobRepository>, config: QueueConfig) -> Self {
        Self { jobs, config }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Underlying store, for handlers that checkpoint directly.
    pub fn repository(&self) -> &Arc<dyn JobRepository> {
        &self.jobs
    }

    /// Create a pending job.
    pub async fn create_job(&self, request: CreateJob) -> Result<Job> {
        request.params.validate()?;
        let job_type = request.params.job_type();
        let ttl = request
            .ttl_days
            .filter(|d| *d > 0)
            .map(Duration::days)
            .unwrap_or(self.config.ttl);

        let job = self
            .jobs
            .insert(NewJob {
                owner_id: request.owner_id,
                target_id: request.target_id,
                params: request.params,
                priority: request.priority.unwrap_or(job_type.default_priority()),
                expires_at: Some(Utc::now() + ttl),
                notify_target: request.notify_target,
            })
            .await?;

        info!(
            subsystem = "jobs",
            component = "queue",
            op = "create_job",
            job_id = %job.id,
            job_type = %job.job_type,
            target_id = %job.target_id,
            priority = job.priority,
            "Job queued"
        );
        Ok(job)
    }

    /// Submit a job from an untyped request.
    ///
    /// The parameters are validated against the job type before anything is
    /// written; unknown types are rejected with [`Error::InvalidInput`].
    pub async fn submit_job(
        &self,
        owner_id: Uuid,
        job_type: &str,
        target_id: Uuid,
        params: JsonValue,
        priority: Option<i32>,
    ) -> Result<SubmittedJob> {
        let params = JobParams::parse(job_type, params)?;
        let mut request = CreateJob::new(owner_id, target_id, params);
        request.priority = priority;
        let job = self.create_job(request).await?;
        Ok(SubmittedJob {
            id: job.id,
            status: job.status,
        })
    }

    /// Atomically claim the next runnable job of the given types.
    pub async fn next_pending_job(&self, job_types: &[JobType]) -> Result<Option<Job>> {
        self.jobs.claim_next(job_types, Utc::now()).await
    }

    /// Mark a processing job completed.
    pub async fn complete_job(&self, id: Uuid, result_ref: Option<String>) -> Result<Job> {
        self.jobs
            .update_status(id, StatusTransition::Complete { result_ref })
            .await?
            .ok_or_else(|| Error::InvalidState(format!("job {id} is not processing")))
    }

    /// Fail a processing job without retrying.
    pub async fn fail_job(&self, id: Uuid, error: &str) -> Result<Job> {
        self.jobs
            .update_status(
                id,
                StatusTransition::Fail {
                    error: error.to_string(),
                },
            )
            .await?
            .ok_or_else(|| Error::InvalidState(format!("job {id} is not processing")))
    }

    /// Record a failed attempt.
    ///
    /// Returns `true` when the job was rescheduled after the fixed retry
    /// delay, and `false` when it has used all of its retries and is now
    /// failed for good.
    pub async fn mark_for_retry(&self, id: Uuid, error: &str) -> Result<bool> {
        let job = self.jobs.get(id).await?.ok_or(Error::JobNotFound(id))?;

        if !self.can_retry(&job) {
            let exhausted = Error::RetriesExhausted {
                attempts: job.retry_count,
                max_retries: self.config.max_retries,
                last_error: error.to_string(),
            };
            self.jobs
                .update_status(
                    id,
                    StatusTransition::Fail {
                        error: exhausted.to_string(),
                    },
                )
                .await?
                .ok_or_else(|| Error::InvalidState(format!("job {id} is not processing")))?;
            warn!(
                subsystem = "jobs",
                component = "queue",
                op = "mark_for_retry",
                job_id = %id,
                retry_count = job.retry_count,
                error_msg = %error,
                "Job failed after exhausting retries"
            );
            return Ok(false);
        }

        let retry_count = job.retry_count + 1;
        let retry_after = Utc::now() + self.config.retry_delay;
        self.jobs
            .update_status(
                id,
                StatusTransition::Retry {
                    retry_count,
                    retry_after,
                    error: error.to_string(),
                },
            )
            .await?
            .ok_or_else(|| Error::InvalidState(format!("job {id} is not processing")))?;

        debug!(
            subsystem = "jobs",
            component = "queue",
            op = "mark_for_retry",
            job_id = %id,
            retry_count,
            %retry_after,
            "Job rescheduled"
        );
        Ok(true)
    }

    /// Manually return a failed job to the queue.
    ///
    /// Clears retry bookkeeping and the checkpoint; the job is runnable
    /// immediately.
    pub async fn retry_job(&self, id: Uuid) -> Result<SubmittedJob> {
        match self.jobs.update_status(id, StatusTransition::Reset).await? {
            Some(job) => {
                info!(
                    subsystem = "jobs",
                    component = "queue",
                    op = "retry_job",
                    job_id = %id,
                    "Failed job requeued"
                );
                Ok(SubmittedJob {
                    id: job.id,
                    status: job.status,
                })
            }
            None => match self.jobs.get(id).await? {
                Some(job) => Err(Error::InvalidState(format!(
                    "job {id} is {}, only failed jobs can be retried",
                    job.status
                ))),
                None => Err(Error::JobNotFound(id)),
            },
        }
    }

    /// Return orphaned processing jobs to pending.
    ///
    /// Retry counts and checkpoints are left alone so the next run resumes
    /// where the lost one stopped.
    pub async fn recover_stuck_jobs(&self) -> Result<Vec<Uuid>> {
        let stale_before = Utc::now() - self.config.stale_after;
        let recovered = self.jobs.reclaim_stale(stale_before).await?;
        if !recovered.is_empty() {
            warn!(
                subsystem = "jobs",
                component = "queue",
                op = "recover_stuck_jobs",
                count = recovered.len(),
                "Recovered jobs with stale heartbeats"
            );
        }
        Ok(recovered)
    }

    /// Delete completed and failed jobs past their expiry.
    pub async fn cleanup_expired_jobs(&self) -> Result<u64> {
        let deleted = self.jobs.delete_expired(Utc::now()).await?;
        if deleted > 0 {
            info!(
                subsystem = "jobs",
                component = "queue",
                op = "cleanup_expired_jobs",
                rows_affected = deleted,
                "Deleted expired jobs"
            );
        }
        Ok(deleted)
    }

    /// Caller-facing view of a job.
    ///
    /// With an `owner_id`, jobs belonging to someone else are reported as
    /// missing.
    pub async fn get_job(&self, id: Uuid, owner_id: Option<Uuid>) -> Result<JobView> {
        let job = self
            .jobs
            .get(id)
            .await?
            .filter(|job| owner_id.is_none_or(|owner| owner == job.owner_id))
            .ok_or(Error::JobNotFound(id))?;
        Ok(JobView::from(&job))
    }

    /// List an owner's jobs, newest first.
    pub async fn list_jobs(
        &self,
        owner_id: Uuid,
        filter: JobFilter,
        page: Pagination,
    ) -> Result<JobList> {
        let filter = JobFilter {
            owner_id: Some(owner_id),
            ..filter
        };
        self.jobs.list(&filter, page).await
    }

    /// Counts per status.
    pub async fn stats(&self) -> Result<QueueStats> {
        self.jobs.queue_stats().await
    }

    /// Whether a job still has retries left under this queue's budget.
    pub fn can_retry(&self, job: &Job) -> bool {
        job.retry_count < self.config.max_retries
    }
}
