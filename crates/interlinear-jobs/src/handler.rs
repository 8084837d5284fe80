//! Job handlers for each job type.

use async_trait::async_trait;
use uuid::Uuid;

use interlinear_core::{Error, Job, JobParams, JobType};

/// Progress callback type for job handlers: `(progress, total_items)`.
pub type ProgressCallback = Box<dyn Fn(i32, i32) + Send + Sync>;

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed, as claimed.
    pub job: Job,
    /// Progress callback for updating job progress.
    progress_callback: Option<ProgressCallback>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(job: Job) -> Self {
        Self {
            job,
            progress_callback: None,
        }
    }

    /// Set the progress callback.
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(i32, i32) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Box::new(callback));
        self
    }

    /// Report progress to the callback.
    pub fn report_progress(&self, progress: i32, total_items: i32) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress, total_items);
        }
    }

    /// Document the job operates on.
    pub fn target_id(&self) -> Uuid {
        self.job.target_id
    }

    /// Typed job parameters.
    pub fn params(&self) -> &JobParams {
        &self.job.params
    }

    /// Checkpoint persisted by an earlier, interrupted run.
    pub fn last_checkpoint(&self) -> Option<i32> {
        self.job.last_checkpoint
    }
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Job completed successfully with an optional result reference.
    Success(Option<String>),
    /// Job can never succeed; fail it without retrying.
    Failed(String),
    /// Job hit a transient problem and should be rescheduled.
    Retry(String),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success(_))
    }
}

impl From<Error> for JobResult {
    /// Permanent errors fail the job; anything else goes through retry
    /// accounting.
    fn from(err: Error) -> Self {
        if err.is_permanent() {
            JobResult::Failed(err.to_string())
        } else {
            JobResult::Retry(err.to_string())
        }
    }
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    /// Create a new no-op handler for the given job type.
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, ctx: JobContext) -> JobResult {
        ctx.report_progress(0, 1);
        ctx.report_progress(1, 1);
        JobResult::Success(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use interlinear_core::{AuditParams, JobStatus};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn job() -> Job {
        Job {
            id: Uuid::new_v4(),
            job_type: JobType::TranslationAudit,
            status: JobStatus::Processing,
            owner_id: Uuid::new_v4(),
            target_id: Uuid::new_v4(),
            params: JobParams::TranslationAudit(AuditParams::default()),
            priority: 0,
            retry_count: 0,
            retry_after: None,
            heartbeat_at: Some(Utc::now()),
            last_checkpoint: Some(7),
            progress: 0,
            total_items: 0,
            result_ref: None,
            error_message: None,
            notify_target: None,
            notified_at: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn test_job_context_accessors() {
        let job = job();
        let ctx = JobContext::new(job.clone());
        assert_eq!(ctx.target_id(), job.target_id);
        assert_eq!(ctx.last_checkpoint(), Some(7));
        assert_eq!(ctx.params(), &job.params);
        assert!(ctx.progress_callback.is_none());
    }

    #[test]
    fn test_report_progress_without_callback_is_noop() {
        let ctx = JobContext::new(job());
        ctx.report_progress(3, 10);
    }

    #[test]
    fn test_report_progress_invokes_callback() {
        let seen = Arc::new(AtomicI32::new(-1));
        let sink = seen.clone();
        let ctx = JobContext::new(job()).with_progress_callback(move |progress, total| {
            sink.store(progress * 100 + total, Ordering::SeqCst);
        });

        ctx.report_progress(4, 9);
        assert_eq!(seen.load(Ordering::SeqCst), 409);
    }

    #[test]
    fn test_job_result_from_error() {
        assert!(matches!(
            JobResult::from(Error::Permanent("missing document".into())),
            JobResult::Failed(msg) if msg.contains("missing document")
        ));
        assert!(matches!(
            JobResult::from(Error::Timeout("provider".into())),
            JobResult::Retry(_)
        ));
        assert!(matches!(
            JobResult::from(Error::Parse("garbled".into())),
            JobResult::Retry(_)
        ));
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new(JobType::TranslationAudit);
        assert_eq!(handler.job_type(), JobType::TranslationAudit);
        assert!(handler.can_handle(JobType::TranslationAudit));
        assert!(!handler.can_handle(JobType::Translation));

        let result = handler.execute(JobContext::new(job())).await;
        assert!(result.is_success());
    }
}
