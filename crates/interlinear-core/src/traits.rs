//! Core traits for interlinear abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! (PostgreSQL store, Ollama backend, in-memory test doubles) must satisfy.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;
use crate::error::Result;
use crate::models::*;

// =============================================================================
// JOB STORE
// =============================================================================

/// Repository for job queue operations.
///
/// Every status change goes through a conditional write so that two workers
/// racing on the same row cannot both succeed.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new pending job.
    async fn insert(&self, job: NewJob) -> Result<Job>;

    /// Fetch a job by ID.
    async fn get(&self, id: Uuid) -> Result<Option<Job>>;

    /// List jobs matching `filter`, newest first.
    async fn list(&self, filter: &JobFilter, page: Pagination) -> Result<JobList>;

    /// Atomically claim the most urgent runnable job.
    ///
    /// Runnable means pending, not expired, and past its `retry_after`. Ties on
    /// priority go to the oldest job. The claimed job comes back already in
    /// `processing` with `started_at` and `heartbeat_at` set to `now`. An
    /// empty `job_types` slice claims any type.
    async fn claim_next(&self, job_types: &[JobType], now: DateTime<Utc>)
        -> Result<Option<Job>>;

    /// Apply a conditional status transition.
    ///
    /// Returns `None` when the job does not exist or is not in the
    /// transition's source status.
    async fn update_status(&self, id: Uuid, transition: StatusTransition)
        -> Result<Option<Job>>;

    /// Record a checkpoint and refresh the heartbeat.
    async fn checkpoint(&self, id: Uuid, checkpoint: i32, progress: i32) -> Result<()>;

    /// Set progress counters without touching the checkpoint.
    async fn set_progress(&self, id: Uuid, progress: i32, total_items: i32) -> Result<()>;

    /// Refresh `heartbeat_at` on a processing job.
    async fn heartbeat(&self, id: Uuid) -> Result<()>;

    /// Return processing jobs whose heartbeat is older than `stale_before`
    /// (or missing) to pending. Retry count and checkpoint are preserved.
    async fn reclaim_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Stamp `notified_at`.
    async fn mark_notified(&self, id: Uuid) -> Result<()>;

    /// Delete completed or failed jobs whose `expires_at` has passed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Count jobs per status.
    async fn queue_stats(&self) -> Result<QueueStats>;
}

// =============================================================================
// RESULT CACHE
// =============================================================================

/// Repository for content-addressed result caching.
#[async_trait]
pub trait CacheRepository: Send + Sync {
    /// Look up an entry by its full key, bumping access stats on a hit.
    async fn check(&self, key: &CacheKey) -> Result<Option<CacheEntry>>;

    /// Insert a new entry.
    ///
    /// Returns [`crate::Error::Conflict`] when an entry with the same key
    /// already exists.
    async fn insert(&self, key: &CacheKey, result_ref: &str) -> Result<CacheEntry>;
}

// =============================================================================
// CONTENT STORE
// =============================================================================

/// Repository for source text units and their derived renderings.
#[async_trait]
pub trait TextUnitRepository: Send + Sync {
    /// All units of a document, ordered by index.
    async fn list_for_parent(&self, parent_id: Uuid) -> Result<Vec<TextUnit>>;

    /// Write the fluent rendering of a unit.
    async fn write_fluent(&self, unit_id: Uuid, fluent: &str) -> Result<()>;

    /// Write the literal rendering, its segments, and annotations together.
    async fn write_literal(&self, unit_id: Uuid, literal: &LiteralRendering) -> Result<()>;

    /// Drop stored aligned segments, keeping the literal text.
    async fn clear_segments(&self, unit_id: Uuid) -> Result<()>;
}

/// Read-only view of the search index.
///
/// The job system never writes to the index; it only checks that a target
/// still exists and compares counts.
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Whether the document is known to the index.
    async fn document_exists(&self, target_id: Uuid) -> Result<bool>;

    /// Number of indexed units for a document, if the index tracks it.
    async fn unit_count(&self, target_id: Uuid) -> Result<Option<i64>>;
}

/// Index stand-in that treats every document as present.
pub struct NoOpIndex;

#[async_trait]
impl IndexService for NoOpIndex {
    async fn document_exists(&self, _target_id: Uuid) -> Result<bool> {
        Ok(true)
    }

    async fn unit_count(&self, _target_id: Uuid) -> Result<Option<i64>> {
        Ok(None)
    }
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Sampling options for a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: defaults::TRANSLATION_TEMPERATURE,
            max_output_tokens: defaults::TRANSLATION_MAX_OUTPUT_TOKENS,
        }
    }
}

/// Backend for text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate a completion for `content` under the `system` instructions.
    async fn generate(
        &self,
        system: &str,
        content: &str,
        options: &GenerationOptions,
    ) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

// =============================================================================
// JOB PROCESSING TRAITS
// =============================================================================

/// Notification sink for terminal job outcomes.
///
/// Delivery failures are logged by the caller and never change the job's
/// status.
#[async_trait]
pub trait JobNotifier: Send + Sync {
    /// Called after a job is marked completed.
    async fn on_job_completed(&self, job: &Job) -> Result<()>;

    /// Called after a job is marked failed for good.
    async fn on_job_failed(&self, job: &Job) -> Result<()>;
}

/// No-op notifier for when notifications aren't needed.
pub struct NoOpNotifier;

#[async_trait]
impl JobNotifier for NoOpNotifier {
    async fn on_job_completed(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    async fn on_job_failed(&self, _job: &Job) -> Result<()> {
        Ok(())
    }
}
