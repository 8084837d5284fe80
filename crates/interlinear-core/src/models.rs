//! Core data models for interlinear.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a job in the queue.
///
/// Transitions are `pending -> processing -> {completed | failed}`. A job only
/// re-enters `pending` through a scheduled retry, a stale-heartbeat reclaim,
/// or an explicit manual retry from `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs never run again without intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::InvalidInput(format!("unknown job status: {other}"))),
        }
    }
}

/// Type of job to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Produce fluent and literal renderings for every unit of a document
    Translation,
    /// Recount completeness and re-verify stored segment alignment
    TranslationAudit,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Translation => "translation",
            JobType::TranslationAudit => "translation_audit",
        }
    }

    /// Default priority for this job type (higher = more urgent)
    pub fn default_priority(&self) -> i32 {
        match self {
            JobType::Translation => defaults::JOB_DEFAULT_PRIORITY,
            // Audits are cheap and unblock progress reporting
            JobType::TranslationAudit => defaults::JOB_DEFAULT_PRIORITY + 1,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "translation" => Ok(JobType::Translation),
            "translation_audit" => Ok(JobType::TranslationAudit),
            other => Err(Error::InvalidInput(format!("unknown job type: {other}"))),
        }
    }
}

fn default_target_lang() -> String {
    defaults::TRANSLATION_TARGET_LANG.to_string()
}

/// Parameters for a translation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationParams {
    /// Language code of the source text (e.g. "ar", "fa").
    pub source_lang: String,
    /// Language code of the renderings.
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    /// Optional style variant, part of the cache key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    /// Document-level context (title, author, period) sent with every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_context: Option<String>,
    /// Overrides the configured wave stride.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_stride: Option<usize>,
    /// Overrides the configured per-batch token budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_budget: Option<usize>,
}

impl TranslationParams {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            variant: None,
            document_context: None,
            wave_stride: None,
            token_budget: None,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_document_context(mut self, context: impl Into<String>) -> Self {
        self.document_context = Some(context.into());
        self
    }

    fn validate(&self) -> Result<()> {
        validate_lang("source_lang", &self.source_lang)?;
        validate_lang("target_lang", &self.target_lang)?;
        if self.source_lang.eq_ignore_ascii_case(&self.target_lang) {
            return Err(Error::InvalidInput(
                "source_lang and target_lang must differ".to_string(),
            ));
        }
        if self.wave_stride == Some(0) {
            return Err(Error::InvalidInput("wave_stride must be positive".into()));
        }
        if self.token_budget == Some(0) {
            return Err(Error::InvalidInput("token_budget must be positive".into()));
        }
        Ok(())
    }
}

fn validate_lang(field: &str, code: &str) -> Result<()> {
    let valid = !code.is_empty()
        && code.len() <= 16
        && code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!("{field} is not a language code: {code:?}")))
    }
}

/// Parameters for a translation audit job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditParams {
    /// Clear stored segments that fail the reconstruction check.
    #[serde(default)]
    pub repair: bool,
}

/// Job parameters, tagged by job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum JobParams {
    Translation(TranslationParams),
    TranslationAudit(AuditParams),
}

impl JobParams {
    pub fn job_type(&self) -> JobType {
        match self {
            JobParams::Translation(_) => JobType::Translation,
            JobParams::TranslationAudit(_) => JobType::TranslationAudit,
        }
    }

    /// Build typed parameters from a job type name and an untyped payload.
    ///
    /// Unknown types and malformed payloads are rejected here, before a job
    /// row is ever written.
    pub fn parse(job_type: &str, params: JsonValue) -> Result<Self> {
        let job_type = JobType::from_str(job_type)?;
        let params = match job_type {
            JobType::Translation => JobParams::Translation(
                serde_json::from_value(params)
                    .map_err(|e| Error::InvalidInput(format!("translation params: {e}")))?,
            ),
            JobType::TranslationAudit => {
                let params = if params.is_null() {
                    JsonValue::Object(Default::default())
                } else {
                    params
                };
                JobParams::TranslationAudit(
                    serde_json::from_value(params)
                        .map_err(|e| Error::InvalidInput(format!("audit params: {e}")))?,
                )
            }
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            JobParams::Translation(p) => p.validate(),
            JobParams::TranslationAudit(_) => Ok(()),
        }
    }
}

/// A job in the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub owner_id: Uuid,
    /// Document the job operates on.
    pub target_id: Uuid,
    pub params: JobParams,
    pub priority: i32,
    pub retry_count: i32,
    pub retry_after: Option<DateTime<Utc>>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// Highest unit index confirmed processed by a previous run.
    pub last_checkpoint: Option<i32>,
    pub progress: i32,
    pub total_items: i32,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub notify_target: Option<String>,
    pub notified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Request to insert a new pending job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: Uuid,
    pub target_id: Uuid,
    pub params: JobParams,
    pub priority: i32,
    pub expires_at: Option<DateTime<Utc>>,
    pub notify_target: Option<String>,
}

/// Status change applied by [`crate::JobRepository::update_status`].
///
/// Each transition is only applied when the job is in its required source
/// status, so concurrent writers cannot move a job backwards.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusTransition {
    /// `processing -> completed`
    Complete { result_ref: Option<String> },
    /// `processing -> failed`
    Fail { error: String },
    /// `processing -> pending` with a delay; heartbeat and start time cleared.
    Retry {
        retry_count: i32,
        retry_after: DateTime<Utc>,
        error: String,
    },
    /// `failed -> pending` immediately; retry bookkeeping and checkpoint cleared.
    Reset,
}

impl StatusTransition {
    /// Status the job must currently be in.
    pub fn from_status(&self) -> JobStatus {
        match self {
            StatusTransition::Complete { .. }
            | StatusTransition::Fail { .. }
            | StatusTransition::Retry { .. } => JobStatus::Processing,
            StatusTransition::Reset => JobStatus::Failed,
        }
    }

    /// Status the job ends up in.
    pub fn to_status(&self) -> JobStatus {
        match self {
            StatusTransition::Complete { .. } => JobStatus::Completed,
            StatusTransition::Fail { .. } => JobStatus::Failed,
            StatusTransition::Retry { .. } | StatusTransition::Reset => JobStatus::Pending,
        }
    }
}

/// Filter for job listings. `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub owner_id: Option<Uuid>,
    pub status: Option<JobStatus>,
    pub job_type: Option<JobType>,
    pub target_id: Option<Uuid>,
}

impl JobFilter {
    pub fn for_owner(owner_id: Uuid) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_job_type(mut self, job_type: JobType) -> Self {
        self.job_type = Some(job_type);
        self
    }

    pub fn with_target(mut self, target_id: Uuid) -> Self {
        self.target_id = Some(target_id);
        self
    }

    /// Whether `job` satisfies every set field.
    pub fn matches(&self, job: &Job) -> bool {
        self.owner_id.is_none_or(|o| o == job.owner_id)
            && self.status.is_none_or(|s| s == job.status)
            && self.job_type.is_none_or(|t| t == job.job_type)
            && self.target_id.is_none_or(|t| t == job.target_id)
    }
}

/// Limit/offset pagination, clamped to sane bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, defaults::JOB_LIST_MAX_LIMIT),
            offset: offset.max(0),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(defaults::JOB_LIST_LIMIT, 0)
    }
}

/// One page of jobs plus the unpaginated total.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobList {
    pub jobs: Vec<JobView>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Caller-facing view of a job.
///
/// `error_message` is only surfaced once the job has failed; transient errors
/// from attempts that will be retried stay internal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    pub job_type: JobType,
    pub status: JobStatus,
    pub target_id: Uuid,
    pub progress: i32,
    pub total_items: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobView {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type,
            status: job.status,
            target_id: job.target_id,
            progress: job.progress,
            total_items: job.total_items,
            result_ref: job.result_ref.clone(),
            error_message: if job.status == JobStatus::Failed {
                job.error_message.clone()
            } else {
                None
            },
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// Response to a job submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmittedJob {
    pub id: Uuid,
    pub status: JobStatus,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

// =============================================================================
// RESULT CACHE
// =============================================================================

/// Full unique key of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub target_id: Uuid,
    pub sub_unit_id: Option<Uuid>,
    pub operation_kind: String,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub variant: Option<String>,
    /// Hex SHA-256 of the input content.
    pub content_hash: String,
}

/// A content-addressed cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: Uuid,
    pub key: CacheKey,
    /// Serialized result (JSON for translation renderings).
    pub result_ref: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: i64,
}

// =============================================================================
// TEXT UNITS
// =============================================================================

/// A source span paired with its literal rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignedSegment {
    pub source: String,
    pub literal: String,
}

/// A term-level note attached to a literal rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub term: String,
    pub note: String,
}

/// Derived renderings stored alongside a text unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedForms {
    pub fluent: Option<String>,
    pub literal: Option<String>,
    pub aligned_segments: Option<Vec<AlignedSegment>>,
    pub annotations: Option<Vec<Annotation>>,
}

/// The literal rendering of one unit as written back to the content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiteralRendering {
    pub text: String,
    /// `None` when no segments were returned or they failed the integrity check.
    pub segments: Option<Vec<AlignedSegment>>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
}

/// Which derived forms a unit is still missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitNeed {
    Both,
    FluentOnly,
    LiteralOnly,
    Nothing,
}

/// An ordered unit of source text owned by the content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnit {
    pub id: Uuid,
    pub parent_id: Uuid,
    pub index: i32,
    pub source_text: String,
    #[serde(default)]
    pub derived: DerivedForms,
}

impl TextUnit {
    pub fn has_fluent(&self) -> bool {
        self.derived
            .fluent
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    pub fn has_literal(&self) -> bool {
        self.derived
            .literal
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    /// Both derived forms are present.
    pub fn is_complete(&self) -> bool {
        self.has_fluent() && self.has_literal()
    }

    pub fn need(&self) -> UnitNeed {
        match (self.has_fluent(), self.has_literal()) {
            (false, false) => UnitNeed::Both,
            (false, true) => UnitNeed::FluentOnly,
            (true, false) => UnitNeed::LiteralOnly,
            (true, true) => UnitNeed::Nothing,
        }
    }
}
