//! Centralized default constants for the interlinear system.
//!
//! **This module is the single source of truth** for shared default values.
//! Config types in the other crates read their environment overrides on top
//! of these constants.

// =============================================================================
// INFERENCE
// =============================================================================

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default generation model name (Ollama).
pub const GEN_MODEL: &str = "gpt-oss:20b";

/// Transport-level timeout for generation requests in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 180;

// =============================================================================
// JOB QUEUE
// =============================================================================

/// Maximum retry count before a job is permanently failed.
pub const JOB_MAX_RETRIES: i32 = 3;

/// Fixed delay before a failed job becomes claimable again (no backoff).
pub const JOB_RETRY_DELAY_SECS: i64 = 60;

/// A processing job whose heartbeat is older than this is considered orphaned.
pub const JOB_STALE_AFTER_SECS: i64 = 300;

/// Days a job row lives before expiry cleanup may delete it.
pub const JOB_TTL_DAYS: i64 = 7;

/// Default job priority.
pub const JOB_DEFAULT_PRIORITY: i32 = 0;

/// Default page size for job listings.
pub const JOB_LIST_LIMIT: i64 = 50;

/// Maximum page size for job listings.
pub const JOB_LIST_MAX_LIMIT: i64 = 500;

// =============================================================================
// WORKER
// =============================================================================

/// Worker poll interval in milliseconds.
pub const JOB_POLL_INTERVAL_MS: u64 = 1_000;

/// Default maximum concurrent jobs per worker process.
pub const JOB_MAX_CONCURRENT: usize = 4;

/// Heartbeat refresh interval for processing jobs, in seconds.
///
/// Must stay well below [`JOB_STALE_AFTER_SECS`].
pub const JOB_HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Bounded wait for in-flight jobs during shutdown, in seconds.
pub const JOB_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Interval between expired-job cleanup passes, in seconds.
pub const JOB_CLEANUP_INTERVAL_SECS: u64 = 3_600;

/// Whole-job execution timeout in seconds.
pub const JOB_TIMEOUT_SECS: u64 = 3_600;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// TRANSLATION PIPELINE
// =============================================================================

/// Interleave stride between waves.
pub const TRANSLATION_WAVE_STRIDE: usize = 10;

/// Approximate token budget per batch request.
pub const TRANSLATION_TOKEN_BUDGET: usize = 4_000;

/// Concurrent provider calls inside one translation job.
pub const TRANSLATION_UNIT_CONCURRENCY: usize = 3;

/// Per-call deadline for generation requests in seconds.
pub const TRANSLATION_CALL_TIMEOUT_SECS: u64 = 120;

/// Sampling temperature for translation requests.
pub const TRANSLATION_TEMPERATURE: f32 = 0.3;

/// Output token ceiling for translation requests.
pub const TRANSLATION_MAX_OUTPUT_TOKENS: u32 = 8_192;

/// Default target language.
pub const TRANSLATION_TARGET_LANG: &str = "en";

// =============================================================================
// CACHE
// =============================================================================

/// Operation kind for cached fluent renderings.
pub const CACHE_OP_FLUENT: &str = "translate_fluent";

/// Operation kind for cached literal renderings.
pub const CACHE_OP_LITERAL: &str = "translate_literal";
