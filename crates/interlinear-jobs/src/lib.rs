//! # interlinear-jobs
//!
//! Background job processing for interlinear.
//!
//! This crate provides:
//! - The queue manager ([`JobQueue`]): submission, retry accounting, stale-job
//!   recovery, expiry cleanup
//! - The worker loop ([`JobWorker`]) with bounded job concurrency, per-job
//!   heartbeats, and events via a broadcast channel
//! - The content-addressed result cache ([`ResultCache`])
//! - The batch translation pipeline ([`TranslationHandler`]) and the
//!   translation audit job ([`TranslationAuditHandler`])
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use interlinear_jobs::{JobQueue, QueueConfig, ResultCache, TranslationHandler, WorkerBuilder};
//! use interlinear_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//! let queue = JobQueue::new(db.jobs.clone(), QueueConfig::from_env());
//!
//! let translation = TranslationHandler::new(
//!     db.jobs.clone(),
//!     db.units.clone(),
//!     ResultCache::new(db.cache.clone()),
//!     backend,
//! );
//!
//! let worker = WorkerBuilder::new(queue)
//!     .with_handler(translation)
//!     .build()
//!     .await;
//!
//! let mut events = worker.events();
//! let handle = worker.start();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod audit;
pub mod cache;
pub mod handler;
pub mod heartbeat;
pub mod queue;
pub mod translation;
pub mod worker;

// Re-export core types
pub use interlinear_core::*;

pub use audit::{AuditSummary, TranslationAuditHandler};
pub use cache::ResultCache;
pub use handler::{JobContext, JobHandler, JobResult, NoOpHandler, ProgressCallback};
pub use heartbeat::{HeartbeatGuard, HeartbeatRegistry, MIN_HEARTBEAT_INTERVAL};
pub use queue::{CreateJob, JobQueue, QueueConfig};
pub use translation::{TranslationConfig, TranslationHandler, TranslationSummary};
pub use worker::{JobWorker, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle};

/// Default maximum retries for failed jobs.
pub const DEFAULT_MAX_RETRIES: i32 = interlinear_core::defaults::JOB_MAX_RETRIES;

/// Default polling interval for job processing (milliseconds).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = interlinear_core::defaults::JOB_POLL_INTERVAL_MS;
