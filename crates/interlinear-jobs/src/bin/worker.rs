//! interlinear worker process.
//!
//! Connects to PostgreSQL, applies migrations, registers the translation and
//! audit handlers, and runs the job worker until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use interlinear_core::GenerationBackend;
use interlinear_db::{log_pool_health, Database, PoolConfig};
use interlinear_inference::OllamaBackend;
use interlinear_jobs::{
    JobQueue, QueueConfig, ResultCache, TranslationAuditHandler, TranslationConfig,
    TranslationHandler, WorkerBuilder, WorkerConfig,
};

const POOL_HEALTH_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Environment variables:
    //   LOG_FORMAT  - "json" or "text" (default: "text")
    //   LOG_FILE    - path to log file (optional, enables file logging)
    //   LOG_ANSI    - "true"/"false" override ANSI colors
    //   RUST_LOG    - standard env filter
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "interlinear_jobs=info,interlinear_db=info,interlinear_inference=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let _file_guard = if let Some(ref path) = log_file {
        let file_dir = std::path::Path::new(path)
            .parent()
            .unwrap_or(std::path::Path::new("."));
        let file_name = std::path::Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("interlinear-worker.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/interlinear".to_string());

    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()).await?;
    db.migrate().await?;
    info!("Database connected and migrated");

    let pool = db.pool().clone();
    let pool_monitor = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(POOL_HEALTH_INTERVAL);
        loop {
            ticker.tick().await;
            log_pool_health(&pool);
        }
    });

    let backend = OllamaBackend::from_env()?;
    match backend.health_check().await {
        Ok(true) => info!(model = backend.model_name(), "Generation backend reachable"),
        Ok(false) | Err(_) => tracing::warn!(
            model = backend.model_name(),
            "Generation backend not reachable yet, jobs will retry"
        ),
    }
    let backend: Arc<dyn GenerationBackend> = Arc::new(backend);

    let queue = JobQueue::new(db.jobs.clone(), QueueConfig::from_env());

    let translation = TranslationHandler::new(
        db.jobs.clone(),
        db.units.clone(),
        ResultCache::new(db.cache.clone()),
        backend,
    )
    .with_index(db.index.clone())
    .with_config(TranslationConfig::from_env());

    let audit = TranslationAuditHandler::new(db.jobs.clone(), db.units.clone())
        .with_index(db.index.clone());

    let worker = WorkerBuilder::new(queue)
        .with_config(WorkerConfig::from_env())
        .with_wake(db.jobs.job_notify())
        .with_handler(translation)
        .with_handler(audit)
        .build()
        .await;

    let handle = worker.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    handle.shutdown().await?;
    pool_monitor.abort();

    Ok(())
}
