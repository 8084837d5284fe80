//! # interlinear-db
//!
//! PostgreSQL store for the interlinear job system.
//!
//! This crate provides:
//! - Connection pool management
//! - The durable job queue with atomic claiming
//! - The content-addressed result cache
//! - Text unit storage for source text and derived renderings
//!
//! ## Example
//!
//! ```rust,ignore
//! use interlinear_db::{Database, JobRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/interlinear").await?;
//!     let stats = db.jobs.queue_stats().await?;
//!     println!("{} pending", stats.pending);
//!     Ok(())
//! }
//! ```
pub mod cache;
pub mod jobs;
pub mod pool;
pub mod units;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use interlinear_core::*;

pub use cache::PgCacheRepository;
pub use jobs::PgJobRepository;
pub use pool::{create_pool, log_pool_health, PoolConfig, PoolHealth};
pub use units::{PgTextUnitRepository, PgUnitIndex};

use std::sync::Arc;

/// Combined database context with all repositories.
///
/// Repositories are reference counted so the worker and the queue manager
/// can share them as trait objects.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job queue repository.
    pub jobs: Arc<PgJobRepository>,
    /// Result cache repository.
    pub cache: Arc<PgCacheRepository>,
    /// Text unit repository.
    pub units: Arc<PgTextUnitRepository>,
    /// Read-only document index over stored units.
    pub index: Arc<PgUnitIndex>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: Arc::new(PgJobRepository::new(pool.clone())),
            cache: Arc::new(PgCacheRepository::new(pool.clone())),
            units: Arc::new(PgTextUnitRepository::new(pool.clone())),
            index: Arc::new(PgUnitIndex::new(pool.clone())),
            pool,
        }
    }

    /// Connect with a pool sized for the default worker.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
