//! Connection pool sizing and health for the worker process.
//!
//! Every in-flight job holds a connection at a time for checkpoints, unit
//! writes and its heartbeat ticker, while the poll loop and the cleanup tick
//! need their own. The pool is therefore sized from the worker's job ceiling
//! unless `DATABASE_MAX_CONNECTIONS` overrides it.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use interlinear_core::{defaults, Error, Result};

/// Floor for the derived connection limit.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Connections reserved beyond one per concurrent job.
pub const POOL_HEADROOM: u32 = 2;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Pool options.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a claim or write waits for a free connection.
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_worker(defaults::JOB_MAX_CONCURRENT)
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for a worker running up to `max_concurrent_jobs` at once.
    pub fn for_worker(max_concurrent_jobs: usize) -> Self {
        let per_job = u32::try_from(max_concurrent_jobs).unwrap_or(u32::MAX);
        Self {
            max_connections: per_job
                .saturating_add(POOL_HEADROOM)
                .max(DEFAULT_MAX_CONNECTIONS),
            min_connections: 1,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: IDLE_TIMEOUT,
            max_lifetime: Some(MAX_LIFETIME),
        }
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }

    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n.min(self.max_connections);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Load options from the environment.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `JOB_MAX_CONCURRENT` | `4` | Job ceiling the pool is sized for |
    /// | `DATABASE_MAX_CONNECTIONS` | `max(jobs + 2, 10)` | Hard connection limit |
    /// | `DATABASE_CONNECT_TIMEOUT_SECS` | `30` | Wait for a free connection |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let jobs = lookup("JOB_MAX_CONCURRENT")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::JOB_MAX_CONCURRENT)
            .max(1);
        let mut config = Self::for_worker(jobs);

        if let Some(n) = lookup("DATABASE_MAX_CONNECTIONS")
            .and_then(|v| v.parse::<u32>().ok())
            .filter(|n| *n > 0)
        {
            config = config.max_connections(n);
            if (n as usize) <= jobs {
                warn!(
                    subsystem = "db",
                    component = "pool",
                    max_connections = n,
                    max_concurrent_jobs = jobs,
                    "Pool is smaller than the job ceiling, claims may wait for connections"
                );
            }
        }
        if let Some(secs) = lookup("DATABASE_CONNECT_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            config.connect_timeout = Duration::from_secs(secs);
        }
        config
    }
}

/// Open a pool with `config`.
pub async fn create_pool(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout);
    if let Some(lifetime) = config.max_lifetime {
        options = options.max_lifetime(lifetime);
    }

    let pool = options.connect(database_url).await.map_err(Error::Database)?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}

/// Point-in-time connection usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHealth {
    pub size: u32,
    pub idle: usize,
    pub max_connections: u32,
}

impl PoolHealth {
    pub fn of(pool: &PgPool) -> Self {
        Self {
            size: pool.size(),
            idle: pool.num_idle(),
            max_connections: pool.options().get_max_connections(),
        }
    }

    pub fn in_use(&self) -> u32 {
        self.size
            .saturating_sub(u32::try_from(self.idle).unwrap_or(u32::MAX))
    }

    /// Every allowed connection is open and none is free.
    pub fn is_exhausted(&self) -> bool {
        self.idle == 0 && self.size >= self.max_connections
    }
}

/// Log pool usage, warning when the pool is exhausted.
pub fn log_pool_health(pool: &PgPool) -> PoolHealth {
    let health = PoolHealth::of(pool);
    if health.is_exhausted() {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = health.size,
            max_connections = health.max_connections,
            "Connection pool exhausted, job claims and checkpoints will wait"
        );
    } else {
        debug!(
            subsystem = "db",
            component = "pool",
            pool_size = health.size,
            in_use = health.in_use(),
            max_connections = health.max_connections,
            "Pool health"
        );
    }
    health
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_pool_sized_from_job_ceiling() {
        assert_eq!(PoolConfig::default().max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(PoolConfig::for_worker(16).max_connections, 18);
        assert_eq!(PoolConfig::for_worker(0).max_connections, DEFAULT_MAX_CONNECTIONS);
    }

    #[test]
    fn test_from_env_defaults() {
        let config = PoolConfig::from_lookup(lookup(&[]));
        assert_eq!(config, PoolConfig::default());
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_from_env_follows_worker_concurrency() {
        let config = PoolConfig::from_lookup(lookup(&[("JOB_MAX_CONCURRENT", "12")]));
        assert_eq!(config.max_connections, 14);
    }

    #[test]
    fn test_from_env_overrides() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "3"),
            ("DATABASE_CONNECT_TIMEOUT_SECS", "5"),
        ]));
        assert_eq!(config.max_connections, 3);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_env_ignores_zero_and_garbage() {
        let config = PoolConfig::from_lookup(lookup(&[
            ("DATABASE_MAX_CONNECTIONS", "0"),
            ("DATABASE_CONNECT_TIMEOUT_SECS", "soon"),
        ]));
        assert_eq!(config, PoolConfig::default());
    }

    #[test]
    fn test_builder_keeps_min_below_max() {
        let config = PoolConfig::new().min_connections(8).max_connections(4);
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.min_connections, 4);

        let config = PoolConfig::new().max_connections(0);
        assert_eq!(config.max_connections, 1);
    }

    #[test]
    fn test_health_exhaustion() {
        let busy = PoolHealth {
            size: 10,
            idle: 0,
            max_connections: 10,
        };
        assert!(busy.is_exhausted());
        assert_eq!(busy.in_use(), 10);

        let growing = PoolHealth {
            size: 3,
            idle: 0,
            max_connections: 10,
        };
        assert!(!growing.is_exhausted());

        let idle = PoolHealth {
            size: 10,
            idle: 2,
            max_connections: 10,
        };
        assert!(!idle.is_exhausted());
        assert_eq!(idle.in_use(), 8);
    }
}
