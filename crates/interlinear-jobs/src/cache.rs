//! Content-addressed result cache.
//!
//! Wraps a [`CacheRepository`] so that concurrent workers storing the same
//! result never surface an error: a duplicate insert is absorbed and the
//! entry that won the race is returned instead.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use interlinear_core::{CacheEntry, CacheKey, CacheRepository, Error, Result};

#[derive(Clone)]
pub struct ResultCache {
    repo: Arc<dyn CacheRepository>,
}

impl ResultCache {
    pub fn new(repo: Arc<dyn CacheRepository>) -> Self {
        Self { repo }
    }

    /// Look up an entry, touching its access stats on a hit.
    pub async fn check(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        let entry = self.repo.check(key).await?;
        debug!(
            subsystem = "jobs",
            component = "cache",
            op = "check",
            operation_kind = %key.operation_kind,
            hit = entry.is_some(),
            "Cache lookup"
        );
        Ok(entry)
    }

    /// Store a result. Idempotent under concurrent inserts of the same key.
    pub async fn store(&self, key: &CacheKey, result_ref: &str) -> Result<CacheEntry> {
        match self.repo.insert(key, result_ref).await {
            Ok(entry) => Ok(entry),
            Err(Error::Conflict(_)) => {
                debug!(
                    subsystem = "jobs",
                    component = "cache",
                    op = "store",
                    operation_kind = %key.operation_kind,
                    "Cache entry already present"
                );
                self.repo.check(key).await?.ok_or_else(|| {
                    Error::Internal("cache entry vanished after insert conflict".to_string())
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Look up and decode a JSON result. Entries that no longer decode are
    /// treated as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let Some(entry) = self.check(key).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&entry.result_ref) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "cache",
                    entry_id = %entry.id,
                    error = %e,
                    "Ignoring undecodable cache entry"
                );
                Ok(None)
            }
        }
    }

    /// Encode a result as JSON and store it.
    pub async fn put_json<T: Serialize>(&self, key: &CacheKey, value: &T) -> Result<CacheEntry> {
        let encoded = serde_json::to_string(value)?;
        self.store(key, &encoded).await
    }
}
