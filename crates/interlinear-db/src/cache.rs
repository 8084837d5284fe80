//! Result cache repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};

use interlinear_core::{new_v7, CacheEntry, CacheKey, CacheRepository, Error, Result};

const CACHE_COLUMNS: &str = "id, target_id, sub_unit_id, operation_kind, source_lang, \
     target_lang, variant, content_hash, result_ref, size, created_at, last_accessed_at, \
     access_count";

/// PostgreSQL implementation of CacheRepository.
pub struct PgCacheRepository {
    pool: Pool<Postgres>,
}

impl PgCacheRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_cache_row(row: sqlx::postgres::PgRow) -> CacheEntry {
        CacheEntry {
            id: row.get("id"),
            key: CacheKey {
                target_id: row.get("target_id"),
                sub_unit_id: row.get("sub_unit_id"),
                operation_kind: row.get("operation_kind"),
                source_lang: row.get("source_lang"),
                target_lang: row.get("target_lang"),
                variant: row.get("variant"),
                content_hash: row.get("content_hash"),
            },
            result_ref: row.get("result_ref"),
            size: row.get("size"),
            created_at: row.get("created_at"),
            last_accessed_at: row.get("last_accessed_at"),
            access_count: row.get("access_count"),
        }
    }
}

#[async_trait]
impl CacheRepository for PgCacheRepository {
    async fn check(&self, key: &CacheKey) -> Result<Option<CacheEntry>> {
        // IS NOT DISTINCT FROM matches the NULLS NOT DISTINCT unique key.
        let query = format!(
            "UPDATE result_cache
             SET last_accessed_at = $8, access_count = access_count + 1
             WHERE target_id = $1
               AND sub_unit_id IS NOT DISTINCT FROM $2
               AND operation_kind = $3
               AND source_lang IS NOT DISTINCT FROM $4
               AND target_lang IS NOT DISTINCT FROM $5
               AND variant IS NOT DISTINCT FROM $6
               AND content_hash = $7
             RETURNING {CACHE_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(key.target_id)
            .bind(key.sub_unit_id)
            .bind(&key.operation_kind)
            .bind(&key.source_lang)
            .bind(&key.target_lang)
            .bind(&key.variant)
            .bind(&key.content_hash)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_cache_row))
    }

    async fn insert(&self, key: &CacheKey, result_ref: &str) -> Result<CacheEntry> {
        let now = Utc::now();
        let query = format!(
            "INSERT INTO result_cache (id, target_id, sub_unit_id, operation_kind, source_lang,
                                       target_lang, variant, content_hash, result_ref, size,
                                       created_at, last_accessed_at, access_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11, 0)
             RETURNING {CACHE_COLUMNS}"
        );

        // Unique violations surface as Error::Conflict through From<sqlx::Error>.
        let row = sqlx::query(&query)
            .bind(new_v7())
            .bind(key.target_id)
            .bind(key.sub_unit_id)
            .bind(&key.operation_kind)
            .bind(&key.source_lang)
            .bind(&key.target_lang)
            .bind(&key.variant)
            .bind(&key.content_hash)
            .bind(result_ref)
            .bind(result_ref.len() as i64)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from)?;

        Ok(Self::parse_cache_row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_columns_cover_key() {
        for column in [
            "target_id",
            "sub_unit_id",
            "operation_kind",
            "source_lang",
            "target_lang",
            "variant",
            "content_hash",
        ] {
            assert!(CACHE_COLUMNS.contains(column), "missing {column}");
        }
    }
}
