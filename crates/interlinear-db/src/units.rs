//! Text unit repository implementation.
//!
//! Units are owned by the content store; the job system only reads their
//! source text and writes derived renderings back.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use interlinear_core::{
    new_v7, AlignedSegment, Annotation, DerivedForms, Error, IndexService, LiteralRendering,
    Result, TextUnit, TextUnitRepository,
};

const UNIT_COLUMNS: &str =
    "id, parent_id, unit_index, source_text, fluent, literal, aligned_segments, annotations";

/// PostgreSQL implementation of TextUnitRepository.
pub struct PgTextUnitRepository {
    pool: Pool<Postgres>,
}

impl PgTextUnitRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Insert a unit of source text. Used by ingestion tooling and tests.
    pub async fn insert(&self, parent_id: Uuid, index: i32, source_text: &str) -> Result<TextUnit> {
        let query = format!(
            "INSERT INTO text_unit (id, parent_id, unit_index, source_text)
             VALUES ($1, $2, $3, $4)
             RETURNING {UNIT_COLUMNS}"
        );
        let row = sqlx::query(&query)
            .bind(new_v7())
            .bind(parent_id)
            .bind(index)
            .bind(source_text)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from)?;

        Self::parse_unit_row(row)
    }

    fn parse_unit_row(row: sqlx::postgres::PgRow) -> Result<TextUnit> {
        let segments: Option<serde_json::Value> = row.get("aligned_segments");
        let annotations: Option<serde_json::Value> = row.get("annotations");

        Ok(TextUnit {
            id: row.get("id"),
            parent_id: row.get("parent_id"),
            index: row.get("unit_index"),
            source_text: row.get("source_text"),
            derived: DerivedForms {
                fluent: row.get("fluent"),
                literal: row.get("literal"),
                aligned_segments: segments
                    .map(serde_json::from_value::<Vec<AlignedSegment>>)
                    .transpose()?,
                annotations: annotations
                    .map(serde_json::from_value::<Vec<Annotation>>)
                    .transpose()?,
            },
        })
    }
}

#[async_trait]
impl TextUnitRepository for PgTextUnitRepository {
    async fn list_for_parent(&self, parent_id: Uuid) -> Result<Vec<TextUnit>> {
        let query = format!(
            "SELECT {UNIT_COLUMNS} FROM text_unit WHERE parent_id = $1 ORDER BY unit_index ASC"
        );
        let rows = sqlx::query(&query)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.into_iter().map(Self::parse_unit_row).collect()
    }

    async fn write_fluent(&self, unit_id: Uuid, fluent: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE text_unit SET fluent = $2, updated_at = NOW() WHERE id = $1")
                .bind(unit_id)
                .bind(fluent)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("text unit {unit_id}")));
        }
        Ok(())
    }

    async fn write_literal(&self, unit_id: Uuid, literal: &LiteralRendering) -> Result<()> {
        let segments = literal
            .segments
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let annotations = serde_json::to_value(&literal.annotations)?;

        let result = sqlx::query(
            "UPDATE text_unit
             SET literal = $2, aligned_segments = $3, annotations = $4, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(unit_id)
        .bind(&literal.text)
        .bind(segments)
        .bind(annotations)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("text unit {unit_id}")));
        }
        Ok(())
    }

    async fn clear_segments(&self, unit_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE text_unit SET aligned_segments = NULL, updated_at = NOW() WHERE id = $1",
        )
        .bind(unit_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

/// Index view backed by the text unit table.
///
/// A document "exists" when it has at least one stored unit.
pub struct PgUnitIndex {
    pool: Pool<Postgres>,
}

impl PgUnitIndex {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IndexService for PgUnitIndex {
    async fn document_exists(&self, target_id: Uuid) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM text_unit WHERE parent_id = $1)")
                .bind(target_id)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::Database)?;
        Ok(exists)
    }

    async fn unit_count(&self, target_id: Uuid) -> Result<Option<i64>> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM text_unit WHERE parent_id = $1")
            .bind(target_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(Some(count))
    }
}
