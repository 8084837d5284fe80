//! Job repository implementation.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use interlinear_core::{
    new_v7, Error, Job, JobFilter, JobList, JobParams, JobRepository, JobStatus, JobType,
    JobView, NewJob, Pagination, QueueStats, Result, StatusTransition,
};

/// Columns returned by every job query, with enums cast to text.
const JOB_COLUMNS: &str = "id, job_type::text AS job_type, status::text AS status, owner_id, \
     target_id, params, priority, retry_count, retry_after, heartbeat_at, last_checkpoint, \
     progress, total_items, result_ref, error_message, notify_target, notified_at, \
     created_at, started_at, completed_at, expires_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Wakes idle workers as soon as a job is inserted.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    /// Create a new PgJobRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a new PgJobRepository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Get the job notification handle for event-driven waking.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn type_names(job_types: &[JobType]) -> Vec<String> {
        job_types.iter().map(|t| t.as_str().to_string()).collect()
    }

    /// Parse a job row into a Job struct.
    fn parse_job_row(row: sqlx::postgres::PgRow) -> Result<Job> {
        let job_type: String = row.get("job_type");
        let status: String = row.get("status");
        let params: serde_json::Value = row.get("params");

        Ok(Job {
            id: row.get("id"),
            job_type: JobType::from_str(&job_type)?,
            status: JobStatus::from_str(&status)?,
            owner_id: row.get("owner_id"),
            target_id: row.get("target_id"),
            params: serde_json::from_value::<JobParams>(params)?,
            priority: row.get("priority"),
            retry_count: row.get("retry_count"),
            retry_after: row.get("retry_after"),
            heartbeat_at: row.get("heartbeat_at"),
            last_checkpoint: row.get("last_checkpoint"),
            progress: row.get("progress"),
            total_items: row.get("total_items"),
            result_ref: row.get("result_ref"),
            error_message: row.get("error_message"),
            notify_target: row.get("notify_target"),
            notified_at: row.get("notified_at"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            expires_at: row.get("expires_at"),
        })
    }

    fn parse_optional(row: Option<sqlx::postgres::PgRow>) -> Result<Option<Job>> {
        row.map(Self::parse_job_row).transpose()
    }

    /// Build the WHERE clause for a listing filter. Returns the clause and the
    /// next free bind index.
    fn filter_clause(filter: &JobFilter) -> (String, usize) {
        let mut conditions = Vec::new();
        let mut param_idx = 1;

        if filter.owner_id.is_some() {
            conditions.push(format!("owner_id = ${}", param_idx));
            param_idx += 1;
        }
        if filter.status.is_some() {
            conditions.push(format!("status::text = ${}", param_idx));
            param_idx += 1;
        }
        if filter.job_type.is_some() {
            conditions.push(format!("job_type::text = ${}", param_idx));
            param_idx += 1;
        }
        if filter.target_id.is_some() {
            conditions.push(format!("target_id = ${}", param_idx));
            param_idx += 1;
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        (clause, param_idx)
    }
}

/// Bind the filter values in the order `filter_clause` numbered them.
macro_rules! bind_filter {
    ($query:expr, $filter:expr) => {{
        let mut q = $query;
        if let Some(owner) = $filter.owner_id {
            q = q.bind(owner);
        }
        if let Some(status) = $filter.status {
            q = q.bind(status.as_str());
        }
        if let Some(job_type) = $filter.job_type {
            q = q.bind(job_type.as_str());
        }
        if let Some(target) = $filter.target_id {
            q = q.bind(target);
        }
        q
    }};
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn insert(&self, job: NewJob) -> Result<Job> {
        let params = serde_json::to_value(&job.params)?;
        let query = format!(
            "INSERT INTO job_queue (id, job_type, status, owner_id, target_id, params, priority,
                                    notify_target, created_at, expires_at)
             VALUES ($1, $2::job_type, 'pending'::job_status, $3, $4, $5, $6, $7, $8, $9)
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(new_v7())
            .bind(job.params.job_type().as_str())
            .bind(job.owner_id)
            .bind(job.target_id)
            .bind(&params)
            .bind(job.priority)
            .bind(&job.notify_target)
            .bind(Utc::now())
            .bind(job.expires_at)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::from)?;

        self.notify.notify_waiters();
        Self::parse_job_row(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_optional(row)
    }

    async fn list(&self, filter: &JobFilter, page: Pagination) -> Result<JobList> {
        let (where_clause, param_idx) = Self::filter_clause(filter);

        let count_query = format!("SELECT COUNT(*) FROM job_queue {where_clause}");
        let total: i64 = bind_filter!(sqlx::query_scalar::<_, i64>(&count_query), filter)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        let list_query = format!(
            "SELECT {JOB_COLUMNS} FROM job_queue
             {where_clause}
             ORDER BY created_at DESC, id DESC
             LIMIT ${} OFFSET ${}",
            param_idx,
            param_idx + 1
        );
        let rows = bind_filter!(sqlx::query(&list_query), filter)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let jobs = rows
            .into_iter()
            .map(|row| Self::parse_job_row(row).map(|job| JobView::from(&job)))
            .collect::<Result<Vec<_>>>()?;

        Ok(JobList {
            jobs,
            total,
            limit: page.limit,
            offset: page.offset,
        })
    }

    async fn claim_next(
        &self,
        job_types: &[JobType],
        now: DateTime<Utc>,
    ) -> Result<Option<Job>> {
        let type_strings = Self::type_names(job_types);

        // Filter by type before locking; SKIP LOCKED lets concurrent claimers
        // pass over rows another transaction is already taking.
        let query = format!(
            "UPDATE job_queue
             SET status = 'processing'::job_status, started_at = $1, heartbeat_at = $1
             WHERE id = (
                 SELECT id FROM job_queue
                 WHERE status = 'pending'::job_status
                   AND (cardinality($2::text[]) = 0 OR job_type::text = ANY($2))
                   AND (retry_after IS NULL OR retry_after <= $1)
                   AND (expires_at IS NULL OR expires_at > $1)
                 ORDER BY priority DESC, created_at ASC, id ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&query)
            .bind(now)
            .bind(&type_strings)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Self::parse_optional(row)
    }

    async fn update_status(
        &self,
        id: Uuid,
        transition: StatusTransition,
    ) -> Result<Option<Job>> {
        let now = Utc::now();
        let from = transition.from_status().as_str();

        let row = match transition {
            StatusTransition::Complete { result_ref } => {
                let query = format!(
                    "UPDATE job_queue
                     SET status = 'completed'::job_status, completed_at = $2, result_ref = $3,
                         error_message = NULL, heartbeat_at = NULL
                     WHERE id = $1 AND status = $4::job_status
                     RETURNING {JOB_COLUMNS}"
                );
                sqlx::query(&query)
                    .bind(id)
                    .bind(now)
                    .bind(result_ref)
                    .bind(from)
                    .fetch_optional(&self.pool)
                    .await
            }
            StatusTransition::Fail { error } => {
                let query = format!(
                    "UPDATE job_queue
                     SET status = 'failed'::job_status, completed_at = $2, error_message = $3,
                         heartbeat_at = NULL
                     WHERE id = $1 AND status = $4::job_status
                     RETURNING {JOB_COLUMNS}"
                );
                sqlx::query(&query)
                    .bind(id)
                    .bind(now)
                    .bind(error)
                    .bind(from)
                    .fetch_optional(&self.pool)
                    .await
            }
            StatusTransition::Retry {
                retry_count,
                retry_after,
                error,
            } => {
                let query = format!(
                    "UPDATE job_queue
                     SET status = 'pending'::job_status, retry_count = $2, retry_after = $3,
                         error_message = $4, started_at = NULL, heartbeat_at = NULL
                     WHERE id = $1 AND status = $5::job_status
                     RETURNING {JOB_COLUMNS}"
                );
                sqlx::query(&query)
                    .bind(id)
                    .bind(retry_count)
                    .bind(retry_after)
                    .bind(error)
                    .bind(from)
                    .fetch_optional(&self.pool)
                    .await
            }
            StatusTransition::Reset => {
                let query = format!(
                    "UPDATE job_queue
                     SET status = 'pending'::job_status, retry_count = 0, retry_after = NULL,
                         error_message = NULL, last_checkpoint = NULL, heartbeat_at = NULL,
                         started_at = NULL, completed_at = NULL, notified_at = NULL
                     WHERE id = $1 AND status = $2::job_status
                     RETURNING {JOB_COLUMNS}"
                );
                sqlx::query(&query)
                    .bind(id)
                    .bind(from)
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .map_err(Error::Database)?;

        let job = Self::parse_optional(row)?;
        if job.as_ref().is_some_and(|j| j.status == JobStatus::Pending) {
            self.notify.notify_waiters();
        }
        Ok(job)
    }

    async fn checkpoint(&self, id: Uuid, checkpoint: i32, progress: i32) -> Result<()> {
        // The checkpoint only ever moves forward.
        sqlx::query(
            "UPDATE job_queue
             SET last_checkpoint = GREATEST(COALESCE(last_checkpoint, $2), $2),
                 progress = $3, heartbeat_at = NOW()
             WHERE id = $1 AND status = 'processing'::job_status",
        )
        .bind(id)
        .bind(checkpoint)
        .bind(progress)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, progress: i32, total_items: i32) -> Result<()> {
        sqlx::query("UPDATE job_queue SET progress = $2, total_items = $3 WHERE id = $1")
            .bind(id)
            .bind(progress)
            .bind(total_items)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn heartbeat(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE job_queue SET heartbeat_at = NOW()
             WHERE id = $1 AND status = 'processing'::job_status",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn reclaim_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE job_queue
             SET status = 'pending'::job_status, started_at = NULL, heartbeat_at = NULL
             WHERE status = 'processing'::job_status
               AND (heartbeat_at IS NULL OR heartbeat_at < $1)
             RETURNING id",
        )
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        if !ids.is_empty() {
            debug!(
                subsystem = "db",
                component = "jobs",
                op = "reclaim_stale",
                rows_affected = ids.len(),
                "Returned stale jobs to pending"
            );
            self.notify.notify_waiters();
        }
        Ok(ids)
    }

    async fn mark_notified(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE job_queue SET notified_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_queue
             WHERE status IN ('completed'::job_status, 'failed'::job_status)
               AND expires_at IS NOT NULL
               AND expires_at <= $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "jobs",
            op = "delete_expired",
            rows_affected = result.rows_affected(),
            "Expired jobs deleted"
        );
        Ok(result.rows_affected())
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) AS total
             FROM job_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.get::<i64, _>("pending"),
            processing: row.get::<i64, _>("processing"),
            completed: row.get::<i64, _>("completed"),
            failed: row.get::<i64, _>("failed"),
            total: row.get::<i64, _>("total"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        assert_eq!(
            PgJobRepository::type_names(&[JobType::Translation, JobType::TranslationAudit]),
            vec!["translation".to_string(), "translation_audit".to_string()]
        );
        assert!(PgJobRepository::type_names(&[]).is_empty());
    }

    #[test]
    fn test_filter_clause_empty() {
        let (clause, next) = PgJobRepository::filter_clause(&JobFilter::default());
        assert_eq!(clause, "");
        assert_eq!(next, 1);
    }

    #[test]
    fn test_filter_clause_numbers_binds_in_order() {
        let filter = JobFilter::for_owner(Uuid::nil())
            .with_status(JobStatus::Failed)
            .with_target(Uuid::nil());
        let (clause, next) = PgJobRepository::filter_clause(&filter);
        assert_eq!(
            clause,
            "WHERE owner_id = $1 AND status::text = $2 AND target_id = $3"
        );
        assert_eq!(next, 4);
    }

    #[test]
    fn test_job_columns_cast_enums() {
        assert!(JOB_COLUMNS.contains("job_type::text AS job_type"));
        assert!(JOB_COLUMNS.contains("status::text AS status"));
    }
}
