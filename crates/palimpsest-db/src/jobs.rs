//! Job queue repository implementation.
//!
//! The queue carries reprocessing work: one row per job, claimed with
//! `FOR UPDATE SKIP LOCKED` so several workers can drain it concurrently.
//! Failed jobs keep their classification; a periodic sweep moves transiently
//! failed rows back to pending once their backoff has elapsed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use uuid::Uuid;

use palimpsest_core::{
    new_v7, Error, FailureClass, FailureKind, Job, JobRepository, JobStatus, JobType, QueueStats,
    Result,
};

const JOB_COLUMNS: &str = "id, document_id, job_type::text, status::text, priority, payload, \
                           result, error_message, failure_kind, retry_count, max_retries, \
                           next_retry_at, created_at, started_at, completed_at";

/// PostgreSQL implementation of JobRepository.
pub struct PgJobRepository {
    pool: Pool<Postgres>,
    /// Woken whenever new work becomes claimable, so an idle worker can skip
    /// the rest of its poll interval.
    notify: Arc<Notify>,
}

impl PgJobRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Create a repository sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self { pool, notify }
    }

    /// Handle a worker can wait on for new-work wakeups.
    pub fn job_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn parse_job_row(row: sqlx::postgres::PgRow) -> Job {
        let job_type = JobType::parse(row.get("job_type"));
        let status = JobStatus::parse(row.get("status"));
        let failure_kind = row
            .get::<Option<String>, _>("failure_kind")
            .as_deref()
            .and_then(FailureKind::parse);
        Job {
            id: row.get("id"),
            document_id: row.get("document_id"),
            job_type,
            status,
            priority: row.get("priority"),
            payload: row.get("payload"),
            result: row.get("result"),
            error_message: row.get("error_message"),
            failure_kind,
            retry_count: row.get("retry_count"),
            max_retries: row.get("max_retries"),
            next_retry_at: row.get("next_retry_at"),
            created_at: row.get("created_at"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn queue(
        &self,
        document_id: Option<Uuid>,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Uuid> {
        let job_id = new_v7();

        sqlx::query(
            "INSERT INTO job_queue (id, document_id, job_type, status, priority, payload, created_at)
             VALUES ($1, $2, $3::job_type, 'pending'::job_status, $4, $5, $6)",
        )
        .bind(job_id)
        .bind(document_id)
        .bind(job_type.as_str())
        .bind(priority)
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        self.notify.notify_waiters();
        Ok(job_id)
    }

    async fn queue_deduplicated(
        &self,
        document_id: Uuid,
        job_type: JobType,
        priority: i32,
        payload: Option<JsonValue>,
    ) -> Result<Option<Uuid>> {
        let job_id = new_v7();

        // Atomic check-and-insert; a pending or running job of the same type
        // for the same document suppresses the new one. This is the mutual
        // exclusion that keeps one reprocess run in flight per document.
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO job_queue (id, document_id, job_type, status, priority, payload, created_at)
             SELECT $1, $2, $3::job_type, 'pending'::job_status, $4, $5, $6
             WHERE NOT EXISTS (
                 SELECT 1 FROM job_queue
                 WHERE document_id = $2 AND job_type = $3::job_type
                   AND status IN ('pending'::job_status, 'running'::job_status)
             )
             RETURNING id",
        )
        .bind(job_id)
        .bind(document_id)
        .bind(job_type.as_str())
        .bind(priority)
        .bind(&payload)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        if inserted.is_some() {
            self.notify.notify_waiters();
        }
        Ok(inserted)
    }

    async fn claim_next(&self) -> Result<Option<Job>> {
        // SKIP LOCKED lets concurrent workers claim without blocking on each
        // other's row locks.
        let sql = format!(
            "UPDATE job_queue
             SET status = 'running'::job_status, started_at = $1
             WHERE id = (
                 SELECT id FROM job_queue
                 WHERE status = 'pending'::job_status
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {JOB_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn complete(&self, job_id: Uuid, result: Option<JsonValue>) -> Result<()> {
        sqlx::query(
            "UPDATE job_queue
             SET status = 'completed'::job_status, completed_at = $1, result = $2,
                 error_message = NULL, failure_kind = NULL, next_retry_at = NULL
             WHERE id = $3",
        )
        .bind(Utc::now())
        .bind(&result)
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(
        &self,
        job_id: Uuid,
        error: &str,
        class: FailureClass,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let (retry_count, max_retries): (i32, i32) =
            sqlx::query_as("SELECT retry_count, max_retries FROM job_queue WHERE id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(Error::Database)?;

        if class.can_retry && retry_count < max_retries {
            // Failed-but-scheduled; the retry sweep re-queues the row once
            // next_retry_at passes.
            sqlx::query(
                "UPDATE job_queue
                 SET status = 'failed'::job_status, error_message = $1, failure_kind = $2,
                     next_retry_at = $3
                 WHERE id = $4",
            )
            .bind(error)
            .bind(class.kind.as_str())
            .bind(next_retry_at)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        } else {
            // Terminal: either the classification rules out retrying or the
            // budget is spent.
            sqlx::query(
                "UPDATE job_queue
                 SET status = 'failed'::job_status, completed_at = $1, error_message = $2,
                     failure_kind = $3, next_retry_at = NULL
                 WHERE id = $4",
            )
            .bind(Utc::now())
            .bind(error)
            .bind(class.kind.as_str())
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn sweep_retryable(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE job_queue
             SET status = 'pending'::job_status, retry_count = retry_count + 1,
                 error_message = NULL, failure_kind = NULL, next_retry_at = NULL,
                 started_at = NULL, completed_at = NULL
             WHERE status = 'failed'::job_status
               AND next_retry_at IS NOT NULL
               AND next_retry_at <= $1
               AND retry_count < max_retries",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            self.notify.notify_waiters();
        }
        Ok(requeued)
    }

    async fn cancel_pending_for_document(&self, document_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE job_queue
             SET status = 'cancelled'::job_status, completed_at = $1
             WHERE document_id = $2 AND status = 'pending'::job_status",
        )
        .bind(Utc::now())
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job_queue WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(Self::parse_job_row))
    }

    async fn pending_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM job_queue WHERE status = 'pending'::job_status")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)
    }

    async fn queue_stats(&self) -> Result<QueueStats> {
        let row = sqlx::query(
            "SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'running') AS processing,
                COUNT(*) FILTER (WHERE status = 'completed'
                                   AND completed_at > NOW() - INTERVAL '1 hour') AS completed_last_hour,
                COUNT(*) FILTER (WHERE status = 'failed'
                                   AND completed_at > NOW() - INTERVAL '1 hour') AS failed_last_hour,
                COUNT(*) AS total
             FROM job_queue",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(QueueStats {
            pending: row.get("pending"),
            processing: row.get("processing"),
            completed_last_hour: row.get("completed_last_hour"),
            failed_last_hour: row.get("failed_last_hour"),
            total: row.get("total"),
        })
    }
}
