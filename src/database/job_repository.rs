use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[cfg(feature = "database")]
use crate::database::repository::JobQueue;
#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use sqlx::{FromRow, PgPool};
#[cfg(feature = "database")]
use tracing::warn;

/// Queue-local status of a job, independent of the payment's own status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DatabaseError::invalid_transition(format!(
                "unknown job status '{}'",
                other
            ))),
        }
    }
}

/// A "keep checking this payment" work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentJob {
    pub id: Uuid,
    pub reference: String,
    pub phone: String,
    pub amount: i64,
    pub transaction_uuid: String,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Fields merged into a job by [`JobQueue::mark_status`]; `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub retry_count: Option<i32>,
    pub last_error: Option<String>,
}

impl JobUpdate {
    pub fn retry_count(mut self, retry_count: i32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.last_error = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

#[cfg(feature = "database")]
#[derive(Debug, FromRow)]
struct PaymentJobRow {
    id: Uuid,
    reference: String,
    phone: String,
    amount: i64,
    transaction_uuid: String,
    status: String,
    retry_count: i32,
    max_retries: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_checked_at: Option<DateTime<Utc>>,
}

#[cfg(feature = "database")]
impl TryFrom<PaymentJobRow> for PaymentJob {
    type Error = DatabaseError;

    fn try_from(row: PaymentJobRow) -> Result<Self, Self::Error> {
        Ok(PaymentJob {
            status: row.status.parse()?,
            id: row.id,
            reference: row.reference,
            phone: row.phone,
            amount: row.amount,
            transaction_uuid: row.transaction_uuid,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_checked_at: row.last_checked_at,
        })
    }
}

#[cfg(feature = "database")]
const JOB_COLUMNS: &str = "id, reference, phone, amount, transaction_uuid, status, retry_count, \
     max_retries, last_error, created_at, updated_at, last_checked_at";

/// Postgres-backed job queue
#[cfg(feature = "database")]
pub struct PaymentJobRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl PaymentJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn try_dequeue(&self) -> Result<Option<PaymentJob>, DatabaseError> {
        // SKIP LOCKED keeps concurrent ticks from handing out the same row.
        let sql = format!(
            "UPDATE payment_jobs
             SET status = 'processing', updated_at = NOW()
             WHERE id = (
                 SELECT id FROM payment_jobs
                 WHERE status = 'pending'
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING {}",
            JOB_COLUMNS
        );
        sqlx::query_as::<_, PaymentJobRow>(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentJob::try_from)
            .transpose()
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl JobQueue for PaymentJobRepository {
    async fn enqueue(
        &self,
        reference: &str,
        phone: &str,
        amount: i64,
        transaction_uuid: &str,
        max_retries: i32,
    ) -> Result<PaymentJob, DatabaseError> {
        let sql = format!(
            "INSERT INTO payment_jobs (id, reference, phone, amount, transaction_uuid, status, retry_count, max_retries)
             VALUES ($1, $2, $3, $4, $5, 'pending', 0, $6)
             RETURNING {}",
            JOB_COLUMNS
        );
        sqlx::query_as::<_, PaymentJobRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(reference)
            .bind(phone)
            .bind(amount)
            .bind(transaction_uuid)
            .bind(max_retries)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .try_into()
    }

    async fn dequeue_oldest_pending(&self) -> Option<PaymentJob> {
        match self.try_dequeue().await {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "failed to dequeue payment job; treating as idle");
                None
            }
        }
    }

    async fn mark_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<PaymentJob, DatabaseError> {
        let sql = format!(
            "UPDATE payment_jobs
             SET status = $2,
                 retry_count = COALESCE($3, retry_count),
                 last_error = COALESCE($4, last_error),
                 updated_at = NOW(),
                 last_checked_at = NOW()
             WHERE id = $1
             RETURNING {}",
            JOB_COLUMNS
        );
        sqlx::query_as::<_, PaymentJobRow>(&sql)
            .bind(job_id)
            .bind(status.as_str())
            .bind(update.retry_count)
            .bind(update.last_error)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .ok_or_else(|| DatabaseError::not_found("payment_job", job_id.to_string()))?
            .try_into()
    }

    async fn retire(&self, job_id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query("DELETE FROM payment_jobs WHERE id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_all(&self, status: Option<JobStatus>) -> Result<Vec<PaymentJob>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payment_jobs
             WHERE ($1::TEXT IS NULL OR status = $1)
             ORDER BY created_at DESC",
            JOB_COLUMNS
        );
        sqlx::query_as::<_, PaymentJobRow>(&sql)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .into_iter()
            .map(PaymentJob::try_from)
            .collect()
    }

    async fn sweep_stale(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "DELETE FROM payment_jobs
             WHERE status IN ('completed', 'failed') AND updated_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }

    async fn requeue_stalled(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        let result = sqlx::query(
            "UPDATE payment_jobs
             SET status = 'pending', updated_at = NOW(),
                 last_error = 'requeued after stalled processing'
             WHERE status = 'processing' AND updated_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(result.rows_affected())
    }
}
