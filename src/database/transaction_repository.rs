use chrono::{DateTime, Utc};
use serde::Serialize;

#[cfg(feature = "database")]
use crate::database::error::DatabaseError;
#[cfg(feature = "database")]
use crate::database::repository::TransactionLog;
#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use sqlx::{FromRow, PgPool};

/// Reporting row written once a voucher has been issued
#[cfg_attr(feature = "database", derive(FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLogEntry {
    pub reference: String,
    pub phone: String,
    pub amount: i64,
    pub voucher: String,
    pub status: String,
    pub processed_at: DateTime<Utc>,
}

impl TransactionLogEntry {
    pub fn issued(reference: &str, phone: &str, amount: i64, voucher: &str) -> Self {
        Self {
            reference: reference.to_string(),
            phone: phone.to_string(),
            amount,
            voucher: voucher.to_string(),
            status: "successful".to_string(),
            processed_at: Utc::now(),
        }
    }
}

/// Repository for the voucher transaction log
#[cfg(feature = "database")]
pub struct TransactionLogRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl TransactionLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl TransactionLog for TransactionLogRepository {
    async fn record(&self, entry: TransactionLogEntry) -> Result<(), DatabaseError> {
        sqlx::query(
            "INSERT INTO voucher_transactions (reference, phone, amount, voucher, status, processed_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (reference) DO UPDATE
             SET voucher = EXCLUDED.voucher, status = EXCLUDED.status, processed_at = EXCLUDED.processed_at",
        )
        .bind(&entry.reference)
        .bind(&entry.phone)
        .bind(entry.amount)
        .bind(&entry.voucher)
        .bind(&entry.status)
        .bind(entry.processed_at)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    async fn find(&self, reference: &str) -> Result<Option<TransactionLogEntry>, DatabaseError> {
        sqlx::query_as::<_, TransactionLogEntry>(
            "SELECT reference, phone, amount, voucher, status, processed_at
             FROM voucher_transactions WHERE reference = $1",
        )
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
