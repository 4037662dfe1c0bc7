use chrono::{DateTime, Utc};
use serde::Serialize;

#[cfg(feature = "database")]
use crate::database::error::DatabaseError;
#[cfg(feature = "database")]
use crate::database::repository::VoucherInventory;
#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use sqlx::{FromRow, PgPool};

/// Prepaid access code with a fixed face value
#[cfg_attr(feature = "database", derive(FromRow))]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub code: String,
    pub amount: i64,
    pub used: bool,
    pub assigned_to: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a voucher claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This call flipped the voucher from unused to used.
    Claimed(Voucher),
    /// Another voucher is already bound to the payment reference.
    ReferenceBound(Voucher),
    /// No unclaimed voucher of the tier was free at the time of the call.
    Exhausted,
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

#[cfg(feature = "database")]
const VOUCHER_COLUMNS: &str =
    "code, amount, used, assigned_to, assigned_at, payment_reference, created_at";

/// Postgres-backed voucher inventory
#[cfg(feature = "database")]
pub struct VoucherRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl VoucherRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl VoucherInventory for VoucherRepository {
    async fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Voucher>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM vouchers WHERE payment_reference = $1",
            VOUCHER_COLUMNS
        );
        sqlx::query_as::<_, Voucher>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn claim_next(
        &self,
        amount: i64,
        phone: &str,
        reference: &str,
    ) -> Result<ClaimOutcome, DatabaseError> {
        if let Some(bound) = self.find_by_payment_reference(reference).await? {
            return Ok(ClaimOutcome::ReferenceBound(bound));
        }

        // SKIP LOCKED hands concurrent claimers distinct rows.
        let sql = format!(
            "UPDATE vouchers
             SET used = TRUE, assigned_to = $2, assigned_at = NOW(), payment_reference = $3
             WHERE code = (
                 SELECT code FROM vouchers
                 WHERE amount = $1 AND used = FALSE
                 ORDER BY created_at ASC, code ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             AND used = FALSE
             RETURNING {}",
            VOUCHER_COLUMNS
        );
        let claimed = sqlx::query_as::<_, Voucher>(&sql)
            .bind(amount)
            .bind(phone)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx);

        match claimed {
            Ok(Some(voucher)) => Ok(ClaimOutcome::Claimed(voucher)),
            Ok(None) => Ok(ClaimOutcome::Exhausted),
            // uq_vouchers_payment_reference: a racing path bound a voucher first
            Err(e) if e.is_unique_violation() => match self.find_by_payment_reference(reference).await? {
                Some(existing) => Ok(ClaimOutcome::ReferenceBound(existing)),
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn count_unused(&self, amount: i64) -> Result<i64, DatabaseError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM vouchers WHERE amount = $1 AND used = FALSE",
        )
        .bind(amount)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn add_vouchers(&self, amount: i64, codes: &[String]) -> Result<u64, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let mut inserted = 0;
        for code in codes {
            let result = sqlx::query(
                "INSERT INTO vouchers (code, amount, used) VALUES ($1, $2, FALSE)
                 ON CONFLICT (code) DO NOTHING",
            )
            .bind(code)
            .bind(amount)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            inserted += result.rows_affected();
        }
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(inserted)
    }
}
