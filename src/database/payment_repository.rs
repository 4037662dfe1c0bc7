use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "database")]
use crate::database::repository::PaymentRecordStore;
#[cfg(feature = "database")]
use async_trait::async_trait;
#[cfg(feature = "database")]
use sqlx::{FromRow, PgPool};

/// Lifecycle status of a payment. Terminal once successful or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Processing,
    Successful,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Processing => "processing",
            PaymentStatus::Successful => "successful",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Processing)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "processing" => Ok(PaymentStatus::Processing),
            "successful" => Ok(PaymentStatus::Successful),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(DatabaseError::invalid_transition(format!(
                "unknown payment status '{}'",
                other
            ))),
        }
    }
}

/// Why a payment ended in `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The provider explicitly failed or rejected the collection.
    ProviderRejected,
    /// Money was collected but the voucher tier was empty.
    NoVoucherAvailable,
    /// Provider-confirmed amount differs from the requested amount.
    AmountMismatch,
    /// The client gave up polling.
    ClientTimeout,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ProviderRejected => "provider_rejected",
            FailureReason::NoVoucherAvailable => "no_voucher_available",
            FailureReason::AmountMismatch => "amount_mismatch",
            FailureReason::ClientTimeout => "client_timeout",
        }
    }

    /// Failures where the customer has been charged and someone must follow up.
    pub fn needs_manual_review(&self) -> bool {
        matches!(
            self,
            FailureReason::NoVoucherAvailable | FailureReason::AmountMismatch
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureReason {
    type Err = DatabaseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "provider_rejected" => Ok(FailureReason::ProviderRejected),
            "no_voucher_available" => Ok(FailureReason::NoVoucherAvailable),
            "amount_mismatch" => Ok(FailureReason::AmountMismatch),
            "client_timeout" => Ok(FailureReason::ClientTimeout),
            other => Err(DatabaseError::invalid_transition(format!(
                "unknown failure reason '{}'",
                other
            ))),
        }
    }
}

/// Payment lifecycle entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRecord {
    pub reference: String,
    pub phone: String,
    pub amount: i64,
    pub transaction_id: Option<String>,
    pub status: PaymentStatus,
    pub voucher: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The voucher code if this payment finished successfully.
    pub fn issued_voucher(&self) -> Option<&str> {
        match self.status {
            PaymentStatus::Successful => self.voucher.as_deref(),
            _ => None,
        }
    }
}

/// The single permitted mutation of a [`PaymentRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalUpdate {
    pub status: PaymentStatus,
    pub voucher: Option<String>,
    pub failure_reason: Option<FailureReason>,
}

impl TerminalUpdate {
    pub fn successful(voucher: impl Into<String>) -> Self {
        Self {
            status: PaymentStatus::Successful,
            voucher: Some(voucher.into()),
            failure_reason: None,
        }
    }

    pub fn failed(reason: FailureReason) -> Self {
        Self {
            status: PaymentStatus::Failed,
            voucher: None,
            failure_reason: Some(reason),
        }
    }

    /// Success always carries a voucher; failure never does.
    pub fn validate(&self, reference: &str) -> Result<(), DatabaseError> {
        match (self.status, &self.voucher) {
            (PaymentStatus::Processing, _) => Err(DatabaseError::invalid_transition(format!(
                "{}: processing is not a terminal status",
                reference
            ))),
            (PaymentStatus::Successful, None) => Err(DatabaseError::invalid_transition(format!(
                "{}: successful payments must carry a voucher",
                reference
            ))),
            (PaymentStatus::Failed, Some(_)) => Err(DatabaseError::invalid_transition(format!(
                "{}: failed payments cannot carry a voucher",
                reference
            ))),
            _ => Ok(()),
        }
    }
}

/// Result of [`PaymentRecordStore::transition_to_terminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub record: PaymentRecord,
    /// False when the record was already terminal and left untouched.
    pub applied: bool,
}

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

#[cfg(feature = "database")]
#[derive(Debug, FromRow)]
struct PaymentRecordRow {
    reference: String,
    phone: String,
    amount: i64,
    transaction_id: Option<String>,
    status: String,
    voucher: Option<String>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[cfg(feature = "database")]
impl TryFrom<PaymentRecordRow> for PaymentRecord {
    type Error = DatabaseError;

    fn try_from(row: PaymentRecordRow) -> Result<Self, Self::Error> {
        Ok(PaymentRecord {
            status: row.status.parse()?,
            failure_reason: row
                .failure_reason
                .as_deref()
                .map(FailureReason::from_str)
                .transpose()?,
            reference: row.reference,
            phone: row.phone,
            amount: row.amount,
            transaction_id: row.transaction_id,
            voucher: row.voucher,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(feature = "database")]
const RECORD_COLUMNS: &str = "reference, phone, amount, transaction_id, status, voucher, \
     failure_reason, created_at, updated_at";

/// Repository for payment records
#[cfg(feature = "database")]
pub struct PaymentRecordRepository {
    pool: PgPool,
}

#[cfg(feature = "database")]
impl PaymentRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        clause: &str,
        value: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM payment_records WHERE {} LIMIT 1",
            RECORD_COLUMNS, clause
        );
        sqlx::query_as::<_, PaymentRecordRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .map(PaymentRecord::try_from)
            .transpose()
    }
}

#[cfg(feature = "database")]
#[async_trait]
impl PaymentRecordStore for PaymentRecordRepository {
    async fn create(
        &self,
        reference: &str,
        phone: &str,
        amount: i64,
        transaction_id: Option<&str>,
    ) -> Result<PaymentRecord, DatabaseError> {
        let sql = format!(
            "INSERT INTO payment_records (reference, phone, amount, transaction_id, status)
             VALUES ($1, $2, $3, $4, 'processing')
             RETURNING {}",
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, PaymentRecordRow>(&sql)
            .bind(reference)
            .bind(phone)
            .bind(amount)
            .bind(transaction_id)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?
            .try_into()
    }

    async fn get(&self, reference: &str) -> Result<PaymentRecord, DatabaseError> {
        self.fetch_one_where("reference = $1", reference)
            .await?
            .ok_or_else(|| DatabaseError::not_found("payment_record", reference))
    }

    async fn get_by_phone(&self, phone: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.fetch_one_where("phone = $1 ORDER BY created_at DESC", phone)
            .await
    }

    async fn latest_issued_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.fetch_one_where(
            "phone = $1 AND status = 'successful' AND voucher IS NOT NULL ORDER BY updated_at DESC",
            phone,
        )
        .await
    }

    async fn transition_to_terminal(
        &self,
        reference: &str,
        update: TerminalUpdate,
    ) -> Result<TransitionOutcome, DatabaseError> {
        update.validate(reference)?;

        let sql = format!(
            "UPDATE payment_records
             SET status = $2, voucher = $3, failure_reason = $4, updated_at = NOW()
             WHERE reference = $1 AND status = 'processing'
             RETURNING {}",
            RECORD_COLUMNS
        );
        let updated = sqlx::query_as::<_, PaymentRecordRow>(&sql)
            .bind(reference)
            .bind(update.status.as_str())
            .bind(update.voucher.as_deref())
            .bind(update.failure_reason.map(|r| r.as_str()))
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        match updated {
            Some(row) => Ok(TransitionOutcome {
                record: row.try_into()?,
                applied: true,
            }),
            // Lost the race or already terminal: report the winner's state.
            None => Ok(TransitionOutcome {
                record: self.get(reference).await?,
                applied: false,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            PaymentStatus::Processing,
            PaymentStatus::Successful,
            PaymentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("pending".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn terminal_update_rules() {
        assert!(TerminalUpdate::successful("V-1").validate("r").is_ok());
        assert!(TerminalUpdate::failed(FailureReason::ProviderRejected)
            .validate("r")
            .is_ok());

        let no_voucher = TerminalUpdate {
            status: PaymentStatus::Successful,
            voucher: None,
            failure_reason: None,
        };
        assert!(no_voucher.validate("r").is_err());

        let back_to_processing = TerminalUpdate {
            status: PaymentStatus::Processing,
            voucher: None,
            failure_reason: None,
        };
        assert!(back_to_processing.validate("r").is_err());
    }

    #[test]
    fn manual_review_reasons() {
        assert!(FailureReason::NoVoucherAvailable.needs_manual_review());
        assert!(FailureReason::AmountMismatch.needs_manual_review());
        assert!(!FailureReason::ProviderRejected.needs_manual_review());
        assert!(!FailureReason::ClientTimeout.needs_manual_review());
    }
}
