//! Storage seams for the reconciliation core.
//!
//! Each trait has a Postgres implementation (sqlx) and an in-memory one
//! ([`crate::database::memory::InMemoryStore`]). Services only ever see
//! `Arc<dyn Trait>`, so tests and `SKIP_EXTERNALS` mode swap storage freely.

use crate::database::error::DatabaseError;
use crate::database::job_repository::{JobStatus, JobUpdate, PaymentJob};
use crate::database::payment_repository::{PaymentRecord, TerminalUpdate, TransitionOutcome};
use crate::database::transaction_repository::TransactionLogEntry;
use crate::database::voucher_repository::{ClaimOutcome, Voucher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Durable payment lifecycle state, keyed by reference.
#[async_trait]
pub trait PaymentRecordStore: Send + Sync {
    /// Creates a record in `processing`. Fails with a unique violation when the
    /// reference already exists.
    async fn create(
        &self,
        reference: &str,
        phone: &str,
        amount: i64,
        transaction_id: Option<&str>,
    ) -> Result<PaymentRecord, DatabaseError>;

    /// Returns the record or a `NotFound` error.
    async fn get(&self, reference: &str) -> Result<PaymentRecord, DatabaseError>;

    /// Most recent record for a phone, open or terminal.
    async fn get_by_phone(&self, phone: &str) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Most recent successful record with a voucher for a phone.
    async fn latest_issued_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Moves a `processing` record to a terminal state in one guarded step.
    ///
    /// If the record is already terminal it is returned unchanged with
    /// `applied == false`; racing finalizers never overwrite each other.
    async fn transition_to_terminal(
        &self,
        reference: &str,
        update: TerminalUpdate,
    ) -> Result<TransitionOutcome, DatabaseError>;
}

/// Live "keep checking this payment" work items.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(
        &self,
        reference: &str,
        phone: &str,
        amount: i64,
        transaction_uuid: &str,
        max_retries: i32,
    ) -> Result<PaymentJob, DatabaseError>;

    /// Hands out the oldest pending job, marking it `processing` first.
    ///
    /// Persistence failures are logged and reported as "no job" so the next
    /// scheduler tick simply tries again.
    async fn dequeue_oldest_pending(&self) -> Option<PaymentJob>;

    async fn mark_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<PaymentJob, DatabaseError>;

    /// Removes the job from the queue. Returns false if it was already gone.
    async fn retire(&self, job_id: Uuid) -> Result<bool, DatabaseError>;

    /// Newest first.
    async fn list_all(&self, status: Option<JobStatus>) -> Result<Vec<PaymentJob>, DatabaseError>;

    /// Deletes completed/failed jobs last touched before `older_than`.
    async fn sweep_stale(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError>;

    /// Returns `processing` jobs last touched before `older_than` to `pending`.
    async fn requeue_stalled(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError>;
}

/// Voucher stock per face value.
#[async_trait]
pub trait VoucherInventory: Send + Sync {
    async fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Voucher>, DatabaseError>;

    /// Picks the oldest unused voucher of exactly `amount` and binds it to
    /// `reference` in one step. Concurrent callers never receive the same
    /// voucher, and a reference that already holds one gets it back.
    async fn claim_next(
        &self,
        amount: i64,
        phone: &str,
        reference: &str,
    ) -> Result<ClaimOutcome, DatabaseError>;

    async fn count_unused(&self, amount: i64) -> Result<i64, DatabaseError>;

    /// Inserts new unused vouchers, skipping codes that already exist.
    async fn add_vouchers(&self, amount: i64, codes: &[String]) -> Result<u64, DatabaseError>;
}

/// Append-mostly log of fulfilled payments for reporting.
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Upsert keyed by reference.
    async fn record(&self, entry: TransactionLogEntry) -> Result<(), DatabaseError>;

    async fn find(&self, reference: &str) -> Result<Option<TransactionLogEntry>, DatabaseError>;
}
