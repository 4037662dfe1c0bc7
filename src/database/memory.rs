//! In-process implementations of the storage traits.
//!
//! Used by the test suites and by `SKIP_EXTERNALS` mode. Each collection sits
//! behind its own async mutex; the voucher claim and the terminal transition
//! happen entirely under one lock, which gives the same conditional-update
//! guarantees as the guarded SQL statements.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::job_repository::{JobStatus, JobUpdate, PaymentJob};
use crate::database::payment_repository::{
    PaymentRecord, PaymentStatus, TerminalUpdate, TransitionOutcome,
};
use crate::database::repository::{JobQueue, PaymentRecordStore, TransactionLog, VoucherInventory};
use crate::database::transaction_repository::TransactionLogEntry;
use crate::database::voucher_repository::{ClaimOutcome, Voucher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    payments: Mutex<Vec<PaymentRecord>>,
    jobs: Mutex<Vec<PaymentJob>>,
    vouchers: Mutex<Vec<Voucher>>,
    transactions: Mutex<HashMap<String, TransactionLogEntry>>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a storage outage: every call fails with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), DatabaseError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "in-memory store marked unavailable".to_string(),
            }));
        }
        Ok(())
    }

    /// Snapshot of a voucher by code.
    pub async fn voucher(&self, code: &str) -> Option<Voucher> {
        self.vouchers
            .lock()
            .await
            .iter()
            .find(|v| v.code == code)
            .cloned()
    }

    /// Snapshot of all vouchers.
    pub async fn vouchers(&self) -> Vec<Voucher> {
        self.vouchers.lock().await.clone()
    }
}

#[async_trait]
impl PaymentRecordStore for InMemoryStore {
    async fn create(
        &self,
        reference: &str,
        phone: &str,
        amount: i64,
        transaction_id: Option<&str>,
    ) -> Result<PaymentRecord, DatabaseError> {
        self.ensure_available()?;
        let mut payments = self.payments.lock().await;
        if payments.iter().any(|p| p.reference == reference) {
            return Err(DatabaseError::unique_violation("payment_records_pkey"));
        }
        let now = Utc::now();
        let record = PaymentRecord {
            reference: reference.to_string(),
            phone: phone.to_string(),
            amount,
            transaction_id: transaction_id.map(str::to_string),
            status: PaymentStatus::Processing,
            voucher: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        };
        payments.push(record.clone());
        Ok(record)
    }

    async fn get(&self, reference: &str) -> Result<PaymentRecord, DatabaseError> {
        self.ensure_available()?;
        self.payments
            .lock()
            .await
            .iter()
            .find(|p| p.reference == reference)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("payment_record", reference))
    }

    async fn get_by_phone(&self, phone: &str) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.ensure_available()?;
        Ok(self
            .payments
            .lock()
            .await
            .iter()
            .filter(|p| p.phone == phone)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn latest_issued_for_phone(
        &self,
        phone: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        self.ensure_available()?;
        Ok(self
            .payments
            .lock()
            .await
            .iter()
            .filter(|p| p.phone == phone && p.issued_voucher().is_some())
            .max_by_key(|p| p.updated_at)
            .cloned())
    }

    async fn transition_to_terminal(
        &self,
        reference: &str,
        update: TerminalUpdate,
    ) -> Result<TransitionOutcome, DatabaseError> {
        self.ensure_available()?;
        update.validate(reference)?;

        let mut payments = self.payments.lock().await;
        let record = payments
            .iter_mut()
            .find(|p| p.reference == reference)
            .ok_or_else(|| DatabaseError::not_found("payment_record", reference))?;

        if record.is_terminal() {
            return Ok(TransitionOutcome {
                record: record.clone(),
                applied: false,
            });
        }

        record.status = update.status;
        record.voucher = update.voucher;
        record.failure_reason = update.failure_reason;
        record.updated_at = Utc::now();
        Ok(TransitionOutcome {
            record: record.clone(),
            applied: true,
        })
    }
}

#[async_trait]
impl JobQueue for InMemoryStore {
    async fn enqueue(
        &self,
        reference: &str,
        phone: &str,
        amount: i64,
        transaction_uuid: &str,
        max_retries: i32,
    ) -> Result<PaymentJob, DatabaseError> {
        self.ensure_available()?;
        let now = Utc::now();
        let job = PaymentJob {
            id: Uuid::new_v4(),
            reference: reference.to_string(),
            phone: phone.to_string(),
            amount,
            transaction_uuid: transaction_uuid.to_string(),
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries,
            last_error: None,
            created_at: now,
            updated_at: now,
            last_checked_at: None,
        };
        self.jobs.lock().await.push(job.clone());
        Ok(job)
    }

    async fn dequeue_oldest_pending(&self) -> Option<PaymentJob> {
        if let Err(e) = self.ensure_available() {
            warn!(error = %e, "failed to dequeue payment job; treating as idle");
            return None;
        }
        let mut jobs = self.jobs.lock().await;
        // Insertion order breaks created_at ties.
        let job = jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| j.created_at)?;
        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        Some(job.clone())
    }

    async fn mark_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        update: JobUpdate,
    ) -> Result<PaymentJob, DatabaseError> {
        self.ensure_available()?;
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| DatabaseError::not_found("payment_job", job_id.to_string()))?;
        let now = Utc::now();
        job.status = status;
        if let Some(retry_count) = update.retry_count {
            job.retry_count = retry_count;
        }
        if let Some(last_error) = update.last_error {
            job.last_error = Some(last_error);
        }
        job.updated_at = now;
        job.last_checked_at = Some(now);
        Ok(job.clone())
    }

    async fn retire(&self, job_id: Uuid) -> Result<bool, DatabaseError> {
        self.ensure_available()?;
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|j| j.id != job_id);
        Ok(jobs.len() < before)
    }

    async fn list_all(&self, status: Option<JobStatus>) -> Result<Vec<PaymentJob>, DatabaseError> {
        self.ensure_available()?;
        let mut jobs: Vec<PaymentJob> = self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|j| status.map_or(true, |s| j.status == s))
            .cloned()
            .collect();
        jobs.reverse();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn sweep_stale(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        self.ensure_available()?;
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|j| !(j.status.is_terminal() && j.updated_at < older_than));
        Ok((before - jobs.len()) as u64)
    }

    async fn requeue_stalled(&self, older_than: DateTime<Utc>) -> Result<u64, DatabaseError> {
        self.ensure_available()?;
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();
        let mut requeued = 0;
        for job in jobs
            .iter_mut()
            .filter(|j| j.status == JobStatus::Processing && j.updated_at < older_than)
        {
            job.status = JobStatus::Pending;
            job.updated_at = now;
            job.last_error = Some("requeued after stalled processing".to_string());
            requeued += 1;
        }
        Ok(requeued)
    }
}

#[async_trait]
impl VoucherInventory for InMemoryStore {
    async fn find_by_payment_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Voucher>, DatabaseError> {
        self.ensure_available()?;
        Ok(self
            .vouchers
            .lock()
            .await
            .iter()
            .find(|v| v.payment_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn claim_next(
        &self,
        amount: i64,
        phone: &str,
        reference: &str,
    ) -> Result<ClaimOutcome, DatabaseError> {
        self.ensure_available()?;
        let mut vouchers = self.vouchers.lock().await;

        if let Some(bound) = vouchers
            .iter()
            .find(|v| v.payment_reference.as_deref() == Some(reference))
        {
            return Ok(ClaimOutcome::ReferenceBound(bound.clone()));
        }

        let candidate = vouchers
            .iter_mut()
            .filter(|v| v.amount == amount && !v.used)
            .min_by(|a, b| (a.created_at, &a.code).cmp(&(b.created_at, &b.code)));
        match candidate {
            Some(voucher) => {
                voucher.used = true;
                voucher.assigned_to = Some(phone.to_string());
                voucher.assigned_at = Some(Utc::now());
                voucher.payment_reference = Some(reference.to_string());
                Ok(ClaimOutcome::Claimed(voucher.clone()))
            }
            None => Ok(ClaimOutcome::Exhausted),
        }
    }

    async fn count_unused(&self, amount: i64) -> Result<i64, DatabaseError> {
        self.ensure_available()?;
        Ok(self
            .vouchers
            .lock()
            .await
            .iter()
            .filter(|v| v.amount == amount && !v.used)
            .count() as i64)
    }

    async fn add_vouchers(&self, amount: i64, codes: &[String]) -> Result<u64, DatabaseError> {
        self.ensure_available()?;
        let mut vouchers = self.vouchers.lock().await;
        let now = Utc::now();
        let mut inserted = 0;
        for code in codes {
            if vouchers.iter().any(|v| &v.code == code) {
                continue;
            }
            vouchers.push(Voucher {
                code: code.clone(),
                amount,
                used: false,
                assigned_to: None,
                assigned_at: None,
                payment_reference: None,
                created_at: now,
            });
            inserted += 1;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl TransactionLog for InMemoryStore {
    async fn record(&self, entry: TransactionLogEntry) -> Result<(), DatabaseError> {
        self.ensure_available()?;
        self.transactions
            .lock()
            .await
            .insert(entry.reference.clone(), entry);
        Ok(())
    }

    async fn find(&self, reference: &str) -> Result<Option<TransactionLogEntry>, DatabaseError> {
        self.ensure_available()?;
        Ok(self.transactions.lock().await.get(reference).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::payment_repository::FailureReason;
    use chrono::Duration;
    use std::sync::Arc;

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|c| c.to_string()).collect()
    }

    #[tokio::test]
    async fn create_rejects_duplicate_reference() {
        let store = InMemoryStore::new();
        store.create("ref-1", "+256700000001", 1000, Some("tx-1")).await.unwrap();
        let err = store
            .create("ref-1", "+256700000001", 1000, Some("tx-1"))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn get_missing_reference_is_not_found() {
        let store = InMemoryStore::new();
        let err = store.get("nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn terminal_transition_is_idempotent() {
        let store = InMemoryStore::new();
        store.create("ref-1", "+256700000001", 1000, Some("tx-1")).await.unwrap();

        let first = store
            .transition_to_terminal("ref-1", TerminalUpdate::successful("V-1"))
            .await
            .unwrap();
        let second = store
            .transition_to_terminal("ref-1", TerminalUpdate::successful("V-1"))
            .await
            .unwrap();

        assert!(first.applied);
        assert!(!second.applied);
        assert_eq!(first.record, second.record);
    }

    #[tokio::test]
    async fn terminal_transition_never_overwrites_winner() {
        let store = InMemoryStore::new();
        store.create("ref-1", "+256700000001", 1000, Some("tx-1")).await.unwrap();
        store
            .transition_to_terminal("ref-1", TerminalUpdate::failed(FailureReason::ClientTimeout))
            .await
            .unwrap();

        let late = store
            .transition_to_terminal("ref-1", TerminalUpdate::successful("V-9"))
            .await
            .unwrap();
        assert!(!late.applied);
        assert_eq!(late.record.status, PaymentStatus::Failed);
        assert_eq!(late.record.voucher, None);
    }

    #[tokio::test]
    async fn phone_lookup_returns_most_recent_record() {
        let store = InMemoryStore::new();
        store.create("old", "+256700000001", 1000, None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        store.create("new", "+256700000001", 2500, None).await.unwrap();
        store.create("other", "+256700000002", 500, None).await.unwrap();

        let found = store.get_by_phone("+256700000001").await.unwrap().unwrap();
        assert_eq!(found.reference, "new");
        assert!(store.get_by_phone("+256799999999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dequeue_hands_out_oldest_pending_once() {
        let store = InMemoryStore::new();
        let first = store.enqueue("a", "+256700000001", 1000, "tx-a", 60).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let second = store.enqueue("b", "+256700000002", 1000, "tx-b", 60).await.unwrap();

        let got = store.dequeue_oldest_pending().await.unwrap();
        assert_eq!(got.id, first.id);
        assert_eq!(got.status, JobStatus::Processing);

        let next = store.dequeue_oldest_pending().await.unwrap();
        assert_eq!(next.id, second.id);
        assert!(store.dequeue_oldest_pending().await.is_none());
    }

    #[tokio::test]
    async fn dequeue_degrades_to_idle_when_storage_fails() {
        let store = InMemoryStore::new();
        store.enqueue("a", "+256700000001", 1000, "tx-a", 60).await.unwrap();
        store.set_unavailable(true);
        assert!(store.dequeue_oldest_pending().await.is_none());
    }

    #[tokio::test]
    async fn sweep_only_removes_old_terminal_jobs() {
        let store = InMemoryStore::new();
        let done = store.enqueue("a", "+256700000001", 1000, "tx-a", 60).await.unwrap();
        let live = store.enqueue("b", "+256700000002", 1000, "tx-b", 60).await.unwrap();
        store
            .mark_status(done.id, JobStatus::Failed, JobUpdate::default())
            .await
            .unwrap();

        let swept = store.sweep_stale(Utc::now() + Duration::seconds(1)).await.unwrap();
        assert_eq!(swept, 1);

        let remaining = store.list_all(None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, live.id);
    }

    #[tokio::test]
    async fn stalled_processing_jobs_return_to_pending() {
        let store = InMemoryStore::new();
        store.enqueue("a", "+256700000001", 1000, "tx-a", 60).await.unwrap();
        let job = store.dequeue_oldest_pending().await.unwrap();

        let requeued = store
            .requeue_stalled(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(requeued, 1);
        let again = store.dequeue_oldest_pending().await.unwrap();
        assert_eq!(again.id, job.id);
    }

    #[tokio::test]
    async fn claim_next_takes_oldest_and_reports_exhaustion() {
        let store = InMemoryStore::new();
        store.add_vouchers(1000, &codes(&["V-2", "V-1"])).await.unwrap();
        store.add_vouchers(2000, &codes(&["W-1"])).await.unwrap();

        let first = store.claim_next(1000, "+256700000001", "ref-1").await.unwrap();
        match first {
            ClaimOutcome::Claimed(v) => assert_eq!(v.code, "V-1"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        let second = store.claim_next(1000, "+256700000002", "ref-2").await.unwrap();
        assert!(matches!(second, ClaimOutcome::Claimed(ref v) if v.code == "V-2"));

        let third = store.claim_next(1000, "+256700000003", "ref-3").await.unwrap();
        assert_eq!(third, ClaimOutcome::Exhausted);
        assert!(!store.voucher("W-1").await.unwrap().used);

        let voucher = store.voucher("V-1").await.unwrap();
        assert_eq!(voucher.assigned_to.as_deref(), Some("+256700000001"));
        assert_eq!(voucher.payment_reference.as_deref(), Some("ref-1"));
    }

    #[tokio::test]
    async fn claim_refuses_second_voucher_for_same_reference() {
        let store = InMemoryStore::new();
        store.add_vouchers(1000, &codes(&["V-1", "V-2"])).await.unwrap();
        store.claim_next(1000, "+256700000001", "ref-1").await.unwrap();

        let outcome = store.claim_next(1000, "+256700000001", "ref-1").await.unwrap();
        match outcome {
            ClaimOutcome::ReferenceBound(v) => assert_eq!(v.code, "V-1"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(!store.voucher("V-2").await.unwrap().used);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_drain_the_tier_exactly() {
        let store = Arc::new(InMemoryStore::new());
        store
            .add_vouchers(1000, &codes(&["V-1", "V-2", "V-3", "V-4"]))
            .await
            .unwrap();

        let handles: Vec<_> = (0..6)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .claim_next(1000, "+256700000001", &format!("ref-{}", i))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut claimed = std::collections::HashSet::new();
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ClaimOutcome::Claimed(v) => assert!(claimed.insert(v.code)),
                ClaimOutcome::Exhausted => exhausted += 1,
                other => panic!("unexpected outcome: {:?}", other),
            }
        }
        assert_eq!(claimed.len(), 4);
        assert_eq!(exhausted, 2);
        assert_eq!(store.count_unused(1000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn add_vouchers_skips_existing_codes() {
        let store = InMemoryStore::new();
        assert_eq!(store.add_vouchers(500, &codes(&["A", "B"])).await.unwrap(), 2);
        assert_eq!(store.add_vouchers(500, &codes(&["B", "C"])).await.unwrap(), 1);
        assert_eq!(store.count_unused(500).await.unwrap(), 3);
        assert_eq!(store.count_unused(1000).await.unwrap(), 0);
    }
}
