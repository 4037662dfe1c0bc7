//! At-most-once voucher issuance keyed by payment reference.
//!
//! The worker and client polls both call [`VoucherAssignmentService::fulfill_payment`]
//! and may race freely: the conditional voucher claim and the guarded terminal
//! transition decide a single winner, and losers read back the winner's result.

use crate::database::error::DatabaseError;
use crate::database::payment_repository::{
    FailureReason, PaymentRecord, PaymentStatus, TerminalUpdate,
};
use crate::database::repository::{PaymentRecordStore, TransactionLog, VoucherInventory};
use crate::database::transaction_repository::TransactionLogEntry;
use crate::database::voucher_repository::{ClaimOutcome, Voucher};
use crate::database::Stores;
use crate::logging::{mask_phone, mask_voucher};
use crate::services::notification::{NotificationService, OperationalAlert};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("no unused voucher for amount {amount}")]
    NoVoucherAvailable { amount: i64 },
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// This call claimed the voucher.
    Assigned(Voucher),
    /// A voucher was already bound to the reference.
    AlreadyAssigned(Voucher),
}

impl Assignment {
    pub fn voucher(&self) -> &Voucher {
        match self {
            Assignment::Assigned(v) | Assignment::AlreadyAssigned(v) => v,
        }
    }
}

/// How a confirmed payment ended up. Every variant carries the record as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    Issued { record: PaymentRecord, voucher: String },
    /// Another path issued the voucher first.
    AlreadyIssued { record: PaymentRecord, voucher: String },
    NoVoucherAvailable { record: PaymentRecord },
    AmountMismatch { record: PaymentRecord, confirmed: i64 },
    /// The record was already failed; nothing was issued.
    AlreadyFailed { record: PaymentRecord },
}

impl FulfillmentOutcome {
    pub fn record(&self) -> &PaymentRecord {
        match self {
            FulfillmentOutcome::Issued { record, .. }
            | FulfillmentOutcome::AlreadyIssued { record, .. }
            | FulfillmentOutcome::NoVoucherAvailable { record }
            | FulfillmentOutcome::AmountMismatch { record, .. }
            | FulfillmentOutcome::AlreadyFailed { record } => record,
        }
    }

    pub fn voucher(&self) -> Option<&str> {
        match self {
            FulfillmentOutcome::Issued { voucher, .. }
            | FulfillmentOutcome::AlreadyIssued { voucher, .. } => Some(voucher),
            _ => None,
        }
    }
}

pub struct VoucherAssignmentService {
    payments: Arc<dyn PaymentRecordStore>,
    vouchers: Arc<dyn VoucherInventory>,
    transactions: Arc<dyn TransactionLog>,
    notifications: Arc<NotificationService>,
}

impl VoucherAssignmentService {
    pub fn new(stores: &Stores, notifications: Arc<NotificationService>) -> Self {
        Self {
            payments: stores.payments.clone(),
            vouchers: stores.vouchers.clone(),
            transactions: stores.transactions.clone(),
            notifications,
        }
    }

    /// Binds one unused voucher of exactly `amount` to `reference`.
    ///
    /// Re-entry with the same reference returns the bound voucher unchanged.
    pub async fn assign_voucher(
        &self,
        reference: &str,
        phone: &str,
        amount: i64,
    ) -> Result<Assignment, AssignmentError> {
        if let Some(bound) = self.vouchers.find_by_payment_reference(reference).await? {
            return Ok(Assignment::AlreadyAssigned(bound));
        }

        match self.vouchers.claim_next(amount, phone, reference).await? {
            ClaimOutcome::Claimed(voucher) => {
                info!(
                    reference = %reference,
                    phone = %mask_phone(phone),
                    voucher = %mask_voucher(&voucher.code),
                    amount,
                    "voucher claimed"
                );
                Ok(Assignment::Assigned(voucher))
            }
            ClaimOutcome::ReferenceBound(voucher) => Ok(Assignment::AlreadyAssigned(voucher)),
            ClaimOutcome::Exhausted => Err(AssignmentError::NoVoucherAvailable { amount }),
        }
    }

    /// Completes a payment the provider reported as successful.
    ///
    /// `confirmed_amount` is the provider's view of what was collected; a
    /// mismatch with the requested amount stops issuance.
    pub async fn fulfill_payment(
        &self,
        record: &PaymentRecord,
        confirmed_amount: Option<i64>,
    ) -> Result<FulfillmentOutcome, AssignmentError> {
        if let Some(voucher) = record.issued_voucher() {
            return Ok(FulfillmentOutcome::AlreadyIssued {
                voucher: voucher.to_string(),
                record: record.clone(),
            });
        }
        if record.status == PaymentStatus::Failed {
            return Ok(self.already_failed(record.clone()).await);
        }

        if let Some(confirmed) = confirmed_amount.filter(|c| *c != record.amount) {
            let outcome = self
                .payments
                .transition_to_terminal(
                    &record.reference,
                    TerminalUpdate::failed(FailureReason::AmountMismatch),
                )
                .await?;
            if !outcome.applied {
                return Ok(self.settled_elsewhere(outcome.record, None).await);
            }
            warn!(
                reference = %record.reference,
                requested = record.amount,
                confirmed,
                "amount mismatch; voucher withheld"
            );
            self.notifications
                .alert(OperationalAlert::AmountMismatch {
                    reference: record.reference.clone(),
                    requested: record.amount,
                    confirmed,
                })
                .await;
            return Ok(FulfillmentOutcome::AmountMismatch {
                record: outcome.record,
                confirmed,
            });
        }

        let assignment = match self
            .assign_voucher(&record.reference, &record.phone, record.amount)
            .await
        {
            Ok(assignment) => assignment,
            Err(AssignmentError::NoVoucherAvailable { amount }) => {
                return self.out_of_stock(record, amount).await;
            }
            Err(e) => return Err(e),
        };

        let code = assignment.voucher().code.clone();
        let outcome = self
            .payments
            .transition_to_terminal(&record.reference, TerminalUpdate::successful(code.clone()))
            .await?;
        if !outcome.applied {
            return Ok(self.settled_elsewhere(outcome.record, Some(&code)).await);
        }

        self.after_issue(&outcome.record, &code).await;
        Ok(FulfillmentOutcome::Issued {
            record: outcome.record,
            voucher: code,
        })
    }

    async fn out_of_stock(
        &self,
        record: &PaymentRecord,
        amount: i64,
    ) -> Result<FulfillmentOutcome, AssignmentError> {
        let outcome = self
            .payments
            .transition_to_terminal(
                &record.reference,
                TerminalUpdate::failed(FailureReason::NoVoucherAvailable),
            )
            .await?;
        if !outcome.applied {
            return Ok(self.settled_elsewhere(outcome.record, None).await);
        }
        self.notifications
            .alert(OperationalAlert::InventoryExhausted {
                reference: record.reference.clone(),
                amount,
            })
            .await;
        Ok(FulfillmentOutcome::NoVoucherAvailable {
            record: outcome.record,
        })
    }

    /// A racing path finalised the record first. `claimed` is a voucher this
    /// call holds for the reference, if any.
    async fn settled_elsewhere(
        &self,
        record: PaymentRecord,
        claimed: Option<&str>,
    ) -> FulfillmentOutcome {
        if let Some(voucher) = record.issued_voucher() {
            return FulfillmentOutcome::AlreadyIssued {
                voucher: voucher.to_string(),
                record: record.clone(),
            };
        }
        if let Some(code) = claimed {
            warn!(reference = %record.reference, voucher = %mask_voucher(code), "voucher bound to a failed payment");
            self.notifications
                .alert(OperationalAlert::OrphanedVoucher {
                    reference: record.reference.clone(),
                    voucher: code.to_string(),
                })
                .await;
        }
        self.already_failed(record).await
    }

    async fn already_failed(&self, record: PaymentRecord) -> FulfillmentOutcome {
        if record.failure_reason == Some(FailureReason::ClientTimeout) {
            self.notifications
                .alert(OperationalAlert::PaidAfterAbandon {
                    reference: record.reference.clone(),
                    amount: record.amount,
                })
                .await;
        }
        FulfillmentOutcome::AlreadyFailed { record }
    }

    /// SMS and transaction log. Neither can undo the issuance.
    async fn after_issue(&self, record: &PaymentRecord, code: &str) {
        let _ = self
            .notifications
            .send_voucher(&record.phone, code, &record.reference, false)
            .await;

        let entry = TransactionLogEntry::issued(&record.reference, &record.phone, record.amount, code);
        if let Err(e) = self.transactions.record(entry).await {
            warn!(reference = %record.reference, error = %e, "transaction log write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::error::DatabaseErrorKind;
    use crate::database::memory::InMemoryStore;
    use crate::services::notification::{LogSmsSender, SmsError, SmsSender};
    use async_trait::async_trait;

    struct DownSms;

    #[async_trait]
    impl SmsSender for DownSms {
        async fn send(&self, _phone: &str, _message: &str) -> Result<(), SmsError> {
            Err(SmsError::Transport("connection refused".to_string()))
        }
    }

    struct ReadOnlyLog;

    #[async_trait]
    impl TransactionLog for ReadOnlyLog {
        async fn record(&self, _entry: TransactionLogEntry) -> Result<(), DatabaseError> {
            Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: "transaction log offline".to_string(),
            }))
        }

        async fn find(&self, _reference: &str) -> Result<Option<TransactionLogEntry>, DatabaseError> {
            Ok(None)
        }
    }

    struct Fixture {
        store: Arc<InMemoryStore>,
        sms: Arc<LogSmsSender>,
        notifications: Arc<NotificationService>,
        service: VoucherAssignmentService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let sms = Arc::new(LogSmsSender::new());
        let notifications = Arc::new(NotificationService::new(sms.clone()));
        let service =
            VoucherAssignmentService::new(&Stores::in_memory(store.clone()), notifications.clone());
        Fixture {
            store,
            sms,
            notifications,
            service,
        }
    }

    async fn record(store: &InMemoryStore, reference: &str, amount: i64) -> PaymentRecord {
        store
            .create(reference, "+256700000001", amount, Some("tx-1"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn assigns_once_and_returns_same_code_on_reentry() {
        let f = fixture();
        f.store.add_vouchers(1000, &["WIFI-A".to_string()]).await.unwrap();

        let first = f
            .service
            .assign_voucher("ref-1", "+256700000001", 1000)
            .await
            .unwrap();
        assert!(matches!(first, Assignment::Assigned(_)));

        let second = f
            .service
            .assign_voucher("ref-1", "+256700000001", 1000)
            .await
            .unwrap();
        assert!(matches!(second, Assignment::AlreadyAssigned(_)));
        assert_eq!(first.voucher().code, second.voucher().code);

        let stored = f.store.voucher("WIFI-A").await.unwrap();
        assert!(stored.used);
        assert_eq!(stored.assigned_to.as_deref(), Some("+256700000001"));
        assert_eq!(stored.payment_reference.as_deref(), Some("ref-1"));
    }

    #[tokio::test]
    async fn empty_tier_reports_no_voucher() {
        let f = fixture();
        f.store.add_vouchers(1000, &["WIFI-A".to_string()]).await.unwrap();

        let err = f
            .service
            .assign_voucher("ref-1", "+256700000001", 2500)
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::NoVoucherAvailable { amount: 2500 }));
        assert!(!f.store.voucher("WIFI-A").await.unwrap().used);
    }

    #[tokio::test]
    async fn fulfill_issues_and_notifies() {
        let f = fixture();
        f.store.add_vouchers(1000, &["WIFI-A".to_string()]).await.unwrap();
        let rec = record(&f.store, "ref-1", 1000).await;

        let outcome = f.service.fulfill_payment(&rec, Some(1000)).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::Issued { .. }));
        assert_eq!(outcome.voucher(), Some("WIFI-A"));
        assert_eq!(outcome.record().status, PaymentStatus::Successful);

        let sent = f.sms.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "Your wifi code WIFI-A. Ref: ref-1");
        assert!(f.store.find("ref-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_record_reads_back_winner() {
        let f = fixture();
        f.store
            .add_vouchers(1000, &["WIFI-A".to_string(), "WIFI-B".to_string()])
            .await
            .unwrap();
        let stale = record(&f.store, "ref-1", 1000).await;

        let first = f.service.fulfill_payment(&stale, None).await.unwrap();
        let second = f.service.fulfill_payment(&stale, None).await.unwrap();

        assert!(matches!(second, FulfillmentOutcome::AlreadyIssued { .. }));
        assert_eq!(first.voucher(), second.voucher());
        assert_eq!(f.store.count_unused(1000).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn amount_mismatch_withholds_voucher() {
        let f = fixture();
        f.store.add_vouchers(1000, &["WIFI-A".to_string()]).await.unwrap();
        let rec = record(&f.store, "ref-1", 1000).await;

        let outcome = f.service.fulfill_payment(&rec, Some(1500)).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::AmountMismatch { confirmed: 1500, .. }));
        assert_eq!(
            outcome.record().failure_reason,
            Some(FailureReason::AmountMismatch)
        );
        assert!(!f.store.voucher("WIFI-A").await.unwrap().used);
        assert_eq!(f.notifications.recent_alerts().await[0].kind(), "amount_mismatch");
    }

    #[tokio::test]
    async fn exhausted_tier_fails_record_and_alerts() {
        let f = fixture();
        let rec = record(&f.store, "ref-1", 2500).await;

        let outcome = f.service.fulfill_payment(&rec, Some(2500)).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::NoVoucherAvailable { .. }));
        let stored = f.store.get("ref-1").await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.failure_reason, Some(FailureReason::NoVoucherAvailable));
        assert_eq!(
            f.notifications.recent_alerts().await[0].kind(),
            "inventory_exhausted"
        );
    }

    #[tokio::test]
    async fn late_success_after_client_timeout_raises_alert() {
        let f = fixture();
        f.store.add_vouchers(1000, &["WIFI-A".to_string()]).await.unwrap();
        let rec = record(&f.store, "ref-1", 1000).await;
        let failed = f
            .store
            .transition_to_terminal("ref-1", TerminalUpdate::failed(FailureReason::ClientTimeout))
            .await
            .unwrap()
            .record;

        let outcome = f.service.fulfill_payment(&failed, Some(1000)).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::AlreadyFailed { .. }));
        assert!(!f.store.voucher("WIFI-A").await.unwrap().used);

        // A stale processing snapshot claims a voucher, then loses the transition.
        let outcome = f.service.fulfill_payment(&rec, Some(1000)).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::AlreadyFailed { .. }));
        let kinds: Vec<_> = f
            .notifications
            .recent_alerts()
            .await
            .iter()
            .map(|a| a.kind())
            .collect();
        assert!(kinds.contains(&"paid_after_abandon"));
        assert!(kinds.contains(&"orphaned_voucher"));
    }

    #[tokio::test]
    async fn concurrent_fulfillment_binds_exactly_one_voucher() {
        let f = fixture();
        let codes: Vec<String> = (0..5).map(|i| format!("WIFI-{}", i)).collect();
        f.store.add_vouchers(1000, &codes).await.unwrap();
        let rec = record(&f.store, "ref-1", 1000).await;
        let service = Arc::new(f.service);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let rec = rec.clone();
                tokio::spawn(async move { service.fulfill_payment(&rec, Some(1000)).await })
            })
            .collect();

        let mut issued = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            issued.push(outcome.voucher().map(str::to_string));
        }
        issued.dedup();
        assert_eq!(issued.len(), 1);
        assert!(issued[0].is_some());
        assert_eq!(f.store.count_unused(1000).await.unwrap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_buyers_each_get_a_voucher() {
        let f = fixture();
        let codes: Vec<String> = (0..3).map(|i| format!("WIFI-{}", i)).collect();
        f.store.add_vouchers(1000, &codes).await.unwrap();
        let mut records = Vec::new();
        for i in 0..3 {
            records.push(record(&f.store, &format!("ref-{i}"), 1000).await);
        }
        let service = Arc::new(f.service);

        let handles: Vec<_> = records
            .into_iter()
            .map(|rec| {
                let service = service.clone();
                tokio::spawn(async move { service.fulfill_payment(&rec, Some(1000)).await })
            })
            .collect();

        let mut issued = std::collections::HashSet::new();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(matches!(outcome, FulfillmentOutcome::Issued { .. }));
            assert!(issued.insert(outcome.voucher().unwrap().to_string()));
        }
        assert_eq!(issued.len(), 3);
        assert_eq!(f.store.count_unused(1000).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sms_outage_keeps_issuance() {
        let store = Arc::new(InMemoryStore::new());
        let notifications = Arc::new(NotificationService::new(Arc::new(DownSms)));
        let service = VoucherAssignmentService::new(&Stores::in_memory(store.clone()), notifications);
        store.add_vouchers(1000, &["WIFI-A".to_string()]).await.unwrap();
        let rec = record(&store, "ref-1", 1000).await;

        let outcome = service.fulfill_payment(&rec, Some(1000)).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::Issued { .. }));

        let stored = store.get("ref-1").await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Successful);
        assert_eq!(stored.voucher.as_deref(), Some("WIFI-A"));
        assert!(store.voucher("WIFI-A").await.unwrap().used);
        assert!(store.find("ref-1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn transaction_log_outage_keeps_issuance() {
        let store = Arc::new(InMemoryStore::new());
        let sms = Arc::new(LogSmsSender::new());
        let notifications = Arc::new(NotificationService::new(sms.clone()));
        let stores = Stores {
            transactions: Arc::new(ReadOnlyLog),
            ..Stores::in_memory(store.clone())
        };
        let service = VoucherAssignmentService::new(&stores, notifications);
        store.add_vouchers(1000, &["WIFI-A".to_string()]).await.unwrap();
        let rec = record(&store, "ref-1", 1000).await;

        let outcome = service.fulfill_payment(&rec, Some(1000)).await.unwrap();
        assert!(matches!(outcome, FulfillmentOutcome::Issued { .. }));

        let stored = store.get("ref-1").await.unwrap();
        assert_eq!(stored.status, PaymentStatus::Successful);
        assert_eq!(stored.voucher.as_deref(), Some("WIFI-A"));
        assert!(store.voucher("WIFI-A").await.unwrap().used);
        assert_eq!(sms.sent().await.len(), 1);
        assert!(store.find("ref-1").await.unwrap().is_none());
    }
}
