//! Synchronous "what's my payment status" resolution.
//!
//! Runs inline with a client request. A record still `processing` is checked
//! against the provider directly so the client does not wait for the next
//! worker tick; confirmed payments go through the same fulfillment path the
//! worker uses.

use crate::database::payment_repository::{
    FailureReason, PaymentRecord, PaymentStatus, TerminalUpdate,
};
use crate::database::repository::PaymentRecordStore;
use crate::database::Stores;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::logging::mask_phone;
use crate::payments::phone::{is_valid_normalized, normalize_phone};
use crate::services::notification::NotificationService;
use crate::services::status_adapter::{InternalStatus, ProviderStatusAdapter};
use crate::services::voucher_assignment::VoucherAssignmentService;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Client view of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub reference: String,
    pub status: PaymentStatus,
    pub voucher: Option<String>,
    pub amount: i64,
    pub phone: String,
    pub failure_reason: Option<FailureReason>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PaymentRecord> for StatusView {
    fn from(record: &PaymentRecord) -> Self {
        Self {
            reference: record.reference.clone(),
            status: record.status,
            voucher: record.issued_voucher().map(str::to_string),
            amount: record.amount,
            phone: record.phone.clone(),
            failure_reason: record.failure_reason,
            message: status_message(record),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

fn status_message(record: &PaymentRecord) -> String {
    match (record.status, record.failure_reason) {
        (PaymentStatus::Processing, _) => {
            "Payment is processing. Approve the prompt on your phone".to_string()
        }
        (PaymentStatus::Successful, _) => "Payment successful. Your voucher is ready".to_string(),
        (PaymentStatus::Failed, Some(FailureReason::NoVoucherAvailable)) => {
            "Payment received, voucher pending manual follow-up".to_string()
        }
        (PaymentStatus::Failed, Some(FailureReason::AmountMismatch)) => {
            "Payment is under review. Support will contact you".to_string()
        }
        (PaymentStatus::Failed, Some(FailureReason::ClientTimeout)) => {
            "Payment timed out. Please try again".to_string()
        }
        (PaymentStatus::Failed, _) => "Payment failed. Please try again".to_string(),
    }
}

/// Result of a voucher resend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendReceipt {
    pub reference: String,
    pub voucher: String,
    pub phone: String,
}

pub struct PaymentStatusService {
    payments: Arc<dyn PaymentRecordStore>,
    adapter: Arc<ProviderStatusAdapter>,
    assignment: Arc<VoucherAssignmentService>,
    notifications: Arc<NotificationService>,
}

impl PaymentStatusService {
    pub fn new(
        stores: &Stores,
        adapter: Arc<ProviderStatusAdapter>,
        assignment: Arc<VoucherAssignmentService>,
        notifications: Arc<NotificationService>,
    ) -> Self {
        Self {
            payments: stores.payments.clone(),
            adapter,
            assignment,
            notifications,
        }
    }

    pub async fn check_by_reference(&self, reference: &str) -> AppResult<StatusView> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "reference".to_string(),
            }));
        }
        let record = self.payments.get(reference).await?;
        Ok(self.resolve(record).await)
    }

    /// Recovery for clients that lost their reference. Picks the most recent
    /// record for the phone, which may not be the payment the caller means.
    pub async fn check_by_phone(&self, phone: &str) -> AppResult<StatusView> {
        let phone = valid_phone(phone)?;
        let record = self.payments.get_by_phone(&phone).await?.ok_or_else(|| {
            AppError::domain(DomainError::PaymentNotFound {
                reference: format!("phone {}", mask_phone(&phone)),
            })
        })?;
        Ok(self.resolve(record).await)
    }

    /// The client stopped polling. Idempotent; a terminal record is returned as is.
    pub async fn expire_client_poll(&self, reference: &str) -> AppResult<StatusView> {
        let outcome = self
            .payments
            .transition_to_terminal(
                reference.trim(),
                TerminalUpdate::failed(FailureReason::ClientTimeout),
            )
            .await?;
        if outcome.applied {
            info!(reference = %reference, "payment marked failed after client poll timeout");
        }
        Ok(StatusView::from(&outcome.record))
    }

    pub async fn resend_last_voucher(&self, phone: &str) -> AppResult<ResendReceipt> {
        let phone = valid_phone(phone)?;
        let record = self
            .payments
            .latest_issued_for_phone(&phone)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::VoucherNotFound {
                    phone: mask_phone(&phone),
                })
            })?;
        let voucher = record.issued_voucher().unwrap_or_default().to_string();

        self.notifications
            .send_voucher(&record.phone, &voucher, &record.reference, true)
            .await?;

        Ok(ResendReceipt {
            reference: record.reference,
            voucher,
            phone: record.phone,
        })
    }

    /// Never fails: provider and storage errors fall back to the record as read.
    async fn resolve(&self, record: PaymentRecord) -> StatusView {
        if record.is_terminal() {
            return StatusView::from(&record);
        }
        let Some(transaction_id) = record.transaction_id.clone() else {
            return StatusView::from(&record);
        };

        let check = self.adapter.check_status(&transaction_id).await;
        match check.status {
            InternalStatus::Processing => StatusView::from(&record),
            InternalStatus::Successful => {
                match self
                    .assignment
                    .fulfill_payment(&record, check.confirmed_amount)
                    .await
                {
                    Ok(outcome) => StatusView::from(outcome.record()),
                    Err(e) => {
                        warn!(reference = %record.reference, error = %e, "fulfillment during status check failed");
                        StatusView::from(&record)
                    }
                }
            }
            InternalStatus::Failed => match self
                .payments
                .transition_to_terminal(
                    &record.reference,
                    TerminalUpdate::failed(FailureReason::ProviderRejected),
                )
                .await
            {
                Ok(outcome) => StatusView::from(&outcome.record),
                Err(e) => {
                    warn!(reference = %record.reference, error = %e, "failed to record provider rejection");
                    StatusView::from(&record)
                }
            },
        }
    }
}

fn valid_phone(raw: &str) -> AppResult<String> {
    if raw.trim().is_empty() {
        return Err(AppError::validation(ValidationError::MissingField {
            field: "phone".to_string(),
        }));
    }
    let phone = normalize_phone(raw);
    if !is_valid_normalized(&phone) {
        return Err(AppError::validation(ValidationError::InvalidPhone {
            phone: mask_phone(&phone),
            reason: "expected a mobile number such as 0700000000".to_string(),
        }));
    }
    Ok(phone)
}
