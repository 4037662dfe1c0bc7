use crate::config::PaymentLimits;
use crate::database::error::DatabaseError;
use crate::database::repository::{JobQueue, PaymentRecordStore, VoucherInventory};
use crate::database::Stores;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::logging::mask_phone;
use crate::payments::phone::{is_valid_normalized, normalize_phone};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::CollectionRequest;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedPayment {
    pub reference: String,
    pub transaction_uuid: Option<String>,
    pub status: String,
    pub requested_amount: i64,
    pub provider_amount: Option<i64>,
    pub amount_match: bool,
}

pub struct PaymentInitiationService {
    payments: Arc<dyn PaymentRecordStore>,
    jobs: Arc<dyn JobQueue>,
    vouchers: Arc<dyn VoucherInventory>,
    provider: Arc<dyn PaymentProvider>,
    limits: PaymentLimits,
    max_retries: i32,
}

impl PaymentInitiationService {
    pub fn new(
        stores: &Stores,
        provider: Arc<dyn PaymentProvider>,
        limits: PaymentLimits,
        max_retries: i32,
    ) -> Self {
        Self {
            payments: stores.payments.clone(),
            jobs: stores.jobs.clone(),
            vouchers: stores.vouchers.clone(),
            provider,
            limits,
            max_retries,
        }
    }

    /// Number of unused vouchers in a tier.
    pub async fn availability(&self, amount: i64) -> AppResult<i64> {
        self.check_amount(amount)?;
        Ok(self.vouchers.count_unused(amount).await?)
    }

    /// Validates, charges the customer's wallet and queues reconciliation.
    pub async fn initiate(&self, raw_phone: &str, amount: i64) -> AppResult<InitiatedPayment> {
        if raw_phone.trim().is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "phone".to_string(),
            }));
        }
        let phone = normalize_phone(raw_phone);
        if !is_valid_normalized(&phone) {
            return Err(AppError::validation(ValidationError::InvalidPhone {
                phone: mask_phone(&phone),
                reason: "expected a mobile number such as 0700000000".to_string(),
            }));
        }
        self.check_amount(amount)?;

        // Never collect money for a tier that cannot be fulfilled.
        if self.vouchers.count_unused(amount).await? == 0 {
            return Err(AppError::domain(DomainError::NoVoucherAvailable { amount }));
        }

        let reference = Uuid::new_v4().to_string();
        let response = self
            .provider
            .initiate_collection(CollectionRequest::voucher_purchase(&phone, amount, &reference))
            .await
            .map_err(|e| AppError::from(e).with_context(format!("initiating {}", reference)))?;

        let transaction_id = response.transaction_id.filter(|t| !t.trim().is_empty());
        self.payments
            .create(&reference, &phone, amount, transaction_id.as_deref())
            .await
            .map_err(|e| duplicate_or(e, &reference))?;

        match &transaction_id {
            Some(tx) => {
                self.jobs
                    .enqueue(&reference, &phone, amount, tx, self.max_retries)
                    .await?;
            }
            None => warn!(
                reference = %reference,
                "provider accepted collection without a transaction id; no reconciliation job queued"
            ),
        }

        let amount_match = response.amount.map_or(true, |a| a == amount);
        if !amount_match {
            warn!(
                reference = %reference,
                requested = amount,
                provider_amount = ?response.amount,
                "provider echoed a different amount at initiation"
            );
        }

        info!(
            reference = %reference,
            phone = %mask_phone(&phone),
            amount,
            provider = %self.provider.name(),
            "💳 payment initiated"
        );

        Ok(InitiatedPayment {
            reference,
            transaction_uuid: transaction_id,
            status: response.status.unwrap_or_else(|| "processing".to_string()),
            requested_amount: amount,
            provider_amount: response.amount,
            amount_match,
        })
    }

    fn check_amount(&self, amount: i64) -> AppResult<()> {
        if amount < self.limits.min_amount || amount > self.limits.max_amount {
            return Err(AppError::validation(ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: Some(self.limits.min_amount.to_string()),
                max: Some(self.limits.max_amount.to_string()),
            }));
        }
        Ok(())
    }
}

fn duplicate_or(err: DatabaseError, reference: &str) -> AppError {
    if err.is_unique_violation() {
        AppError::domain(DomainError::DuplicateReference {
            reference: reference.to_string(),
        })
    } else {
        err.into()
    }
}
