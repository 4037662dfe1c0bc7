//! Provider status checks normalised to an internal tri-state.
//!
//! Anything the adapter cannot positively identify as success or failure
//! comes back as `Processing`. A single error never fails a payment.

use crate::payments::error::PaymentError;
use crate::payments::provider::PaymentProvider;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalStatus {
    Processing,
    Successful,
    Failed,
}

/// Total mapping from the provider vocabulary. Unknown strings keep waiting.
pub fn map_provider_status(raw: &str) -> InternalStatus {
    match raw.trim().to_ascii_lowercase().as_str() {
        "successful" | "completed" => InternalStatus::Successful,
        "failed" | "rejected" => InternalStatus::Failed,
        _ => InternalStatus::Processing,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCheck {
    pub status: InternalStatus,
    pub should_issue_voucher: bool,
    /// Raw vendor string, when one was returned.
    pub provider_status: Option<String>,
    pub confirmed_amount: Option<i64>,
    /// Why the result is `Processing` when no provider status was read.
    pub reason: Option<String>,
    /// Set for errors that retrying will not fix, such as rejected credentials.
    pub hard_error: bool,
}

impl StatusCheck {
    fn processing(reason: impl Into<String>, hard_error: bool) -> Self {
        Self {
            status: InternalStatus::Processing,
            should_issue_voucher: false,
            provider_status: None,
            confirmed_amount: None,
            reason: Some(reason.into()),
            hard_error,
        }
    }
}

pub struct ProviderStatusAdapter {
    provider: Arc<dyn PaymentProvider>,
    timeout: Duration,
}

impl ProviderStatusAdapter {
    pub fn new(provider: Arc<dyn PaymentProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// One bounded provider call; never retries.
    pub async fn check_status(&self, transaction_id: &str) -> StatusCheck {
        let call = self.provider.get_collection_status(transaction_id);
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::Timeout {
                seconds: self.timeout.as_secs(),
            }),
        };

        match result {
            Ok(collection) => {
                let Some(provider_status) = collection.provider_status else {
                    debug!(transaction_id, "provider returned no transaction data");
                    return StatusCheck::processing("no transaction data", false);
                };
                let status = map_provider_status(&provider_status);
                debug!(transaction_id, provider_status = %provider_status, ?status, "provider status mapped");
                StatusCheck {
                    status,
                    should_issue_voucher: status == InternalStatus::Successful,
                    provider_status: Some(provider_status),
                    confirmed_amount: collection.amount,
                    reason: None,
                    hard_error: false,
                }
            }
            Err(e) => {
                let hard_error = !e.is_retryable();
                warn!(
                    transaction_id,
                    provider = %self.provider.name(),
                    error = %e,
                    hard_error,
                    "provider status check failed; treating as processing"
                );
                StatusCheck::processing(e.to_string(), hard_error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::providers::sandbox::{SandboxProvider, SandboxReply};

    #[test]
    fn mapping_covers_known_and_unknown_strings() {
        let cases = [
            ("successful", InternalStatus::Successful),
            ("completed", InternalStatus::Successful),
            ("SUCCESSFUL", InternalStatus::Successful),
            ("failed", InternalStatus::Failed),
            ("rejected", InternalStatus::Failed),
            ("processing", InternalStatus::Processing),
            ("pending", InternalStatus::Processing),
            ("timeout", InternalStatus::Processing),
            ("sent_to_network", InternalStatus::Processing),
            ("", InternalStatus::Processing),
        ];
        for (raw, expected) in cases {
            assert_eq!(map_provider_status(raw), expected, "mapping {:?}", raw);
        }
    }

    fn adapter(sandbox: Arc<SandboxProvider>, timeout: Duration) -> ProviderStatusAdapter {
        ProviderStatusAdapter::new(sandbox, timeout)
    }

    #[tokio::test]
    async fn not_found_is_transient_processing() {
        let sandbox = Arc::new(SandboxProvider::default());
        sandbox.script("tx-404", vec![SandboxReply::NotFound]).await;

        let check = adapter(sandbox, Duration::from_secs(1)).check_status("tx-404").await;
        assert_eq!(check.status, InternalStatus::Processing);
        assert!(!check.hard_error);
        assert!(check.reason.is_some());
    }

    #[tokio::test]
    async fn unauthorized_is_a_hard_error() {
        let sandbox = Arc::new(SandboxProvider::default());
        sandbox.script("tx-401", vec![SandboxReply::Unauthorized]).await;

        let check = adapter(sandbox, Duration::from_secs(1)).check_status("tx-401").await;
        assert_eq!(check.status, InternalStatus::Processing);
        assert!(check.hard_error);
    }

    #[tokio::test]
    async fn success_carries_confirmed_amount() {
        let sandbox = Arc::new(SandboxProvider::default());
        sandbox
            .script(
                "tx-ok",
                vec![SandboxReply::StatusWithAmount("completed".into(), 1500)],
            )
            .await;

        let check = adapter(sandbox, Duration::from_secs(1)).check_status("tx-ok").await;
        assert_eq!(check.status, InternalStatus::Successful);
        assert!(check.should_issue_voucher);
        assert_eq!(check.confirmed_amount, Some(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_provider_is_cut_off() {
        let sandbox = Arc::new(SandboxProvider::default());
        sandbox
            .script("tx-slow", vec![SandboxReply::Hang(Duration::from_secs(60))])
            .await;

        let check = adapter(sandbox, Duration::from_secs(2)).check_status("tx-slow").await;
        assert_eq!(check.status, InternalStatus::Processing);
        assert!(!check.hard_error);
        assert!(check.reason.unwrap_or_default().contains("timed out"));
    }
}
