use crate::config::SmsConfig;
use crate::logging::{mask_phone, mask_voucher};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

const RECENT_CAPACITY: usize = 100;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SmsError {
    #[error("sms gateway request failed: {0}")]
    Transport(String),
    #[error("sms gateway rejected message: HTTP {status}")]
    Rejected { status: u16 },
}

impl From<SmsError> for crate::error::AppError {
    fn from(err: SmsError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError};

        AppError::new(AppErrorKind::External(ExternalError::Sms {
            message: err.to_string(),
        }))
    }
}

/// Outbound SMS gateway.
#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<(), SmsError>;
}

/// POSTs `{number, message}` JSON to an SMS gateway.
pub struct HttpSmsSender {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl HttpSmsSender {
    pub fn new(url: impl Into<String>, api_key: Option<String>, timeout: Duration) -> Result<Self, SmsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmsError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
            api_key,
        })
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send(&self, phone: &str, message: &str) -> Result<(), SmsError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "number": phone, "message": message }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SmsError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SmsError::Rejected {
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

/// Logs messages instead of sending them. Keeps the last few for inspection.
#[derive(Default)]
pub struct LogSmsSender {
    sent: Mutex<VecDeque<(String, String)>>,
}

impl LogSmsSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(phone, message)` pairs, oldest first.
    pub async fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, phone: &str, message: &str) -> Result<(), SmsError> {
        info!(phone = %mask_phone(phone), "📱 SMS (log only)");
        let mut sent = self.sent.lock().await;
        if sent.len() == RECENT_CAPACITY {
            sent.pop_front();
        }
        sent.push_back((phone.to_string(), message.to_string()));
        Ok(())
    }
}

/// Conditions an operator has to act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperationalAlert {
    /// Money collected for a tier with no unused vouchers left.
    InventoryExhausted { reference: String, amount: i64 },
    AmountMismatch {
        reference: String,
        requested: i64,
        confirmed: i64,
    },
    /// Provider still reports processing after the whole retry budget.
    RetryExhausted {
        reference: String,
        job_id: String,
        attempts: i32,
    },
    /// Provider confirmed a payment the client had already given up on.
    PaidAfterAbandon { reference: String, amount: i64 },
    /// A voucher was claimed for a payment that ended up failed.
    OrphanedVoucher { reference: String, voucher: String },
}

impl OperationalAlert {
    pub fn kind(&self) -> &'static str {
        match self {
            OperationalAlert::InventoryExhausted { .. } => "inventory_exhausted",
            OperationalAlert::AmountMismatch { .. } => "amount_mismatch",
            OperationalAlert::RetryExhausted { .. } => "retry_exhausted",
            OperationalAlert::PaidAfterAbandon { .. } => "paid_after_abandon",
            OperationalAlert::OrphanedVoucher { .. } => "orphaned_voucher",
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            OperationalAlert::InventoryExhausted { reference, .. }
            | OperationalAlert::AmountMismatch { reference, .. }
            | OperationalAlert::RetryExhausted { reference, .. }
            | OperationalAlert::PaidAfterAbandon { reference, .. }
            | OperationalAlert::OrphanedVoucher { reference, .. } => reference,
        }
    }
}

/// Voucher SMS text. Resends carry a suffix so support can tell them apart.
pub fn voucher_message(code: &str, reference: &str, resent: bool) -> String {
    let mut message = format!("Your wifi code {}. Ref: {}", code, reference);
    if resent {
        message.push_str(" (Resent)");
    }
    message
}

pub struct NotificationService {
    sms: Arc<dyn SmsSender>,
    recent_alerts: Mutex<VecDeque<OperationalAlert>>,
}

impl NotificationService {
    pub fn new(sms: Arc<dyn SmsSender>) -> Self {
        Self {
            sms,
            recent_alerts: Mutex::new(VecDeque::new()),
        }
    }

    /// HTTP sender when a gateway URL is configured, log-only otherwise.
    pub fn from_config(config: &SmsConfig) -> Result<Self, SmsError> {
        let sms: Arc<dyn SmsSender> = match &config.api_url {
            Some(url) => Arc::new(HttpSmsSender::new(
                url.clone(),
                config.api_key.clone(),
                Duration::from_secs(config.timeout),
            )?),
            None => Arc::new(LogSmsSender::new()),
        };
        Ok(Self::new(sms))
    }

    pub async fn send_voucher(
        &self,
        phone: &str,
        code: &str,
        reference: &str,
        resent: bool,
    ) -> Result<(), SmsError> {
        let message = voucher_message(code, reference, resent);
        match self.sms.send(phone, &message).await {
            Ok(()) => {
                info!(
                    reference = %reference,
                    phone = %mask_phone(phone),
                    voucher = %mask_voucher(code),
                    resent,
                    "🔔 NOTIFICATION: voucher SMS sent"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    reference = %reference,
                    phone = %mask_phone(phone),
                    error = %e,
                    "🔔 NOTIFICATION: voucher SMS failed"
                );
                Err(e)
            }
        }
    }

    pub async fn alert(&self, alert: OperationalAlert) {
        error!(
            alert = alert.kind(),
            reference = %alert.reference(),
            details = %serde_json::to_string(&alert).unwrap_or_default(),
            "🚨 operator attention required"
        );
        let mut recent = self.recent_alerts.lock().await;
        if recent.len() == RECENT_CAPACITY {
            recent.pop_front();
        }
        recent.push_back(alert);
    }

    /// Oldest first.
    pub async fn recent_alerts(&self) -> Vec<OperationalAlert> {
        self.recent_alerts.lock().await.iter().cloned().collect()
    }
}
