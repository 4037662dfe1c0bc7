//! In-process collection provider for local runs and tests.
//!
//! Unscripted transactions report `pending` until they have been checked
//! `confirm_after` times and `successful` afterwards. Tests can script exact
//! reply sequences per transaction.

use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    CollectionRequest, CollectionResponse, CollectionStatus, ProviderName,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum SandboxReply {
    Status(String),
    StatusWithAmount(String, i64),
    NotFound,
    ServerError,
    Unauthorized,
    /// Sleeps before answering `pending`; exercises caller timeouts.
    Hang(Duration),
}

#[derive(Debug, Clone)]
struct Initiated {
    amount: i64,
    phone: String,
    checks: u32,
}

pub struct SandboxProvider {
    confirm_after: u32,
    initiated: Mutex<HashMap<String, Initiated>>,
    scripts: Mutex<HashMap<String, VecDeque<SandboxReply>>>,
    initiation_failure: Mutex<Option<PaymentError>>,
    status_calls: AtomicUsize,
}

impl SandboxProvider {
    pub fn new(confirm_after: u32) -> Self {
        Self {
            confirm_after,
            initiated: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            initiation_failure: Mutex::new(None),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn from_env() -> Self {
        let confirm_after = std::env::var("SANDBOX_CONFIRM_AFTER")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(2);
        Self::new(confirm_after)
    }

    /// Queues replies for a transaction. The last reply repeats.
    pub async fn script(&self, transaction_id: &str, replies: Vec<SandboxReply>) {
        self.scripts
            .lock()
            .await
            .insert(transaction_id.to_string(), replies.into());
    }

    pub async fn set_initiation_failure(&self, failure: Option<PaymentError>) {
        *self.initiation_failure.lock().await = failure;
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    async fn next_scripted(&self, transaction_id: &str) -> Option<SandboxReply> {
        let mut scripts = self.scripts.lock().await;
        let queue = scripts.get_mut(transaction_id)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }

    async fn reply(
        &self,
        transaction_id: &str,
        reply: SandboxReply,
    ) -> PaymentResult<CollectionStatus> {
        let known = self.initiated.lock().await.get(transaction_id).cloned();
        let status = |value: &str, amount: Option<i64>| CollectionStatus {
            provider_status: Some(value.to_string()),
            amount: amount.or_else(|| known.as_ref().map(|k| k.amount)),
            phone: known.as_ref().map(|k| k.phone.clone()),
            provider_reference: Some(transaction_id.to_string()),
            provider_data: None,
        };

        match reply {
            SandboxReply::Status(value) => Ok(status(&value, None)),
            SandboxReply::StatusWithAmount(value, amount) => Ok(status(&value, Some(amount))),
            SandboxReply::NotFound => Err(PaymentError::NotFound {
                message: format!("sandbox has no transaction {}", transaction_id),
            }),
            SandboxReply::ServerError => Err(PaymentError::ProviderError {
                provider: "sandbox".to_string(),
                message: "HTTP 500 Internal Server Error".to_string(),
                provider_code: Some("500".to_string()),
                retryable: true,
            }),
            SandboxReply::Unauthorized => Err(PaymentError::ProviderError {
                provider: "sandbox".to_string(),
                message: "HTTP 401 Unauthorized".to_string(),
                provider_code: Some("401".to_string()),
                retryable: false,
            }),
            SandboxReply::Hang(delay) => {
                tokio::time::sleep(delay).await;
                Ok(status("pending", None))
            }
        }
    }
}

impl Default for SandboxProvider {
    fn default() -> Self {
        Self::new(2)
    }
}

#[async_trait]
impl PaymentProvider for SandboxProvider {
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> PaymentResult<CollectionResponse> {
        if let Some(failure) = self.initiation_failure.lock().await.clone() {
            return Err(failure);
        }

        let transaction_id = format!("sandbox-{}", Uuid::new_v4());
        self.initiated.lock().await.insert(
            transaction_id.clone(),
            Initiated {
                amount: request.amount,
                phone: request.phone.clone(),
                checks: 0,
            },
        );
        debug!(reference = %request.reference, transaction_id = %transaction_id, "sandbox collection initiated");

        Ok(CollectionResponse {
            transaction_id: Some(transaction_id),
            status: Some("pending".to_string()),
            amount: Some(request.amount),
            provider_data: None,
        })
    }

    async fn get_collection_status(&self, transaction_id: &str) -> PaymentResult<CollectionStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(reply) = self.next_scripted(transaction_id).await {
            return self.reply(transaction_id, reply).await;
        }

        let reply = {
            let mut initiated = self.initiated.lock().await;
            match initiated.get_mut(transaction_id) {
                None => SandboxReply::NotFound,
                Some(entry) => {
                    entry.checks += 1;
                    if entry.checks > self.confirm_after {
                        SandboxReply::Status("successful".to_string())
                    } else {
                        SandboxReply::Status("pending".to_string())
                    }
                }
            }
        };
        self.reply(transaction_id, reply).await
    }

    fn name(&self) -> ProviderName {
        ProviderName::Sandbox
    }
}
