use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::types::{
    CollectionRequest, CollectionResponse, CollectionStatus, ProviderName,
};
use crate::payments::utils::PaymentHttpClient;
use async_trait::async_trait;
use base64::Engine;
use serde_json::Value as JsonValue;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://wallet.wearemarz.com/api/v1";

#[derive(Clone)]
pub struct MarzPayConfig {
    pub base_url: String,
    /// Base64 `key:secret`, sent as HTTP Basic credentials.
    pub basic_auth: String,
    pub status_timeout_secs: u64,
    pub initiate_timeout_secs: u64,
    pub initiate_max_retries: u32,
}

impl fmt::Debug for MarzPayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarzPayConfig")
            .field("base_url", &self.base_url)
            .field("basic_auth", &"<redacted>")
            .field("status_timeout_secs", &self.status_timeout_secs)
            .field("initiate_timeout_secs", &self.initiate_timeout_secs)
            .field("initiate_max_retries", &self.initiate_max_retries)
            .finish()
    }
}

impl MarzPayConfig {
    pub fn new(base_url: impl Into<String>, basic_auth: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            basic_auth: basic_auth.into(),
            status_timeout_secs: 10,
            initiate_timeout_secs: 30,
            initiate_max_retries: 1,
        }
    }

    /// Reads `MARZ_BASE64_AUTH`, or encodes `MARZ_API_KEY:MARZ_API_SECRET`.
    pub fn from_env() -> PaymentResult<Self> {
        let basic_auth = match std::env::var("MARZ_BASE64_AUTH") {
            Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
            _ => {
                let key = required_env("MARZ_API_KEY")?;
                let secret = required_env("MARZ_API_SECRET")?;
                base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", key, secret))
            }
        };

        let mut config = Self::new(
            std::env::var("MARZ_API_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string()),
            basic_auth,
        );
        config.status_timeout_secs = std::env::var("MARZ_STATUS_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        config.initiate_timeout_secs = std::env::var("MARZ_INITIATE_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        config.initiate_max_retries = std::env::var("MARZ_INITIATE_RETRIES")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(1);
        Ok(config)
    }

    /// True when either credential form is present in the environment.
    pub fn credentials_present() -> bool {
        let set = |key: &str| {
            std::env::var(key)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        };
        set("MARZ_BASE64_AUTH") || (set("MARZ_API_KEY") && set("MARZ_API_SECRET"))
    }
}

fn required_env(key: &str) -> PaymentResult<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PaymentError::ValidationError {
            message: format!("{} environment variable is required", key),
            field: Some(key.to_string()),
        })
}

pub struct MarzPayProvider {
    config: MarzPayConfig,
    initiate_http: PaymentHttpClient,
    status_http: PaymentHttpClient,
}

impl MarzPayProvider {
    pub fn new(config: MarzPayConfig) -> PaymentResult<Self> {
        let initiate_http = PaymentHttpClient::new(
            "marzpay",
            Duration::from_secs(config.initiate_timeout_secs),
            config.initiate_max_retries,
        )?;
        // Status checks make one attempt; the reconciliation worker retries.
        let status_http = PaymentHttpClient::new(
            "marzpay",
            Duration::from_secs(config.status_timeout_secs),
            0,
        )?;
        Ok(Self {
            config,
            initiate_http,
            status_http,
        })
    }

    pub fn from_env() -> PaymentResult<Self> {
        Self::new(MarzPayConfig::from_env()?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    fn authorization(&self) -> String {
        format!("Basic {}", self.config.basic_auth)
    }
}

#[async_trait]
impl PaymentProvider for MarzPayProvider {
    async fn initiate_collection(
        &self,
        request: CollectionRequest,
    ) -> PaymentResult<CollectionResponse> {
        if request.amount <= 0 {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some("amount".to_string()),
            });
        }

        let fields = [
            ("phone_number", request.phone.clone()),
            ("amount", request.amount.to_string()),
            ("country", request.country.clone()),
            ("reference", request.reference.clone()),
            ("description", request.description.clone()),
            ("currency", request.currency.clone()),
        ];
        let raw: JsonValue = self
            .initiate_http
            .request_json(
                reqwest::Method::POST,
                &self.endpoint("/collect-money"),
                Some(&self.authorization()),
                Some(&fields[..]),
            )
            .await?;

        let transaction = raw.pointer("/data/transaction");
        let transaction_id = transaction
            .and_then(|t| t.get("uuid"))
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let status = transaction
            .and_then(|t| t.get("status"))
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let amount = transaction.and_then(|t| t.get("amount")).and_then(parse_amount);

        info!(
            reference = %request.reference,
            transaction_id = transaction_id.as_deref().unwrap_or("-"),
            "marzpay collection initiated"
        );

        Ok(CollectionResponse {
            transaction_id,
            status,
            amount,
            provider_data: Some(raw),
        })
    }

    async fn get_collection_status(&self, transaction_id: &str) -> PaymentResult<CollectionStatus> {
        if transaction_id.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "transaction id is required".to_string(),
                field: Some("transaction_id".to_string()),
            });
        }

        let raw: JsonValue = self
            .status_http
            .request_json(
                reqwest::Method::GET,
                &self.endpoint(&format!("/collect-money/{}", transaction_id)),
                Some(&self.authorization()),
                None,
            )
            .await?;

        let Some(transaction) = raw.pointer("/data/transaction") else {
            debug!(transaction_id, "marzpay response carried no transaction");
            return Ok(CollectionStatus {
                provider_data: Some(raw),
                ..CollectionStatus::default()
            });
        };

        let provider_status = transaction
            .get("status")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let amount = transaction
            .get("amount")
            .and_then(parse_amount)
            .or_else(|| raw.pointer("/data/collection/amount").and_then(parse_amount));
        let phone = raw
            .pointer("/data/collection/phone_number")
            .and_then(JsonValue::as_str)
            .map(str::to_string);
        let provider_reference = transaction
            .get("uuid")
            .and_then(JsonValue::as_str)
            .map(str::to_string)
            .or_else(|| Some(transaction_id.to_string()));

        Ok(CollectionStatus {
            provider_status,
            amount,
            phone,
            provider_reference,
            provider_data: Some(raw),
        })
    }

    fn name(&self) -> ProviderName {
        ProviderName::Marzpay
    }
}

/// Whole-shilling amount from the shapes MarzPay uses: a number, a numeric
/// string such as `"1,000.00"`, or an object carrying `raw` or `amount`.
pub fn parse_amount(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        JsonValue::String(s) => {
            let cleaned: String = s.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
            cleaned
                .parse::<i64>()
                .ok()
                .or_else(|| cleaned.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        JsonValue::Object(map) => map
            .get("raw")
            .and_then(parse_amount)
            .or_else(|| map.get("amount").and_then(parse_amount)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_amount_accepts_known_shapes() {
        assert_eq!(parse_amount(&json!(1000)), Some(1000));
        assert_eq!(parse_amount(&json!("1,000.00")), Some(1000));
        assert_eq!(parse_amount(&json!({"raw": 2500, "formatted": "2,500"})), Some(2500));
        assert_eq!(parse_amount(&json!({"amount": "750"})), Some(750));
        assert_eq!(parse_amount(&json!("n/a")), None);
        assert_eq!(parse_amount(&JsonValue::Null), None);
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let config = MarzPayConfig::new("https://example.test/api/v1/", "c2VjcmV0OnNlY3JldA==");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("c2VjcmV0"));
        assert!(rendered.contains("<redacted>"));
        assert_eq!(config.base_url, "https://example.test/api/v1");
    }

    #[tokio::test]
    async fn blank_transaction_id_is_rejected() {
        let provider = MarzPayProvider::new(MarzPayConfig::new("http://127.0.0.1:9", "eA=="))
            .expect("client should build");
        let err = provider.get_collection_status("  ").await.unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError { .. }));
    }
}
