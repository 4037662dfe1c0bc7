use crate::payments::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Marzpay,
    Sandbox,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Marzpay => "marzpay",
            ProviderName::Sandbox => "sandbox",
        }
    }
}

impl std::fmt::Display for ProviderName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = PaymentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "marzpay" | "marz" => Ok(ProviderName::Marzpay),
            "sandbox" | "mock" => Ok(ProviderName::Sandbox),
            _ => Err(PaymentError::ValidationError {
                message: format!("unsupported provider: {}", value),
                field: Some("provider".to_string()),
            }),
        }
    }
}

/// Mobile-money collection request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionRequest {
    pub phone: String,
    pub amount: i64,
    pub reference: String,
    pub description: String,
    pub country: String,
    pub currency: String,
}

impl CollectionRequest {
    /// A Ugandan shilling voucher purchase.
    pub fn voucher_purchase(phone: &str, amount: i64, reference: &str) -> Self {
        Self {
            phone: phone.to_string(),
            amount,
            reference: reference.to_string(),
            description: format!("WiFi Voucher Payment - {} UGX", amount),
            country: "UG".to_string(),
            currency: "UGX".to_string(),
        }
    }
}

/// What the provider returned when the collection was accepted
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionResponse {
    /// Provider transaction id, used for later status checks.
    pub transaction_id: Option<String>,
    pub status: Option<String>,
    /// Amount as echoed by the provider.
    pub amount: Option<i64>,
    pub provider_data: Option<JsonValue>,
}

/// Raw provider view of a collection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CollectionStatus {
    /// Vendor status string, unmapped.
    pub provider_status: Option<String>,
    pub amount: Option<i64>,
    pub phone: Option<String>,
    pub provider_reference: Option<String>,
    pub provider_data: Option<JsonValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_name_parsing() {
        assert_eq!(ProviderName::from_str("MarzPay").unwrap(), ProviderName::Marzpay);
        assert_eq!(ProviderName::from_str("sandbox").unwrap(), ProviderName::Sandbox);
        assert!(ProviderName::from_str("paystack").is_err());
    }

    #[test]
    fn voucher_purchase_describes_amount() {
        let req = CollectionRequest::voucher_purchase("+256700000001", 1000, "ref-1");
        assert_eq!(req.description, "WiFi Voucher Payment - 1000 UGX");
        assert_eq!(req.country, "UG");
        assert_eq!(req.currency, "UGX");
    }
}
