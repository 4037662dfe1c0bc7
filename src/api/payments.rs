//! Client-facing payment endpoints.

use crate::api::AppState;
use crate::error::{AppError, AppResult, ValidationError};
use crate::middleware::error::{get_request_id_from_headers, success_response};
use axum::{extract::State, http::HeaderMap, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Amounts arrive as numbers or numeric strings depending on the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Number(i64),
    Text(String),
}

impl AmountInput {
    fn parse(&self) -> AppResult<i64> {
        match self {
            AmountInput::Number(n) => Ok(*n),
            AmountInput::Text(raw) => raw.trim().parse::<i64>().map_err(|_| {
                AppError::validation(ValidationError::InvalidAmount {
                    amount: raw.clone(),
                    reason: "amount must be a whole number of shillings".to_string(),
                })
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PayRequest {
    pub phone: Option<String>,
    pub amount: Option<AmountInput>,
}

#[derive(Debug, Deserialize)]
pub struct ReferenceRequest {
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PhoneRequest {
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub amount: Option<AmountInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityResponse {
    pub amount: i64,
    pub available: bool,
    pub count: i64,
}

fn required<T>(value: Option<T>, field: &str) -> AppResult<T> {
    value.ok_or_else(|| {
        AppError::validation(ValidationError::MissingField {
            field: field.to_string(),
        })
    })
}

fn tag(err: AppError, headers: &HeaderMap) -> AppError {
    match get_request_id_from_headers(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PayRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run = async move {
        let phone = required(body.phone, "phone")?;
        let amount = required(body.amount, "amount")?.parse()?;
        state.initiation.initiate(&phone, amount).await
    };
    let payment = run.await.map_err(|e| tag(e, &headers))?;
    Ok(success_response(payment))
}

pub async fn check_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReferenceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run = async move {
        let reference = required(body.reference, "reference")?;
        state.status.check_by_reference(&reference).await
    };
    let view = run.await.map_err(|e| tag(e, &headers))?;
    Ok(success_response(view))
}

pub async fn check_payment_by_phone(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PhoneRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run = async move {
        let phone = required(body.phone, "phone")?;
        state.status.check_by_phone(&phone).await
    };
    let view = run.await.map_err(|e| tag(e, &headers))?;
    Ok(success_response(view))
}

/// The client's polling loop hit its cap.
pub async fn payment_timeout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReferenceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run = async move {
        let reference = required(body.reference, "reference")?;
        state.status.expire_client_poll(&reference).await
    };
    let view = run.await.map_err(|e| tag(e, &headers))?;
    Ok(success_response(view))
}

pub async fn resend_voucher_sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PhoneRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run = async move {
        let phone = required(body.phone, "phone")?;
        state.status.resend_last_voucher(&phone).await
    };
    let receipt = run.await.map_err(|e| tag(e, &headers))?;
    info!(reference = %receipt.reference, "voucher resent");
    Ok(success_response(receipt))
}

pub async fn check_voucher_availability(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AvailabilityRequest>,
) -> Result<impl IntoResponse, AppError> {
    let run = async move {
        let amount = required(body.amount, "amount")?.parse()?;
        let count = state.initiation.availability(amount).await?;
        Ok::<_, AppError>(AvailabilityResponse {
            amount,
            available: count > 0,
            count,
        })
    };
    let availability = run.await.map_err(|e| tag(e, &headers))?;
    Ok(success_response(availability))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_accepts_numbers_and_numeric_strings() {
        let number: AmountInput = serde_json::from_str("1000").unwrap();
        let text: AmountInput = serde_json::from_str("\" 2500 \"").unwrap();
        let junk: AmountInput = serde_json::from_str("\"lots\"").unwrap();

        assert_eq!(number.parse().unwrap(), 1000);
        assert_eq!(text.parse().unwrap(), 2500);
        assert_eq!(junk.parse().unwrap_err().status_code(), 400);
    }
}
