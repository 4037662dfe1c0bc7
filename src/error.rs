//! Unified error handling for the voucher backend
//!
//! Every failure that can reach an HTTP client is expressed as an [`AppError`]
//! with an HTTP status, a stable machine-readable code, and a user-facing
//! message. Lower layers keep their own typed errors and convert at the edge.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "DUPLICATE_REFERENCE")]
    DuplicateReference,
    #[serde(rename = "NO_VOUCHER_AVAILABLE")]
    NoVoucherAvailable,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "JOB_NOT_FOUND")]
    JobNotFound,
    #[serde(rename = "VOUCHER_NOT_FOUND")]
    VoucherNotFound,
    #[serde(rename = "INVALID_PHONE")]
    InvalidPhone,
    #[serde(rename = "INVALID_AMOUNT")]
    InvalidAmount,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,

    // External errors (502, 503, 504)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "SMS_ERROR")]
    SmsError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Business-rule violations
#[derive(Debug, Clone)]
pub enum DomainError {
    /// No payment record exists for the reference
    PaymentNotFound { reference: String },
    /// A payment record with this reference already exists
    DuplicateReference { reference: String },
    /// The voucher tier for this amount is exhausted
    NoVoucherAvailable { amount: i64 },
    /// A status change that the payment lifecycle does not allow
    InvalidStatusTransition { reference: String, reason: String },
    JobNotFound { job_id: String },
    /// No issued voucher exists for this phone
    VoucherNotFound { phone: String },
}

/// Infrastructure-level errors
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
}

/// External service errors (payment provider, SMS gateway)
#[derive(Debug, Clone)]
pub enum ExternalError {
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    Sms { message: String },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidPhone { phone: String, reason: String },
    InvalidAmount { amount: String, reason: String },
    /// Required field missing
    MissingField { field: String },
    /// Field value out of acceptable range
    OutOfRange {
        field: String,
        min: Option<String>,
        max: Option<String>,
    },
    Unauthorized { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn domain(err: DomainError) -> Self {
        Self::new(AppErrorKind::Domain(err))
    }

    pub fn validation(err: ValidationError) -> Self {
        Self::new(AppErrorKind::Validation(err))
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => 404,
                DomainError::DuplicateReference { .. } => 409,
                DomainError::NoVoucherAvailable { .. } => 409,
                DomainError::InvalidStatusTransition { .. } => 409,
                DomainError::JobNotFound { .. } => 404,
                DomainError::VoucherNotFound { .. } => 404,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => 502,
                ExternalError::Sms { .. } => 502,
                ExternalError::RateLimit { .. } => 429,
                ExternalError::Timeout { .. } => 504,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::Unauthorized { .. } => 401,
                _ => 400,
            },
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::DuplicateReference { .. } => ErrorCode::DuplicateReference,
                DomainError::NoVoucherAvailable { .. } => ErrorCode::NoVoucherAvailable,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::JobNotFound { .. } => ErrorCode::JobNotFound,
                DomainError::VoucherNotFound { .. } => ErrorCode::VoucherNotFound,
            },
            AppErrorKind::Infrastructure(InfrastructureError::Database { .. }) => {
                ErrorCode::DatabaseError
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Sms { .. } => ErrorCode::SmsError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidPhone { .. } => ErrorCode::InvalidPhone,
                ValidationError::InvalidAmount { .. } => ErrorCode::InvalidAmount,
                ValidationError::Unauthorized { .. } => ErrorCode::Unauthorized,
                _ => ErrorCode::ValidationError,
            },
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { reference } => {
                    format!("Payment '{}' not found", reference)
                }
                DomainError::DuplicateReference { reference } => {
                    format!("Payment '{}' already exists", reference)
                }
                DomainError::NoVoucherAvailable { amount } => {
                    format!(
                        "No vouchers are currently available for {} UGX. Please choose another package",
                        amount
                    )
                }
                DomainError::InvalidStatusTransition { reference, reason } => {
                    format!("Payment '{}' cannot be updated: {}", reference, reason)
                }
                DomainError::JobNotFound { job_id } => format!("Job '{}' not found", job_id),
                DomainError::VoucherNotFound { .. } => {
                    "No voucher has been issued to this phone number".to_string()
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider {
                    provider,
                    is_retryable,
                    ..
                } => {
                    if *is_retryable {
                        format!(
                            "Payment provider ({}) is temporarily unavailable. Please try again",
                            provider
                        )
                    } else {
                        "Payment could not be started. Please contact support".to_string()
                    }
                }
                ExternalError::Sms { .. } => {
                    "We could not send the SMS right now. Please try again".to_string()
                }
                ExternalError::RateLimit {
                    service,
                    retry_after,
                } => match retry_after {
                    Some(secs) => format!(
                        "Rate limit exceeded for {}. Please try again in {} seconds",
                        service, secs
                    ),
                    None => format!("Rate limit exceeded for {}. Please try again later", service),
                },
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidPhone { phone, reason } => {
                    format!("Invalid phone number '{}': {}", phone, reason)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::OutOfRange { field, min, max } => match (min, max) {
                    (Some(min), Some(max)) => {
                        format!("Field '{}' must be between {} and {}", field, min, max)
                    }
                    (Some(min), None) => format!("Field '{}' must be at least {}", field, min),
                    (None, Some(max)) => format!("Field '{}' must be at most {}", field, max),
                    (None, None) => format!("Field '{}' is out of acceptable range", field),
                },
                ValidationError::Unauthorized { reason } => format!("Unauthorized: {}", reason),
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentProvider { is_retryable, .. } => *is_retryable,
                ExternalError::Sms { .. } => true,
                ExternalError::RateLimit { .. } => true,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.user_message(), context),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

// Note: From<DatabaseError> lives in database/error.rs and From<PaymentError>
// in payments/error.rs to keep this module free of lower-layer imports.

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_voucher_available_error() {
        let error = AppError::domain(DomainError::NoVoucherAvailable { amount: 2500 });

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::NoVoucherAvailable);
        assert!(error.user_message().contains("2500"));
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_sms_failure_is_a_retryable_bad_gateway() {
        let error = AppError::new(AppErrorKind::External(ExternalError::Sms {
            message: "sms gateway rejected message: HTTP 503".to_string(),
        }));

        assert_eq!(error.status_code(), 502);
        assert_eq!(error.error_code(), ErrorCode::SmsError);
        assert!(!error.user_message().contains("503"));
        assert!(error.is_retryable());
    }

    #[test]
    fn test_rate_limit_error() {
        let error = AppError::new(AppErrorKind::External(ExternalError::RateLimit {
            service: "MarzPay".to_string(),
            retry_after: Some(60),
        }));

        assert_eq!(error.status_code(), 429);
        assert_eq!(error.error_code(), ErrorCode::RateLimitError);
        assert!(error.is_retryable());
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::validation(ValidationError::InvalidAmount {
            amount: "-100".to_string(),
            reason: "Amount cannot be negative".to_string(),
        });

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::InvalidAmount);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_unauthorized_maps_to_401() {
        let error = AppError::validation(ValidationError::Unauthorized {
            reason: "missing bearer token".to_string(),
        });
        assert_eq!(error.status_code(), 401);
        assert_eq!(error.error_code(), ErrorCode::Unauthorized);
    }

    #[test]
    fn test_context_is_rendered() {
        let error = AppError::domain(DomainError::PaymentNotFound {
            reference: "abc".to_string(),
        })
        .with_context("check-payment");
        assert_eq!(error.to_string(), "Payment 'abc' not found (check-payment)");
    }
}
