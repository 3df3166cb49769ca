//! Unified error handling for the payment backend
//!
//! Layer-local errors (`PaymentError`, `RateError`, `DatabaseError`,
//! `ConfigError`) converge here for HTTP status mapping and client-safe
//! messages. Expected business outcomes (refund lock not acquired, manual
//! refund needed) are modelled as values, never as errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic client handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "PAYMENT_NOT_FOUND")]
    PaymentNotFound,
    #[serde(rename = "RATE_EXPIRED")]
    RateExpired,
    #[serde(rename = "INVALID_TIER")]
    InvalidTier,
    #[serde(rename = "PROVIDER_DISABLED")]
    ProviderDisabled,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (401, 429, 502, 503, 504)
    #[serde(rename = "SIGNATURE_ERROR")]
    SignatureError,
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "RATE_LIMIT_ERROR")]
    RateLimitError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Domain-specific business logic errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Payment with given id doesn't exist
    PaymentNotFound { payment_id: String },
    /// Locked exchange rate has expired
    RateExpired { payment_id: String },
    /// Tier id outside the closed set
    InvalidTier { tier: String },
    /// Provider is configured off
    ProviderDisabled { provider: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    /// Missing credentials / wallet address; fails fast, never retried
    Configuration { message: String },
}

/// External service errors (payment rails, market data)
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// Webhook authenticity failure; no state change happened
    Signature { provider: String, message: String },
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidProvider { provider: String },
    InvalidAmount { amount: String, reason: String },
    MissingField { field: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
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
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => StatusCode::NOT_FOUND,
                DomainError::RateExpired { .. } => StatusCode::GONE,
                DomainError::InvalidTier { .. } => StatusCode::BAD_REQUEST,
                DomainError::ProviderDisabled { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => StatusCode::INTERNAL_SERVER_ERROR,
                InfrastructureError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Signature { .. } => StatusCode::UNAUTHORIZED,
                ExternalError::PaymentProvider { .. } => StatusCode::BAD_GATEWAY,
                ExternalError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
                ExternalError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
            AppErrorKind::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { .. } => ErrorCode::PaymentNotFound,
                DomainError::RateExpired { .. } => ErrorCode::RateExpired,
                DomainError::InvalidTier { .. } => ErrorCode::InvalidTier,
                DomainError::ProviderDisabled { .. } => ErrorCode::ProviderDisabled,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::Signature { .. } => ErrorCode::SignatureError,
                ExternalError::PaymentProvider { .. } => ErrorCode::PaymentProviderError,
                ExternalError::RateLimit { .. } => ErrorCode::RateLimitError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// User-safe message; internal details stay in logs
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::PaymentNotFound { payment_id } => {
                    format!("Payment {} not found", payment_id)
                }
                DomainError::RateExpired { .. } => {
                    "The locked exchange rate has expired".to_string()
                }
                DomainError::InvalidTier { tier } => format!("Unknown tier: {}", tier),
                DomainError::ProviderDisabled { provider } => {
                    format!("Payment provider {} is not available", provider)
                }
            },
            AppErrorKind::Infrastructure(_) => "Internal server error".to_string(),
            AppErrorKind::External(err) => match err {
                ExternalError::Signature { .. } => "Invalid webhook signature".to_string(),
                ExternalError::PaymentProvider { .. } => {
                    "Payment provider returned an error".to_string()
                }
                ExternalError::RateLimit { .. } => {
                    "Too many requests to an external service. Please retry shortly".to_string()
                }
                ExternalError::Timeout { .. } => {
                    "External service timed out".to_string()
                }
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidProvider { provider } => {
                    format!("Unsupported provider: {}", provider)
                }
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount {}: {}", amount, reason)
                }
                ValidationError::MissingField { field } => {
                    format!("Missing required field: {}", field)
                }
            },
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{} ({})", self.user_message(), ctx),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self.kind, context = ?self.context, "request failed");
        } else {
            tracing::warn!(error = ?self.kind, context = ?self.context, "request rejected");
        }
        let body = ErrorBody {
            error: self.error_code(),
            message: self.user_message(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<crate::database::error::DatabaseError> for AppError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: err.to_string(),
            is_retryable: err.is_retryable(),
        }))
    }
}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_4xx() {
        let err = AppError::new(AppErrorKind::Domain(DomainError::PaymentNotFound {
            payment_id: "42".to_string(),
        }));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), ErrorCode::PaymentNotFound);
    }

    #[test]
    fn signature_errors_map_to_401() {
        let err = AppError::new(AppErrorKind::External(ExternalError::Signature {
            provider: "gateway".to_string(),
            message: "token mismatch".to_string(),
        }));
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn infrastructure_details_are_not_leaked() {
        let err = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "connection refused to 10.0.0.3:5432".to_string(),
            is_retryable: true,
        }));
        assert_eq!(err.user_message(), "Internal server error");
    }
}
