use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    #[error("Webhook signature verification failed: {message}")]
    SignatureError { message: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Rate limit exceeded: {message}")]
    RateLimitError {
        message: String,
        retry_after_seconds: Option<u64>,
    },

    #[error("Provider error: provider={provider}, message={message}")]
    ProviderError {
        provider: String,
        message: String,
        provider_code: Option<String>,
        retryable: bool,
    },

    #[error("Rate lookup failed: {message}")]
    RateError { message: String },
}

impl PaymentError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ConfigurationError { .. } => false,
            PaymentError::ValidationError { .. } => false,
            PaymentError::SignatureError { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::RateLimitError { .. } => true,
            PaymentError::ProviderError { retryable, .. } => *retryable,
            PaymentError::RateError { .. } => true,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::ConfigurationError { .. } => 500,
            PaymentError::ValidationError { .. } => 400,
            PaymentError::SignatureError { .. } => 401,
            PaymentError::NetworkError { .. } => 503,
            PaymentError::RateLimitError { .. } => 429,
            PaymentError::ProviderError { .. } => 502,
            PaymentError::RateError { .. } => 503,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::ConfigurationError { .. } => {
                "Payment provider is not configured".to_string()
            }
            PaymentError::ValidationError { message, .. } => message.clone(),
            PaymentError::SignatureError { .. } => "Invalid webhook signature".to_string(),
            PaymentError::NetworkError { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::RateLimitError { .. } => {
                "Too many requests to payment provider. Please retry shortly".to_string()
            }
            PaymentError::ProviderError { .. } => "Payment provider returned an error".to_string(),
            PaymentError::RateError { .. } => {
                "Exchange rate is temporarily unavailable".to_string()
            }
        }
    }
}

impl From<crate::database::error::DatabaseError> for PaymentError {
    fn from(err: crate::database::error::DatabaseError) -> Self {
        PaymentError::ProviderError {
            provider: "storage".to_string(),
            message: err.to_string(),
            provider_code: None,
            retryable: err.is_retryable(),
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, ExternalError, InfrastructureError, ValidationError};

        match &err {
            PaymentError::ConfigurationError { message } => AppError::new(
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: message.clone(),
                }),
            ),
            PaymentError::ValidationError { message, field } => {
                AppError::new(AppErrorKind::Validation(ValidationError::MissingField {
                    field: field.clone().unwrap_or_else(|| message.clone()),
                }))
                .with_context(message.clone())
            }
            PaymentError::SignatureError { message } => {
                AppError::new(AppErrorKind::External(ExternalError::Signature {
                    provider: "payments".to_string(),
                    message: message.clone(),
                }))
            }
            _ => AppError::new(AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "payments".to_string(),
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_http_status_mapping_is_correct() {
        assert_eq!(
            PaymentError::ValidationError {
                message: "bad".to_string(),
                field: None
            }
            .http_status_code(),
            400
        );
        assert_eq!(
            PaymentError::SignatureError {
                message: "token mismatch".to_string()
            }
            .http_status_code(),
            401
        );
        assert_eq!(
            PaymentError::RateLimitError {
                message: "limited".to_string(),
                retry_after_seconds: Some(30)
            }
            .http_status_code(),
            429
        );
    }

    #[test]
    fn retryable_flags_are_set() {
        assert!(PaymentError::NetworkError {
            message: "timeout".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::SignatureError {
            message: "tampered".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::ConfigurationError {
            message: "no terminal key".to_string()
        }
        .is_retryable());
    }
}
