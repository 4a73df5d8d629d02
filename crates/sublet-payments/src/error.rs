//! Stripe client errors

use sublet_core::AppError;
use thiserror::Error;

/// Errors of the Stripe client
#[derive(Debug, Error)]
pub enum StripeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: request took longer than {0}ms")]
    Timeout(u64),

    /// Stripe answered with an error object
    #[error("Stripe error (status {status}, {kind}): {message}")]
    Api {
        status: u16,
        kind: String,
        code: Option<String>,
        message: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<StripeError> for AppError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::Connection(_) | StripeError::Timeout(_) => {
                AppError::PaymentUnavailable(err.to_string())
            }
            StripeError::Api { status, .. } if status >= 500 || status == 429 => {
                AppError::PaymentUnavailable(err.to_string())
            }
            StripeError::Api { .. } | StripeError::Parse(_) | StripeError::InvalidAmount(_) => {
                AppError::PaymentFailed(err.to_string())
            }
            StripeError::Config(msg) => AppError::Config(msg),
        }
    }
}
