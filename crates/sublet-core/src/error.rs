//! Unified error handling for Sublet
//!
//! This module provides a single error type covering every failure scenario
//! of the reservation service, with automatic HTTP response mapping.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::models::ReservationStatus;

/// Main application error type
///
/// All errors in the application should be converted to this type.
/// It implements `ResponseError` for automatic HTTP response generation.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Database Errors ====================
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database pool error: {0}")]
    Pool(String),

    #[error("Transaction failed: {0}")]
    Transaction(String),

    // ==================== Authentication Errors ====================
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    // ==================== Reservation Errors ====================
    #[error("Reservation not found: {0}")]
    ReservationNotFound(String),

    #[error("Cannot {action} a reservation that is {status}{detail}")]
    InvalidTransition {
        action: &'static str,
        status: ReservationStatus,
        detail: String,
    },

    #[error("Stay already started on {0}; cancellation is no longer possible")]
    StayStarted(String),

    #[error("Reservation {0} was modified concurrently, reload and retry")]
    ConcurrentModification(String),

    // ==================== Payment Errors ====================
    #[error("Payment not captured: {0}")]
    PaymentNotCaptured(String),

    #[error("Payment provider error: {0}")]
    PaymentFailed(String),

    #[error("Payment provider unreachable: {0}")]
    PaymentUnavailable(String),

    // ==================== Validation Errors ====================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    // ==================== Resource Errors ====================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ==================== Internal Errors ====================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Shorthand for a lifecycle precondition failure
    pub fn invalid_transition(action: &'static str, status: ReservationStatus) -> Self {
        AppError::InvalidTransition {
            action,
            status,
            detail: String::new(),
        }
    }

    /// Lifecycle precondition failure with an extra explanation
    pub fn invalid_transition_because(
        action: &'static str,
        status: ReservationStatus,
        reason: impl Into<String>,
    ) -> Self {
        AppError::InvalidTransition {
            action,
            status,
            detail: format!(" ({})", reason.into()),
        }
    }

    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation(_) | AppError::InvalidInput(_) | AppError::MissingField(_) => {
                StatusCode::BAD_REQUEST
            }

            // 401 Unauthorized
            AppError::InvalidToken(_) | AppError::TokenExpired | AppError::Unauthorized(_) => {
                StatusCode::UNAUTHORIZED
            }

            // 402 Payment Required
            AppError::PaymentNotCaptured(_) => StatusCode::PAYMENT_REQUIRED,

            // 403 Forbidden
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::ReservationNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::InvalidTransition { .. }
            | AppError::StayStarted(_)
            | AppError::ConcurrentModification(_)
            | AppError::AlreadyExists(_) => StatusCode::CONFLICT,

            // 502 Bad Gateway
            AppError::PaymentFailed(_) | AppError::PaymentUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }

            // 500 Internal Server Error
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database_error",
            AppError::Pool(_) => "pool_error",
            AppError::Transaction(_) => "transaction_error",
            AppError::TokenExpired => "token_expired",
            AppError::InvalidToken(_) => "invalid_token",
            AppError::Unauthorized(_) => "unauthorized",
            AppError::Forbidden(_) => "forbidden",
            AppError::ReservationNotFound(_) => "reservation_not_found",
            AppError::InvalidTransition { .. } => "invalid_transition",
            AppError::StayStarted(_) => "stay_started",
            AppError::ConcurrentModification(_) => "conflict",
            AppError::PaymentNotCaptured(_) => "payment_not_captured",
            AppError::PaymentFailed(_) => "payment_error",
            AppError::PaymentUnavailable(_) => "payment_unavailable",
            AppError::Validation(_) => "validation_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::MissingField(_) => "missing_field",
            AppError::NotFound(_) => "not_found",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// True for failures reported by, or while reaching, the payment provider
    pub fn is_payment_error(&self) -> bool {
        matches!(
            self,
            AppError::PaymentFailed(_) | AppError::PaymentUnavailable(_)
        )
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        AppError::status_code(self)
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = json!({
            "error": self.error_code(),
            "message": self.to_string(),
            "status": status.as_u16(),
        });

        HttpResponse::build(status).json(body)
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}
