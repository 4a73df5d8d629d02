//! API layer for Sublet
//!
//! HTTP handlers for the reservation lifecycle: host validation, rejection
//! and cancellation, guest cancellation, booking, and the read endpoints.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod dto;
pub mod handlers;

use actix_web::{error::InternalError, web, HttpResponse};
use sublet_core::traits::{PaymentGateway, ReservationRepository};
use sublet_core::AppError;
use sublet_services::ReservationLifecycle;

// Re-export DTOs (common types)
pub use dto::{ApiResponse, PaginationParams};

pub use handlers::{configure_admin, configure_health, configure_reservations};

/// Lifecycle service as shared by the handlers
pub type Lifecycle = ReservationLifecycle<dyn ReservationRepository, dyn PaymentGateway>;

/// Configure every `/api/v1` route
pub fn configure_api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(configure_health)
            .configure(configure_reservations)
            .configure(configure_admin),
    );
}

/// Render malformed JSON bodies as a 400 in the API error format
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| {
            let response = AppError::InvalidInput(err.to_string());
            InternalError::from_response(err, HttpResponse::from_error(response)).into()
        })
}

/// Render malformed query strings as a 400 in the API error format
pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let response = AppError::InvalidInput(err.to_string());
        InternalError::from_response(err, HttpResponse::from_error(response)).into()
    })
}
