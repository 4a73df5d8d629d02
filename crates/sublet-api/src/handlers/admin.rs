//! Moderation handlers
//!
//! Read-only access to every reservation for admins.

use crate::dto::{map_page, AdminReservationsQuery, PaginationParams, ReservationResponse};
use crate::Lifecycle;
use actix_web::{web, HttpResponse};
use sublet_auth::AdminUser;
use sublet_core::AppError;
use tracing::{debug, instrument, warn};
use validator::Validate;

/// List all reservations, optionally filtered by status
///
/// GET /api/v1/admin/reservations?status=
#[instrument(skip(lifecycle, admin))]
pub async fn list_all_reservations(
    lifecycle: web::Data<Lifecycle>,
    admin: AdminUser,
    query: web::Query<PaginationParams>,
    filters: web::Query<AdminReservationsQuery>,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| {
        warn!("Pagination validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;
    let status = filters.status()?;

    debug!(admin = %admin.user_id, status = ?status, "Listing all reservations");

    let page = lifecycle.list_all(status, query.to_pagination()).await?;

    Ok(HttpResponse::Ok().json(map_page(page, ReservationResponse::from)))
}

/// Configure admin routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/admin").route("/reservations", web::get().to(list_all_reservations)),
    );
}
