//! Reservation handlers
//!
//! Lifecycle actions (host validation, host reject, host cancel, guest
//! cancel), booking and the read endpoints available to the parties of a
//! reservation.

use crate::dto::{
    map_page, ApiResponse, CreateReservationRequest, GuestCancelRequest, HostDecisionRequest,
    HostValidationRequest, ListReservationsQuery, PaginationParams, RefundQuoteResponse,
    ReservationEventResponse, ReservationResponse, TransitionResponse,
};
use crate::Lifecycle;
use actix_web::{web, HttpResponse};
use sublet_auth::AuthenticatedUser;
use sublet_core::models::ReservationStatus;
use sublet_core::AppError;
use sublet_services::Caller;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

fn caller(user: &AuthenticatedUser) -> Caller {
    Caller::new(user.user_id, user.role)
}

/// Set or clear the host's validation flag
///
/// POST /api/v1/reservations/host-validation
#[instrument(skip(lifecycle, user, req), fields(reservation = %req.reservation_id))]
pub async fn host_validation(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    req: web::Json<HostValidationRequest>,
) -> Result<HttpResponse, AppError> {
    debug!(host_validation = req.host_validation, "Host validation requested");

    let outcome = lifecycle
        .host_validate(user.user_id, req.reservation_id, req.host_validation)
        .await?;

    let message = match (outcome.reservation.status, outcome.reservation.host_validation_ok) {
        (ReservationStatus::Confirmed, true) => "Reservation validated",
        (_, false) => "Host validation withdrawn",
        _ => "Host validation updated",
    };

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        TransitionResponse::from(outcome),
        message,
    )))
}

/// Reject a reservation the host has not validated
///
/// POST /api/v1/reservations/host-reject
#[instrument(skip(lifecycle, user, req), fields(reservation = %req.reservation_id))]
pub async fn host_reject(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    req: web::Json<HostDecisionRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Host reject validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let req = req.into_inner();
    let outcome = lifecycle
        .host_reject(user.user_id, req.reservation_id, req.reason)
        .await?;

    info!(refund_percent = outcome.refund_percent, "Reservation rejected by host");

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        TransitionResponse::from(outcome),
        "Reservation rejected",
    )))
}

/// Cancel a validated reservation as its host
///
/// POST /api/v1/reservations/host-cancel
#[instrument(skip(lifecycle, user, req), fields(reservation = %req.reservation_id))]
pub async fn host_cancel(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    req: web::Json<HostDecisionRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Host cancel validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let req = req.into_inner();
    let outcome = lifecycle
        .host_cancel(user.user_id, req.reservation_id, req.reason)
        .await?;

    info!(refund_percent = outcome.refund_percent, "Reservation canceled by host");

    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        TransitionResponse::from(outcome),
        "Reservation canceled",
    )))
}

/// Cancel a confirmed reservation as its guest
///
/// POST /api/v1/reservations/guest-cancel
#[instrument(skip(lifecycle, user, req), fields(reservation = %req.reservation_id))]
pub async fn guest_cancel(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    req: web::Json<GuestCancelRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Guest cancel validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let req = req.into_inner();
    let outcome = lifecycle
        .guest_cancel(user.user_id, req.reservation_id, req.reason)
        .await?;

    info!(refund_percent = outcome.refund_percent, "Reservation canceled by guest");

    let message = format!("Reservation canceled, {}% refunded", outcome.refund_percent);
    Ok(HttpResponse::Ok().json(ApiResponse::with_message(
        TransitionResponse::from(outcome),
        message,
    )))
}

/// Record a paid booking
///
/// POST /api/v1/reservations
#[instrument(skip(lifecycle, user, req))]
pub async fn create_reservation(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    req: web::Json<CreateReservationRequest>,
) -> Result<HttpResponse, AppError> {
    req.validate().map_err(|e| {
        warn!("Reservation creation validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let booking = req.into_inner().into_new_reservation(user.user_id);
    let created = lifecycle.record_booking(user.user_id, booking).await?;

    info!(id = %created.id, "Reservation created");

    Ok(HttpResponse::Created().json(ApiResponse::with_message(
        ReservationResponse::from(created),
        "Reservation created",
    )))
}

/// List the caller's reservations as guest (default) or host
///
/// GET /api/v1/reservations?as=guest|host
#[instrument(skip(lifecycle, user))]
pub async fn list_reservations(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    query: web::Query<PaginationParams>,
    filters: web::Query<ListReservationsQuery>,
) -> Result<HttpResponse, AppError> {
    query.validate().map_err(|e| {
        warn!("Pagination validation failed: {}", e);
        AppError::Validation(e.to_string())
    })?;

    let page = lifecycle
        .list_for_user(user.user_id, filters.party.into(), query.to_pagination())
        .await?;

    Ok(HttpResponse::Ok().json(map_page(page, ReservationResponse::from)))
}

/// Get a single reservation
///
/// GET /api/v1/reservations/{id}
#[instrument(skip(lifecycle, user))]
pub async fn get_reservation(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let reservation = lifecycle.get(caller(&user), path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(ReservationResponse::from(reservation))))
}

/// Preview the refund of a guest cancellation
///
/// GET /api/v1/reservations/{id}/refund-quote
#[instrument(skip(lifecycle, user))]
pub async fn refund_quote(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let quote = lifecycle
        .refund_quote(caller(&user), path.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::success(RefundQuoteResponse::from(quote))))
}

/// Lifecycle history of a reservation
///
/// GET /api/v1/reservations/{id}/history
#[instrument(skip(lifecycle, user))]
pub async fn history(
    lifecycle: web::Data<Lifecycle>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let events = lifecycle.history(caller(&user), path.into_inner()).await?;
    let events: Vec<ReservationEventResponse> = events.into_iter().map(Into::into).collect();

    Ok(HttpResponse::Ok().json(ApiResponse::success(events)))
}

/// Configure reservation routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/reservations")
            .route("", web::get().to(list_reservations))
            .route("", web::post().to(create_reservation))
            .route("/host-validation", web::post().to(host_validation))
            .route("/host-reject", web::post().to(host_reject))
            .route("/host-cancel", web::post().to(host_cancel))
            .route("/guest-cancel", web::post().to(guest_cancel))
            .route("/{id}", web::get().to(get_reservation))
            .route("/{id}/refund-quote", web::get().to(refund_quote))
            .route("/{id}/history", web::get().to(history)),
    );
}
