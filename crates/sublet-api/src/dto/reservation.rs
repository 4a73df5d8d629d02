//! Reservation DTOs
//!
//! Request and response bodies of the reservation endpoints. Field names
//! are camelCase; money is a decimal number in major units.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sublet_core::models::{EventKind, NewReservation, Reservation, ReservationEvent, ReservationStatus};
use sublet_core::traits::{Party, RefundReceipt};
use sublet_core::{AppError, RefundTier};
use sublet_services::{RefundQuote, TransitionOutcome};
use uuid::Uuid;
use validator::Validate;

use super::common::money;

// ==================== Requests ====================

/// Body of `POST /reservations/host-validation`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostValidationRequest {
    pub reservation_id: Uuid,
    pub host_validation: bool,
}

/// Body of `POST /reservations/host-reject` and `/host-cancel`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HostDecisionRequest {
    pub reservation_id: Uuid,

    #[serde(default)]
    #[validate(length(max = 2000, message = "Reason is too long"))]
    pub reason: Option<String>,
}

/// Body of `POST /reservations/guest-cancel`
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GuestCancelRequest {
    pub reservation_id: Uuid,

    #[validate(length(min = 1, max = 2000, message = "A reason is required"))]
    pub reason: String,
}

/// Body of `POST /reservations`
///
/// Sent once the guest's payment has been captured. The guest is the caller.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateReservationRequest {
    pub listing_id: Uuid,
    pub host_id: Uuid,
    pub arrival_date: NaiveDate,
    pub departure_date: NaiveDate,
    pub base_price: Decimal,
    #[serde(default)]
    pub platform_fee: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    pub total_price: Decimal,

    #[validate(length(equal = 3, message = "Currency must be a 3-letter ISO code"))]
    pub currency: String,

    #[serde(default, rename = "refund50PercentDate")]
    pub refund_50_percent_date: Option<NaiveDate>,

    #[serde(default, rename = "refund0PercentDate")]
    pub refund_0_percent_date: Option<NaiveDate>,

    #[validate(length(min = 1, max = 255, message = "Payment reference is required"))]
    pub payment_reference: String,
}

impl CreateReservationRequest {
    /// Booking payload for `guest_id`
    pub fn into_new_reservation(self, guest_id: Uuid) -> NewReservation {
        NewReservation {
            listing_id: self.listing_id,
            guest_id,
            host_id: self.host_id,
            arrival_date: self.arrival_date,
            departure_date: self.departure_date,
            base_price: self.base_price,
            platform_fee: self.platform_fee,
            tax: self.tax,
            total_price: self.total_price,
            currency: self.currency,
            refund_50_percent_date: self.refund_50_percent_date,
            refund_0_percent_date: self.refund_0_percent_date,
            payment_reference: self.payment_reference,
        }
    }
}

/// Side of the reservations to list
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PartyParam {
    #[default]
    Guest,
    Host,
}

impl From<PartyParam> for Party {
    fn from(p: PartyParam) -> Self {
        match p {
            PartyParam::Guest => Party::Guest,
            PartyParam::Host => Party::Host,
        }
    }
}

/// Query of `GET /reservations`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListReservationsQuery {
    #[serde(rename = "as", default)]
    pub party: PartyParam,
}

/// Query of `GET /admin/reservations`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminReservationsQuery {
    pub status: Option<String>,
}

impl AdminReservationsQuery {
    /// Parsed status filter
    pub fn status(&self) -> Result<Option<ReservationStatus>, AppError> {
        self.status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| {
                ReservationStatus::parse(s)
                    .ok_or_else(|| AppError::InvalidInput(format!("Unknown status '{}'", s)))
            })
            .transpose()
    }
}

// ==================== Responses ====================

/// Reservation as returned by the API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationResponse {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub guest_id: Uuid,
    pub host_id: Uuid,
    pub arrival_date: NaiveDate,
    pub departure_date: NaiveDate,
    pub nights: i64,
    pub base_price: f64,
    pub platform_fee: f64,
    pub tax: f64,
    pub total_price: f64,
    pub currency: String,
    #[serde(rename = "refund50PercentDate")]
    pub refund_50_percent_date: Option<NaiveDate>,
    #[serde(rename = "refund0PercentDate")]
    pub refund_0_percent_date: Option<NaiveDate>,
    pub status: ReservationStatus,
    pub host_validation_ok: bool,
    pub cancellation_reason: Option<String>,
    pub payment_reference: String,
    pub refunded_amount: f64,
    pub refund_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub canceled_at: Option<DateTime<Utc>>,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            nights: r.nights(),
            id: r.id,
            listing_id: r.listing_id,
            guest_id: r.guest_id,
            host_id: r.host_id,
            arrival_date: r.arrival_date,
            departure_date: r.departure_date,
            base_price: money(r.base_price),
            platform_fee: money(r.platform_fee),
            tax: money(r.tax),
            total_price: money(r.total_price),
            currency: r.currency,
            refund_50_percent_date: r.refund_50_percent_date,
            refund_0_percent_date: r.refund_0_percent_date,
            status: r.status,
            host_validation_ok: r.host_validation_ok,
            cancellation_reason: r.cancellation_reason,
            payment_reference: r.payment_reference,
            refunded_amount: money(r.refunded_amount),
            refund_reference: r.refund_reference,
            created_at: r.created_at,
            updated_at: r.updated_at,
            canceled_at: r.canceled_at,
        }
    }
}

/// Refund issued by a transition
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub provider_id: String,
    pub amount: f64,
    pub status: String,
}

impl From<RefundReceipt> for RefundResponse {
    fn from(r: RefundReceipt) -> Self {
        Self {
            provider_id: r.provider_id,
            amount: money(r.amount),
            status: r.status,
        }
    }
}

/// Result of a lifecycle action
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub reservation: ReservationResponse,
    pub refund: Option<RefundResponse>,
    pub refund_percent: u8,
}

impl From<TransitionOutcome> for TransitionResponse {
    fn from(o: TransitionOutcome) -> Self {
        Self {
            reservation: o.reservation.into(),
            refund: o.refund.map(Into::into),
            refund_percent: o.refund_percent,
        }
    }
}

/// Guest refund preview
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundQuoteResponse {
    pub reservation_id: Uuid,
    pub cancelable: bool,
    pub tier: RefundTier,
    pub percent: u8,
    pub amount: f64,
    pub currency: String,
    pub half_refund_from: NaiveDate,
    pub no_refund_from: NaiveDate,
}

impl From<RefundQuote> for RefundQuoteResponse {
    fn from(q: RefundQuote) -> Self {
        Self {
            reservation_id: q.reservation_id,
            cancelable: q.cancelable,
            tier: q.tier,
            percent: q.percent,
            amount: money(q.amount),
            currency: q.currency,
            half_refund_from: q.half_refund_from,
            no_refund_from: q.no_refund_from,
        }
    }
}

/// History entry
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationEventResponse {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub kind: EventKind,
    pub from_status: Option<ReservationStatus>,
    pub to_status: ReservationStatus,
    pub refund_amount: f64,
    pub refund_percent: u8,
    pub refund_reference: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<ReservationEvent> for ReservationEventResponse {
    fn from(e: ReservationEvent) -> Self {
        Self {
            id: e.id,
            actor_id: e.actor_id,
            kind: e.kind,
            from_status: e.from_status,
            to_status: e.to_status,
            refund_amount: money(e.refund_amount),
            refund_percent: e.refund_percent,
            refund_reference: e.refund_reference,
            reason: e.reason,
            created_at: e.created_at,
        }
    }
}
