//! Common traits for repositories and external collaborators
//!
//! Defines abstractions for reservation storage and the payment provider.

use crate::error::AppError;
use crate::lifecycle::TransitionPlan;
use crate::models::{Reservation, ReservationEvent, ReservationStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Which side of the reservations a user is listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Guest,
    Host,
}

/// Conditional update of a reservation's lifecycle state
///
/// Applied only if the stored reservation still has `expected_status` and,
/// when set, `expected_validation`. A `None` `new_validation` keeps the
/// stored flag. The event row is written in the same commit.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub reservation_id: Uuid,
    pub expected_status: ReservationStatus,
    pub expected_validation: Option<bool>,
    pub new_status: ReservationStatus,
    pub new_validation: Option<bool>,
    pub cancellation_reason: Option<String>,
    pub refunded_amount: Decimal,
    pub refund_reference: Option<String>,
    pub at: DateTime<Utc>,
    pub event: ReservationEvent,
}

impl StatusChange {
    /// Build the change committing `plan`
    pub fn from_plan(
        reservation_id: Uuid,
        actor_id: Uuid,
        plan: &TransitionPlan,
        reason: Option<String>,
        receipt: Option<&RefundReceipt>,
        at: DateTime<Utc>,
    ) -> Self {
        let refunded_amount = receipt.map(|r| r.amount).unwrap_or(Decimal::ZERO);
        let refund_reference = receipt.map(|r| r.provider_id.clone());
        let refund_percent = plan.refund.map(|r| r.tier.percent()).unwrap_or(0);

        let event = ReservationEvent {
            id: Uuid::new_v4(),
            reservation_id,
            actor_id,
            kind: plan.kind,
            from_status: Some(plan.expected_status),
            to_status: plan.new_status,
            refund_amount: refunded_amount,
            refund_percent,
            refund_reference: refund_reference.clone(),
            reason: reason.clone(),
            created_at: at,
        };

        Self {
            reservation_id,
            expected_status: plan.expected_status,
            expected_validation: plan.expected_validation,
            new_status: plan.new_status,
            new_validation: plan.new_validation,
            cancellation_reason: if plan.is_terminal() { reason } else { None },
            refunded_amount,
            refund_reference,
            at,
            event,
        }
    }
}

/// Reservation storage
///
/// Reservations are never deleted, so there is no delete operation.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Find reservation by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Reservation>, AppError>;

    /// Find reservation by the payment intent that paid for it
    async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> Result<Option<Reservation>, AppError>;

    /// Insert a new reservation with its creation event, blocking its nights
    async fn create(
        &self,
        reservation: &Reservation,
        event: &ReservationEvent,
    ) -> Result<Reservation, AppError>;

    /// List reservations where `user_id` is the guest or the host
    async fn list_for_user(
        &self,
        user_id: Uuid,
        party: Party,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Reservation>, i64), AppError>;

    /// List all reservations, optionally by status (moderation)
    async fn list_all(
        &self,
        status: Option<ReservationStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Reservation>, i64), AppError>;

    /// Apply `change` if the stored state still matches its expectation
    ///
    /// Returns `None` when the reservation was modified in the meantime.
    async fn compare_and_set(&self, change: &StatusChange)
        -> Result<Option<Reservation>, AppError>;

    /// Record a refund that was issued without its transition committing
    ///
    /// Adds the receipt to the refunded total whatever the current status,
    /// and writes `event` in the same commit. Returns `None` if the
    /// reservation does not exist.
    async fn record_refund(
        &self,
        reservation_id: Uuid,
        receipt: &RefundReceipt,
        event: &ReservationEvent,
    ) -> Result<Option<Reservation>, AppError>;

    /// History of a reservation, oldest first
    async fn events(&self, reservation_id: Uuid) -> Result<Vec<ReservationEvent>, AppError>;

    /// Make the reservation's nights bookable again; returns freed nights
    async fn release_dates(&self, reservation_id: Uuid) -> Result<u64, AppError>;
}

/// Why a refund is issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundCause {
    HostRejected,
    HostCanceled,
    GuestCanceled,
}

/// Refund instruction sent to the payment provider
#[derive(Debug, Clone, PartialEq)]
pub struct RefundRequest {
    pub reservation_id: Uuid,
    pub payment_reference: String,
    /// Major units
    pub amount: Decimal,
    pub currency: String,
    pub cause: RefundCause,
    /// Same key for every refund attempt made from one reservation state
    pub idempotency_key: String,
}

impl RefundRequest {
    /// Idempotency key for refunds of `reservation_id`
    ///
    /// Derived from the last refund already recorded, so concurrent attempts
    /// from the same state share a key while a later refund gets a new one.
    pub fn idempotency_key_for(reservation_id: Uuid, last_refund: Option<&str>) -> String {
        match last_refund {
            None => format!("reservation-{}-refund", reservation_id),
            Some(previous) => format!("reservation-{}-refund-after-{}", reservation_id, previous),
        }
    }
}

/// Refund accepted by the payment provider
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundReceipt {
    pub provider_id: String,
    /// Major units
    pub amount: Decimal,
    pub status: String,
}

/// State of a captured payment as reported by the provider
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentSnapshot {
    pub reference: String,
    pub captured: bool,
    /// Major units
    pub amount_received: Decimal,
    pub currency: String,
}

/// Payment provider
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Refund part or all of a captured payment
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, AppError>;

    /// Look up a payment by reference
    async fn fetch_payment(&self, reference: &str) -> Result<PaymentSnapshot, AppError>;
}

/// Largest page size served
pub const MAX_PER_PAGE: i64 = 200;

/// Largest page number whose offset fits an `i64` at any page size
pub const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

/// Pagination parameters
#[derive(Debug, Clone, Default)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    pub fn new(page: i64, per_page: i64) -> Self {
        Self {
            page: page.clamp(1, MAX_PAGE),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page.max(1) - 1).saturating_mul(self.per_page)
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }
}

/// Paginated response wrapper
#[derive(Debug, Clone, Serialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// Pagination metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub total_pages: i64,
}

impl PaginationMeta {
    pub fn new(total: i64, page: i64, per_page: i64) -> Self {
        let total_pages = if per_page > 0 {
            (total + per_page - 1) / per_page
        } else {
            0
        };

        Self {
            total,
            page,
            per_page,
            total_pages,
        }
    }
}
