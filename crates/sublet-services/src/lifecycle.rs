//! Reservation lifecycle service
//!
//! Every transition runs the same pipeline:
//!
//! 1. load the reservation (404 if missing)
//! 2. check the caller is its host or guest (403)
//! 3. plan the transition with the pure lifecycle rules (409 if not allowed)
//! 4. refund through the payment gateway when money is due
//! 5. commit with a conditional update on the status read in step 1
//! 6. free the listing's nights when the reservation ended
//!
//! A failed refund stops the pipeline before step 5, so the reservation
//! keeps its previous state. The refund idempotency key is derived from the
//! reservation's last refund, so two callers racing on the same state share
//! one refund at the provider.
//!
//! When step 5 loses a race after money moved, the reservation is read
//! again. If the same refund still applies to the new state the transition
//! commits against it; otherwise the refund is stored on its own as a
//! `refund_recorded` event and the caller gets a conflict.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use sublet_core::{
    lifecycle::{plan, Action, RefundDecision, TransitionPlan},
    models::{
        EventKind, NewReservation, Reservation, ReservationEvent, ReservationStatus, UserRole,
    },
    traits::{
        PaginatedResponse, Pagination, PaginationMeta, Party, PaymentGateway, RefundCause,
        RefundReceipt, RefundRequest, ReservationRepository, StatusChange,
    },
    AppError, AppResult, Clock, RefundPolicy, RefundTier,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::constants::MAX_REASON_LENGTH;

/// Identity of the user calling the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl Caller {
    pub fn new(user_id: Uuid, role: UserRole) -> Self {
        Self { user_id, role }
    }

    fn can_read(&self, reservation: &Reservation) -> bool {
        self.role.is_admin()
            || reservation.is_host(self.user_id)
            || reservation.is_guest(self.user_id)
    }
}

/// Result of a committed transition
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub reservation: Reservation,
    /// Refund issued by the provider, if any money moved
    pub refund: Option<RefundReceipt>,
    pub refund_percent: u8,
}

/// What a guest would get back by canceling now
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundQuote {
    pub reservation_id: Uuid,
    /// False when the reservation cannot be canceled by the guest right now
    pub cancelable: bool,
    pub tier: RefundTier,
    pub percent: u8,
    /// Major units
    pub amount: Decimal,
    pub currency: String,
    /// First day of the 50% tier
    pub half_refund_from: NaiveDate,
    /// First day with no refund
    pub no_refund_from: NaiveDate,
}

/// Reservation lifecycle service
pub struct ReservationLifecycle<R, P>
where
    R: ReservationRepository + ?Sized,
    P: PaymentGateway + ?Sized,
{
    repo: Arc<R>,
    payments: Arc<P>,
    clock: Arc<dyn Clock>,
    policy: RefundPolicy,
}

impl<R, P> ReservationLifecycle<R, P>
where
    R: ReservationRepository + ?Sized,
    P: PaymentGateway + ?Sized,
{
    /// Create a new lifecycle service
    pub fn new(repo: Arc<R>, payments: Arc<P>, clock: Arc<dyn Clock>, policy: RefundPolicy) -> Self {
        Self {
            repo,
            payments,
            clock,
            policy,
        }
    }

    /// Refund policy in effect
    pub fn policy(&self) -> &RefundPolicy {
        &self.policy
    }

    // ==================== Transitions ====================

    /// Set or clear the host's validation flag
    ///
    /// Validating a pending reservation confirms it. Clearing the flag never
    /// moves a reservation back to pending.
    #[instrument(skip(self))]
    pub async fn host_validate(
        &self,
        host_id: Uuid,
        reservation_id: Uuid,
        host_validation: bool,
    ) -> AppResult<TransitionOutcome> {
        self.execute(host_id, reservation_id, Action::HostValidate(host_validation), None)
            .await
    }

    /// Reject a reservation the host has not validated; full refund
    #[instrument(skip(self, reason))]
    pub async fn host_reject(
        &self,
        host_id: Uuid,
        reservation_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        let reason = normalize_reason(reason)?;
        self.execute(host_id, reservation_id, Action::HostReject, reason)
            .await
    }

    /// Cancel a validated reservation as the host; full refund
    #[instrument(skip(self, reason))]
    pub async fn host_cancel(
        &self,
        host_id: Uuid,
        reservation_id: Uuid,
        reason: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        let reason = normalize_reason(reason)?;
        self.execute(host_id, reservation_id, Action::HostCancel, reason)
            .await
    }

    /// Cancel a confirmed reservation as the guest; tiered refund
    #[instrument(skip(self, reason))]
    pub async fn guest_cancel(
        &self,
        guest_id: Uuid,
        reservation_id: Uuid,
        reason: String,
    ) -> AppResult<TransitionOutcome> {
        let reason = normalize_reason(Some(reason))?
            .ok_or_else(|| AppError::MissingField("reason".to_string()))?;
        self.execute(guest_id, reservation_id, Action::GuestCancel, Some(reason))
            .await
    }

    async fn execute(
        &self,
        actor_id: Uuid,
        reservation_id: Uuid,
        action: Action,
        reason: Option<String>,
    ) -> AppResult<TransitionOutcome> {
        let reservation = self.load(reservation_id).await?;
        authorize(&reservation, actor_id, action)?;

        let now = self.clock.now();
        let plan = plan(&reservation, action, now, &self.policy)?;

        debug!(
            "Reservation {}: {} -> {} (validated {:?} -> {:?})",
            reservation_id,
            plan.expected_status,
            plan.new_status,
            plan.expected_validation,
            plan.new_validation
        );

        let receipt = match plan.refund {
            Some(decision) if decision.is_due() => {
                Some(self.refund(&reservation, &plan, decision).await?)
            }
            _ => None,
        };

        let change = StatusChange::from_plan(
            reservation_id,
            actor_id,
            &plan,
            reason.clone(),
            receipt.as_ref(),
            now,
        );

        let (plan, updated) = match self.repo.compare_and_set(&change).await? {
            Some(updated) => (plan, updated),
            None => match &receipt {
                Some(receipt) => {
                    self.reconcile(actor_id, reservation_id, &plan, reason, receipt)
                        .await?
                }
                None => {
                    warn!("Reservation {} changed concurrently", reservation_id);
                    return Err(AppError::ConcurrentModification(reservation_id.to_string()));
                }
            },
        };

        if plan.is_terminal() {
            match self.repo.release_dates(reservation_id).await {
                Ok(nights) => debug!("Released {} nights of {}", nights, reservation_id),
                Err(e) => warn!(
                    "Reservation {} ended but its nights were not released: {}",
                    reservation_id, e
                ),
            }
        }

        let refund_percent = plan.refund.map(|r| r.tier.percent()).unwrap_or(0);

        info!(
            "Reservation {} is now {} (validated: {}, refund: {}%)",
            reservation_id, updated.status, updated.host_validation_ok, refund_percent
        );

        Ok(TransitionOutcome {
            reservation: updated,
            refund: receipt,
            refund_percent,
        })
    }

    /// Settle a refund whose transition lost the conditional update
    async fn reconcile(
        &self,
        actor_id: Uuid,
        reservation_id: Uuid,
        stale: &TransitionPlan,
        reason: Option<String>,
        receipt: &RefundReceipt,
    ) -> AppResult<(TransitionPlan, Reservation)> {
        let conflict = || AppError::ConcurrentModification(reservation_id.to_string());
        let current = self.load(reservation_id).await?;

        // A racing caller with the same plan shared our refund and committed it
        if current.refund_reference.as_deref() == Some(receipt.provider_id.as_str()) {
            warn!(
                "Reservation {} already settled refund {}",
                reservation_id, receipt.provider_id
            );
            return Err(conflict());
        }

        let now = self.clock.now();
        if let Ok(replanned) = plan(&current, stale.action, now, &self.policy) {
            if replanned.refund.map(|r| r.amount) == Some(receipt.amount) {
                let change = StatusChange::from_plan(
                    reservation_id,
                    actor_id,
                    &replanned,
                    reason.clone(),
                    Some(receipt),
                    now,
                );
                if let Some(updated) = self.repo.compare_and_set(&change).await? {
                    info!(
                        "Reservation {} changed during refund {}; committed against {}",
                        reservation_id, receipt.provider_id, replanned.expected_status
                    );
                    return Ok((replanned, updated));
                }
            }
        }

        error!(
            "Reservation {} changed while refund {} was issued; recording refund without transition",
            reservation_id, receipt.provider_id
        );

        let event = ReservationEvent {
            id: Uuid::new_v4(),
            reservation_id,
            actor_id,
            kind: EventKind::RefundRecorded,
            from_status: Some(current.status),
            to_status: current.status,
            refund_amount: receipt.amount,
            refund_percent: stale.refund.map(|r| r.tier.percent()).unwrap_or(0),
            refund_reference: Some(receipt.provider_id.clone()),
            reason,
            created_at: now,
        };
        self.repo.record_refund(reservation_id, receipt, &event).await?;

        Err(conflict())
    }

    async fn refund(
        &self,
        reservation: &Reservation,
        plan: &TransitionPlan,
        decision: RefundDecision,
    ) -> AppResult<RefundReceipt> {
        let cause = match plan.action {
            Action::HostReject => RefundCause::HostRejected,
            Action::HostCancel => RefundCause::HostCanceled,
            Action::GuestCancel => RefundCause::GuestCanceled,
            Action::HostValidate(_) => {
                return Err(AppError::Internal(
                    "validation changes never refund".to_string(),
                ))
            }
        };

        let request = RefundRequest {
            reservation_id: reservation.id,
            payment_reference: reservation.payment_reference.clone(),
            amount: decision.amount,
            currency: reservation.currency.clone(),
            cause,
            idempotency_key: RefundRequest::idempotency_key_for(
                reservation.id,
                reservation.refund_reference.as_deref(),
            ),
        };

        info!(
            "Refunding {} {} ({}) for reservation {}",
            request.amount, request.currency, decision.tier, reservation.id
        );

        self.payments.refund(&request).await.map_err(|e| {
            error!(
                "Refund for reservation {} failed, nothing committed: {}",
                reservation.id, e
            );
            e
        })
    }

    // ==================== Queries ====================

    /// Fetch a reservation visible to `caller`
    #[instrument(skip(self))]
    pub async fn get(&self, caller: Caller, reservation_id: Uuid) -> AppResult<Reservation> {
        let reservation = self.load(reservation_id).await?;
        if !caller.can_read(&reservation) {
            return Err(AppError::Forbidden(
                "not a party to this reservation".to_string(),
            ));
        }
        Ok(reservation)
    }

    /// Reservations where `user_id` is the guest or the host
    #[instrument(skip(self))]
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        party: Party,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Reservation>> {
        let (data, total) = self
            .repo
            .list_for_user(user_id, party, pagination.limit(), pagination.offset())
            .await?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(total, pagination.page, pagination.per_page),
        })
    }

    /// All reservations, for moderation
    #[instrument(skip(self))]
    pub async fn list_all(
        &self,
        status: Option<ReservationStatus>,
        pagination: Pagination,
    ) -> AppResult<PaginatedResponse<Reservation>> {
        let (data, total) = self
            .repo
            .list_all(status, pagination.limit(), pagination.offset())
            .await?;

        Ok(PaginatedResponse {
            data,
            pagination: PaginationMeta::new(total, pagination.page, pagination.per_page),
        })
    }

    /// History of a reservation visible to `caller`
    #[instrument(skip(self))]
    pub async fn history(
        &self,
        caller: Caller,
        reservation_id: Uuid,
    ) -> AppResult<Vec<ReservationEvent>> {
        self.get(caller, reservation_id).await?;
        self.repo.events(reservation_id).await
    }

    /// Preview of a guest cancellation; changes nothing
    #[instrument(skip(self))]
    pub async fn refund_quote(&self, caller: Caller, reservation_id: Uuid) -> AppResult<RefundQuote> {
        let reservation = self.load(reservation_id).await?;
        if !reservation.is_guest(caller.user_id) && !caller.role.is_admin() {
            return Err(AppError::Forbidden(
                "only the guest can request a refund quote".to_string(),
            ));
        }

        let now = self.clock.now();
        let thresholds = self.policy.thresholds(
            reservation.arrival_date,
            reservation.refund_50_percent_date,
            reservation.refund_0_percent_date,
        );

        let (cancelable, decision) = match plan(&reservation, Action::GuestCancel, now, &self.policy)
        {
            Ok(plan) => (true, plan.refund),
            Err(AppError::InvalidTransition { .. }) | Err(AppError::StayStarted(_)) => (false, None),
            Err(e) => return Err(e),
        };
        let tier = decision.map(|d| d.tier).unwrap_or(RefundTier::None);

        Ok(RefundQuote {
            reservation_id,
            cancelable,
            tier,
            percent: tier.percent(),
            amount: decision.map(|d| d.amount).unwrap_or(Decimal::ZERO),
            currency: reservation.currency,
            half_refund_from: thresholds.half_from,
            no_refund_from: thresholds.none_from,
        })
    }

    // ==================== Booking ====================

    /// Record a reservation whose payment has been captured
    ///
    /// The payment is checked with the provider: it must be captured, for the
    /// reservation's total and currency. A payment can back one reservation.
    #[instrument(skip(self, booking), fields(payment = %booking.payment_reference))]
    pub async fn record_booking(
        &self,
        guest_id: Uuid,
        booking: NewReservation,
    ) -> AppResult<Reservation> {
        if booking.guest_id != guest_id {
            return Err(AppError::Forbidden(
                "reservations can only be booked for oneself".to_string(),
            ));
        }
        booking.validate()?;

        if self
            .repo
            .find_by_payment_reference(&booking.payment_reference)
            .await?
            .is_some()
        {
            return Err(AppError::AlreadyExists(
                "a reservation already exists for this payment".to_string(),
            ));
        }

        let payment = self.payments.fetch_payment(&booking.payment_reference).await?;
        if !payment.captured {
            return Err(AppError::PaymentNotCaptured(booking.payment_reference));
        }
        if !payment.currency.eq_ignore_ascii_case(booking.currency.trim()) {
            return Err(AppError::PaymentNotCaptured(format!(
                "payment is in {}, reservation in {}",
                payment.currency, booking.currency
            )));
        }
        if payment.amount_received != booking.total_price {
            return Err(AppError::PaymentNotCaptured(format!(
                "captured {} but reservation total is {}",
                payment.amount_received, booking.total_price
            )));
        }

        let now = self.clock.now();
        let reservation = booking.into_reservation(now);
        let event = ReservationEvent::created(reservation.id, guest_id, now);
        let created = self.repo.create(&reservation, &event).await?;

        info!(
            "Reservation {} booked on listing {} ({} nights, {} {})",
            created.id,
            created.listing_id,
            created.nights(),
            created.total_price,
            created.currency
        );

        Ok(created)
    }

    async fn load(&self, reservation_id: Uuid) -> AppResult<Reservation> {
        self.repo
            .find_by_id(reservation_id)
            .await?
            .ok_or_else(|| AppError::ReservationNotFound(reservation_id.to_string()))
    }
}

/// Check that `actor_id` is the party allowed to perform `action`
fn authorize(reservation: &Reservation, actor_id: Uuid, action: Action) -> AppResult<()> {
    if action.is_host_action() {
        if !reservation.is_host(actor_id) {
            warn!(
                "User {} tried to {} reservation {} as host",
                actor_id,
                action.verb(),
                reservation.id
            );
            return Err(AppError::Forbidden(
                "only the host of this reservation can do this".to_string(),
            ));
        }
    } else if !reservation.is_guest(actor_id) {
        warn!(
            "User {} tried to {} reservation {} as guest",
            actor_id,
            action.verb(),
            reservation.id
        );
        return Err(AppError::Forbidden(
            "only the guest of this reservation can do this".to_string(),
        ));
    }

    Ok(())
}

/// Trim a free-text reason; blank means none
fn normalize_reason(reason: Option<String>) -> AppResult<Option<String>> {
    let Some(reason) = reason else {
        return Ok(None);
    };
    let reason = reason.trim();
    if reason.chars().count() > MAX_REASON_LENGTH {
        return Err(AppError::Validation(format!(
            "reason cannot exceed {} characters",
            MAX_REASON_LENGTH
        )));
    }
    Ok((!reason.is_empty()).then(|| reason.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use mockall::mock;
    use rust_decimal_macros::dec;
    use sublet_core::traits::PaymentSnapshot;
    use sublet_core::FixedClock;
    use parking_lot::Mutex;
    use sublet_db::MemoryReservationRepository;

    mock! {
        pub Gateway {}

        #[async_trait]
        impl PaymentGateway for Gateway {
            async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, AppError>;
            async fn fetch_payment(&self, reference: &str) -> Result<PaymentSnapshot, AppError>;
        }
    }

    type Service = ReservationLifecycle<MemoryReservationRepository, MockGateway>;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    fn booking(guest_id: Uuid, host_id: Uuid) -> NewReservation {
        NewReservation {
            listing_id: Uuid::new_v4(),
            guest_id,
            host_id,
            arrival_date: NaiveDate::from_ymd_opt(2025, 6, 10).unwrap(),
            departure_date: NaiveDate::from_ymd_opt(2025, 6, 14).unwrap(),
            base_price: dec!(400.00),
            platform_fee: dec!(40.00),
            tax: dec!(8.00),
            total_price: dec!(448.00),
            currency: "eur".to_string(),
            refund_50_percent_date: None,
            refund_0_percent_date: None,
            payment_reference: format!("pi_{}", Uuid::new_v4().simple()),
        }
    }

    fn receipt(amount: Decimal) -> RefundReceipt {
        RefundReceipt {
            provider_id: "re_test".to_string(),
            amount,
            status: "succeeded".to_string(),
        }
    }

    struct Fixture {
        repo: Arc<MemoryReservationRepository>,
        reservation: Reservation,
    }

    impl Fixture {
        /// Stores a reservation in `status` directly in the repository
        async fn new(status: ReservationStatus, validated: bool) -> Self {
            let repo = Arc::new(MemoryReservationRepository::new());
            let mut reservation =
                booking(Uuid::new_v4(), Uuid::new_v4()).into_reservation(at(2025, 5, 1));
            reservation.status = status;
            reservation.host_validation_ok = validated;
            let event = ReservationEvent::created(reservation.id, reservation.guest_id, at(2025, 5, 1));
            repo.create(&reservation, &event).await.unwrap();
            Self { repo, reservation }
        }

        fn service(&self, gateway: MockGateway, now: DateTime<Utc>) -> Service {
            ReservationLifecycle::new(
                self.repo.clone(),
                Arc::new(gateway),
                Arc::new(FixedClock(now)),
                RefundPolicy::default(),
            )
        }

        /// Service whose first read returns the reservation as first stored
        fn stale_service(
            &self,
            gateway: MockGateway,
            now: DateTime<Utc>,
        ) -> ReservationLifecycle<StaleRepository, MockGateway> {
            ReservationLifecycle::new(
                Arc::new(StaleRepository::new(self.repo.clone(), &self.reservation)),
                Arc::new(gateway),
                Arc::new(FixedClock(now)),
                RefundPolicy::default(),
            )
        }

        fn guest(&self) -> Uuid {
            self.reservation.guest_id
        }

        fn host(&self) -> Uuid {
            self.reservation.host_id
        }

        async fn stored(&self) -> Reservation {
            self.repo
                .find_by_id(self.reservation.id)
                .await
                .unwrap()
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_host_validate_confirms_pending() {
        let fx = Fixture::new(ReservationStatus::Pending, false).await;
        let mut gateway = MockGateway::new();
        gateway.expect_refund().never();
        let service = fx.service(gateway, at(2025, 5, 2));

        let outcome = service
            .host_validate(fx.host(), fx.reservation.id, true)
            .await
            .unwrap();

        assert_eq!(outcome.reservation.status, ReservationStatus::Confirmed);
        assert!(outcome.reservation.host_validation_ok);
        assert!(outcome.refund.is_none());
        assert_eq!(fx.repo.events(fx.reservation.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_guest_cannot_validate() {
        let fx = Fixture::new(ReservationStatus::Pending, false).await;
        let service = fx.service(MockGateway::new(), at(2025, 5, 2));

        let err = service
            .host_validate(fx.guest(), fx.reservation.id, true)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
        assert_eq!(fx.stored().await.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_reservation() {
        let fx = Fixture::new(ReservationStatus::Pending, false).await;
        let service = fx.service(MockGateway::new(), at(2025, 5, 2));

        let err = service
            .host_reject(fx.host(), Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ReservationNotFound(_)));
    }

    #[tokio::test]
    async fn test_host_reject_refunds_in_full() {
        let fx = Fixture::new(ReservationStatus::Pending, false).await;
        let id = fx.reservation.id;
        let mut gateway = MockGateway::new();
        gateway
            .expect_refund()
            .withf(move |req| {
                req.amount == dec!(448.00)
                    && req.cause == RefundCause::HostRejected
                    && req.idempotency_key == RefundRequest::idempotency_key_for(id, None)
            })
            .times(1)
            .returning(|req| Ok(receipt(req.amount)));
        let service = fx.service(gateway, at(2025, 5, 2));

        let outcome = service
            .host_reject(fx.host(), id, Some("  maintenance  ".to_string()))
            .await
            .unwrap();

        assert_eq!(outcome.reservation.status, ReservationStatus::Rejected);
        assert_eq!(outcome.refund_percent, 100);
        assert_eq!(outcome.reservation.refunded_amount, dec!(448.00));
        assert_eq!(outcome.reservation.refund_reference.as_deref(), Some("re_test"));
        assert_eq!(
            outcome.reservation.cancellation_reason.as_deref(),
            Some("maintenance")
        );
        assert_eq!(fx.repo.blocked_nights(fx.reservation.listing_id), 0);
    }

    #[tokio::test]
    async fn test_host_cannot_reject_validated() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let mut gateway = MockGateway::new();
        gateway.expect_refund().never();
        let service = fx.service(gateway, at(2025, 5, 2));

        let err = service
            .host_reject(fx.host(), fx.reservation.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_host_cancel_requires_validation() {
        let fx = Fixture::new(ReservationStatus::Confirmed, false).await;
        let service = fx.service(MockGateway::new(), at(2025, 5, 2));

        let err = service
            .host_cancel(fx.host(), fx.reservation.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_guest_cancel_tiers() {
        let cases = [
            (at(2025, 6, 1), dec!(448.00), 100),
            (at(2025, 6, 6), dec!(224.00), 50),
        ];

        for (now, expected, percent) in cases {
            let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
            let mut gateway = MockGateway::new();
            gateway
                .expect_refund()
                .withf(move |req| req.amount == expected && req.cause == RefundCause::GuestCanceled)
                .times(1)
                .returning(|req| Ok(receipt(req.amount)));
            let service = fx.service(gateway, now);

            let outcome = service
                .guest_cancel(fx.guest(), fx.reservation.id, "plans changed".to_string())
                .await
                .unwrap();

            assert_eq!(outcome.reservation.status, ReservationStatus::Canceled);
            assert_eq!(outcome.refund_percent, percent);
            assert_eq!(outcome.reservation.refunded_amount, expected);
        }
    }

    #[tokio::test]
    async fn test_guest_cancel_without_refund_skips_gateway() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let mut gateway = MockGateway::new();
        gateway.expect_refund().never();
        let service = fx.service(gateway, at(2025, 6, 9));

        let outcome = service
            .guest_cancel(fx.guest(), fx.reservation.id, "missed flight".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.reservation.status, ReservationStatus::Canceled);
        assert_eq!(outcome.refund_percent, 0);
        assert!(outcome.refund.is_none());
        assert_eq!(outcome.reservation.refunded_amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_guest_cancel_after_arrival() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let service = fx.service(MockGateway::new(), at(2025, 6, 10));

        let err = service
            .guest_cancel(fx.guest(), fx.reservation.id, "too late".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StayStarted(_)));
    }

    #[tokio::test]
    async fn test_guest_cancel_requires_reason() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let service = fx.service(MockGateway::new(), at(2025, 6, 1));

        let err = service
            .guest_cancel(fx.guest(), fx.reservation.id, "   ".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingField(_)));
    }

    #[tokio::test]
    async fn test_payment_failure_commits_nothing() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let mut gateway = MockGateway::new();
        gateway
            .expect_refund()
            .times(1)
            .returning(|_| Err(AppError::PaymentUnavailable("timeout".to_string())));
        let service = fx.service(gateway, at(2025, 6, 1));

        let err = service
            .host_cancel(fx.host(), fx.reservation.id, None)
            .await
            .unwrap_err();

        assert!(err.is_payment_error());
        let stored = fx.stored().await;
        assert_eq!(stored.status, ReservationStatus::Confirmed);
        assert!(stored.host_validation_ok);
        assert_eq!(stored.refunded_amount, Decimal::ZERO);
        assert_eq!(fx.repo.events(fx.reservation.id).await.unwrap().len(), 1);
        assert_eq!(fx.repo.blocked_nights(fx.reservation.listing_id), 4);
    }

    #[tokio::test]
    async fn test_terminal_reservations_are_final() {
        let fx = Fixture::new(ReservationStatus::Canceled, true).await;
        let mut gateway = MockGateway::new();
        gateway.expect_refund().never();
        let service = fx.service(gateway, at(2025, 6, 1));

        assert!(matches!(
            service.host_validate(fx.host(), fx.reservation.id, true).await,
            Err(AppError::InvalidTransition { .. })
        ));
        assert!(matches!(
            service
                .guest_cancel(fx.guest(), fx.reservation.id, "again".to_string())
                .await,
            Err(AppError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_cancel_does_not_refund_twice() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let mut gateway = MockGateway::new();
        gateway
            .expect_refund()
            .times(1)
            .returning(|req| Ok(receipt(req.amount)));
        let service = fx.service(gateway, at(2025, 6, 1));

        service
            .host_cancel(fx.host(), fx.reservation.id, None)
            .await
            .unwrap();
        let err = service
            .guest_cancel(fx.guest(), fx.reservation.id, "me too".to_string())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_refund_quote() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let service = fx.service(MockGateway::new(), at(2025, 6, 6));
        let guest = Caller::new(fx.guest(), UserRole::Authenticated);

        let quote = service.refund_quote(guest, fx.reservation.id).await.unwrap();
        assert!(quote.cancelable);
        assert_eq!(quote.percent, 50);
        assert_eq!(quote.amount, dec!(224.00));
        assert_eq!(quote.half_refund_from, NaiveDate::from_ymd_opt(2025, 6, 4).unwrap());
        assert_eq!(quote.no_refund_from, NaiveDate::from_ymd_opt(2025, 6, 8).unwrap());

        // Nothing changed
        assert_eq!(fx.stored().await.status, ReservationStatus::Confirmed);

        let host = Caller::new(fx.host(), UserRole::Authenticated);
        assert!(matches!(
            service.refund_quote(host, fx.reservation.id).await,
            Err(AppError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_refund_quote_for_pending() {
        let fx = Fixture::new(ReservationStatus::Pending, false).await;
        let service = fx.service(MockGateway::new(), at(2025, 6, 1));
        let guest = Caller::new(fx.guest(), UserRole::Authenticated);

        let quote = service.refund_quote(guest, fx.reservation.id).await.unwrap();
        assert!(!quote.cancelable);
        assert_eq!(quote.tier, RefundTier::None);
        assert_eq!(quote.amount, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_read_access() {
        let fx = Fixture::new(ReservationStatus::Pending, false).await;
        let service = fx.service(MockGateway::new(), at(2025, 5, 2));
        let id = fx.reservation.id;

        let stranger = Caller::new(Uuid::new_v4(), UserRole::Authenticated);
        let admin = Caller::new(Uuid::new_v4(), UserRole::Admin);
        let host = Caller::new(fx.host(), UserRole::Authenticated);

        assert!(matches!(
            service.get(stranger, id).await,
            Err(AppError::Forbidden(_))
        ));
        assert!(service.get(admin, id).await.is_ok());
        assert_eq!(service.history(host, id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_admin_cannot_transition() {
        let fx = Fixture::new(ReservationStatus::Pending, false).await;
        let service = fx.service(MockGateway::new(), at(2025, 5, 2));

        let err = service
            .host_validate(Uuid::new_v4(), fx.reservation.id, true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn test_record_booking() {
        let repo = Arc::new(MemoryReservationRepository::new());
        let guest = Uuid::new_v4();
        let payload = booking(guest, Uuid::new_v4());
        let reference = payload.payment_reference.clone();

        let mut gateway = MockGateway::new();
        gateway
            .expect_fetch_payment()
            .withf(move |r| r == reference)
            .times(1)
            .returning(|reference| {
                Ok(PaymentSnapshot {
                    reference: reference.to_string(),
                    captured: true,
                    amount_received: dec!(448.00),
                    currency: "eur".to_string(),
                })
            });
        let service: Service = ReservationLifecycle::new(
            repo.clone(),
            Arc::new(gateway),
            Arc::new(FixedClock(at(2025, 5, 1))),
            RefundPolicy::default(),
        );

        let created = service.record_booking(guest, payload.clone()).await.unwrap();
        assert_eq!(created.status, ReservationStatus::Pending);
        assert!(!created.host_validation_ok);

        // Same payment cannot back a second reservation
        let err = service.record_booking(guest, payload).await.unwrap_err();
        assert!(matches!(err, AppError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_record_booking_rejects_uncaptured_payment() {
        let repo = Arc::new(MemoryReservationRepository::new());
        let guest = Uuid::new_v4();

        let mut gateway = MockGateway::new();
        gateway.expect_fetch_payment().returning(|reference| {
            Ok(PaymentSnapshot {
                reference: reference.to_string(),
                captured: true,
                amount_received: dec!(100.00),
                currency: "eur".to_string(),
            })
        });
        let service: Service = ReservationLifecycle::new(
            repo.clone(),
            Arc::new(gateway),
            Arc::new(FixedClock(at(2025, 5, 1))),
            RefundPolicy::default(),
        );

        let err = service
            .record_booking(guest, booking(guest, Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PaymentNotCaptured(_)));

        let (all, total) = repo.list_all(None, 10, 0).await.unwrap();
        assert!(all.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_record_booking_for_someone_else() {
        let repo = Arc::new(MemoryReservationRepository::new());
        let service: Service = ReservationLifecycle::new(
            repo,
            Arc::new(MockGateway::new()),
            Arc::new(FixedClock(at(2025, 5, 1))),
            RefundPolicy::default(),
        );

        let err = service
            .record_booking(Uuid::new_v4(), booking(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    /// Serves a snapshot taken before another request committed, then the
    /// live state
    struct StaleRepository {
        inner: Arc<MemoryReservationRepository>,
        snapshot: Mutex<Option<Reservation>>,
    }

    impl StaleRepository {
        fn new(inner: Arc<MemoryReservationRepository>, snapshot: &Reservation) -> Self {
            Self {
                inner,
                snapshot: Mutex::new(Some(snapshot.clone())),
            }
        }
    }

    #[async_trait]
    impl ReservationRepository for StaleRepository {
        async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Reservation>> {
            if let Some(snapshot) = self.snapshot.lock().take() {
                return Ok(Some(snapshot));
            }
            self.inner.find_by_id(id).await
        }

        async fn find_by_payment_reference(&self, reference: &str) -> AppResult<Option<Reservation>> {
            self.inner.find_by_payment_reference(reference).await
        }

        async fn create(
            &self,
            reservation: &Reservation,
            event: &ReservationEvent,
        ) -> AppResult<Reservation> {
            self.inner.create(reservation, event).await
        }

        async fn list_for_user(
            &self,
            user_id: Uuid,
            party: Party,
            limit: i64,
            offset: i64,
        ) -> AppResult<(Vec<Reservation>, i64)> {
            self.inner.list_for_user(user_id, party, limit, offset).await
        }

        async fn list_all(
            &self,
            status: Option<ReservationStatus>,
            limit: i64,
            offset: i64,
        ) -> AppResult<(Vec<Reservation>, i64)> {
            self.inner.list_all(status, limit, offset).await
        }

        async fn compare_and_set(&self, change: &StatusChange) -> AppResult<Option<Reservation>> {
            self.inner.compare_and_set(change).await
        }

        async fn record_refund(
            &self,
            reservation_id: Uuid,
            receipt: &RefundReceipt,
            event: &ReservationEvent,
        ) -> AppResult<Option<Reservation>> {
            self.inner.record_refund(reservation_id, receipt, event).await
        }

        async fn events(&self, reservation_id: Uuid) -> AppResult<Vec<ReservationEvent>> {
            self.inner.events(reservation_id).await
        }

        async fn release_dates(&self, reservation_id: Uuid) -> AppResult<u64> {
            self.inner.release_dates(reservation_id).await
        }
    }

    #[tokio::test]
    async fn test_lost_race_is_a_conflict() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let id = fx.reservation.id;

        let mut first = MockGateway::new();
        first
            .expect_refund()
            .times(1)
            .returning(|req| Ok(receipt(req.amount)));
        fx.service(first, at(2025, 6, 1))
            .host_cancel(fx.host(), id, None)
            .await
            .unwrap();

        // The late guest request still sees the reservation as confirmed
        let mut second = MockGateway::new();
        second
            .expect_refund()
            .withf(move |req| req.idempotency_key == format!("reservation-{}-refund", id))
            .times(1)
            .returning(|req| Ok(receipt(req.amount)));
        let late = fx.stale_service(second, at(2025, 6, 1));

        let err = late
            .guest_cancel(fx.guest(), id, "Change of plans".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConcurrentModification(_)));

        let stored = fx.stored().await;
        assert_eq!(stored.status, ReservationStatus::Canceled);
        assert_eq!(stored.refunded_amount, dec!(448.00));
        assert_eq!(fx.repo.events(id).await.unwrap().len(), 2);
    }

    fn refunding(times: usize) -> MockGateway {
        let mut gateway = MockGateway::new();
        gateway
            .expect_refund()
            .times(times)
            .returning(|req| Ok(receipt(req.amount)));
        gateway
    }

    fn idle() -> MockGateway {
        let mut gateway = MockGateway::new();
        gateway.expect_refund().never();
        gateway
    }

    #[tokio::test]
    async fn test_guest_cancel_survives_validation_toggle() {
        let fx = Fixture::new(ReservationStatus::Confirmed, false).await;
        let id = fx.reservation.id;

        fx.service(idle(), at(2025, 6, 1))
            .host_validate(fx.host(), id, true)
            .await
            .unwrap();

        // Guest read the reservation before the host validated it
        let outcome = fx
            .stale_service(refunding(1), at(2025, 6, 1))
            .guest_cancel(fx.guest(), id, "Change of plans".to_string())
            .await
            .unwrap();

        assert_eq!(outcome.reservation.status, ReservationStatus::Canceled);
        assert!(outcome.reservation.host_validation_ok);
        assert_eq!(outcome.refund_percent, 100);

        let stored = fx.stored().await;
        assert_eq!(stored.status, ReservationStatus::Canceled);
        assert_eq!(stored.refunded_amount, dec!(448.00));
        assert_eq!(stored.refund_reference.as_deref(), Some("re_test"));
        assert_eq!(fx.repo.events(id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_lost_race_commits_against_current_state() {
        let fx = Fixture::new(ReservationStatus::Pending, false).await;
        let id = fx.reservation.id;

        // Host validates then withdraws: confirmed, not validated
        let live = fx.service(idle(), at(2025, 6, 1));
        live.host_validate(fx.host(), id, true).await.unwrap();
        live.host_validate(fx.host(), id, false).await.unwrap();

        let outcome = fx
            .stale_service(refunding(1), at(2025, 6, 1))
            .host_reject(fx.host(), id, None)
            .await
            .unwrap();

        assert_eq!(outcome.reservation.status, ReservationStatus::Rejected);
        assert_eq!(outcome.reservation.refunded_amount, dec!(448.00));
        assert_eq!(outcome.refund_percent, 100);
        assert_eq!(fx.repo.blocked_nights(fx.reservation.listing_id), 0);

        let events = fx.repo.events(id).await.unwrap();
        assert_eq!(events.len(), 4);
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::HostRejected);
        assert_eq!(last.from_status, Some(ReservationStatus::Confirmed));
        assert_eq!(last.refund_reference.as_deref(), Some("re_test"));
    }

    #[tokio::test]
    async fn test_refund_recorded_when_transition_no_longer_applies() {
        let fx = Fixture::new(ReservationStatus::Confirmed, false).await;
        let id = fx.reservation.id;

        fx.service(idle(), at(2025, 6, 1))
            .host_validate(fx.host(), id, true)
            .await
            .unwrap();

        // Reject planned on the unvalidated snapshot; validated reservations cannot be rejected
        let err = fx
            .stale_service(refunding(1), at(2025, 6, 1))
            .host_reject(fx.host(), id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConcurrentModification(_)));

        let stored = fx.stored().await;
        assert_eq!(stored.status, ReservationStatus::Confirmed);
        assert!(stored.host_validation_ok);
        assert_eq!(stored.refunded_amount, dec!(448.00));
        assert_eq!(stored.refund_reference.as_deref(), Some("re_test"));

        let events = fx.repo.events(id).await.unwrap();
        assert_eq!(events.len(), 3);
        let last = events.last().unwrap();
        assert_eq!(last.kind, EventKind::RefundRecorded);
        assert_eq!(last.to_status, ReservationStatus::Confirmed);
        assert_eq!(last.refund_amount, dec!(448.00));

        // Money already went back, so canceling moves none
        let outcome = fx
            .service(idle(), at(2025, 6, 1))
            .host_cancel(fx.host(), id, None)
            .await
            .unwrap();
        assert_eq!(outcome.reservation.status, ReservationStatus::Canceled);
        assert!(outcome.refund.is_none());
        assert_eq!(outcome.reservation.refunded_amount, dec!(448.00));
    }

    #[tokio::test]
    async fn test_refund_after_recorded_refund_uses_new_key() {
        let fx = Fixture::new(ReservationStatus::Confirmed, true).await;
        let id = fx.reservation.id;

        let partial = RefundReceipt {
            provider_id: "re_partial".to_string(),
            amount: dec!(224.00),
            status: "succeeded".to_string(),
        };
        let mut event = ReservationEvent::created(id, fx.host(), at(2025, 6, 1));
        event.kind = EventKind::RefundRecorded;
        event.from_status = Some(ReservationStatus::Confirmed);
        event.to_status = ReservationStatus::Confirmed;
        fx.repo.record_refund(id, &partial, &event).await.unwrap();

        let mut gateway = MockGateway::new();
        gateway
            .expect_refund()
            .withf(move |req| {
                req.amount == dec!(224.00)
                    && req.idempotency_key
                        == RefundRequest::idempotency_key_for(id, Some("re_partial"))
            })
            .times(1)
            .returning(|req| Ok(receipt(req.amount)));

        let outcome = fx
            .service(gateway, at(2025, 6, 1))
            .host_cancel(fx.host(), id, None)
            .await
            .unwrap();
        assert_eq!(outcome.reservation.refunded_amount, dec!(448.00));
    }

    #[test]
    fn test_normalize_reason() {
        assert_eq!(normalize_reason(None).unwrap(), None);
        assert_eq!(normalize_reason(Some("  ".into())).unwrap(), None);
        assert_eq!(
            normalize_reason(Some(" ok ".into())).unwrap().as_deref(),
            Some("ok")
        );
        assert!(normalize_reason(Some("x".repeat(MAX_REASON_LENGTH + 1))).is_err());
    }
}
