//! In-memory reservation repository
//!
//! Process-local store with the same conditional-update semantics as the
//! PostgreSQL repository. Used by tests and by `storage.backend = "memory"`.

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use std::collections::HashMap;
use sublet_core::{
    models::{Reservation, ReservationEvent, ReservationStatus},
    traits::{Party, RefundReceipt, ReservationRepository, StatusChange},
    AppError, AppResult,
};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Default)]
struct Store {
    reservations: HashMap<Uuid, Reservation>,
    events: Vec<ReservationEvent>,
    /// (listing, night) -> reservation holding it
    blocked: HashMap<(Uuid, NaiveDate), Uuid>,
}

/// In-memory implementation of ReservationRepository
#[derive(Default)]
pub struct MemoryReservationRepository {
    store: RwLock<Store>,
}

impl MemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nights currently blocked for `listing_id`
    pub fn blocked_nights(&self, listing_id: Uuid) -> usize {
        self.store
            .read()
            .blocked
            .keys()
            .filter(|(listing, _)| *listing == listing_id)
            .count()
    }

    fn page(mut items: Vec<Reservation>, limit: i64, offset: i64) -> (Vec<Reservation>, i64) {
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = items.len() as i64;
        let page = items
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        (page, total)
    }
}

#[async_trait]
impl ReservationRepository for MemoryReservationRepository {
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Reservation>> {
        Ok(self.store.read().reservations.get(&id).cloned())
    }

    async fn find_by_payment_reference(
        &self,
        payment_reference: &str,
    ) -> AppResult<Option<Reservation>> {
        Ok(self
            .store
            .read()
            .reservations
            .values()
            .find(|r| r.payment_reference == payment_reference)
            .cloned())
    }

    async fn create(
        &self,
        reservation: &Reservation,
        event: &ReservationEvent,
    ) -> AppResult<Reservation> {
        let mut store = self.store.write();

        if store
            .reservations
            .values()
            .any(|r| r.payment_reference == reservation.payment_reference)
        {
            return Err(AppError::AlreadyExists(
                "a reservation already exists for this payment".to_string(),
            ));
        }

        let nights: Vec<_> = reservation
            .booked_nights()
            .map(|night| (reservation.listing_id, night))
            .collect();
        if nights.iter().any(|key| store.blocked.contains_key(key)) {
            return Err(AppError::AlreadyExists(
                "the listing is already booked for some of these nights".to_string(),
            ));
        }

        for key in nights {
            store.blocked.insert(key, reservation.id);
        }
        store.reservations.insert(reservation.id, reservation.clone());
        store.events.push(event.clone());

        debug!("Stored reservation {}", reservation.id);
        Ok(reservation.clone())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        party: Party,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Reservation>, i64)> {
        let items = self
            .store
            .read()
            .reservations
            .values()
            .filter(|r| match party {
                Party::Guest => r.guest_id == user_id,
                Party::Host => r.host_id == user_id,
            })
            .cloned()
            .collect();

        Ok(Self::page(items, limit, offset))
    }

    async fn list_all(
        &self,
        status: Option<ReservationStatus>,
        limit: i64,
        offset: i64,
    ) -> AppResult<(Vec<Reservation>, i64)> {
        let items = self
            .store
            .read()
            .reservations
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();

        Ok(Self::page(items, limit, offset))
    }

    async fn compare_and_set(&self, change: &StatusChange) -> AppResult<Option<Reservation>> {
        let mut store = self.store.write();

        let Some(current) = store.reservations.get_mut(&change.reservation_id) else {
            return Ok(None);
        };
        let validation_matches = change
            .expected_validation
            .map_or(true, |expected| current.host_validation_ok == expected);
        if current.status != change.expected_status || !validation_matches {
            warn!(
                "Reservation {} is {} (validated: {}), expected {} (validated: {:?})",
                change.reservation_id,
                current.status,
                current.host_validation_ok,
                change.expected_status,
                change.expected_validation
            );
            return Ok(None);
        }

        current.status = change.new_status;
        if let Some(flag) = change.new_validation {
            current.host_validation_ok = flag;
        }
        if change.cancellation_reason.is_some() {
            current.cancellation_reason = change.cancellation_reason.clone();
        }
        current.refunded_amount += change.refunded_amount;
        if change.refund_reference.is_some() {
            current.refund_reference = change.refund_reference.clone();
        }
        if change.new_status.is_terminal() {
            current.canceled_at = Some(change.at);
        }
        current.updated_at = change.at;

        let updated = current.clone();
        store.events.push(change.event.clone());

        Ok(Some(updated))
    }

    async fn record_refund(
        &self,
        reservation_id: Uuid,
        receipt: &RefundReceipt,
        event: &ReservationEvent,
    ) -> AppResult<Option<Reservation>> {
        let mut store = self.store.write();

        let Some(current) = store.reservations.get_mut(&reservation_id) else {
            return Ok(None);
        };
        current.refunded_amount += receipt.amount;
        current.refund_reference = Some(receipt.provider_id.clone());
        current.updated_at = event.created_at;

        let updated = current.clone();
        store.events.push(event.clone());

        Ok(Some(updated))
    }

    async fn events(&self, reservation_id: Uuid) -> AppResult<Vec<ReservationEvent>> {
        Ok(self
            .store
            .read()
            .events
            .iter()
            .filter(|e| e.reservation_id == reservation_id)
            .cloned()
            .collect())
    }

    async fn release_dates(&self, reservation_id: Uuid) -> AppResult<u64> {
        let mut store = self.store.write();
        let before = store.blocked.len();
        store.blocked.retain(|_, holder| *holder != reservation_id);
        Ok((before - store.blocked.len()) as u64)
    }
}
