//! Reservation history
//!
//! Every committed lifecycle transition leaves one immutable event row, used
//! for the history display and for auditing refunds.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::ReservationStatus;

/// Kind of lifecycle action recorded in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    HostValidated,
    HostUnvalidated,
    HostRejected,
    HostCanceled,
    GuestCanceled,
    /// Refund issued while a concurrent change kept its transition out
    RefundRecorded,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::HostValidated => "host_validated",
            EventKind::HostUnvalidated => "host_unvalidated",
            EventKind::HostRejected => "host_rejected",
            EventKind::HostCanceled => "host_canceled",
            EventKind::GuestCanceled => "guest_canceled",
            EventKind::RefundRecorded => "refund_recorded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(EventKind::Created),
            "host_validated" => Some(EventKind::HostValidated),
            "host_unvalidated" => Some(EventKind::HostUnvalidated),
            "host_rejected" => Some(EventKind::HostRejected),
            "host_canceled" => Some(EventKind::HostCanceled),
            "guest_canceled" => Some(EventKind::GuestCanceled),
            "refund_recorded" => Some(EventKind::RefundRecorded),
            _ => None,
        }
    }
}

/// History entry for a reservation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReservationEvent {
    /// Unique identifier
    pub id: Uuid,

    /// Reservation the event belongs to
    pub reservation_id: Uuid,

    /// User who triggered the transition
    pub actor_id: Uuid,

    /// What happened
    pub kind: EventKind,

    /// Status before the transition (None for creation)
    pub from_status: Option<ReservationStatus>,

    /// Status after the transition
    pub to_status: ReservationStatus,

    /// Refunded amount, major units
    pub refund_amount: Decimal,

    /// Refund percentage applied (0, 50 or 100)
    pub refund_percent: u8,

    /// Provider refund id
    pub refund_reference: Option<String>,

    /// Reason given by the actor
    pub reason: Option<String>,

    /// When the transition was committed
    pub created_at: DateTime<Utc>,
}

impl ReservationEvent {
    /// Event for a freshly recorded booking
    pub fn created(reservation_id: Uuid, actor_id: Uuid, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            reservation_id,
            actor_id,
            kind: EventKind::Created,
            from_status: None,
            to_status: ReservationStatus::Pending,
            refund_amount: Decimal::ZERO,
            refund_percent: 0,
            refund_reference: None,
            reason: None,
            created_at: at,
        }
    }
}
