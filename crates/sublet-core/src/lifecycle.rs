//! Reservation lifecycle rules
//!
//! ```text
//! pending   --host-validate(true)--> confirmed
//! pending   --host-reject--> rejected   (full refund)
//! confirmed --host-reject--> rejected   (full refund, only before host validation)
//! confirmed --host-cancel--> canceled   (full refund, only after host validation)
//! confirmed --guest-cancel--> canceled  (tiered refund 100/50/0)
//! ```
//!
//! Planning is pure: it reads a reservation and returns what the commit has
//! to look like. Performing the refund and persisting the result is the
//! caller's job.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::AppError;
use crate::models::{EventKind, Reservation, ReservationStatus};
use crate::refund::{RefundPolicy, RefundTier};

/// Lifecycle action requested by a host or a guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Host sets (or clears) its validation flag
    HostValidate(bool),
    /// Host turns the booking down
    HostReject,
    /// Host cancels a booking it had validated
    HostCancel,
    /// Guest cancels before arrival
    GuestCancel,
}

impl Action {
    /// Verb used in error messages
    pub fn verb(&self) -> &'static str {
        match self {
            Action::HostValidate(true) => "validate",
            Action::HostValidate(false) => "withdraw validation of",
            Action::HostReject => "reject",
            Action::HostCancel | Action::GuestCancel => "cancel",
        }
    }

    /// True for actions only the host may perform
    pub fn is_host_action(&self) -> bool {
        !matches!(self, Action::GuestCancel)
    }

    fn event_kind(&self) -> EventKind {
        match self {
            Action::HostValidate(true) => EventKind::HostValidated,
            Action::HostValidate(false) => EventKind::HostUnvalidated,
            Action::HostReject => EventKind::HostRejected,
            Action::HostCancel => EventKind::HostCanceled,
            Action::GuestCancel => EventKind::GuestCanceled,
        }
    }
}

/// Refund attached to a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundDecision {
    pub tier: RefundTier,
    pub amount: Decimal,
}

impl RefundDecision {
    /// Refund of `tier`, net of what was already refunded on `reservation`
    fn for_reservation(tier: RefundTier, reservation: &Reservation) -> Self {
        let amount = tier.amount_of(reservation.total_price) - reservation.refunded_amount;
        Self {
            tier,
            amount: amount.max(Decimal::ZERO),
        }
    }

    /// True when money has to move
    pub fn is_due(&self) -> bool {
        self.amount > Decimal::ZERO
    }
}

/// Outcome of planning an action against a reservation
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPlan {
    pub action: Action,
    pub kind: EventKind,
    /// State the reservation must still be in at commit time; a `None`
    /// validation flag is not checked
    pub expected_status: ReservationStatus,
    pub expected_validation: Option<bool>,
    /// State after the commit; a `None` validation flag is left as stored
    pub new_status: ReservationStatus,
    pub new_validation: Option<bool>,
    pub refund: Option<RefundDecision>,
}

impl TransitionPlan {
    /// True when the transition ends the lifecycle
    pub fn is_terminal(&self) -> bool {
        self.new_status.is_terminal()
    }
}

/// Plan `action` against `reservation` as of `now`
///
/// # Errors
///
/// - `AppError::InvalidTransition` when the reservation's status or
///   validation flag does not allow the action
/// - `AppError::StayStarted` when a guest tries to cancel on or after the
///   arrival date
pub fn plan(
    reservation: &Reservation,
    action: Action,
    now: DateTime<Utc>,
    policy: &RefundPolicy,
) -> Result<TransitionPlan, AppError> {
    let status = reservation.status;
    let validated = reservation.host_validation_ok;

    if status.is_terminal() {
        return Err(AppError::invalid_transition(action.verb(), status));
    }

    let (expected_validation, new_status, new_validation, refund) = match action {
        Action::HostValidate(flag) => {
            let new_status = if flag && status == ReservationStatus::Pending {
                ReservationStatus::Confirmed
            } else {
                status
            };
            (Some(validated), new_status, Some(flag), None)
        }
        Action::HostReject => {
            if validated {
                return Err(AppError::invalid_transition_because(
                    action.verb(),
                    status,
                    "host already validated it, cancel instead",
                ));
            }
            let refund = RefundDecision::for_reservation(RefundTier::Full, reservation);
            (Some(false), ReservationStatus::Rejected, Some(false), Some(refund))
        }
        Action::HostCancel => {
            if status != ReservationStatus::Confirmed || !validated {
                return Err(AppError::invalid_transition_because(
                    action.verb(),
                    status,
                    "only validated reservations can be canceled by the host",
                ));
            }
            let refund = RefundDecision::for_reservation(RefundTier::Full, reservation);
            (Some(true), ReservationStatus::Canceled, Some(true), Some(refund))
        }
        Action::GuestCancel => {
            if status != ReservationStatus::Confirmed {
                return Err(AppError::invalid_transition(action.verb(), status));
            }
            if policy.stay_started(reservation, now) {
                return Err(AppError::StayStarted(reservation.arrival_date.to_string()));
            }
            let tier = policy.tier_for(reservation, now);
            // The host's flag has no bearing on a guest cancellation
            let refund = RefundDecision::for_reservation(tier, reservation);
            (None, ReservationStatus::Canceled, None, Some(refund))
        }
    };

    Ok(TransitionPlan {
        action,
        kind: action.event_kind(),
        expected_status: status,
        expected_validation,
        new_status,
        new_validation,
        refund,
    })
}
