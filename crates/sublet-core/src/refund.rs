//! Refund tiers
//!
//! A guest canceling a confirmed reservation gets back a share of the total
//! price that depends on how close the cancellation is to arrival:
//!
//! - before the 50% date (default: arrival - 6 days): 100%
//! - from the 50% date to the 0% date (default: arrival - 2 days): 50%
//! - from the 0% date on: nothing
//!
//! Reservations may carry explicit override dates. Dates are compared in the
//! platform timezone.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::{Reservation, ReservationStatus};

/// Default offset of the 50% tier start, in days before arrival
pub const DEFAULT_FULL_REFUND_DAYS: i64 = 6;

/// Default offset of the 0% tier start, in days before arrival
pub const DEFAULT_HALF_REFUND_DAYS: i64 = 2;

/// Refund tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundTier {
    Full,
    Half,
    None,
}

impl fmt::Display for RefundTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

impl RefundTier {
    /// Refunded share of the total price
    pub fn percent(&self) -> u8 {
        match self {
            RefundTier::Full => 100,
            RefundTier::Half => 50,
            RefundTier::None => 0,
        }
    }

    /// Amount refunded on `total`, rounded to cents
    pub fn amount_of(&self, total: Decimal) -> Decimal {
        (total * Decimal::from(self.percent()) / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

/// Tier boundaries for one reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefundThresholds {
    /// First day of the 50% tier
    pub half_from: NaiveDate,
    /// First day of the 0% tier
    pub none_from: NaiveDate,
}

/// Date-based refund policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefundPolicy {
    full_refund_days_before: i64,
    half_refund_days_before: i64,
    timezone: Tz,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            full_refund_days_before: DEFAULT_FULL_REFUND_DAYS,
            half_refund_days_before: DEFAULT_HALF_REFUND_DAYS,
            timezone: Tz::UTC,
        }
    }
}

impl RefundPolicy {
    /// Create a policy with custom offsets
    ///
    /// `full_refund_days_before` must be >= `half_refund_days_before`; they
    /// are swapped otherwise so the tiers stay ordered.
    pub fn new(full_refund_days_before: i64, half_refund_days_before: i64, timezone: Tz) -> Self {
        let (full, half) = if full_refund_days_before >= half_refund_days_before {
            (full_refund_days_before, half_refund_days_before)
        } else {
            (half_refund_days_before, full_refund_days_before)
        };

        Self {
            full_refund_days_before: full,
            half_refund_days_before: half,
            timezone,
        }
    }

    /// Platform timezone used to turn instants into calendar dates
    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Calendar date of `now` in the platform timezone
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Resolve tier boundaries, applying overrides when present
    pub fn thresholds(
        &self,
        arrival: NaiveDate,
        half_override: Option<NaiveDate>,
        none_override: Option<NaiveDate>,
    ) -> RefundThresholds {
        RefundThresholds {
            half_from: half_override
                .unwrap_or(arrival - Duration::days(self.full_refund_days_before)),
            none_from: none_override
                .unwrap_or(arrival - Duration::days(self.half_refund_days_before)),
        }
    }

    /// Tier for a cancellation at `now`
    pub fn tier(
        &self,
        now: DateTime<Utc>,
        arrival: NaiveDate,
        half_override: Option<NaiveDate>,
        none_override: Option<NaiveDate>,
    ) -> RefundTier {
        let today = self.local_date(now);
        let thresholds = self.thresholds(arrival, half_override, none_override);

        if today < thresholds.half_from {
            RefundTier::Full
        } else if today < thresholds.none_from {
            RefundTier::Half
        } else {
            RefundTier::None
        }
    }

    /// Tier a guest cancellation of `reservation` would get at `now`
    ///
    /// Only confirmed reservations are tiered; any other status yields
    /// [`RefundTier::None`].
    pub fn tier_for(&self, reservation: &Reservation, now: DateTime<Utc>) -> RefundTier {
        if reservation.status != ReservationStatus::Confirmed {
            return RefundTier::None;
        }

        self.tier(
            now,
            reservation.arrival_date,
            reservation.refund_50_percent_date,
            reservation.refund_0_percent_date,
        )
    }

    /// True once the stay has begun in the platform timezone
    pub fn stay_started(&self, reservation: &Reservation, now: DateTime<Utc>) -> bool {
        self.local_date(now) >= reservation.arrival_date
    }
}
