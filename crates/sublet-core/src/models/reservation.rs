//! Reservation model
//!
//! A reservation is created once the guest's payment has been captured and
//! then moves through host validation, rejection or cancellation. Terminal
//! reservations are kept for history; nothing is ever deleted.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::AppError;

const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "bif", "clp", "djf", "gnf", "jpy", "kmf", "krw", "mga", "pyg", "rwf", "ugx", "vnd", "vuv",
    "xaf", "xof", "xpf",
];

/// Decimal places of `currency`'s major unit (0 for JPY, KRW, ...)
pub fn minor_unit_exponent(currency: &str) -> u32 {
    let currency = currency.trim().to_lowercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&currency.as_str()) {
        0
    } else {
        2
    }
}

/// Reservation status
///
/// `canceled` is the only spelling ever written. Rows and payloads carrying
/// the older `cancelled` spelling are still read as [`ReservationStatus::Canceled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Paid, waiting for the host
    #[default]
    Pending,
    /// Accepted; the stay will take place unless canceled
    Confirmed,
    /// Canceled by the host or the guest
    #[serde(alias = "cancelled")]
    Canceled,
    /// Rejected by the host
    Rejected,
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReservationStatus {
    /// Canonical storage/wire spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Canceled => "canceled",
            ReservationStatus::Rejected => "rejected",
        }
    }

    /// Parse from string (case-insensitive, accepts `cancelled`)
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "confirmed" => Some(ReservationStatus::Confirmed),
            "canceled" | "cancelled" => Some(ReservationStatus::Canceled),
            "rejected" => Some(ReservationStatus::Rejected),
            _ => None,
        }
    }

    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationStatus::Canceled | ReservationStatus::Rejected
        )
    }

    /// Statuses in which the host may still act
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

/// Reservation entity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reservation {
    /// Unique identifier
    pub id: Uuid,

    /// Booked listing
    pub listing_id: Uuid,

    /// Guest who booked and paid
    pub guest_id: Uuid,

    /// Host responsible for the listing
    pub host_id: Uuid,

    /// First night
    pub arrival_date: NaiveDate,

    /// Check-out day (exclusive)
    pub departure_date: NaiveDate,

    /// Nightly price total before fees, major units
    pub base_price: Decimal,

    /// Platform fee, major units
    pub platform_fee: Decimal,

    /// Tax, major units
    pub tax: Decimal,

    /// Amount charged to the guest, major units
    pub total_price: Decimal,

    /// ISO currency code, lower case
    pub currency: String,

    /// Override for the start of the 50% tier
    pub refund_50_percent_date: Option<NaiveDate>,

    /// Override for the start of the 0% tier
    pub refund_0_percent_date: Option<NaiveDate>,

    /// Lifecycle status
    pub status: ReservationStatus,

    /// Host has explicitly accepted the reservation
    pub host_validation_ok: bool,

    /// Free-text reason given on cancel/reject
    pub cancellation_reason: Option<String>,

    /// Payment intent of the captured charge
    pub payment_reference: String,

    /// Total refunded so far, major units
    pub refunded_amount: Decimal,

    /// Provider id of the refund, if one was issued
    pub refund_reference: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// When the reservation reached a terminal status
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Number of nights booked
    #[inline]
    pub fn nights(&self) -> i64 {
        (self.departure_date - self.arrival_date).num_days()
    }

    /// Check whether `user_id` is the host of this reservation
    pub fn is_host(&self, user_id: Uuid) -> bool {
        self.host_id == user_id
    }

    /// Check whether `user_id` is the guest of this reservation
    pub fn is_guest(&self, user_id: Uuid) -> bool {
        self.guest_id == user_id
    }

    /// Iterate over the booked nights
    pub fn booked_nights(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.arrival_date
            .iter_days()
            .take_while(move |day| *day < self.departure_date)
    }
}

/// Payload recorded once the guest's payment has been captured
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewReservation {
    pub listing_id: Uuid,
    pub guest_id: Uuid,
    pub host_id: Uuid,
    pub arrival_date: NaiveDate,
    pub departure_date: NaiveDate,
    pub base_price: Decimal,
    pub platform_fee: Decimal,
    pub tax: Decimal,
    pub total_price: Decimal,
    pub currency: String,
    pub refund_50_percent_date: Option<NaiveDate>,
    pub refund_0_percent_date: Option<NaiveDate>,
    pub payment_reference: String,
}

impl NewReservation {
    /// Check the invariants a reservation must hold from creation on
    pub fn validate(&self) -> Result<(), AppError> {
        if self.departure_date <= self.arrival_date {
            return Err(AppError::Validation(
                "departure date must be after arrival date".to_string(),
            ));
        }

        let amounts = [
            ("base_price", self.base_price),
            ("platform_fee", self.platform_fee),
            ("tax", self.tax),
            ("total_price", self.total_price),
        ];
        if let Some((name, _)) = amounts.iter().find(|(_, v)| v.is_sign_negative()) {
            return Err(AppError::Validation(format!("{} cannot be negative", name)));
        }
        if self.total_price.is_zero() {
            return Err(AppError::Validation(
                "total_price must be greater than zero".to_string(),
            ));
        }

        if let (Some(half), Some(none)) = (self.refund_50_percent_date, self.refund_0_percent_date)
        {
            if none < half {
                return Err(AppError::Validation(
                    "refund_0_percent_date cannot precede refund_50_percent_date".to_string(),
                ));
            }
        }

        if self.currency.trim().len() != 3 {
            return Err(AppError::Validation(
                "currency must be a 3-letter ISO code".to_string(),
            ));
        }
        let exponent = minor_unit_exponent(&self.currency);
        if let Some((name, _)) = amounts
            .iter()
            .find(|(_, v)| v.normalize().scale() > exponent)
        {
            return Err(AppError::Validation(format!(
                "{} has more than {} decimal places for {}",
                name, exponent, self.currency
            )));
        }

        if self.payment_reference.trim().is_empty() {
            return Err(AppError::MissingField("payment_reference".to_string()));
        }
        if !self.payment_reference.starts_with("pi_")
            || !self
                .payment_reference
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(AppError::Validation(
                "payment_reference must be a payment intent id (pi_...)".to_string(),
            ));
        }
        if self.guest_id == self.host_id {
            return Err(AppError::Validation(
                "guest and host must be different users".to_string(),
            ));
        }

        Ok(())
    }

    /// Build the pending reservation this payload describes
    pub fn into_reservation(self, now: DateTime<Utc>) -> Reservation {
        Reservation {
            id: Uuid::new_v4(),
            listing_id: self.listing_id,
            guest_id: self.guest_id,
            host_id: self.host_id,
            arrival_date: self.arrival_date,
            departure_date: self.departure_date,
            base_price: self.base_price,
            platform_fee: self.platform_fee,
            tax: self.tax,
            total_price: self.total_price,
            currency: self.currency.trim().to_lowercase(),
            refund_50_percent_date: self.refund_50_percent_date,
            refund_0_percent_date: self.refund_0_percent_date,
            status: ReservationStatus::Pending,
            host_validation_ok: false,
            cancellation_reason: None,
            payment_reference: self.payment_reference,
            refunded_amount: Decimal::ZERO,
            refund_reference: None,
            created_at: now,
            updated_at: now,
            canceled_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_reservation() -> NewReservation {
        NewReservation {
            listing_id: Uuid::new_v4(),
            guest_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            arrival_date: date(2025, 6, 10),
            departure_date: date(2025, 6, 13),
            base_price: dec!(300.00),
            platform_fee: dec!(30.00),
            tax: dec!(6.60),
            total_price: dec!(336.60),
            currency: "EUR".to_string(),
            refund_50_percent_date: None,
            refund_0_percent_date: None,
            payment_reference: "pi_123".to_string(),
        }
    }

    #[test]
    fn test_status_parse_accepts_both_spellings() {
        assert_eq!(
            ReservationStatus::parse("canceled"),
            Some(ReservationStatus::Canceled)
        );
        assert_eq!(
            ReservationStatus::parse("Cancelled"),
            Some(ReservationStatus::Canceled)
        );
        assert_eq!(ReservationStatus::parse("expired"), None);
        assert_eq!(ReservationStatus::Canceled.to_string(), "canceled");
    }

    #[test]
    fn test_status_serde() {
        let legacy: ReservationStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(legacy, ReservationStatus::Canceled);
        assert_eq!(
            serde_json::to_string(&ReservationStatus::Canceled).unwrap(),
            "\"canceled\""
        );
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!ReservationStatus::Pending.is_terminal());
        assert!(!ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Canceled.is_terminal());
        assert!(ReservationStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_into_reservation() {
        let now = Utc::now();
        let res = new_reservation().into_reservation(now);

        assert_eq!(res.status, ReservationStatus::Pending);
        assert!(!res.host_validation_ok);
        assert_eq!(res.currency, "eur");
        assert_eq!(res.nights(), 3);
        assert_eq!(res.refunded_amount, Decimal::ZERO);
        assert_eq!(
            res.booked_nights().collect::<Vec<_>>(),
            vec![date(2025, 6, 10), date(2025, 6, 11), date(2025, 6, 12)]
        );
    }

    #[test]
    fn test_validate_rejects_unordered_dates() {
        let mut payload = new_reservation();
        payload.departure_date = payload.arrival_date;
        assert!(matches!(payload.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_validate_rejects_negative_amounts() {
        let mut payload = new_reservation();
        payload.tax = dec!(-1.00);
        let err = payload.validate().unwrap_err();
        assert!(err.to_string().contains("tax"));
    }

    #[test]
    fn test_validate_amount_scale() {
        let mut payload = new_reservation();
        payload.total_price = dec!(10.005);
        let err = payload.validate().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("total_price"));

        // Trailing zeros are not extra precision
        payload.total_price = dec!(336.6000);
        assert!(payload.validate().is_ok());

        let mut payload = new_reservation();
        payload.currency = "JPY".to_string();
        payload.base_price = dec!(5000);
        payload.platform_fee = dec!(500);
        payload.tax = dec!(0);
        payload.total_price = dec!(5500.5);
        assert!(payload.validate().is_err());

        payload.total_price = dec!(5500);
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_validate_payment_reference() {
        let mut payload = new_reservation();
        for bad in ["ch_123", "pi_12/../refunds", "pi_1?expand=x", "pi 1"] {
            payload.payment_reference = bad.to_string();
            assert!(
                matches!(payload.validate(), Err(AppError::Validation(_))),
                "{} accepted",
                bad
            );
        }

        payload.payment_reference = "   ".to_string();
        assert!(matches!(payload.validate(), Err(AppError::MissingField(_))));

        payload.payment_reference = "pi_3MtwBwLkdIwHu7ix28a3tqPa".to_string();
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_minor_unit_exponent() {
        assert_eq!(minor_unit_exponent("eur"), 2);
        assert_eq!(minor_unit_exponent("JPY"), 0);
    }

    #[test]
    fn test_validate_override_order() {
        let mut payload = new_reservation();
        payload.refund_50_percent_date = Some(date(2025, 6, 5));
        payload.refund_0_percent_date = Some(date(2025, 6, 1));
        assert!(payload.validate().is_err());

        payload.refund_0_percent_date = Some(date(2025, 6, 8));
        assert!(payload.validate().is_ok());
    }
}
