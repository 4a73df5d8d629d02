//! Major/minor unit conversion
//!
//! Stripe expresses amounts as integers in the currency's smallest unit.
//! Zero-decimal currencies (JPY, KRW, ...) have no fractional unit.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use sublet_core::models::minor_unit_exponent as exponent;

use crate::error::StripeError;

/// Convert a major-unit amount to Stripe's integer minor units
pub fn to_minor_units(amount: Decimal, currency: &str) -> Result<i64, StripeError> {
    if amount.is_sign_negative() {
        return Err(StripeError::InvalidAmount(format!(
            "negative amount {} {}",
            amount, currency
        )));
    }

    let scale = Decimal::from(10i64.pow(exponent(currency)));
    (amount * scale)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(|| StripeError::InvalidAmount(format!("{} {} out of range", amount, currency)))
}

/// Convert Stripe's integer minor units back to a major-unit amount
pub fn from_minor_units(minor: i64, currency: &str) -> Decimal {
    Decimal::new(minor, exponent(currency))
}
