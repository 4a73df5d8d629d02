//! Stripe integration
//!
//! Implements the `PaymentGateway` port over the Stripe REST API:
//! - refunds (`POST /v1/refunds`), sent with an idempotency key
//! - payment intent lookup (`GET /v1/payment_intents/{id}`)
//!
//! Amounts cross this crate's boundary in major units; conversion to
//! Stripe's minor units happens here and nowhere else.
//!
//! # Usage
//!
//! ```rust,ignore
//! let gateway = StripeGateway::new(&config.payments)?;
//! let payment = gateway.fetch_payment("pi_3N...").await?;
//! ```

mod amount;
mod client;
mod error;
mod types;

pub use amount::{from_minor_units, to_minor_units};
pub use client::StripeGateway;
pub use error::StripeError;
