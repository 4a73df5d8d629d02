//! Stripe API payloads
//!
//! Only the fields the service reads are mapped.

use serde::{Deserialize, Serialize};

/// Form body of `POST /v1/refunds`
#[derive(Debug, Serialize)]
pub struct CreateRefund<'a> {
    pub payment_intent: &'a str,
    /// Minor units
    pub amount: i64,
    pub reason: &'a str,
    pub reverse_transfer: bool,
    pub refund_application_fee: bool,
    #[serde(rename = "metadata[reservation_id]")]
    pub reservation_id: String,
    #[serde(rename = "metadata[cause]")]
    pub cause: &'a str,
}

/// Refund object
#[derive(Debug, Clone, Deserialize)]
pub struct Refund {
    pub id: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub status: Option<String>,
}

/// PaymentIntent object
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    /// Minor units
    #[serde(default)]
    pub amount_received: i64,
    pub currency: String,
}

impl PaymentIntent {
    pub fn is_captured(&self) -> bool {
        self.status == "succeeded"
    }
}

/// Error envelope returned with non-2xx responses
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ApiError,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub code: Option<String>,
    pub message: Option<String>,
}
