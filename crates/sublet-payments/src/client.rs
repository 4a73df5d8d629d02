//! Stripe REST client
//!
//! Implements `PaymentGateway`. Requests are authenticated with the secret
//! key; refunds carry an `Idempotency-Key` so a retried refund for the same
//! reservation is applied by Stripe at most once.

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use sublet_core::config::PaymentsConfig;
use sublet_core::traits::{
    PaymentGateway, PaymentSnapshot, RefundCause, RefundReceipt, RefundRequest,
};
use sublet_core::AppError;
use tracing::{debug, error, info, instrument, warn};

use crate::amount::{from_minor_units, to_minor_units};
use crate::error::StripeError;
use crate::types::{CreateRefund, ErrorEnvelope, PaymentIntent, Refund};

/// Stripe-backed payment gateway
pub struct StripeGateway {
    http_client: Client,
    api_base: String,
    secret_key: String,
    timeout_ms: u64,
    reverse_transfer: bool,
    refund_application_fee: bool,
}

impl StripeGateway {
    /// Create a gateway from the payments configuration
    pub fn new(config: &PaymentsConfig) -> Result<Self, StripeError> {
        if config.stripe_secret_key.trim().is_empty() {
            return Err(StripeError::Config(
                "payments.stripe_secret_key is not set".to_string(),
            ));
        }

        let http_client = ClientBuilder::new()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| StripeError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.stripe_secret_key.clone(),
            timeout_ms: config.timeout_ms,
            reverse_transfer: config.reverse_transfer,
            refund_application_fee: config.refund_application_fee,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    /// Send a request and decode the JSON body or Stripe's error object
    async fn send<R: DeserializeOwned>(&self, request: RequestBuilder) -> Result<R, StripeError> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StripeError::Timeout(self.timeout_ms)
                } else {
                    StripeError::Connection(e.to_string())
                }
            })?;

        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: Response) -> Result<R, StripeError> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StripeError::Parse(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            let err = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => StripeError::Api {
                    status: status.as_u16(),
                    kind: envelope.error.kind,
                    code: envelope.error.code,
                    message: envelope
                        .error
                        .message
                        .unwrap_or_else(|| "no message".to_string()),
                },
                Err(_) => StripeError::Api {
                    status: status.as_u16(),
                    kind: "http_error".to_string(),
                    code: None,
                    message: body,
                },
            };
            error!("Stripe request failed: {}", err);
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| StripeError::Parse(format!("Failed to parse JSON: {}", e)))
    }

    /// Issue a refund
    pub async fn create_refund(&self, request: &RefundRequest) -> Result<Refund, StripeError> {
        let amount = to_minor_units(request.amount, &request.currency)?;
        let form = CreateRefund {
            payment_intent: &request.payment_reference,
            amount,
            reason: "requested_by_customer",
            reverse_transfer: self.reverse_transfer,
            refund_application_fee: self.refund_application_fee,
            reservation_id: request.reservation_id.to_string(),
            cause: cause_label(request.cause),
        };

        debug!(
            "Stripe refund: payment={}, amount={} (minor), key={}",
            request.payment_reference, amount, request.idempotency_key
        );

        self.send(
            self.http_client
                .post(self.url("/v1/refunds"))
                .header("Idempotency-Key", &request.idempotency_key)
                .form(&form),
        )
        .await
    }

    /// Look up a payment intent
    pub async fn payment_intent(&self, id: &str) -> Result<PaymentIntent, StripeError> {
        self.send(
            self.http_client
                .get(self.url(&format!("/v1/payment_intents/{}", id))),
        )
        .await
    }
}

fn cause_label(cause: RefundCause) -> &'static str {
    match cause {
        RefundCause::HostRejected => "host_rejected",
        RefundCause::HostCanceled => "host_canceled",
        RefundCause::GuestCanceled => "guest_canceled",
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(reservation = %request.reservation_id))]
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, AppError> {
        let refund = self.create_refund(request).await.map_err(|e| {
            warn!("Refund for reservation {} failed: {}", request.reservation_id, e);
            AppError::from(e)
        })?;

        let amount = from_minor_units(refund.amount, &refund.currency);
        info!(
            "Refund {} issued for reservation {}: {} {}",
            refund.id, request.reservation_id, amount, refund.currency
        );

        Ok(RefundReceipt {
            provider_id: refund.id,
            amount,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, reference: &str) -> Result<PaymentSnapshot, AppError> {
        let intent = self.payment_intent(reference).await?;

        Ok(PaymentSnapshot {
            captured: intent.is_captured(),
            amount_received: from_minor_units(intent.amount_received, &intent.currency),
            currency: intent.currency,
            reference: intent.id,
        })
    }
}
