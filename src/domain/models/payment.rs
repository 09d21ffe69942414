use serde::{Deserialize, Serialize};

pub const EVENT_PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const EVENT_PAYMENT_FAILED: &str = "payment_intent.payment_failed";

pub struct PaymentIntentRequest {
    pub amount_cents: i32,
    pub currency: String,
    pub statement_suffix: String,
    pub slot_id: String,
    pub product_id: String,
    pub user_id: String,
    /// Unique per payment attempt on one reservation; provider-side replays
    /// of the same attempt return the same intent.
    pub idempotency_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PaymentIntentResponse {
    pub external_ref: String,
    pub client_secret: Option<String>,
}

/// Provider notification after signature verification.
#[derive(Debug, Deserialize, Clone)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentEventData {
    pub object: PaymentObject,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentObject {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownPayment,
    NotPending,
    ReservationExpired,
    UnhandledEvent,
}

/// What a webhook delivery did; ignored deliveries are still acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Applied,
    Ignored(IgnoreReason),
}
