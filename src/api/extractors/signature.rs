use axum::{
    body::Bytes,
    extract::{FromRef, FromRequest, Request},
};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use tracing::warn;

use crate::domain::models::payment::PaymentEvent;
use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "Payment-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Checks a `t=<unix>,v1=<hex>` header against HMAC-SHA256 of `"{t}.{body}"`.
pub fn verify_signature(
    secret: &str,
    header: &str,
    body: &[u8],
    now: i64,
    tolerance_secs: i64,
) -> Result<(), AppError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = v.parse::<i64>().ok(),
            Some(("v1", v)) => signatures.push(v),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(AppError::InvalidSignature("missing timestamp".into()))?;
    if signatures.is_empty() {
        return Err(AppError::InvalidSignature("missing v1 signature".into()));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(AppError::InvalidSignature("timestamp outside tolerance".into()));
    }

    let mut signed_payload = format!("{}.", timestamp).into_bytes();
    signed_payload.extend_from_slice(body);

    for candidate in signatures {
        let Ok(expected) = hex::decode(candidate) else { continue };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| AppError::Config("webhook secret unusable".into()))?;
        mac.update(&signed_payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(AppError::InvalidSignature("no matching signature".into()))
}

/// Signs `body` the way the provider does; used to build test deliveries.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Config("webhook secret unusable".into()))?;
    mac.update(format!("{}.", timestamp).as_bytes());
    mac.update(body);
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

/// A delivery whose signature has been verified against the raw body.
/// `None` when the signed body is not a payment event this service can read.
pub struct VerifiedWebhook(pub Option<PaymentEvent>);

impl<S> FromRequest<S> for VerifiedWebhook
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = <Arc<AppState> as FromRef<S>>::from_ref(state);

        let header = req.headers().get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(AppError::InvalidSignature("missing signature header".into()))?;

        let body = Bytes::from_request(req, state).await
            .map_err(|e| AppError::Validation(format!("Unreadable body: {}", e)))?;

        verify_signature(
            &app_state.config.webhook_secret,
            &header,
            &body,
            Utc::now().timestamp(),
            app_state.config.webhook_tolerance_secs,
        ).inspect_err(|e| warn!("Webhook rejected: {}", e))?;

        // A signed body is the provider's; rejecting it would only trigger redelivery.
        let event = serde_json::from_slice::<PaymentEvent>(&body)
            .inspect_err(|e| warn!("Unreadable payment event, acknowledging: {}", e))
            .ok();

        Ok(VerifiedWebhook(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

    #[test]
    fn accepts_fresh_valid_signature() {
        let header = sign_payload(SECRET, 1_700_000_000, BODY).unwrap();
        assert!(verify_signature(SECRET, &header, BODY, 1_700_000_010, 300).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let header = sign_payload(SECRET, 1_700_000_000, BODY).unwrap();
        let tampered = br#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_2"}}}"#;
        assert!(matches!(
            verify_signature(SECRET, &header, tampered, 1_700_000_000, 300),
            Err(AppError::InvalidSignature(_))
        ));
    }

    #[test]
    fn rejects_wrong_secret_and_stale_timestamp() {
        let header = sign_payload("other", 1_700_000_000, BODY).unwrap();
        assert!(verify_signature(SECRET, &header, BODY, 1_700_000_000, 300).is_err());

        let header = sign_payload(SECRET, 1_700_000_000, BODY).unwrap();
        assert!(verify_signature(SECRET, &header, BODY, 1_700_000_301, 300).is_err());
    }

    #[test]
    fn accepts_any_matching_v1_during_secret_rotation() {
        let good = sign_payload(SECRET, 1_700_000_000, BODY).unwrap();
        let good_sig = good.split_once("v1=").map(|(_, s)| s).unwrap();
        let header = format!("t=1700000000,v1=deadbeef,v1={}", good_sig);
        assert!(verify_signature(SECRET, &header, BODY, 1_700_000_000, 300).is_ok());
    }

    #[test]
    fn rejects_header_without_parts() {
        assert!(verify_signature(SECRET, "garbage", BODY, 0, 300).is_err());
        assert!(verify_signature(SECRET, "t=5", BODY, 5, 300).is_err());
    }
}
