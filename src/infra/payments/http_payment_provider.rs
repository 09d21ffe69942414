use crate::domain::models::payment::{PaymentIntent, PaymentIntentRequest};
use crate::domain::ports::PaymentProvider;
use crate::error::AppError;
use async_trait::async_trait;
use reqwest::Client;
use tracing::error;

/// Statement descriptor suffixes are capped by card networks.
const MAX_STATEMENT_SUFFIX: usize = 22;

pub struct HttpPaymentProvider {
    client: Client,
    api_url: String,
    api_key: String,
}

impl HttpPaymentProvider {
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_url,
            api_key,
        }
    }
}

fn intent_form(request: &PaymentIntentRequest) -> Vec<(&'static str, String)> {
    let suffix: String = request.statement_suffix.chars().take(MAX_STATEMENT_SUFFIX).collect();
    vec![
        ("amount", request.amount_cents.to_string()),
        ("currency", request.currency.clone()),
        ("automatic_payment_methods[enabled]", "true".to_string()),
        ("statement_descriptor_suffix", suffix),
        ("metadata[slot_id]", request.slot_id.clone()),
        ("metadata[product_id]", request.product_id.clone()),
        ("metadata[user_id]", request.user_id.clone()),
    ]
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> Result<PaymentIntent, AppError> {
        let url = format!("{}/v1/payment_intents", self.api_url.trim_end_matches('/'));

        let res = self.client.post(&url)
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&intent_form(request))
            .send()
            .await
            .map_err(|e| {
                let msg = format!("Payment provider connection error: {}", e);
                error!("{}", msg);
                AppError::PaymentProvider(msg)
            })?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(AppError::PaymentProvider(format!("Status: {}, Body: {}", status, text)));
        }

        res.json::<PaymentIntent>()
            .await
            .map_err(|e| AppError::PaymentProvider(format!("Malformed payment intent response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_carries_metadata_and_truncated_suffix() {
        let request = PaymentIntentRequest {
            amount_cents: 45000,
            currency: "dkk".into(),
            statement_suffix: "A VERY LONG SHORT NAME FOR A PRODUCT".into(),
            slot_id: "slot-1".into(),
            product_id: "prod-1".into(),
            user_id: "user-1".into(),
            idempotency_key: "slot-1-user-1-0-first".into(),
        };

        let form = intent_form(&request);
        let get = |k: &str| form.iter().find(|(key, _)| *key == k).map(|(_, v)| v.clone());

        assert_eq!(get("amount").as_deref(), Some("45000"));
        assert_eq!(get("metadata[slot_id]").as_deref(), Some("slot-1"));
        assert_eq!(get("metadata[product_id]").as_deref(), Some("prod-1"));
        assert_eq!(get("statement_descriptor_suffix").map(|s| s.len()), Some(MAX_STATEMENT_SUFFIX));
    }
}
