use std::sync::Arc;
use chrono::Utc;
use tracing::{info, warn};

use crate::domain::models::{
    job::{Job, PAYMENT_FAILED, PAYMENT_SUCCEEDED},
    payment::{
        IgnoreReason, PaymentEvent, PaymentIntentRequest, PaymentIntentResponse, WebhookOutcome,
        EVENT_PAYMENT_FAILED, EVENT_PAYMENT_SUCCEEDED,
    },
    slot::{PaymentState, Slot},
};
use crate::domain::ports::{PaymentProvider, ProductRepository, SlotStore, SlotTx};
use crate::error::AppError;

/// Drives a held slot through PENDING to PAID or FAILED.
///
/// Webhooks are delivered at least once and possibly out of order; the only
/// idempotence guard is that a slot must be PENDING and unexpired to settle.
pub struct PaymentConfirmationHandler {
    products: Arc<dyn ProductRepository>,
    store: Arc<dyn SlotStore>,
    provider: Arc<dyn PaymentProvider>,
    currency: String,
}

impl PaymentConfirmationHandler {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        store: Arc<dyn SlotStore>,
        provider: Arc<dyn PaymentProvider>,
        currency: String,
    ) -> Self {
        Self { products, store, provider, currency }
    }

    pub async fn create_payment_intent(&self, slot_key: &str, user_id: &str) -> Result<PaymentIntentResponse, AppError> {
        let now = Utc::now();

        // The row lock is released before the provider call.
        let slot = {
            let mut tx = self.store.begin().await?;
            let slot = tx.find_slot_by_key_for_update(slot_key, user_id, now).await?
                .ok_or(AppError::NotFound("Slot not found or reservation expired".into()))?;
            tx.commit().await?;
            slot
        };

        match (slot.payment_state, &slot.external_payment_id) {
            (PaymentState::Paid, _) => return Err(AppError::AlreadyPaid),
            (PaymentState::Pending, Some(existing)) => {
                info!("Slot {} already has payment {}, reusing it", slot.id, existing);
                return Ok(PaymentIntentResponse { external_ref: existing.clone(), client_secret: None });
            }
            _ => {}
        }

        let product = self.products.find_by_id(&slot.product_id).await?
            .ok_or(AppError::NotFound("Product not found".into()))?;

        let intent = self.provider.create_payment_intent(&PaymentIntentRequest {
            amount_cents: product.price_cents,
            currency: self.currency.clone(),
            statement_suffix: product.name_short.clone(),
            slot_id: slot.id.clone(),
            product_id: product.id.clone(),
            user_id: user_id.to_string(),
            idempotency_key: payment_attempt_key(&slot, user_id),
        }).await?;

        let mut tx = self.store.begin().await?;
        let pending = tx.set_payment_pending(
            &slot.id,
            user_id,
            slot.external_payment_id.as_deref(),
            &intent.id,
            Utc::now(),
        ).await?;

        if !pending {
            // A concurrent request for the same attempt got the same intent back.
            let current = tx.find_slot_by_key_for_update(slot_key, user_id, Utc::now()).await?;
            let same_intent = current.is_some_and(|c| {
                c.payment_state == PaymentState::Pending
                    && c.external_payment_id.as_deref() == Some(intent.id.as_str())
            });
            if same_intent {
                return Ok(PaymentIntentResponse { external_ref: intent.id, client_secret: intent.client_secret });
            }
            warn!("Slot {} changed while payment {} was being created", slot.id, intent.id);
            return Err(AppError::Conflict("Slot changed while creating the payment".into()));
        }
        tx.commit().await?;

        info!("Created payment {} for slot {} ({} cents)", intent.id, slot.id, product.price_cents);
        Ok(PaymentIntentResponse { external_ref: intent.id, client_secret: intent.client_secret })
    }

    pub async fn handle_event(&self, event: &PaymentEvent) -> Result<WebhookOutcome, AppError> {
        let external_id = &event.data.object.id;
        match event.event_type.as_str() {
            EVENT_PAYMENT_SUCCEEDED => self.on_payment_succeeded(external_id).await,
            EVENT_PAYMENT_FAILED => self.on_payment_failed(external_id).await,
            other => {
                info!("Ignoring payment event {} of type {}", event.id, other);
                Ok(WebhookOutcome::Ignored(IgnoreReason::UnhandledEvent))
            }
        }
    }

    pub async fn on_payment_succeeded(&self, external_id: &str) -> Result<WebhookOutcome, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let slot = match pending_slot(tx.as_mut(), external_id, now).await? {
            Ok(slot) => slot,
            Err(reason) => return Ok(WebhookOutcome::Ignored(reason)),
        };

        let Some(user_id) = slot.user_id.clone() else {
            warn!("Pending slot {} has no holder, ignoring payment {}", slot.id, external_id);
            return Ok(WebhookOutcome::Ignored(IgnoreReason::NotPending));
        };

        let product = self.products.find_by_id(&slot.product_id).await?
            .ok_or(AppError::NotFound("Product not found".into()))?;

        if !tx.mark_paid(&slot.id, now).await? {
            return Ok(WebhookOutcome::Ignored(IgnoreReason::NotPending));
        }

        let member = tx.create_or_extend_member(&user_id, &product, external_id, now.date_naive()).await?;
        tx.enqueue_job(&Job::new(PAYMENT_SUCCEEDED, &user_id, &product.id, &slot.id)).await?;
        tx.commit().await?;

        info!(
            "Payment {} settled slot {}; member {} valid {}..{}",
            external_id, slot.id, member.id, member.date_start, member.date_end
        );
        Ok(WebhookOutcome::Applied)
    }

    pub async fn on_payment_failed(&self, external_id: &str) -> Result<WebhookOutcome, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let slot = match pending_slot(tx.as_mut(), external_id, now).await? {
            Ok(slot) => slot,
            Err(reason) => return Ok(WebhookOutcome::Ignored(reason)),
        };

        if !tx.mark_failed(&slot.id).await? {
            return Ok(WebhookOutcome::Ignored(IgnoreReason::NotPending));
        }

        if let Some(user_id) = &slot.user_id {
            tx.enqueue_job(&Job::new(PAYMENT_FAILED, user_id, &slot.product_id, &slot.id)).await?;
        }
        tx.commit().await?;

        info!("Payment {} failed for slot {}", external_id, slot.id);
        Ok(WebhookOutcome::Applied)
    }
}

/// Identifies one payment attempt: the holder, the reservation it belongs to,
/// and the intent it replaces after a failure.
fn payment_attempt_key(slot: &Slot, user_id: &str) -> String {
    format!(
        "slot-{}-{}-{}-{}",
        slot.id,
        user_id,
        slot.reserved_until.timestamp_millis(),
        slot.external_payment_id.as_deref().unwrap_or("first"),
    )
}

/// Row-locked lookup plus the settle guard. The inner `Err` is a benign
/// reason to acknowledge without touching anything.
async fn pending_slot<T: SlotTx + ?Sized>(
    tx: &mut T,
    external_id: &str,
    now: chrono::DateTime<Utc>,
) -> Result<Result<Slot, IgnoreReason>, AppError> {
    let Some(slot) = tx.find_slot_by_payment_id_for_update(external_id).await? else {
        warn!("Payment {} does not match any slot", external_id);
        return Ok(Err(IgnoreReason::UnknownPayment));
    };

    if slot.payment_state != PaymentState::Pending {
        info!("Payment {} for slot {} already settled as {}", external_id, slot.id, slot.payment_state.as_str());
        return Ok(Err(IgnoreReason::NotPending));
    }

    if slot.is_expired(now) {
        warn!("Payment {} arrived after reservation of slot {} expired", external_id, slot.id);
        return Ok(Err(IgnoreReason::ReservationExpired));
    }

    Ok(Ok(slot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn attempt_key_changes_with_holder_reservation_and_retry() {
        let now = Utc::now();
        let mut slot = Slot::new("p1", Some("alice"), now + Duration::hours(48));
        let first = payment_attempt_key(&slot, "alice");
        assert_eq!(first, payment_attempt_key(&slot, "alice"));

        slot.external_payment_id = Some("pi_failed".into());
        let retry = payment_attempt_key(&slot, "alice");
        assert_ne!(first, retry);

        slot.external_payment_id = None;
        slot.user_id = Some("bob".into());
        slot.reserved_until = now + Duration::hours(49);
        let reclaimed = payment_attempt_key(&slot, "bob");
        assert_ne!(first, reclaimed);
        assert_ne!(retry, reclaimed);
    }
}
