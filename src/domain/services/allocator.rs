use std::sync::Arc;
use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::domain::models::{slot::Slot, waiting_list::WaitingListEntry};
use crate::domain::ports::{ProductRepository, SlotStore};
use crate::error::AppError;

/// Claim attempts against the open pool before falling back to the waiting list.
const CLAIM_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    Reserved(Slot),
    Queued(WaitingListEntry),
}

/// Reserve-or-waitlist decision for a single (product, user) request.
pub struct SlotAllocator {
    products: Arc<dyn ProductRepository>,
    store: Arc<dyn SlotStore>,
    reservation_ttl: Duration,
}

impl SlotAllocator {
    pub fn new(products: Arc<dyn ProductRepository>, store: Arc<dyn SlotStore>, reservation_ttl: Duration) -> Self {
        Self { products, store, reservation_ttl }
    }

    pub async fn reserve(&self, product_id: &str, user_id: &str) -> Result<ReserveOutcome, AppError> {
        let product = self.products.find_by_id(product_id).await?
            .filter(|p| p.active)
            .ok_or(AppError::NotFound("Product not found".into()))?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        tx.lock_user_product(&product.id, user_id).await?;

        // A retried request (page refresh, double click) gets the same answer back.
        if let Some(slot) = tx.get_held_slot(&product.id, user_id, now).await? {
            info!("reserve: user {} already holds slot {} for product {}", user_id, slot.id, product.id);
            return Ok(ReserveOutcome::Reserved(slot));
        }

        if let Some(entry) = tx.get_waitlist_entry(&product.id, user_id).await? {
            info!("reserve: user {} already queued for product {}", user_id, product.id);
            return Ok(ReserveOutcome::Queued(entry));
        }

        if let Some(member) = tx.get_active_member(&product.id, user_id, now.date_naive()).await?
            && !product.in_renewal_window(member.date_end, now.date_naive()) {
            return Err(AppError::AlreadyMember(format!(
                "You are already a member of {} until {}", product.name, member.date_end
            )));
        }

        if !product.signup_open(now) {
            return Err(AppError::SignupClosed);
        }

        let reserved_until = now + self.reservation_ttl;

        for attempt in 1..=CLAIM_ATTEMPTS {
            let Some(candidate) = tx.acquire_available_slot(&product.id, now).await? else {
                break;
            };

            match tx.claim_slot(&candidate.id, user_id, reserved_until, now).await? {
                Some(slot) => {
                    tx.commit().await?;
                    info!("reserve: user {} claimed slot {} for product {}", user_id, slot.id, product.id);
                    return Ok(ReserveOutcome::Reserved(slot));
                }
                None => warn!("reserve: lost race for slot {} (attempt {}/{})", candidate.id, attempt, CLAIM_ATTEMPTS),
            }
        }

        if product.is_unlimited() {
            let slot = tx.create_held_slot(&product.id, user_id, reserved_until).await?;
            tx.commit().await?;
            info!("reserve: created slot {} for unlimited product {}", slot.id, product.id);
            return Ok(ReserveOutcome::Reserved(slot));
        }

        let entry = tx.create_waitlist_entry(&product.id, user_id).await?;
        tx.commit().await?;
        info!("reserve: no capacity for product {}, user {} queued", product.id, user_id);
        Ok(ReserveOutcome::Queued(entry))
    }
}
