use std::sync::Arc;
use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::domain::models::{job::{Job, SLOT_OFFERED}, product::Product};
use crate::domain::ports::{LeaseRepository, ProductRepository, SlotStore};
use crate::error::AppError;

pub const PROMOTER_LEASE: &str = "cron_generate_slots";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProductReport {
    pub released: u64,
    pub promoted: usize,
    pub opened: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub products: usize,
    pub released: u64,
    pub promoted: usize,
    pub opened: usize,
}

/// Periodic reconciliation: hands freed capacity to the waiting list first,
/// then tops up the open pool so that holders + open slots never exceed the limit.
pub struct WaitlistPromoter {
    products: Arc<dyn ProductRepository>,
    store: Arc<dyn SlotStore>,
    leases: Arc<dyn LeaseRepository>,
    owner: String,
    lease_ttl: Duration,
    reservation_ttl: Duration,
}

impl WaitlistPromoter {
    pub fn new(
        products: Arc<dyn ProductRepository>,
        store: Arc<dyn SlotStore>,
        leases: Arc<dyn LeaseRepository>,
        owner: String,
        lease_ttl: Duration,
        reservation_ttl: Duration,
    ) -> Self {
        Self { products, store, leases, owner, lease_ttl, reservation_ttl }
    }

    /// One cycle over every capacity-limited product. Returns `None` when
    /// another replica holds the lease.
    pub async fn run_cycle(&self) -> Result<Option<CycleReport>, AppError> {
        if !self.leases.try_acquire(PROMOTER_LEASE, &self.owner, self.lease_ttl).await? {
            info!("Promoter lease held by another instance, skipping cycle");
            return Ok(None);
        }

        let mut report = CycleReport::default();
        for product in self.products.list_capacity_limited().await? {
            match self.reconcile_product(&product).await {
                Ok(r) => {
                    report.products += 1;
                    report.released += r.released;
                    report.promoted += r.promoted;
                    report.opened += r.opened;
                }
                Err(e) => error!("Promoter failed for product {}: {:?}", product.id, e),
            }

            if !self.leases.renew(PROMOTER_LEASE, &self.owner, self.lease_ttl).await? {
                warn!("Promoter lease lost mid-cycle, stopping after product {}", product.id);
                break;
            }
        }

        Ok(Some(report))
    }

    pub async fn reconcile_product(&self, product: &Product) -> Result<ProductReport, AppError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        if !tx.lock_product(&product.id).await? {
            return Ok(ProductReport::default());
        }

        let released = tx.release_reclaimable_slots(&product.id, now).await?;
        let counts = tx.capacity_counts(&product.id, now).await?;
        let (holders, open) = (counts.holders, counts.open_slots);
        let mut available = (i64::from(product.capacity_limit) - holders - open).max(0);

        let reserved_until = now + self.reservation_ttl;
        let mut promoted = 0;

        let candidates = available + open;
        if candidates > 0 {
            for entry in tx.oldest_waitlist_entries(&product.id, candidates).await? {
                let claimed = match tx.acquire_available_slot(&product.id, now).await? {
                    Some(open_slot) => tx.claim_slot(&open_slot.id, &entry.user_id, reserved_until, now).await?,
                    None => None,
                };

                let slot = match claimed {
                    Some(slot) => slot,
                    None if available > 0 => {
                        available -= 1;
                        tx.create_held_slot(&product.id, &entry.user_id, reserved_until).await?
                    }
                    None => break,
                };

                tx.delete_waitlist_entry(&entry.id).await?;
                tx.enqueue_job(&Job::new(SLOT_OFFERED, &entry.user_id, &product.id, &slot.id)).await?;
                promoted += 1;
            }
        }

        let opened = available as usize;
        for _ in 0..opened {
            tx.create_open_slot(&product.id, now).await?;
        }

        tx.commit().await?;

        if released > 0 || promoted > 0 || opened > 0 {
            info!(
                "Promoter product {}: released {}, promoted {}, opened {} (holders {}, limit {})",
                product.id, released, promoted, opened, holders, product.capacity_limit
            );
        }

        Ok(ProductReport { released, promoted, opened })
    }

    /// Gives the lease up on shutdown so another replica can take over immediately.
    pub async fn release_lease(&self) -> Result<bool, AppError> {
        self.leases.release(PROMOTER_LEASE, &self.owner).await
    }
}
