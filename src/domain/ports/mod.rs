use crate::domain::models::{
    job::Job, member::MemberRecord, payment::{PaymentIntent, PaymentIntentRequest},
    product::Product, slot::{CapacityCounts, Slot}, user::User, waiting_list::WaitingListEntry,
};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn create(&self, product: &Product) -> Result<Product, AppError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Product>, AppError>;
    async fn list_active(&self) -> Result<Vec<Product>, AppError>;
    async fn list_capacity_limited(&self) -> Result<Vec<Product>, AppError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn create(&self, user: &User) -> Result<User, AppError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, AppError>;
}

/// Entry point of the slot store. Mutations go through a [`SlotTx`]; the
/// remaining methods are plain reads for listing endpoints.
#[async_trait]
pub trait SlotStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn SlotTx>, AppError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Slot>, AppError>;
    async fn list_held_by_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Slot>, AppError>;
    async fn list_members_by_user(&self, user_id: &str) -> Result<Vec<MemberRecord>, AppError>;
    async fn list_waitlist(&self, product_id: &str) -> Result<Vec<WaitingListEntry>, AppError>;
    async fn availability(&self, product_id: &str, now: DateTime<Utc>) -> Result<CapacityCounts, AppError>;
}

/// One database transaction over slots, waiting list, members and the job outbox.
///
/// Dropping the handle without calling [`SlotTx::commit`] rolls everything back.
/// Conditional writes report a lost race as `None`/`false`, never as an error.
#[async_trait]
pub trait SlotTx: Send {
    /// Serializes concurrent requests of one user for one product.
    async fn lock_user_product(&mut self, product_id: &str, user_id: &str) -> Result<(), AppError>;
    async fn lock_product(&mut self, product_id: &str) -> Result<bool, AppError>;

    async fn acquire_available_slot(&mut self, product_id: &str, now: DateTime<Utc>) -> Result<Option<Slot>, AppError>;
    async fn get_held_slot(&mut self, product_id: &str, user_id: &str, now: DateTime<Utc>) -> Result<Option<Slot>, AppError>;
    async fn claim_slot(&mut self, slot_id: &str, user_id: &str, reserved_until: DateTime<Utc>, now: DateTime<Utc>) -> Result<Option<Slot>, AppError>;
    async fn create_open_slot(&mut self, product_id: &str, reserved_until: DateTime<Utc>) -> Result<Slot, AppError>;
    async fn create_held_slot(&mut self, product_id: &str, user_id: &str, reserved_until: DateTime<Utc>) -> Result<Slot, AppError>;
    async fn release_reclaimable_slots(&mut self, product_id: &str, now: DateTime<Utc>) -> Result<u64, AppError>;
    async fn capacity_counts(&mut self, product_id: &str, now: DateTime<Utc>) -> Result<CapacityCounts, AppError>;

    async fn get_waitlist_entry(&mut self, product_id: &str, user_id: &str) -> Result<Option<WaitingListEntry>, AppError>;
    async fn create_waitlist_entry(&mut self, product_id: &str, user_id: &str) -> Result<WaitingListEntry, AppError>;
    async fn delete_waitlist_entry(&mut self, id: &str) -> Result<bool, AppError>;
    async fn oldest_waitlist_entries(&mut self, product_id: &str, limit: i64) -> Result<Vec<WaitingListEntry>, AppError>;

    async fn find_slot_by_key_for_update(&mut self, key: &str, user_id: &str, now: DateTime<Utc>) -> Result<Option<Slot>, AppError>;
    async fn find_slot_by_payment_id_for_update(&mut self, external_id: &str) -> Result<Option<Slot>, AppError>;
    /// Compare-and-set: only succeeds while `user_id` still holds the unexpired
    /// slot and its payment id is still `previous_external_id`.
    async fn set_payment_pending(
        &mut self,
        slot_id: &str,
        user_id: &str,
        previous_external_id: Option<&str>,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;
    async fn mark_paid(&mut self, slot_id: &str, now: DateTime<Utc>) -> Result<bool, AppError>;
    async fn mark_failed(&mut self, slot_id: &str) -> Result<bool, AppError>;

    async fn get_active_member(&mut self, product_id: &str, user_id: &str, today: NaiveDate) -> Result<Option<MemberRecord>, AppError>;
    async fn get_active_member_for_update(&mut self, product_id: &str, user_id: &str, today: NaiveDate) -> Result<Option<MemberRecord>, AppError>;
    async fn insert_member(&mut self, member: &MemberRecord) -> Result<MemberRecord, AppError>;
    async fn extend_member(&mut self, member_id: &str, date_end: NaiveDate, payment_reference: &str) -> Result<MemberRecord, AppError>;

    async fn enqueue_job(&mut self, job: &Job) -> Result<(), AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    /// Extends the user's active record by one renewal period from its current
    /// end date, or inserts a fresh record when there is none.
    async fn create_or_extend_member(
        &mut self,
        user_id: &str,
        product: &Product,
        payment_reference: &str,
        today: NaiveDate,
    ) -> Result<MemberRecord, AppError> {
        match self.get_active_member_for_update(&product.id, user_id, today).await? {
            Some(existing) => {
                let date_end = product.extend_membership(existing.date_end)
                    .ok_or_else(|| AppError::InternalWithMsg(format!("Cannot extend membership {} past {}", existing.id, existing.date_end)))?;
                self.extend_member(&existing.id, date_end, payment_reference).await
            }
            None => {
                let (date_start, date_end) = product.membership_period(today)
                    .ok_or_else(|| AppError::InternalWithMsg(format!("Cannot compute membership period for product {}", product.id)))?;
                let member = MemberRecord::new(user_id, &product.id, date_start, date_end, payment_reference);
                self.insert_member(&member).await
            }
        }
    }
}

/// Named, time-bounded ownership claim shared by all replicas.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Takes the lease if it is free, expired, or already ours.
    async fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, AppError>;
    /// Pushes the expiry forward; false if the lease is no longer ours.
    async fn renew(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, AppError>;
    async fn release(&self, name: &str, owner: &str) -> Result<bool, AppError>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn find_pending(&self, limit: i32) -> Result<Vec<Job>, AppError>;
    async fn update_status(&self, id: &str, status: &str, error_message: Option<String>) -> Result<(), AppError>;
}

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), AppError>;
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payment_intent(&self, request: &PaymentIntentRequest) -> Result<PaymentIntent, AppError>;
}
