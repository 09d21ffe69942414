use crate::domain::models::{job::Job, member::MemberRecord, slot::{CapacityCounts, Slot}, waiting_list::WaitingListEntry};
use crate::domain::ports::{SlotStore, SlotTx};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};

const CAPACITY_COUNTS: &str = r#"
    SELECT
        (SELECT COUNT(*) FROM slots
            WHERE product_id = ? AND user_id IS NOT NULL AND reserved_until > ?
            AND payment_state IN ('UNASSIGNED', 'PENDING'))
        +
        (SELECT COUNT(DISTINCT user_id) FROM members
            WHERE product_id = ? AND date_end >= ?) AS holders,
        (SELECT COUNT(*) FROM slots
            WHERE product_id = ? AND payment_state <> 'PAID'
            AND (user_id IS NULL OR reserved_until <= ?)) AS open_slots
"#;

/// SQLite flavour of the slot store. Every transaction opens with
/// `BEGIN IMMEDIATE` and holds the database write lock from its first
/// statement, so the row and advisory locks of the Postgres store reduce to
/// plain reads here. Competing writers wait out the pool's busy timeout.
pub struct SqliteSlotStore {
    pool: SqlitePool,
}

impl SqliteSlotStore {
    pub fn new(pool: SqlitePool) -> Self { Self { pool } }
}

#[async_trait]
impl SlotStore for SqliteSlotStore {
    async fn begin(&self) -> Result<Box<dyn SlotTx>, AppError> {
        let tx = self.pool.begin_with("BEGIN IMMEDIATE").await.map_err(AppError::Database)?;
        Ok(Box::new(SqliteSlotTx { tx }))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn list_held_by_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Slot>, AppError> {
        sqlx::query_as::<_, Slot>(
            "SELECT * FROM slots WHERE user_id = ? AND (reserved_until > ? OR payment_state = 'PAID') ORDER BY created_at ASC"
        )
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn list_members_by_user(&self, user_id: &str) -> Result<Vec<MemberRecord>, AppError> {
        sqlx::query_as::<_, MemberRecord>("SELECT * FROM members WHERE user_id = ? ORDER BY date_end DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn list_waitlist(&self, product_id: &str) -> Result<Vec<WaitingListEntry>, AppError> {
        sqlx::query_as::<_, WaitingListEntry>(
            "SELECT * FROM waiting_list WHERE product_id = ? ORDER BY created_at ASC, id ASC"
        )
            .bind(product_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn availability(&self, product_id: &str, now: DateTime<Utc>) -> Result<CapacityCounts, AppError> {
        sqlx::query_as::<_, CapacityCounts>(CAPACITY_COUNTS)
            .bind(product_id)
            .bind(now)
            .bind(product_id)
            .bind(now.date_naive())
            .bind(product_id)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)
    }
}

pub struct SqliteSlotTx {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl SlotTx for SqliteSlotTx {
    async fn lock_user_product(&mut self, _product_id: &str, _user_id: &str) -> Result<(), AppError> {
        Ok(())
    }

    async fn lock_product(&mut self, product_id: &str) -> Result<bool, AppError> {
        let row = sqlx::query_scalar::<_, String>("SELECT id FROM products WHERE id = ?")
            .bind(product_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(row.is_some())
    }

    async fn acquire_available_slot(&mut self, product_id: &str, now: DateTime<Utc>) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>(
            r#"
            SELECT * FROM slots
            WHERE product_id = ? AND payment_state <> 'PAID'
            AND (user_id IS NULL OR reserved_until <= ?)
            ORDER BY reserved_until ASC
            LIMIT 1
            "#
        )
            .bind(product_id)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn get_held_slot(&mut self, product_id: &str, user_id: &str, now: DateTime<Utc>) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>(
            r#"
            SELECT * FROM slots
            WHERE product_id = ? AND user_id = ? AND reserved_until > ? AND payment_state <> 'PAID'
            ORDER BY reserved_until DESC
            LIMIT 1
            "#
        )
            .bind(product_id)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn claim_slot(&mut self, slot_id: &str, user_id: &str, reserved_until: DateTime<Utc>, now: DateTime<Utc>) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>(
            r#"
            UPDATE slots
            SET user_id = ?, reserved_until = ?, payment_state = 'UNASSIGNED', external_payment_id = NULL
            WHERE id = ? AND payment_state <> 'PAID' AND (user_id IS NULL OR reserved_until <= ?)
            RETURNING *
            "#
        )
            .bind(user_id)
            .bind(reserved_until)
            .bind(slot_id)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn create_open_slot(&mut self, product_id: &str, reserved_until: DateTime<Utc>) -> Result<Slot, AppError> {
        insert_slot(&mut self.tx, &Slot::new(product_id, None, reserved_until)).await
    }

    async fn create_held_slot(&mut self, product_id: &str, user_id: &str, reserved_until: DateTime<Utc>) -> Result<Slot, AppError> {
        insert_slot(&mut self.tx, &Slot::new(product_id, Some(user_id), reserved_until)).await
    }

    async fn release_reclaimable_slots(&mut self, product_id: &str, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE slots
            SET user_id = NULL, payment_state = 'UNASSIGNED', external_payment_id = NULL, reserved_until = ?
            WHERE product_id = ? AND user_id IS NOT NULL AND payment_state <> 'PAID'
            AND (reserved_until <= ? OR payment_state = 'FAILED')
            "#
        )
            .bind(now)
            .bind(product_id)
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected())
    }

    async fn capacity_counts(&mut self, product_id: &str, now: DateTime<Utc>) -> Result<CapacityCounts, AppError> {
        sqlx::query_as::<_, CapacityCounts>(CAPACITY_COUNTS)
            .bind(product_id)
            .bind(now)
            .bind(product_id)
            .bind(now.date_naive())
            .bind(product_id)
            .bind(now)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn get_waitlist_entry(&mut self, product_id: &str, user_id: &str) -> Result<Option<WaitingListEntry>, AppError> {
        sqlx::query_as::<_, WaitingListEntry>("SELECT * FROM waiting_list WHERE product_id = ? AND user_id = ?")
            .bind(product_id)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn create_waitlist_entry(&mut self, product_id: &str, user_id: &str) -> Result<WaitingListEntry, AppError> {
        let entry = WaitingListEntry::new(product_id, user_id);
        let inserted = sqlx::query_as::<_, WaitingListEntry>(
            r#"
            INSERT INTO waiting_list (id, user_id, product_id, created_at) VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, product_id) DO NOTHING
            RETURNING *
            "#
        )
            .bind(&entry.id)
            .bind(&entry.user_id)
            .bind(&entry.product_id)
            .bind(entry.created_at)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;

        match inserted {
            Some(entry) => Ok(entry),
            None => self.get_waitlist_entry(product_id, user_id).await?
                .ok_or_else(|| AppError::Conflict("Waiting list entry vanished during insert".into())),
        }
    }

    async fn delete_waitlist_entry(&mut self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM waiting_list WHERE id = ?")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn oldest_waitlist_entries(&mut self, product_id: &str, limit: i64) -> Result<Vec<WaitingListEntry>, AppError> {
        sqlx::query_as::<_, WaitingListEntry>(
            "SELECT * FROM waiting_list WHERE product_id = ? ORDER BY created_at ASC, id ASC LIMIT ?"
        )
            .bind(product_id)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn find_slot_by_key_for_update(&mut self, key: &str, user_id: &str, now: DateTime<Utc>) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>(
            "SELECT * FROM slots WHERE key = ? AND user_id = ? AND (reserved_until > ? OR payment_state = 'PAID')"
        )
            .bind(key)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn find_slot_by_payment_id_for_update(&mut self, external_id: &str) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE external_payment_id = ?")
            .bind(external_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn set_payment_pending(
        &mut self,
        slot_id: &str,
        user_id: &str,
        previous_external_id: Option<&str>,
        external_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE slots SET payment_state = 'PENDING', external_payment_id = ?
            WHERE id = ? AND user_id = ? AND reserved_until > ?
            AND payment_state IN ('UNASSIGNED', 'FAILED')
            AND external_payment_id IS ?
            "#
        )
            .bind(external_id)
            .bind(slot_id)
            .bind(user_id)
            .bind(now)
            .bind(previous_external_id)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_paid(&mut self, slot_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE slots SET payment_state = 'PAID', reserved_until = ? WHERE id = ? AND payment_state = 'PENDING' AND reserved_until > ?"
        )
            .bind(now)
            .bind(slot_id)
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&mut self, slot_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE slots SET payment_state = 'FAILED' WHERE id = ? AND payment_state = 'PENDING'")
            .bind(slot_id)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_active_member(&mut self, product_id: &str, user_id: &str, today: NaiveDate) -> Result<Option<MemberRecord>, AppError> {
        sqlx::query_as::<_, MemberRecord>(
            "SELECT * FROM members WHERE product_id = ? AND user_id = ? AND date_end >= ? ORDER BY date_end DESC LIMIT 1"
        )
            .bind(product_id)
            .bind(user_id)
            .bind(today)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn get_active_member_for_update(&mut self, product_id: &str, user_id: &str, today: NaiveDate) -> Result<Option<MemberRecord>, AppError> {
        self.get_active_member(product_id, user_id, today).await
    }

    async fn insert_member(&mut self, member: &MemberRecord) -> Result<MemberRecord, AppError> {
        sqlx::query_as::<_, MemberRecord>(
            "INSERT INTO members (id, user_id, product_id, date_start, date_end, payment_reference, created_at) VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING *"
        )
            .bind(&member.id)
            .bind(&member.user_id)
            .bind(&member.product_id)
            .bind(member.date_start)
            .bind(member.date_end)
            .bind(&member.payment_reference)
            .bind(member.created_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn extend_member(&mut self, member_id: &str, date_end: NaiveDate, payment_reference: &str) -> Result<MemberRecord, AppError> {
        sqlx::query_as::<_, MemberRecord>(
            "UPDATE members SET date_end = ?, payment_reference = ? WHERE id = ? RETURNING *"
        )
            .bind(date_end)
            .bind(payment_reference)
            .bind(member_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn enqueue_job(&mut self, job: &Job) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO jobs (id, job_type, payload, execute_at, status, error_message, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)"
        )
            .bind(&job.id)
            .bind(&job.job_type)
            .bind(&job.payload)
            .bind(job.execute_at)
            .bind(&job.status)
            .bind(&job.error_message)
            .bind(job.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        self.tx.commit().await.map_err(AppError::Database)
    }
}

async fn insert_slot(tx: &mut Transaction<'static, Sqlite>, slot: &Slot) -> Result<Slot, AppError> {
    sqlx::query_as::<_, Slot>(
        r#"
        INSERT INTO slots (id, key, product_id, user_id, reserved_until, payment_state, external_payment_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#
    )
        .bind(&slot.id)
        .bind(&slot.key)
        .bind(&slot.product_id)
        .bind(&slot.user_id)
        .bind(slot.reserved_until)
        .bind(slot.payment_state.as_str())
        .bind(&slot.external_payment_id)
        .bind(slot.created_at)
        .fetch_one(&mut **tx)
        .await
        .map_err(AppError::Database)
}
