use crate::domain::models::{job::Job, member::MemberRecord, slot::{CapacityCounts, Slot}, waiting_list::WaitingListEntry};
use crate::domain::ports::{SlotStore, SlotTx};
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};

const CAPACITY_COUNTS: &str = r#"
    SELECT
        (SELECT COUNT(*) FROM slots
            WHERE product_id = $1 AND user_id IS NOT NULL AND reserved_until > $2
            AND payment_state IN ('UNASSIGNED', 'PENDING'))
        +
        (SELECT COUNT(DISTINCT user_id) FROM members
            WHERE product_id = $1 AND date_end >= $3) AS holders,
        (SELECT COUNT(*) FROM slots
            WHERE product_id = $1 AND payment_state <> 'PAID'
            AND (user_id IS NULL OR reserved_until <= $2)) AS open_slots
"#;

pub struct PostgresSlotStore {
    pool: PgPool,
}

impl PostgresSlotStore {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl SlotStore for PostgresSlotStore {
    async fn begin(&self) -> Result<Box<dyn SlotTx>, AppError> {
        let tx = self.pool.begin().await.map_err(AppError::Database)?;
        Ok(Box::new(PostgresSlotTx { tx }))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn list_held_by_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<Vec<Slot>, AppError> {
        sqlx::query_as::<_, Slot>(
            "SELECT * FROM slots WHERE user_id = $1 AND (reserved_until > $2 OR payment_state = 'PAID') ORDER BY created_at ASC"
        )
            .bind(user_id)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn list_members_by_user(&self, user_id: &str) -> Result<Vec<MemberRecord>, AppError> {
        sqlx::query_as::<_, MemberRecord>("SELECT * FROM members WHERE user_id = $1 ORDER BY date_end DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)
    }

    async fn list_waitlist(&self, product_id: &str) -> Result<Vec<WaitingListEntry>, AppError> {
        sqlx::query_as::<_, WaitingListEntry>(
            "SELECT * FROM waiting_list WHERE product_id = $1 ORDER BY created_at ASC, id ASC"
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
            .bind(now.date_naive())
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)
    }
}

pub struct PostgresSlotTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl SlotTx for PostgresSlotTx {
    async fn lock_user_product(&mut self, product_id: &str, user_id: &str) -> Result<(), AppError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{}:{}", product_id, user_id))
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(())
    }

    async fn lock_product(&mut self, product_id: &str) -> Result<bool, AppError> {
        let row = sqlx::query_scalar::<_, String>("SELECT id FROM products WHERE id = $1 FOR UPDATE")
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
            WHERE product_id = $1 AND payment_state <> 'PAID'
            AND (user_id IS NULL OR reserved_until <= $2)
            ORDER BY reserved_until ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
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
            WHERE product_id = $1 AND user_id = $2 AND reserved_until > $3 AND payment_state <> 'PAID'
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
            SET user_id = $2, reserved_until = $3, payment_state = 'UNASSIGNED', external_payment_id = NULL
            WHERE id = $1 AND payment_state <> 'PAID' AND (user_id IS NULL OR reserved_until <= $4)
            RETURNING *
            "#
        )
            .bind(slot_id)
            .bind(user_id)
            .bind(reserved_until)
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
            SET user_id = NULL, payment_state = 'UNASSIGNED', external_payment_id = NULL, reserved_until = $2
            WHERE id IN (
                SELECT id FROM slots
                WHERE product_id = $1 AND user_id IS NOT NULL AND payment_state <> 'PAID'
                AND (reserved_until <= $2 OR payment_state = 'FAILED')
                FOR UPDATE SKIP LOCKED
            )
            "#
        )
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
            .bind(now.date_naive())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn get_waitlist_entry(&mut self, product_id: &str, user_id: &str) -> Result<Option<WaitingListEntry>, AppError> {
        sqlx::query_as::<_, WaitingListEntry>("SELECT * FROM waiting_list WHERE product_id = $1 AND user_id = $2")
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
            INSERT INTO waiting_list (id, user_id, product_id, created_at) VALUES ($1, $2, $3, $4)
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
        let result = sqlx::query("DELETE FROM waiting_list WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn oldest_waitlist_entries(&mut self, product_id: &str, limit: i64) -> Result<Vec<WaitingListEntry>, AppError> {
        sqlx::query_as::<_, WaitingListEntry>(
            r#"
            SELECT * FROM waiting_list
            WHERE product_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#
        )
            .bind(product_id)
            .bind(limit)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn find_slot_by_key_for_update(&mut self, key: &str, user_id: &str, now: DateTime<Utc>) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>(
            r#"
            SELECT * FROM slots
            WHERE key = $1 AND user_id = $2 AND (reserved_until > $3 OR payment_state = 'PAID')
            FOR UPDATE
            "#
        )
            .bind(key)
            .bind(user_id)
            .bind(now)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn find_slot_by_payment_id_for_update(&mut self, external_id: &str) -> Result<Option<Slot>, AppError> {
        sqlx::query_as::<_, Slot>("SELECT * FROM slots WHERE external_payment_id = $1 FOR UPDATE")
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
            UPDATE slots SET payment_state = 'PENDING', external_payment_id = $5
            WHERE id = $1 AND user_id = $2 AND reserved_until > $4
            AND payment_state IN ('UNASSIGNED', 'FAILED')
            AND external_payment_id IS NOT DISTINCT FROM $3
            "#
        )
            .bind(slot_id)
            .bind(user_id)
            .bind(previous_external_id)
            .bind(now)
            .bind(external_id)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_paid(&mut self, slot_id: &str, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE slots SET payment_state = 'PAID', reserved_until = $2 WHERE id = $1 AND payment_state = 'PENDING' AND reserved_until > $2"
        )
            .bind(slot_id)
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&mut self, slot_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE slots SET payment_state = 'FAILED' WHERE id = $1 AND payment_state = 'PENDING'")
            .bind(slot_id)
            .execute(&mut *self.tx)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_active_member(&mut self, product_id: &str, user_id: &str, today: NaiveDate) -> Result<Option<MemberRecord>, AppError> {
        sqlx::query_as::<_, MemberRecord>(
            "SELECT * FROM members WHERE product_id = $1 AND user_id = $2 AND date_end >= $3 ORDER BY date_end DESC LIMIT 1"
        )
            .bind(product_id)
            .bind(user_id)
            .bind(today)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn get_active_member_for_update(&mut self, product_id: &str, user_id: &str, today: NaiveDate) -> Result<Option<MemberRecord>, AppError> {
        sqlx::query_as::<_, MemberRecord>(
            "SELECT * FROM members WHERE product_id = $1 AND user_id = $2 AND date_end >= $3 ORDER BY date_end DESC LIMIT 1 FOR UPDATE"
        )
            .bind(product_id)
            .bind(user_id)
            .bind(today)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn insert_member(&mut self, member: &MemberRecord) -> Result<MemberRecord, AppError> {
        sqlx::query_as::<_, MemberRecord>(
            "INSERT INTO members (id, user_id, product_id, date_start, date_end, payment_reference, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *"
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
            "UPDATE members SET date_end = $2, payment_reference = $3 WHERE id = $1 RETURNING *"
        )
            .bind(member_id)
            .bind(date_end)
            .bind(payment_reference)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(AppError::Database)
    }

    async fn enqueue_job(&mut self, job: &Job) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO jobs (id, job_type, payload, execute_at, status, error_message, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)"
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

async fn insert_slot(tx: &mut Transaction<'static, Postgres>, slot: &Slot) -> Result<Slot, AppError> {
    sqlx::query_as::<_, Slot>(
        r#"
        INSERT INTO slots (id, key, product_id, user_id, reserved_until, payment_state, external_payment_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
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
