use crate::domain::ports::LeaseRepository;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;

pub struct SqliteLeaseRepo {
    pool: SqlitePool,
}

impl SqliteLeaseRepo {
    pub fn new(pool: SqlitePool) -> Self { Self { pool } }
}

#[async_trait]
impl LeaseRepository for SqliteLeaseRepo {
    async fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, AppError> {
        let now = Utc::now();
        let holder = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO leases (name, owner, expires_at) VALUES (?, ?, ?)
            ON CONFLICT (name) DO UPDATE
            SET owner = excluded.owner, expires_at = excluded.expires_at
            WHERE leases.owner = excluded.owner OR leases.expires_at <= ?
            RETURNING owner
            "#
        )
            .bind(name)
            .bind(owner)
            .bind(now + ttl)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(holder.is_some())
    }

    async fn renew(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, AppError> {
        let result = sqlx::query("UPDATE leases SET expires_at = ? WHERE name = ? AND owner = ?")
            .bind(Utc::now() + ttl)
            .bind(name)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM leases WHERE name = ? AND owner = ?")
            .bind(name)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }
}
