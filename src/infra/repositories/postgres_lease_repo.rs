use crate::domain::ports::LeaseRepository;
use crate::error::AppError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;

pub struct PostgresLeaseRepo {
    pool: PgPool,
}

impl PostgresLeaseRepo {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

#[async_trait]
impl LeaseRepository for PostgresLeaseRepo {
    async fn try_acquire(&self, name: &str, owner: &str, ttl: Duration) -> Result<bool, AppError> {
        let now = Utc::now();
        let holder = sqlx::query_scalar::<_, String>(
            r#"
            INSERT INTO leases (name, owner, expires_at) VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE
            SET owner = EXCLUDED.owner, expires_at = EXCLUDED.expires_at
            WHERE leases.owner = EXCLUDED.owner OR leases.expires_at <= $4
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
        let result = sqlx::query("UPDATE leases SET expires_at = $3 WHERE name = $1 AND owner = $2")
            .bind(name)
            .bind(owner)
            .bind(Utc::now() + ttl)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, name: &str, owner: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM leases WHERE name = $1 AND owner = $2")
            .bind(name)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(AppError::Database)?;
        Ok(result.rows_affected() == 1)
    }
}
