use crate::domain::{models::product::{Product, ProductKind, ProductRow}, ports::ProductRepository};
use crate::error::AppError;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::error;

pub struct PostgresProductRepo {
    pool: PgPool,
}

impl PostgresProductRepo {
    pub fn new(pool: PgPool) -> Self { Self { pool } }
}

fn into_products(rows: Vec<ProductRow>) -> Result<Vec<Product>, AppError> {
    rows.into_iter().map(into_product).collect()
}

fn into_product(row: ProductRow) -> Result<Product, AppError> {
    Product::try_from(row).map_err(|e| {
        error!("Postgres product row rejected: {}", e);
        AppError::InternalWithMsg(e.to_string())
    })
}

#[async_trait]
impl ProductRepository for PostgresProductRepo {
    async fn create(&self, product: &Product) -> Result<Product, AppError> {
        let query = sqlx::query_as::<_, ProductRow>(
            r#"
            INSERT INTO products (id, obj_type, name, name_short, price_cents, capacity_limit, active,
                door_access, renewal_months, renewal_window_days, signup_deadline, date_start, date_end, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING *
            "#
        )
            .bind(&product.id)
            .bind(product.kind.obj_type())
            .bind(&product.name)
            .bind(&product.name_short)
            .bind(product.price_cents)
            .bind(product.capacity_limit)
            .bind(product.active);

        let query = match &product.kind {
            ProductKind::Membership { door_access, renewal_months, renewal_window_days } => query
                .bind(door_access.as_str())
                .bind(*renewal_months as i32)
                .bind(*renewal_window_days as i32)
                .bind(None::<chrono::DateTime<chrono::Utc>>)
                .bind(None::<chrono::NaiveDate>)
                .bind(None::<chrono::NaiveDate>),
            ProductKind::Event { signup_deadline, date_start, date_end } => query
                .bind(None::<String>)
                .bind(None::<i32>)
                .bind(None::<i32>)
                .bind(*signup_deadline)
                .bind(Some(*date_start))
                .bind(Some(*date_end)),
        };

        let row = query
            .bind(product.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(AppError::Database)?;
        into_product(row)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Product>, AppError> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(AppError::Database)?;
        row.map(into_product).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Product>, AppError> {
        let rows = sqlx::query_as::<_, ProductRow>("SELECT * FROM products WHERE active = TRUE ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)?;
        into_products(rows)
    }

    async fn list_capacity_limited(&self) -> Result<Vec<Product>, AppError> {
        let rows = sqlx::query_as::<_, ProductRow>(
            "SELECT * FROM products WHERE active = TRUE AND capacity_limit > 0 ORDER BY created_at ASC"
        )
            .fetch_all(&self.pool)
            .await
            .map_err(AppError::Database)?;
        into_products(rows)
    }
}
