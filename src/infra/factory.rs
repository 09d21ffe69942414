use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use sqlx::{postgres::{PgPoolOptions, PgConnectOptions}, sqlite::{SqlitePoolOptions, SqliteJournalMode, SqliteConnectOptions}};
use sqlx::{PgPool, SqlitePool, ConnectOptions};
use tracing::info;
use tracing::log::LevelFilter;
use tera::Tera;

use crate::config::Config;
use crate::error::AppError;
use crate::state::{AppState, Backends};
use crate::infra::email::http_email_service::HttpEmailService;
use crate::infra::payments::http_payment_provider::HttpPaymentProvider;
use crate::infra::repositories::{
    postgres_product_repo::PostgresProductRepo, postgres_user_repo::PostgresUserRepo,
    postgres_slot_store::PostgresSlotStore, postgres_lease_repo::PostgresLeaseRepo,
    postgres_job_repo::PostgresJobRepo,
    sqlite_product_repo::SqliteProductRepo, sqlite_user_repo::SqliteUserRepo,
    sqlite_slot_store::SqliteSlotStore, sqlite_lease_repo::SqliteLeaseRepo,
    sqlite_job_repo::SqliteJobRepo,
};

pub const SLOT_OFFERED_TEMPLATE: &str = "slot_offered.html";
pub const PAYMENT_SUCCEEDED_TEMPLATE: &str = "payment_succeeded.html";
pub const PAYMENT_FAILED_TEMPLATE: &str = "payment_failed.html";

pub async fn bootstrap_state(config: &Config) -> Result<AppState, AppError> {
    let database_url = &config.database_url;

    let email_service = Arc::new(HttpEmailService::new(
        config.mail_service_url.clone(),
        config.mail_service_token.clone(),
    ));
    let payment_provider = Arc::new(HttpPaymentProvider::new(
        config.payment_provider_url.clone(),
        config.payment_provider_key.clone(),
    ));
    let templates = Arc::new(load_templates()?);

    let backends = if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        postgres_backends(database_url).await?
    } else {
        sqlite_backends(database_url).await?
    };

    AppState::new(config.clone(), backends, email_service, payment_provider, templates)
}

pub fn load_templates() -> Result<Tera, AppError> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        (SLOT_OFFERED_TEMPLATE, include_str!("../templates/slot_offered.html")),
        (PAYMENT_SUCCEEDED_TEMPLATE, include_str!("../templates/payment_succeeded.html")),
        (PAYMENT_FAILED_TEMPLATE, include_str!("../templates/payment_failed.html")),
    ])
        .map_err(|e| AppError::Config(format!("Failed to load email templates: {:?}", e)))?;
    Ok(tera)
}

pub async fn postgres_backends(database_url: &str) -> Result<Backends, AppError> {
    info!("Initializing PostgreSQL connection...");

    let opts = PgConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("Invalid Postgres URL: {}", e)))?
        .log_statements(LevelFilter::Debug)
        .log_slow_statements(LevelFilter::Warn, Duration::from_millis(500));

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect_with(opts)
        .await
        .map_err(AppError::Database)?;

    run_postgres_migrations(&pool).await?;

    Ok(Backends {
        product_repo: Arc::new(PostgresProductRepo::new(pool.clone())),
        user_repo: Arc::new(PostgresUserRepo::new(pool.clone())),
        slot_store: Arc::new(PostgresSlotStore::new(pool.clone())),
        lease_repo: Arc::new(PostgresLeaseRepo::new(pool.clone())),
        job_repo: Arc::new(PostgresJobRepo::new(pool)),
    })
}

pub async fn sqlite_backends(database_url: &str) -> Result<Backends, AppError> {
    info!("Initializing SQLite connection with WAL Mode...");

    let opts = SqliteConnectOptions::from_str(database_url)
        .map_err(|e| AppError::Config(format!("Invalid SQLite connection string: {}", e)))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5))
        .log_statements(LevelFilter::Debug)
        .log_slow_statements(LevelFilter::Warn, Duration::from_millis(500));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(opts)
        .await
        .map_err(AppError::Database)?;

    run_sqlite_migrations(&pool).await?;

    Ok(Backends {
        product_repo: Arc::new(SqliteProductRepo::new(pool.clone())),
        user_repo: Arc::new(SqliteUserRepo::new(pool.clone())),
        slot_store: Arc::new(SqliteSlotStore::new(pool.clone())),
        lease_repo: Arc::new(SqliteLeaseRepo::new(pool.clone())),
        job_repo: Arc::new(SqliteJobRepo::new(pool)),
    })
}

async fn run_postgres_migrations(pool: &PgPool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations/postgres")
        .run(pool)
        .await
        .map_err(|e| AppError::InternalWithMsg(format!("Failed to run Postgres migrations: {}", e)))
}

async fn run_sqlite_migrations(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::migrate!("./migrations/sqlite")
        .run(pool)
        .await
        .map_err(|e| AppError::InternalWithMsg(format!("Failed to run SQLite migrations: {}", e)))
}
