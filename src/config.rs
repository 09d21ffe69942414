use std::env;
use std::str::FromStr;
use chrono::Duration;
use uuid::Uuid;
use crate::error::AppError;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub mail_service_url: String,
    pub mail_service_token: String,
    pub jwt_public_key: String, // Ed25519 public key (PEM)
    pub auth_issuer: String,
    pub payment_provider_url: String,
    pub payment_provider_key: String,
    pub payment_currency: String,
    pub webhook_secret: String,
    pub webhook_tolerance_secs: i64,
    pub reservation_ttl_hours: i64,
    pub promoter_interval_secs: u64,
    pub lease_ttl_secs: i64,
    pub instance_id: String,
    pub frontend_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: parsed("PORT", 3000)?,
            mail_service_url: env::var("MAIL_SERVICE_URL").unwrap_or_else(|_| "http://localhost:8000/api/v1/send".to_string()),
            mail_service_token: env::var("MAIL_SERVICE_TOKEN").unwrap_or_else(|_| "test-token-1".to_string()),
            jwt_public_key: required("JWT_PUBLIC_KEY")?,
            auth_issuer: env::var("AUTH_ISSUER").unwrap_or_else(|_| "https://api.membership.local".to_string()),
            payment_provider_url: env::var("PAYMENT_PROVIDER_URL").unwrap_or_else(|_| "https://api.stripe.com".to_string()),
            payment_provider_key: env::var("PAYMENT_PROVIDER_KEY").unwrap_or_default(),
            payment_currency: env::var("PAYMENT_CURRENCY").unwrap_or_else(|_| "dkk".to_string()),
            webhook_secret: required("WEBHOOK_SECRET")?,
            webhook_tolerance_secs: parsed("WEBHOOK_TOLERANCE_SECS", 300)?,
            reservation_ttl_hours: parsed("RESERVATION_TTL_HOURS", 48)?,
            promoter_interval_secs: parsed("PROMOTER_INTERVAL_SECS", 60)?,
            lease_ttl_secs: parsed("LEASE_TTL_SECS", 120)?,
            instance_id: env::var("INSTANCE_ID").unwrap_or_else(|_| Uuid::new_v4().to_string()),
            frontend_url: env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".to_string()),
        })
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::hours(self.reservation_ttl_hours)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::seconds(self.lease_ttl_secs)
    }
}

fn required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::Config(format!("{} must be set", key)))
}

fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| AppError::Config(format!("{} must be a number, got {:?}", key, raw))),
        Err(_) => Ok(default),
    }
}
