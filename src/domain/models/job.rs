use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

pub const SLOT_OFFERED: &str = "SLOT_OFFERED";
pub const PAYMENT_SUCCEEDED: &str = "PAYMENT_SUCCEEDED";
pub const PAYMENT_FAILED: &str = "PAYMENT_FAILED";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobPayload {
    pub user_id: String,
    pub product_id: String,
    pub slot_id: String,
}

/// Outbox row: written in the same transaction as the state change it announces.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub payload: Json<JobPayload>,
    pub execute_at: DateTime<Utc>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(job_type: &str, user_id: &str, product_id: &str, slot_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            job_type: job_type.to_string(),
            payload: Json(JobPayload {
                user_id: user_id.to_string(),
                product_id: product_id.to_string(),
                slot_id: slot_id.to_string(),
            }),
            execute_at: now,
            status: "PENDING".to_string(),
            error_message: None,
            created_at: now,
        }
    }
}
