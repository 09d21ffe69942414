use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

#[derive(Debug, Serialize, Deserialize, FromRow, Clone, PartialEq)]
pub struct WaitingListEntry {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub created_at: DateTime<Utc>,
}

impl WaitingListEntry {
    pub fn new(product_id: &str, user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            product_id: product_id.to_string(),
            created_at: Utc::now(),
        }
    }
}
