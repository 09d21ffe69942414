use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;

/// Confirmed, paid participation in a product for a date range.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone, PartialEq)]
pub struct MemberRecord {
    pub id: String,
    pub user_id: String,
    pub product_id: String,
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MemberRecord {
    pub fn new(user_id: &str, product_id: &str, date_start: NaiveDate, date_end: NaiveDate, payment_reference: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            product_id: product_id.to_string(),
            date_start,
            date_end,
            payment_reference: Some(payment_reference.to_string()),
            created_at: Utc::now(),
        }
    }
}
