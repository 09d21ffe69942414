use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use thiserror::Error;

/// Payment progress of one reservation of a slot.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentState {
    Unassigned,
    Pending,
    Paid,
    Failed,
}

impl PaymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentState::Unassigned => "UNASSIGNED",
            PaymentState::Pending => "PENDING",
            PaymentState::Paid => "PAID",
            PaymentState::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown payment state {0}")]
pub struct UnknownPaymentState(pub String);

impl TryFrom<String> for PaymentState {
    type Error = UnknownPaymentState;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "UNASSIGNED" => Ok(PaymentState::Unassigned),
            "PENDING" => Ok(PaymentState::Pending),
            "PAID" => Ok(PaymentState::Paid),
            "FAILED" => Ok(PaymentState::Failed),
            _ => Err(UnknownPaymentState(value)),
        }
    }
}

/// Capacity picture of one product, read in a single statement so both
/// numbers come from the same snapshot.
#[derive(Debug, Serialize, FromRow, Clone, Copy, PartialEq, Eq)]
pub struct CapacityCounts {
    /// Unexpired unpaid holds plus users with an active member record.
    pub holders: i64,
    /// Non-PAID slots nobody currently holds.
    pub open_slots: i64,
}

#[derive(Debug, Serialize, Deserialize, FromRow, Clone, PartialEq)]
pub struct Slot {
    pub id: String,
    pub key: String,
    pub product_id: String,
    pub user_id: Option<String>,
    pub reserved_until: DateTime<Utc>,
    #[sqlx(try_from = "String")]
    pub payment_state: PaymentState,
    pub external_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Slot {
    pub fn new(product_id: &str, user_id: Option<&str>, reserved_until: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            key: Uuid::new_v4().simple().to_string(),
            product_id: product_id.to_string(),
            user_id: user_id.map(str::to_string),
            reserved_until,
            payment_state: PaymentState::Unassigned,
            external_payment_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.reserved_until <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn payment_state_parses_stored_values() {
        for state in [PaymentState::Unassigned, PaymentState::Pending, PaymentState::Paid, PaymentState::Failed] {
            assert_eq!(PaymentState::try_from(state.as_str().to_string()).unwrap(), state);
        }
        assert!(PaymentState::try_from("CAPTURED".to_string()).is_err());
    }

    #[test]
    fn reservation_expires_at_reserved_until() {
        let now = Utc::now();
        let mut slot = Slot::new("p1", Some("u1"), now + Duration::hours(1));
        assert!(!slot.is_expired(now));

        slot.reserved_until = now;
        assert!(slot.is_expired(now));
    }
}
