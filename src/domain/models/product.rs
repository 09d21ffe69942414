use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_RENEWAL_MONTHS: u32 = 12;
pub const DEFAULT_RENEWAL_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DoorAccess {
    NoAccess,
    MemberHours,
    Always,
}

impl DoorAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoorAccess::NoAccess => "NO_ACCESS",
            DoorAccess::MemberHours => "MEMBER_HOURS",
            DoorAccess::Always => "ALWAYS",
        }
    }
}

impl FromStr for DoorAccess {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NO_ACCESS" => Ok(DoorAccess::NoAccess),
            "MEMBER_HOURS" => Ok(DoorAccess::MemberHours),
            "ALWAYS" => Ok(DoorAccess::Always),
            other => Err(format!("unknown door access level {}", other)),
        }
    }
}

/// Per-kind payload of a [`Product`]. The tag decides renewal and access rules.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductKind {
    Membership {
        door_access: DoorAccess,
        renewal_months: u32,
        renewal_window_days: i64,
    },
    Event {
        signup_deadline: Option<DateTime<Utc>>,
        date_start: NaiveDate,
        date_end: NaiveDate,
    },
}

impl ProductKind {
    pub fn obj_type(&self) -> &'static str {
        match self {
            ProductKind::Membership { .. } => "MEMBERSHIP",
            ProductKind::Event { .. } => "EVENT",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub name_short: String,
    pub price_cents: i32,
    /// 0 means unlimited.
    pub capacity_limit: i32,
    pub active: bool,
    #[serde(flatten)]
    pub kind: ProductKind,
    pub created_at: DateTime<Utc>,
}

impl Product {
    pub fn membership(name: &str, name_short: &str, price_cents: i32, capacity_limit: i32) -> Self {
        Self::with_kind(name, name_short, price_cents, capacity_limit, ProductKind::Membership {
            door_access: DoorAccess::MemberHours,
            renewal_months: DEFAULT_RENEWAL_MONTHS,
            renewal_window_days: DEFAULT_RENEWAL_WINDOW_DAYS,
        })
    }

    pub fn event(
        name: &str,
        name_short: &str,
        price_cents: i32,
        capacity_limit: i32,
        date_start: NaiveDate,
        date_end: NaiveDate,
    ) -> Self {
        Self::with_kind(name, name_short, price_cents, capacity_limit, ProductKind::Event {
            signup_deadline: None,
            date_start,
            date_end,
        })
    }

    pub fn with_kind(name: &str, name_short: &str, price_cents: i32, capacity_limit: i32, kind: ProductKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            name_short: name_short.to_string(),
            price_cents,
            capacity_limit,
            active: true,
            kind,
            created_at: Utc::now(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.capacity_limit <= 0
    }

    pub fn grants_door_access(&self) -> bool {
        match &self.kind {
            ProductKind::Membership { door_access, .. } => *door_access != DoorAccess::NoAccess,
            ProductKind::Event { .. } => false,
        }
    }

    pub fn signup_open(&self, now: DateTime<Utc>) -> bool {
        match &self.kind {
            ProductKind::Membership { .. } => true,
            ProductKind::Event { signup_deadline, date_end, .. } => {
                signup_deadline.is_none_or(|deadline| now <= deadline) && now.date_naive() <= *date_end
            }
        }
    }

    /// Whether a member whose record ends on `member_end` may already buy the next period.
    pub fn in_renewal_window(&self, member_end: NaiveDate, today: NaiveDate) -> bool {
        match &self.kind {
            ProductKind::Membership { renewal_window_days, .. } => {
                member_end - today <= Duration::days(*renewal_window_days)
            }
            ProductKind::Event { .. } => false,
        }
    }

    /// Date range granted to a first-time buyer paying on `today`.
    pub fn membership_period(&self, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        match &self.kind {
            ProductKind::Membership { renewal_months, .. } => {
                Some((today, today.checked_add_months(Months::new(*renewal_months))?))
            }
            ProductKind::Event { date_start, date_end, .. } => Some((*date_start, *date_end)),
        }
    }

    /// New end date for an existing member, counted from their current end date.
    pub fn extend_membership(&self, current_end: NaiveDate) -> Option<NaiveDate> {
        match &self.kind {
            ProductKind::Membership { renewal_months, .. } => {
                current_end.checked_add_months(Months::new(*renewal_months))
            }
            ProductKind::Event { date_end, .. } => Some(current_end.max(*date_end)),
        }
    }
}

/// Flat database shape of a product; `obj_type` selects which columns are populated.
#[derive(Debug, FromRow)]
pub struct ProductRow {
    pub id: String,
    pub obj_type: String,
    pub name: String,
    pub name_short: String,
    pub price_cents: i32,
    pub capacity_limit: i32,
    pub active: bool,
    pub door_access: Option<String>,
    pub renewal_months: Option<i32>,
    pub renewal_window_days: Option<i32>,
    pub signup_deadline: Option<DateTime<Utc>>,
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct InvalidProductRow(pub String);

impl fmt::Display for InvalidProductRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid product row: {}", self.0)
    }
}

impl TryFrom<ProductRow> for Product {
    type Error = InvalidProductRow;

    fn try_from(row: ProductRow) -> Result<Self, Self::Error> {
        let kind = match row.obj_type.as_str() {
            "MEMBERSHIP" => ProductKind::Membership {
                door_access: row.door_access.as_deref().unwrap_or("NO_ACCESS").parse().map_err(InvalidProductRow)?,
                renewal_months: row.renewal_months.map(|m| m.max(1) as u32).unwrap_or(DEFAULT_RENEWAL_MONTHS),
                renewal_window_days: row.renewal_window_days.map(i64::from).unwrap_or(DEFAULT_RENEWAL_WINDOW_DAYS),
            },
            "EVENT" => ProductKind::Event {
                signup_deadline: row.signup_deadline,
                date_start: row.date_start.ok_or_else(|| InvalidProductRow(format!("event {} has no date_start", row.id)))?,
                date_end: row.date_end.ok_or_else(|| InvalidProductRow(format!("event {} has no date_end", row.id)))?,
            },
            other => return Err(InvalidProductRow(format!("unknown obj_type {}", other))),
        };

        Ok(Product {
            id: row.id,
            name: row.name,
            name_short: row.name_short,
            price_cents: row.price_cents,
            capacity_limit: row.capacity_limit,
            active: row.active,
            kind,
            created_at: row.created_at,
        })
    }
}
