use serde::Serialize;
use crate::domain::models::product::Product;

#[derive(Serialize)]
pub struct ProductResponse {
    #[serde(flatten)]
    pub product: Product,
    pub grants_door_access: bool,
    pub availability: Option<AvailabilityResponse>,
}

/// Current capacity picture of a capacity-limited product.
#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub capacity_limit: i32,
    pub holders: i64,
    pub open_slots: i64,
}

#[derive(Serialize)]
pub struct WebhookAck {
    pub received: bool,
}
