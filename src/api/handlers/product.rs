use axum::{extract::{State, Path}, response::IntoResponse, Json};
use crate::state::AppState;
use crate::api::dtos::responses::{AvailabilityResponse, ProductResponse};
use crate::domain::models::product::Product;
use crate::error::AppError;
use std::sync::Arc;
use chrono::Utc;

fn without_availability(product: Product) -> ProductResponse {
    ProductResponse {
        grants_door_access: product.grants_door_access(),
        product,
        availability: None,
    }
}

pub async fn list_products(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let products = state.product_repo.list_active().await?;
    Ok(Json(products.into_iter().map(without_availability).collect::<Vec<_>>()))
}

pub async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(product_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let product = state.product_repo.find_by_id(&product_id).await?
        .filter(|p| p.active)
        .ok_or(AppError::NotFound("Product not found".into()))?;

    let availability = if product.is_unlimited() {
        None
    } else {
        let counts = state.slot_store.availability(&product.id, Utc::now()).await?;
        Some(AvailabilityResponse {
            capacity_limit: product.capacity_limit,
            holders: counts.holders,
            open_slots: counts.open_slots,
        })
    };

    Ok(Json(ProductResponse { availability, ..without_availability(product) }))
}
