use axum::{extract::{State, Path}, http::StatusCode, response::{IntoResponse, Response}, Json};
use crate::state::AppState;
use crate::api::extractors::auth::AuthUser;
use crate::domain::services::allocator::ReserveOutcome;
use crate::error::AppError;
use std::sync::Arc;
use tracing::info;

/// 200 with the held slot, or 429 with the waiting list entry when the product is full.
pub async fn reserve_slot(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(product_id): Path<String>,
) -> Result<Response, AppError> {
    info!("reserve_slot: user {} product {}", user_id, product_id);

    match state.allocator.reserve(&product_id, &user_id).await? {
        ReserveOutcome::Reserved(slot) => Ok((StatusCode::OK, Json(slot)).into_response()),
        ReserveOutcome::Queued(entry) => Ok((StatusCode::TOO_MANY_REQUESTS, Json(entry)).into_response()),
    }
}

pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(slot_key): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let intent = state.payments.create_payment_intent(&slot_key, &user_id).await?;
    Ok(Json(intent))
}
