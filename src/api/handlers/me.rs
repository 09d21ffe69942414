use axum::{extract::State, response::IntoResponse, Json};
use crate::state::AppState;
use crate::api::extractors::auth::AuthUser;
use crate::error::AppError;
use std::sync::Arc;
use chrono::Utc;

/// Slots the caller currently holds or has paid for.
pub async fn my_slots(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let slots = state.slot_store.list_held_by_user(&user_id, Utc::now()).await?;
    Ok(Json(slots))
}

pub async fn my_members(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    let members = state.slot_store.list_members_by_user(&user_id).await?;
    Ok(Json(members))
}
