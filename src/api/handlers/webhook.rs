use axum::{extract::State, response::IntoResponse, Json};
use crate::state::AppState;
use crate::api::dtos::responses::WebhookAck;
use crate::api::extractors::signature::VerifiedWebhook;
use crate::domain::models::payment::WebhookOutcome;
use crate::error::AppError;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Every verified delivery is acknowledged unless the datastore is down, in
/// which case the provider is told to redeliver.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    VerifiedWebhook(event): VerifiedWebhook,
) -> Result<impl IntoResponse, AppError> {
    let Some(event) = event else {
        return Ok(Json(WebhookAck { received: true }));
    };

    info!("payment_webhook: event {} type {} payment {}", event.id, event.event_type, event.data.object.id);

    match state.payments.handle_event(&event).await {
        Ok(WebhookOutcome::Applied) => info!("payment_webhook: event {} applied", event.id),
        Ok(WebhookOutcome::Ignored(reason)) => info!("payment_webhook: event {} ignored ({:?})", event.id, reason),
        Err(e) if e.is_datastore_failure() => {
            error!("payment_webhook: datastore failure on event {}: {:?}", event.id, e);
            return Err(AppError::InternalWithMsg(format!("datastore failure on event {}", event.id)));
        }
        Err(e) => warn!("payment_webhook: event {} not applied: {}", event.id, e),
    }

    Ok(Json(WebhookAck { received: true }))
}
