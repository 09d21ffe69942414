use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Already a member: {0}")]
    AlreadyMember(String),
    #[error("Slot has already been paid")]
    AlreadyPaid,
    #[error("Signup is closed for this product")]
    SignupClosed,
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("Payment provider error: {0}")]
    PaymentProvider(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Internal server error: {0}")]
    InternalWithMsg(String),
}

impl AppError {
    /// True when the datastore itself failed, as opposed to a business rule.
    pub fn is_datastore_failure(&self) -> bool {
        matches!(self, AppError::Database(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                if let Some(db_err) = e.as_database_error() {
                    let code = db_err.code().unwrap_or_default();

                    // 2067 = SQLite Unique Constraint
                    // 23505 = PostgreSQL Unique Violation
                    if code == "2067" || code == "23505" {
                        return (
                            StatusCode::CONFLICT,
                            Json(json!({ "error": "Resource already exists (duplicate entry)" }))
                        ).into_response();
                    }
                }

                error!("Database error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::AlreadyMember(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::AlreadyPaid => (StatusCode::BAD_REQUEST, "You have already paid this".to_string()),
            AppError::SignupClosed => (StatusCode::UNPROCESSABLE_ENTITY, "Signup deadline has passed".to_string()),
            AppError::InvalidSignature(msg) => (StatusCode::BAD_REQUEST, format!("Invalid signature: {}", msg)),
            AppError::PaymentProvider(msg) => {
                error!("Payment provider error: {}", msg);
                (StatusCode::BAD_GATEWAY, "Payment provider unavailable".to_string())
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
            AppError::InternalWithMsg(msg) => {
                error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
