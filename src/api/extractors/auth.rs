use axum::{
    extract::{FromRequestParts, FromRef},
    http::{header, request::Parts, StatusCode},
};
use crate::state::AppState;
use std::sync::Arc;
use jsonwebtoken::{decode, Validation, Algorithm};
use serde::{Deserialize, Serialize};
use tracing::{Span, warn};

pub const AUDIENCE: &str = "membership-frontend";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub iss: String,
    pub exp: usize,
}

/// Verified caller id taken from the `sub` claim of the bearer token.
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Arc<AppState>: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts.headers.get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let app_state = <Arc<AppState> as FromRef<S>>::from_ref(state);

        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.set_audience(&[AUDIENCE]);
        validation.set_issuer(&[app_state.config.auth_issuer.as_str()]);

        let token_data = decode::<Claims>(token, &app_state.jwt_decoding_key, &validation)
            .map_err(|e| {
                warn!("Rejected bearer token: {}", e);
                StatusCode::UNAUTHORIZED
            })?;

        Span::current().record("user_id", token_data.claims.sub.as_str());

        Ok(AuthUser(token_data.claims.sub))
    }
}
