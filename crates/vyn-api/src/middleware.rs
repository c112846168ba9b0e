use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::Deserialize;
use tracing::debug;

use vyn_types::api::Claims;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Validate the bearer token and attach its `Claims` to the request.
/// Browsers cannot set headers on a WebSocket upgrade, so `?token=` is accepted too.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&req).ok_or(ApiError::Unauthorized)?;

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        debug!("Rejected token: {}", e);
        ApiError::Unauthorized
    })?;

    req.extensions_mut().insert(token_data.claims);
    Ok(next.run(req).await)
}

fn bearer_token(req: &Request) -> Option<String> {
    if let Some(auth) = req.headers().typed_get::<Authorization<Bearer>>() {
        return Some(auth.token().to_string());
    }

    let Query(query) = Query::<TokenQuery>::try_from_uri(req.uri()).ok()?;
    let token = query.token?;
    let token = token.strip_prefix("Bearer ").unwrap_or(&token);
    (!token.is_empty()).then(|| token.to_string())
}
