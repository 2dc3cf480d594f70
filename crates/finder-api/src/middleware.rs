use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use finder_types::api::Claims;

use crate::AppState;
use crate::auth::verify_token;
use crate::error::ApiError;

/// Identity attached by [`optional_auth`]. `None` for anonymous callers.
#[derive(Debug, Clone)]
pub struct Viewer(pub Option<Claims>);

/// Extract and validate the bearer token; rejects the request without one.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())?.ok_or(ApiError::Unauthorized)?;
    let claims = verify_token(&state.jwt_secret, token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Like [`require_auth`] but lets anonymous requests through as
/// `Viewer(None)`. A token that is present must still verify.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let viewer = match bearer_token(req.headers())? {
        Some(token) => Viewer(Some(verify_token(&state.jwt_secret, token)?)),
        None => Viewer(None),
    };

    req.extensions_mut().insert(viewer);
    Ok(next.run(req).await)
}

/// `Ok(None)` when no Authorization header is sent, an error when one is
/// sent but is not a bearer credential.
fn bearer_token(headers: &HeaderMap) -> Result<Option<&str>, ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(Some)
        .ok_or(ApiError::Unauthorized)
}
