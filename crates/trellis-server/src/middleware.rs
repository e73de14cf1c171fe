use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

use crate::{ApiError, AppState};

/// Checks `Authorization: Bearer <token>` against the configured admin token.
///
/// An empty configured token refuses every caller.
pub fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<(), ApiError> {
    if state.admin_token.is_empty() {
        return Err(ApiError::Unauthorized(
            "admin access is disabled on this node".to_string(),
        ));
    }

    let token = headers
        .get("Authorization")
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    if token != state.admin_token {
        return Err(ApiError::Unauthorized("invalid admin token".to_string()));
    }
    Ok(())
}

/// Middleware guarding operator routes.
pub async fn admin_middleware(req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or_else(|| ApiError::InternalServerError("application state missing".to_string()))?
        .clone();

    require_admin(req.headers(), &state)?;

    Ok(next.run(req).await)
}
