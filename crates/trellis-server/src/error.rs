//! Mapping of federation errors onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use trellis_federation::directory::DirectoryError;
use trellis_federation::keys::KeyStoreError;
use trellis_federation::FederationError;

/// Errors returned by handlers. The body is always `{"error": "<message>"}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("remote node error: {0}")]
    BadGateway(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<FederationError> for ApiError {
    fn from(err: FederationError) -> Self {
        let message = err.to_string();
        match err {
            FederationError::Validation(_) | FederationError::SelfRegistration => {
                ApiError::BadRequest(message)
            }
            FederationError::KeyStore(KeyStoreError::InvalidKey(_))
            | FederationError::KeyStore(KeyStoreError::InvalidMac(_)) => {
                ApiError::BadRequest(message)
            }
            FederationError::InvalidSignature(_) => ApiError::Unauthorized(message),
            FederationError::PeerRejected(_) => ApiError::Forbidden(message),
            FederationError::PeerNotFound(_) | FederationError::ActionNotGranted { .. } => {
                ApiError::NotFound(message)
            }
            FederationError::InvalidTransition { .. }
            | FederationError::Directory(DirectoryError::Conflict(_)) => {
                ApiError::Conflict(message)
            }
            FederationError::Remote(_) => ApiError::BadGateway(message),
            _ => {
                tracing::error!(error = %message, "federation operation failed");
                ApiError::InternalServerError(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_types::ApprovalState;

    fn status_of(err: FederationError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn federation_errors_map_to_status_codes() {
        assert_eq!(
            status_of(FederationError::SelfRegistration),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(FederationError::PeerNotFound("aa".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(FederationError::PeerRejected("aa".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(FederationError::InvalidTransition {
                mac: "aa".into(),
                from: ApprovalState::Rejected,
                to: ApprovalState::Accepted,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(FederationError::InvalidSignature("x".into())),
            StatusCode::UNAUTHORIZED
        );
    }
}
