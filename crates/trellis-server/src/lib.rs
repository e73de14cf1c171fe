//! Trellis server library logic: the HTTP surface of the federation core.

pub mod api_events;
pub mod api_peers;
pub mod config;
pub mod error;
pub mod middleware;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use trellis_federation::Federation;

pub use error::ApiError;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The federation service.
    pub federation: Federation,
    /// Bearer token required on admin routes. Empty disables them.
    pub admin_token: String,
}

/// Maximum request body size (256 KiB). Federation payloads are small.
const MAX_REQUEST_BODY_BYTES: usize = 256 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route("/api/peers", get(api_peers::get_peers_handler))
        .route("/api/peers/accept", post(api_peers::accept_peer_handler))
        .route("/api/peers/reject", post(api_peers::reject_peer_handler))
        .route("/api/peers/delete", post(api_peers::delete_peer_handler))
        .route("/api/peers/update", post(api_peers::update_peer_handler))
        .route(
            "/api/peers/actions",
            post(api_peers::add_peer_actions_handler),
        )
        .route(
            "/api/peers/actions/remove",
            post(api_peers::remove_peer_action_handler),
        )
        .route(
            "/api/peers/actions/remove-all",
            post(api_peers::remove_peers_action_handler),
        )
        .route(
            "/api/authz/peer-action",
            get(api_peers::peer_may_invoke_handler),
        )
        .layer(axum::middleware::from_fn(middleware::admin_middleware));

    Router::new()
        .route("/health", get(health))
        // Inbound registration is public; outbound joins check the token
        // inside the handler.
        .route(
            "/api/peers/register",
            post(api_peers::register_peer_handler),
        )
        .route("/api/peers/self", get(api_peers::get_local_peer_handler))
        .route(
            "/api/peers/{mac}/state",
            get(api_peers::get_approval_state_handler),
        )
        .route(
            "/api/peers/{mac}/public-key",
            get(api_peers::get_public_key_handler),
        )
        .route("/api/peers/retract", post(api_peers::retract_peer_handler))
        .route(
            "/api/events/publish",
            post(api_events::publish_event_handler),
        )
        .route("/events/peers", get(api_events::get_peer_stream_handler))
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
