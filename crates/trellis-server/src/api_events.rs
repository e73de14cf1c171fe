//! Peer event ingress and SSE stream handlers.

use crate::{ApiError, AppState};
use axum::{
    extract::Extension,
    response::{sse::Event, Sse},
    Json,
};
use futures_util::Stream;
use serde_json::{json, Value};
use std::{convert::Infallible, sync::Arc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use trellis_types::PeerEvent;

/// Handler for `POST /api/events/publish`.
///
/// Target of the remote pushes peers send when their view of this node
/// changes. The event is rebroadcast to local subscribers.
pub async fn publish_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(event): Json<PeerEvent>,
) -> Result<Json<Value>, ApiError> {
    state.federation.ingest_remote_event(event)?;
    Ok(Json(json!({ "success": true })))
}

/// Handler for `GET /events/peers`.
///
/// Streams every local peer event: registrations, approvals, action changes
/// and deletions, plus events pushed by peers.
pub async fn get_peer_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.federation.subscribe();
    let stream = BroadcastStream::new(rx);

    let mapped_stream = stream.filter_map(|result| match result {
        Ok(event) => match serde_json::to_string(&event) {
            Ok(data) => Some(Ok(Event::default().event(event.topic.clone()).data(data))),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize peer event");
                None
            }
        },
        Err(broadcast_error) => {
            tracing::warn!(
                error = %broadcast_error,
                "peer SSE stream lagged; events were dropped for this subscriber"
            );
            None
        }
    });

    Sse::new(mapped_stream).keep_alive(axum::response::sse::KeepAlive::default())
}
