//! Peer federation handlers.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Extension, Path, Query},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    BoxError, Json,
};
use serde::{Deserialize, Serialize};
use trellis_federation::directory::{FindOptions, PeerFilter};
use trellis_federation::{
    ApprovalStateResponse, Federation, FederationError, PublicKeyResponse, RegisterPeerRequest,
    RegisterPeerResponse, RetractPeerRequest, PEER_BATCH_SIZE,
};
use trellis_types::{ApprovalState, Peer, PeerDescriptor};

use crate::middleware::require_admin;
use crate::{ApiError, AppState};

/// Body of the single-peer operator routes (accept, reject, delete, update).
#[derive(Debug, Deserialize)]
pub struct PeerRequest {
    pub peer: PeerDescriptor,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerResponse {
    pub success: bool,
    pub peer: Peer,
}

#[derive(Debug, Deserialize)]
pub struct AddPeerActionsRequest {
    pub mac: String,
    pub actions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemovePeerActionRequest {
    pub mac: String,
    pub action: String,
}

#[derive(Debug, Deserialize)]
pub struct RemovePeersActionRequest {
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemovePeersActionResponse {
    pub success: bool,
    /// Hardware addresses of the peers that lost the action.
    pub peers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetractPeerResponse {
    pub success: bool,
    pub removed: bool,
}

/// One line of the `GET /api/peers` stream.
#[derive(Debug, Serialize, Deserialize)]
pub struct PeerBatch {
    pub peers: Vec<Peer>,
}

/// Query parameters for `GET /api/peers`.
#[derive(Debug, Default, Deserialize)]
pub struct GetPeersQuery {
    pub state: Option<ApprovalState>,
    pub domain: Option<String>,
    pub hostname: Option<String>,
    pub mac: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteQuery {
    pub remote: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PeerActionQuery {
    pub mac: String,
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerActionResponse {
    pub mac: String,
    pub action: String,
    pub allowed: bool,
}

fn peer_mac(request: &PeerRequest) -> Result<&str, ApiError> {
    let mac = request.peer.mac.trim();
    if mac.is_empty() {
        return Err(ApiError::BadRequest("peer.mac is required".to_string()));
    }
    Ok(mac)
}

/// Handler for `POST /api/peers/register`.
///
/// A descriptor with a hardware address is a remote node registering with
/// this one. Without one, an operator asks this node to join the node the
/// descriptor points at, which requires the admin token.
pub async fn register_peer_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<RegisterPeerRequest>,
) -> Result<Json<RegisterPeerResponse>, ApiError> {
    if payload.peer.mac.trim().is_empty() {
        require_admin(&headers, &state)?;
    }
    let response = state.federation.register_peer(payload).await?;
    Ok(Json(response))
}

/// Handler for `POST /api/peers/accept`.
pub async fn accept_peer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<PeerRequest>,
) -> Result<Json<PeerResponse>, ApiError> {
    let peer = state.federation.accept_peer(peer_mac(&payload)?).await?;
    Ok(Json(PeerResponse {
        success: true,
        peer,
    }))
}

/// Handler for `POST /api/peers/reject`.
pub async fn reject_peer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<PeerRequest>,
) -> Result<Json<PeerResponse>, ApiError> {
    let peer = state.federation.reject_peer(peer_mac(&payload)?).await?;
    Ok(Json(PeerResponse {
        success: true,
        peer,
    }))
}

/// Handler for `POST /api/peers/delete`.
///
/// Success means local cleanup is done; the remote side is asked to forget
/// this node in the background.
pub async fn delete_peer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<PeerRequest>,
) -> Result<Json<PeerResponse>, ApiError> {
    let peer = state.federation.delete_peer(peer_mac(&payload)?).await?;
    Ok(Json(PeerResponse {
        success: true,
        peer,
    }))
}

/// Handler for `POST /api/peers/update`.
pub async fn update_peer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<PeerRequest>,
) -> Result<Json<PeerResponse>, ApiError> {
    peer_mac(&payload)?;
    let peer = state.federation.update_peer(payload.peer).await?;
    Ok(Json(PeerResponse {
        success: true,
        peer,
    }))
}

/// Handler for `POST /api/peers/actions`.
pub async fn add_peer_actions_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<AddPeerActionsRequest>,
) -> Result<Json<PeerResponse>, ApiError> {
    let peer = state
        .federation
        .add_peer_actions(&payload.mac, payload.actions)
        .await?;
    Ok(Json(PeerResponse {
        success: true,
        peer,
    }))
}

/// Handler for `POST /api/peers/actions/remove`.
pub async fn remove_peer_action_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RemovePeerActionRequest>,
) -> Result<Json<PeerResponse>, ApiError> {
    let peer = state
        .federation
        .remove_peer_action(&payload.mac, &payload.action)
        .await?;
    Ok(Json(PeerResponse {
        success: true,
        peer,
    }))
}

/// Handler for `POST /api/peers/actions/remove-all`.
pub async fn remove_peers_action_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RemovePeersActionRequest>,
) -> Result<Json<RemovePeersActionResponse>, ApiError> {
    if payload.action.trim().is_empty() {
        return Err(ApiError::BadRequest("action is required".to_string()));
    }
    let peers = state.federation.remove_peers_action(&payload.action).await?;
    Ok(Json(RemovePeersActionResponse {
        success: true,
        peers,
    }))
}

/// Cursor over the directory, one `GetPeers` page per step.
struct PeerPages {
    federation: Federation,
    filter: PeerFilter,
    offset: i64,
    /// Peers still owed to the caller when a `limit` was given.
    remaining: Option<i64>,
    exhausted: bool,
}

impl PeerPages {
    async fn next_page(&mut self) -> Result<Option<Vec<Peer>>, FederationError> {
        let limit = match self.remaining {
            Some(remaining) => remaining.min(PEER_BATCH_SIZE as i64),
            None => PEER_BATCH_SIZE as i64,
        };
        if self.exhausted || limit <= 0 {
            return Ok(None);
        }

        let options = FindOptions {
            limit: Some(limit),
            offset: Some(self.offset),
        };
        let page = self.federation.get_peers(self.filter.clone(), options).await;
        let peers = match page {
            Ok(peers) => peers,
            Err(e) => {
                self.exhausted = true;
                return Err(e);
            }
        };

        let fetched = peers.len() as i64;
        self.offset += fetched;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= fetched;
        }
        if fetched < limit {
            self.exhausted = true;
        }
        Ok((!peers.is_empty()).then_some(peers))
    }
}

fn batch_line(peers: Vec<Peer>) -> Result<String, BoxError> {
    let mut line = serde_json::to_string(&PeerBatch { peers })?;
    line.push('\n');
    Ok(line)
}

/// Handler for `GET /api/peers`.
///
/// Streams newline-delimited JSON, one `{"peers": [...]}` batch per line,
/// reading the directory a page at a time. This node's own record is never
/// included.
pub async fn get_peers_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<GetPeersQuery>,
) -> Result<Response, ApiError> {
    let mut pages = PeerPages {
        federation: state.federation.clone(),
        filter: PeerFilter {
            state: query.state,
            domain: query.domain,
            hostname: query.hostname,
            mac: query.mac,
            ..Default::default()
        },
        offset: query.offset.unwrap_or(0).max(0),
        remaining: query.limit.filter(|limit| *limit >= 0),
        exhausted: false,
    };

    // The first page is read before responding so a failing directory still
    // maps to an error status.
    let first = pages.next_page().await?;

    let stream = futures_util::stream::unfold((pages, first), |(mut pages, pending)| async move {
        let page = match pending {
            Some(peers) => Ok(Some(peers)),
            None => pages.next_page().await,
        };
        match page {
            Ok(Some(peers)) => Some((batch_line(peers), (pages, None))),
            Ok(None) => None,
            Err(e) => {
                tracing::error!(error = %e, "peer stream aborted");
                Some((Err(BoxError::from(e)), (pages, None)))
            }
        }
    });

    let body = Body::from_stream(stream);
    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}

/// Operator check for `?remote=`: forwarding makes this node call out.
fn require_admin_for_remote(
    query: &RemoteQuery,
    headers: &HeaderMap,
    state: &AppState,
) -> Result<(), ApiError> {
    match query.remote.as_deref() {
        Some(remote) if !remote.trim().is_empty() => require_admin(headers, state),
        _ => Ok(()),
    }
}

/// Handler for `GET /api/peers/{mac}/state`.
///
/// Public for local answers; forwarding with `?remote=` needs the admin token.
pub async fn get_approval_state_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(mac): Path<String>,
    Query(query): Query<RemoteQuery>,
) -> Result<Json<ApprovalStateResponse>, ApiError> {
    require_admin_for_remote(&query, &headers, &state)?;
    let response = state
        .federation
        .approval_state(&mac, query.remote.as_deref())
        .await?;
    Ok(Json(response))
}

/// Handler for `GET /api/peers/{mac}/public-key`.
///
/// Public for local answers; forwarding with `?remote=` needs the admin token.
pub async fn get_public_key_handler(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Path(mac): Path<String>,
    Query(query): Query<RemoteQuery>,
) -> Result<Json<PublicKeyResponse>, ApiError> {
    require_admin_for_remote(&query, &headers, &state)?;
    let response = state
        .federation
        .public_key(&mac, query.remote.as_deref())
        .await?;
    Ok(Json(response))
}

/// Handler for `GET /api/peers/self`.
pub async fn get_local_peer_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<PeerDescriptor> {
    Json(state.federation.local_peer())
}

/// Handler for `POST /api/peers/retract`.
///
/// Authenticated by the caller's signature rather than the admin token.
pub async fn retract_peer_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<RetractPeerRequest>,
) -> Result<Json<RetractPeerResponse>, ApiError> {
    let removed = state.federation.retract_peer(payload).await?;
    Ok(Json(RetractPeerResponse {
        success: true,
        removed,
    }))
}

/// Handler for `GET /api/authz/peer-action`.
pub async fn peer_may_invoke_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<PeerActionQuery>,
) -> Result<Json<PeerActionResponse>, ApiError> {
    let allowed = state
        .federation
        .peer_may_invoke(&query.mac, &query.action)
        .await?;
    Ok(Json(PeerActionResponse {
        mac: query.mac,
        action: query.action,
        allowed,
    }))
}
