//! HTTP client for the federation surface of remote nodes, plus the wire
//! types both sides exchange.

use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use reqwest::Url;
use trellis_types::{ApprovalState, PeerDescriptor, PeerEvent};

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("remote returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid remote response: {0}")]
    InvalidResponse(String),

    #[error("invalid remote address: {0}")]
    InvalidAddress(String),
}

/// Body of `POST /api/peers/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPeerRequest {
    pub peer: PeerDescriptor,
    /// Hex Ed25519 key of the registering node. Absent on operator requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

/// Response to a registration: the responder's own descriptor and key, and
/// the requester's approval state as recorded by the responder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPeerResponse {
    pub peer: PeerDescriptor,
    pub public_key: String,
    pub approval_state: ApprovalState,
}

/// Body of `POST /api/peers/retract`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetractPeerRequest {
    pub mac: String,
    pub issued_at: i64,
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalStateResponse {
    pub mac: String,
    pub state: ApprovalState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    pub mac: String,
    pub public_key: String,
    pub fingerprint: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Client for calls against a peer's base address.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
}

impl RemoteClient {
    pub fn new(timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { http })
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|b| b.error)
                .unwrap_or(text);
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(e.to_string()))
    }

    /// Appends `segments` to the base `address`, percent-encoding each one.
    fn endpoint(address: &str, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(address)
            .map_err(|e| RemoteError::InvalidAddress(format!("{address}: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| RemoteError::InvalidAddress(address.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Registers this node with the node at `address`.
    pub async fn register(
        &self,
        address: &str,
        request: &RegisterPeerRequest,
    ) -> Result<RegisterPeerResponse, RemoteError> {
        let response = self
            .http
            .post(Self::endpoint(address, &["api", "peers", "register"])?)
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Asks the node at `address` to drop its record of this node.
    pub async fn retract(
        &self,
        address: &str,
        request: &RetractPeerRequest,
    ) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(Self::endpoint(address, &["api", "peers", "retract"])?)
            .json(request)
            .send()
            .await?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }

    /// Reads the approval state the node at `address` holds for `mac`.
    pub async fn approval_state(
        &self,
        address: &str,
        mac: &str,
    ) -> Result<ApprovalStateResponse, RemoteError> {
        let response = self
            .http
            .get(Self::endpoint(address, &["api", "peers", mac, "state"])?)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Reads the public key the node at `address` holds for `mac`.
    pub async fn public_key(
        &self,
        address: &str,
        mac: &str,
    ) -> Result<PublicKeyResponse, RemoteError> {
        let response = self
            .http
            .get(Self::endpoint(address, &["api", "peers", mac, "public-key"])?)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Delivers an event to the node at `address`.
    pub async fn publish_event(&self, address: &str, event: &PeerEvent) -> Result<(), RemoteError> {
        let response = self
            .http
            .post(Self::endpoint(address, &["api", "events", "publish"])?)
            .json(event)
            .send()
            .await?;
        let _: serde_json::Value = Self::decode(response).await?;
        Ok(())
    }
}
