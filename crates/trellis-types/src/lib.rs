//! Shared types and constants for the Trellis platform.
//!
//! This crate provides the typed peer model used by every other crate in the
//! workspace: the peer descriptor exchanged during federation, the stored
//! peer record with its approval state and delegated actions, identity
//! derivation from a hardware address, and the event topic names published
//! when peers change.
//!
//! No crate in the workspace depends on anything *except* `trellis-types` for
//! cross-cutting type definitions.

mod actions;
mod peer;

pub use actions::ActionSet;
pub use peer::{is_valid_host_name, normalize_mac, peer_id, Peer, PeerDescriptor};

use serde::{Deserialize, Serialize};

/// Default plain-text port used when a descriptor carries none.
pub const DEFAULT_PORT_HTTP: u16 = 80;

/// Default secure port used when a descriptor carries none.
pub const DEFAULT_PORT_HTTPS: u16 = 443;

/// Delegated actions granted to a peer once it is trusted.
///
/// Only name-system record mutation primitives: a peer may manage the records
/// of the domain it owns and nothing else.
pub const NAME_SYSTEM_ACTIONS: &[&str] = &[
    "/dns.DnsService/SetA",
    "/dns.DnsService/SetAAAA",
    "/dns.DnsService/SetCAA",
    "/dns.DnsService/SetText",
    "/dns.DnsService/RemoveText",
];

/// Topic published whenever the peer list changes.
pub const UPDATE_PEERS_EVT: &str = "update_peers_evt";

/// Topic published whenever a peer is deleted. The payload is the peer's mac.
pub const DELETE_PEER_EVT: &str = "delete_peer_evt";

/// Topic published when a single peer's record changes.
pub fn peer_updated_topic(mac: &str) -> String {
    format!("update_peer_{mac}_evt")
}

/// Topic published when a single peer is deleted.
pub fn peer_deleted_topic(mac: &str) -> String {
    format!("delete_peer{mac}_evt")
}

/// Trust lifecycle stage of a peer record.
///
/// The state only governs this node's trust of the peer. The remote node
/// keeps its own, independent state for its mirror of this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalState {
    /// Registered by the remote side, awaiting an operator decision.
    #[default]
    Pending,
    /// Trusted; delegated actions may be exercised.
    Accepted,
    /// Refused. Terminal until the record is deleted.
    Rejected,
}

impl ApprovalState {
    /// Returns the canonical string label for this state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Accepted => "ACCEPTED",
            Self::Rejected => "REJECTED",
        }
    }
}

impl std::fmt::Display for ApprovalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalState {
    type Err = ParseApprovalStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "ACCEPTED" => Ok(Self::Accepted),
            "REJECTED" => Ok(Self::Rejected),
            _ => Err(ParseApprovalStateError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown approval state string.
#[derive(Debug, Clone)]
pub struct ParseApprovalStateError(pub String);

impl std::fmt::Display for ParseApprovalStateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown approval state: {}", self.0)
    }
}

impl std::error::Error for ParseApprovalStateError {}

/// Transport used for outbound calls to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// An event describing a change to the peer set.
///
/// Published on the local event bus and pushed to the affected peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEvent {
    pub topic: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl PeerEvent {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}
