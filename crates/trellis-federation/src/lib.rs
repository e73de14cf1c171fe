//! Peer federation and trust establishment for Trellis nodes.
//!
//! Two autonomous nodes discover each other, exchange Ed25519 public keys,
//! reach approval, scope each other's delegated authority to an explicit
//! action allowlist, and later revoke that trust. There is no central
//! coordinator: each side keeps its own independently managed mirror record
//! of the other, and cross-site steps are best effort.
//!
//! [`Federation`] is the entry point; the other modules are its
//! collaborators and are public for the server crate and for tests.

pub mod authz;
pub mod directory;
mod error;
pub mod handshake;
pub mod hosts;
pub mod keys;
pub mod notifier;
pub mod presence;
pub mod remote;
pub mod retraction;

pub use error::FederationError;
pub use handshake::{
    Federation, FederationSettings, RejectedReregistration, PEER_BATCH_SIZE,
};
pub use presence::{LocalPresence, NodeSettings};
pub use remote::{
    ApprovalStateResponse, PublicKeyResponse, RegisterPeerRequest, RegisterPeerResponse,
    RemoteClient, RemoteError, RetractPeerRequest,
};
