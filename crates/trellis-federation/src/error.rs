//! Error types for the federation layer.

use thiserror::Error;
use trellis_types::ApprovalState;

use crate::directory::DirectoryError;
use crate::keys::KeyStoreError;
use crate::remote::RemoteError;

/// Errors surfaced by federation operations.
///
/// Remote propagation failures during notification or retraction never reach
/// this type; they are logged where they happen.
#[derive(Debug, Error)]
pub enum FederationError {
    /// The request is malformed or incomplete. Nothing was mutated.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A node attempted to federate with itself.
    #[error("can not register peer to itself")]
    SelfRegistration,

    #[error("no peer with mac {0} was found")]
    PeerNotFound(String),

    /// The peer was rejected by an operator and may not re-register.
    #[error("peer {0} has been rejected")]
    PeerRejected(String),

    #[error("peer {mac} can not move from {from} to {to}")]
    InvalidTransition {
        mac: String,
        from: ApprovalState,
        to: ApprovalState,
    },

    #[error("peer {mac} does not contain action {action}")]
    ActionNotGranted { mac: String, action: String },

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("peer directory error: {0}")]
    Directory(#[from] DirectoryError),

    #[error("authorization store error: {0}")]
    Authorization(#[from] rusqlite::Error),

    #[error("key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    /// A remote call whose result the operation depends on failed.
    #[error("remote node error: {0}")]
    Remote(#[from] RemoteError),

    #[error("database pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
