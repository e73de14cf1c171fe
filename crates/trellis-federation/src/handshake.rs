//! Handshake protocol: registration, approval, delegation and retraction.
//!
//! Every operation commits its local changes first and only then notifies
//! remote parties. Remote pushes run detached with a bounded timeout; their
//! failure is logged and never undoes or fails the local change.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Deserialize;
use tokio::sync::broadcast;
use trellis_db::DbPool;
use trellis_types::{
    normalize_mac, peer_deleted_topic, peer_updated_topic, ApprovalState, Peer, PeerDescriptor,
    PeerEvent, DELETE_PEER_EVT, NAME_SYSTEM_ACTIONS, UPDATE_PEERS_EVT,
};

use crate::authz;
use crate::directory::{self, DirectoryError, FindOptions, PeerFilter};
use crate::error::FederationError;
use crate::hosts::HostsFile;
use crate::keys::{fingerprint, parse_public_key, KeyStore};
use crate::notifier::Notifier;
use crate::presence::LocalPresence;
use crate::remote::{
    ApprovalStateResponse, PublicKeyResponse, RegisterPeerRequest, RegisterPeerResponse,
    RemoteClient, RetractPeerRequest,
};
use crate::retraction::{sign_retraction, verify_retraction};

/// Maximum number of peers per `GetPeers` batch.
pub const PEER_BATCH_SIZE: usize = 100;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What an inbound registration from a rejected peer gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectedReregistration {
    /// Answer with the existing `REJECTED` record.
    #[default]
    Report,
    /// Fail the registration with `PeerRejected`.
    Deny,
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from("data/keys")
}

fn default_hosts_file() -> PathBuf {
    PathBuf::from("/etc/hosts")
}

fn default_remote_timeout_secs() -> u64 {
    5
}

/// `[federation]` configuration section.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FederationSettings {
    #[serde(default = "default_keys_dir")]
    pub keys_dir: PathBuf,
    #[serde(default = "default_hosts_file")]
    pub hosts_file: PathBuf,
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    #[serde(default)]
    pub rejected_reregistration: RejectedReregistration,
}

impl Default for FederationSettings {
    fn default() -> Self {
        Self {
            keys_dir: default_keys_dir(),
            hosts_file: default_hosts_file(),
            remote_timeout_secs: default_remote_timeout_secs(),
            rejected_reregistration: RejectedReregistration::default(),
        }
    }
}

/// The federation service. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Federation {
    pool: DbPool,
    keys: Arc<KeyStore>,
    hosts: Arc<HostsFile>,
    presence: Arc<LocalPresence>,
    notifier: Notifier,
    client: RemoteClient,
    rejected_reregistration: RejectedReregistration,
}

/// Outcome of the blocking half of an inbound registration.
struct InboundOutcome {
    peer: Peer,
    created: bool,
}

impl Federation {
    /// Builds the service, opening the key store and creating the local
    /// signing key if none exists yet.
    pub fn new(
        pool: DbPool,
        presence: LocalPresence,
        settings: &FederationSettings,
    ) -> Result<Self, FederationError> {
        if presence.mac().is_empty() {
            return Err(FederationError::Validation(
                "local hardware address is not configured".to_string(),
            ));
        }

        let keys = KeyStore::open(&settings.keys_dir)?;
        keys.local_signing_key()?;

        let client = RemoteClient::new(Duration::from_secs(settings.remote_timeout_secs))?;
        let notifier = Notifier::new(client.clone(), EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            pool,
            keys: Arc::new(keys),
            hosts: Arc::new(HostsFile::new(&settings.hosts_file)),
            presence: Arc::new(presence),
            notifier,
            client,
            rejected_reregistration: settings.rejected_reregistration,
        })
    }

    /// Runs `f` with a pooled connection on the blocking thread pool.
    async fn run_blocking<T, F>(&self, f: F) -> Result<T, FederationError>
    where
        T: Send + 'static,
        F: FnOnce(&Federation, &Connection) -> Result<T, FederationError> + Send + 'static,
    {
        let this = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = this.pool.get()?;
            f(&this, &conn)
        })
        .await?
    }

    pub fn local_peer(&self) -> PeerDescriptor {
        self.presence.describe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.notifier.subscribe()
    }

    fn mirror_best_effort(&self, peer: &PeerDescriptor) {
        if let Err(e) = self.hosts.mirror(&self.presence.describe(), peer) {
            tracing::warn!(mac = %peer.mac, error = %e, "failed to mirror peer into hosts file");
        }
    }

    fn unmirror_best_effort(&self, peer: &PeerDescriptor) {
        if let Err(e) = self.hosts.unmirror(&self.presence.describe(), peer) {
            tracing::warn!(mac = %peer.mac, error = %e, "failed to remove peer from hosts file");
        }
    }

    /// Publishes a "peer changed" event locally and to the peer itself.
    fn notify_updated(&self, peer: &Peer) {
        let payload = serde_json::to_value(peer).unwrap_or_default();
        let topic = peer_updated_topic(peer.mac());
        self.notifier
            .publish_local(PeerEvent::new(UPDATE_PEERS_EVT, payload.clone()));
        self.notifier
            .publish_local(PeerEvent::new(topic.clone(), payload.clone()));
        self.notifier
            .publish_remote(peer.descriptor.address(), PeerEvent::new(topic, payload));
    }

    fn notify_deleted(&self, peer: &Peer) {
        let payload = serde_json::Value::String(peer.mac().to_string());
        let topic = peer_deleted_topic(peer.mac());
        self.notifier
            .publish_local(PeerEvent::new(DELETE_PEER_EVT, payload.clone()));
        self.notifier
            .publish_local(PeerEvent::new(topic.clone(), payload.clone()));
        self.notifier
            .publish_remote(peer.descriptor.address(), PeerEvent::new(topic, payload));
    }

    fn require_peer(conn: &Connection, mac: &str) -> Result<Peer, FederationError> {
        directory::find_peer_by_mac(conn, mac)?
            .ok_or_else(|| FederationError::PeerNotFound(normalize_mac(mac)))
    }

    /// `RegisterPeer`: inbound when the descriptor carries a hardware
    /// address, an operator-initiated outbound join otherwise.
    pub async fn register_peer(
        &self,
        request: RegisterPeerRequest,
    ) -> Result<RegisterPeerResponse, FederationError> {
        if request.peer.mac.trim().is_empty() {
            self.join_remote(request.peer).await
        } else {
            self.register_inbound(request).await
        }
    }

    async fn register_inbound(
        &self,
        request: RegisterPeerRequest,
    ) -> Result<RegisterPeerResponse, FederationError> {
        let RegisterPeerRequest { mut peer, public_key } = request;
        peer.mac = normalize_mac(&peer.mac);

        if peer.local_ip_address.trim().is_empty() || peer.external_ip_address.trim().is_empty() {
            return Err(FederationError::Validation(
                "local and external ip addresses are required".to_string(),
            ));
        }
        peer.check_network_fields().map_err(FederationError::Validation)?;
        if self.presence.is_self(&peer.mac) {
            return Err(FederationError::SelfRegistration);
        }
        let public_key = public_key
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| FederationError::Validation("public key is required".to_string()))?;
        parse_public_key(&public_key).map_err(|e| FederationError::Validation(e.to_string()))?;

        let outcome = self
            .run_blocking(move |this, conn| this.record_inbound(conn, peer, &public_key))
            .await?;

        if outcome.created {
            tracing::info!(mac = %outcome.peer.mac(), "registered pending peer");
            self.notify_updated(&outcome.peer);
        } else {
            tracing::debug!(mac = %outcome.peer.mac(), state = %outcome.peer.state, "repeated registration");
        }

        if outcome.peer.state == ApprovalState::Rejected
            && self.rejected_reregistration == RejectedReregistration::Deny
        {
            return Err(FederationError::PeerRejected(outcome.peer.mac().to_string()));
        }

        let local_key = self.run_blocking(|this, _| Ok(this.keys.local_public_key()?)).await?;
        Ok(RegisterPeerResponse {
            peer: self.local_peer(),
            public_key: local_key,
            approval_state: outcome.peer.state,
        })
    }

    /// Persists a first contact: record, ownership grant and key together.
    ///
    /// The key is written inside the open transaction, so a key store
    /// failure leaves no record behind and a retry starts from scratch.
    fn record_inbound(
        &self,
        conn: &Connection,
        descriptor: PeerDescriptor,
        public_key: &str,
    ) -> Result<InboundOutcome, FederationError> {
        if let Some(existing) = directory::find_peer_by_mac(conn, &descriptor.mac)? {
            return Ok(InboundOutcome {
                peer: existing,
                created: false,
            });
        }

        let candidate = Peer::new(descriptor, ApprovalState::Pending);
        let tx = conn.unchecked_transaction().map_err(DirectoryError::from)?;
        let peer = match directory::insert_peer(&tx, &candidate) {
            Ok(peer) => peer,
            Err(DirectoryError::Conflict(mac)) => {
                // Lost a first-contact race; answer as a repeat.
                drop(tx);
                return Ok(InboundOutcome {
                    peer: Self::require_peer(conn, &mac)?,
                    created: false,
                });
            }
            Err(e) => {
                tracing::error!(mac = %candidate.mac(), error = %e, "failed to persist peer");
                return Err(e.into());
            }
        };

        authz::grant_domain_ownership(&tx, &peer.descriptor.qualified_name(), peer.mac())?;
        if let Err(e) = self.keys.put_peer_key(peer.mac(), public_key) {
            tracing::error!(mac = %peer.mac(), error = %e, "failed to store peer key, registration rolled back");
            return Err(e.into());
        }
        tx.commit().map_err(DirectoryError::from)?;

        self.mirror_best_effort(&peer.descriptor);
        Ok(InboundOutcome {
            peer,
            created: true,
        })
    }

    async fn join_remote(
        &self,
        target: PeerDescriptor,
    ) -> Result<RegisterPeerResponse, FederationError> {
        if target.hostname.trim().is_empty() && target.domain.trim().is_empty() {
            return Err(FederationError::Validation(
                "remote hostname or domain is required".to_string(),
            ));
        }

        let address = target.address();
        let local_key = self.run_blocking(|this, _| Ok(this.keys.local_public_key()?)).await?;

        tracing::info!(%address, "joining remote node");
        let response = self
            .client
            .register(
                &address,
                &RegisterPeerRequest {
                    peer: self.local_peer(),
                    public_key: Some(local_key),
                },
            )
            .await?;

        let remote_mac = normalize_mac(&response.peer.mac);
        if remote_mac.is_empty() {
            return Err(FederationError::Validation(
                "remote node did not report a hardware address".to_string(),
            ));
        }
        if self.presence.is_self(&remote_mac) {
            return Err(FederationError::SelfRegistration);
        }
        parse_public_key(&response.public_key)
            .map_err(|e| FederationError::Validation(format!("remote public key: {e}")))?;

        let mirror = PeerDescriptor {
            hostname: response.peer.hostname.clone(),
            domain: response.peer.domain.clone(),
            protocol: target.protocol,
            port_http: target.port_http,
            port_https: target.port_https,
            local_ip_address: response.peer.local_ip_address.clone(),
            external_ip_address: response.peer.external_ip_address.clone(),
            mac: remote_mac,
        };
        mirror
            .check_network_fields()
            .map_err(|e| FederationError::Validation(format!("remote descriptor: {e}")))?;
        let remote_key = response.public_key.clone();

        let peer = self
            .run_blocking(move |this, conn| this.record_outbound(conn, mirror, &remote_key))
            .await?;

        tracing::info!(mac = %peer.mac(), %address, "joined remote node");
        self.notify_updated(&peer);

        Ok(response)
    }

    fn record_outbound(
        &self,
        conn: &Connection,
        mirror: PeerDescriptor,
        public_key: &str,
    ) -> Result<Peer, FederationError> {
        // Immediate: the read below must not go stale before the write.
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
            .map_err(DirectoryError::from)?;
        let mut peer = match directory::find_peer_by_mac(&tx, &mirror.mac)? {
            None => directory::insert_peer(&tx, &Peer::new(mirror, ApprovalState::Accepted))?,
            Some(existing) if existing.state == ApprovalState::Rejected => {
                return Err(FederationError::PeerRejected(existing.mac().to_string()));
            }
            Some(existing) => {
                directory::update_descriptor(&tx, &existing.id, &mirror)?;
                if existing.state == ApprovalState::Pending {
                    directory::set_state(&tx, &existing.id, ApprovalState::Accepted)?;
                }
                Self::require_peer(&tx, existing.mac())?
            }
        };

        if peer.actions.union(NAME_SYSTEM_ACTIONS) {
            directory::set_actions(&tx, &peer.id, &peer.actions)?;
        }
        authz::grant_domain_ownership(&tx, &peer.descriptor.qualified_name(), peer.mac())?;
        self.keys.put_peer_key(peer.mac(), public_key)?;
        tx.commit().map_err(DirectoryError::from)?;

        self.mirror_best_effort(&peer.descriptor);
        Ok(peer)
    }

    /// `AcceptPeer`: trust a pending peer and grant it the name-system actions.
    pub async fn accept_peer(&self, mac: &str) -> Result<Peer, FederationError> {
        let mac = normalize_mac(mac);
        let peer = self
            .run_blocking(move |this, conn| {
                let mut peer = Self::require_peer(conn, &mac)?;
                match peer.state {
                    ApprovalState::Rejected => {
                        return Err(FederationError::InvalidTransition {
                            mac,
                            from: peer.state,
                            to: ApprovalState::Accepted,
                        });
                    }
                    ApprovalState::Pending => {
                        directory::set_state(conn, &peer.id, ApprovalState::Accepted)?;
                        peer.state = ApprovalState::Accepted;
                    }
                    ApprovalState::Accepted => {}
                }

                if peer.actions.union(NAME_SYSTEM_ACTIONS) {
                    directory::set_actions(conn, &peer.id, &peer.actions)?;
                }
                authz::grant_domain_ownership(conn, &peer.descriptor.qualified_name(), peer.mac())?;
                this.mirror_best_effort(&peer.descriptor);
                Ok(peer)
            })
            .await?;

        tracing::info!(mac = %peer.mac(), "accepted peer");
        self.notify_updated(&peer);
        Ok(peer)
    }

    /// `RejectPeer`: mark a pending peer as refused.
    pub async fn reject_peer(&self, mac: &str) -> Result<Peer, FederationError> {
        let mac = normalize_mac(mac);
        let peer = self
            .run_blocking(move |_, conn| {
                let mut peer = Self::require_peer(conn, &mac)?;
                match peer.state {
                    ApprovalState::Accepted => Err(FederationError::InvalidTransition {
                        mac,
                        from: peer.state,
                        to: ApprovalState::Rejected,
                    }),
                    ApprovalState::Pending => {
                        directory::set_state(conn, &peer.id, ApprovalState::Rejected)?;
                        peer.state = ApprovalState::Rejected;
                        Ok(peer)
                    }
                    ApprovalState::Rejected => Ok(peer),
                }
            })
            .await?;

        tracing::info!(mac = %peer.mac(), "rejected peer");
        self.notify_updated(&peer);
        Ok(peer)
    }

    /// `AddPeerActions`: union `actions` into the peer's delegated set.
    pub async fn add_peer_actions(
        &self,
        mac: &str,
        actions: Vec<String>,
    ) -> Result<Peer, FederationError> {
        let mac = normalize_mac(mac);
        let (peer, changed) = self
            .run_blocking(move |_, conn| {
                let mut peer = Self::require_peer(conn, &mac)?;
                let changed = peer.actions.union(&actions);
                if changed {
                    directory::set_actions(conn, &peer.id, &peer.actions)?;
                }
                Ok((peer, changed))
            })
            .await?;

        if changed {
            tracing::info!(mac = %peer.mac(), actions = peer.actions.len(), "granted peer actions");
            self.notify_updated(&peer);
        }
        Ok(peer)
    }

    /// `RemovePeerAction`: drop one action. Fails if it was not granted.
    pub async fn remove_peer_action(
        &self,
        mac: &str,
        action: &str,
    ) -> Result<Peer, FederationError> {
        let mac = normalize_mac(mac);
        let action = action.to_string();
        let peer = self
            .run_blocking(move |_, conn| {
                let mut peer = Self::require_peer(conn, &mac)?;
                if !peer.actions.remove(&action) {
                    return Err(FederationError::ActionNotGranted { mac, action });
                }
                directory::set_actions(conn, &peer.id, &peer.actions)?;
                Ok(peer)
            })
            .await?;

        tracing::info!(mac = %peer.mac(), "revoked peer action");
        self.notify_updated(&peer);
        Ok(peer)
    }

    /// `RemovePeersAction`: drop `action` from every peer holding it.
    ///
    /// Returns the hardware addresses of the peers that were rewritten.
    pub async fn remove_peers_action(&self, action: &str) -> Result<Vec<String>, FederationError> {
        let action = action.to_string();
        let rewritten = self
            .run_blocking(move |_, conn| {
                let peers =
                    directory::find_peers(conn, &PeerFilter::default(), FindOptions::default())?;
                let tx = conn.unchecked_transaction().map_err(DirectoryError::from)?;
                let mut rewritten = Vec::new();
                for mut peer in peers {
                    if peer.actions.remove(&action) {
                        directory::set_actions(&tx, &peer.id, &peer.actions)?;
                        rewritten.push(peer);
                    }
                }
                tx.commit().map_err(DirectoryError::from)?;
                Ok(rewritten)
            })
            .await?;

        for peer in &rewritten {
            self.notify_updated(peer);
        }
        tracing::info!(count = rewritten.len(), "revoked action from peers");
        Ok(rewritten.iter().map(|p| p.mac().to_string()).collect())
    }

    /// `UpdatePeer`: refresh naming and transport fields of a known peer.
    pub async fn update_peer(&self, descriptor: PeerDescriptor) -> Result<Peer, FederationError> {
        let mac = normalize_mac(&descriptor.mac);
        if mac.is_empty() {
            return Err(FederationError::Validation("mac is required".to_string()));
        }
        descriptor
            .check_network_fields()
            .map_err(FederationError::Validation)?;
        let peer = self
            .run_blocking(move |_, conn| {
                let existing = Self::require_peer(conn, &mac)?;
                directory::update_descriptor(conn, &existing.id, &descriptor)?;
                Self::require_peer(conn, &mac)
            })
            .await?;

        tracing::info!(mac = %peer.mac(), "updated peer");
        self.notify_updated(&peer);
        Ok(peer)
    }

    /// Drops every local trace of `peer`: grants, record, key, hosts entry.
    fn remove_local(&self, conn: &Connection, peer: &Peer) -> Result<(), FederationError> {
        let tx = conn.unchecked_transaction().map_err(DirectoryError::from)?;
        authz::revoke_all(&tx, peer.mac())?;
        directory::delete_peer(&tx, &peer.id)?;
        authz::delete_permissions(&tx, &peer.descriptor.qualified_name())?;
        tx.commit().map_err(DirectoryError::from)?;

        self.keys.delete_peer_key(peer.mac())?;
        self.unmirror_best_effort(&peer.descriptor);
        Ok(())
    }

    /// `DeletePeer`: remove the peer locally, then ask it to forget this node.
    ///
    /// Only local cleanup is guaranteed; the signed retraction is detached.
    pub async fn delete_peer(&self, mac: &str) -> Result<Peer, FederationError> {
        let mac = normalize_mac(mac);
        let (peer, signing_key) = self
            .run_blocking(move |this, conn| {
                let peer = Self::require_peer(conn, &mac)?;
                this.remove_local(conn, &peer)?;
                Ok((peer, this.keys.local_signing_key()?))
            })
            .await?;

        tracing::info!(mac = %peer.mac(), "deleted peer");
        self.notify_deleted(&peer);

        let own_mac = self.presence.mac().to_string();
        let issued_at = chrono::Utc::now().timestamp();
        let request = RetractPeerRequest {
            signature: sign_retraction(&signing_key, &own_mac, peer.mac(), issued_at),
            mac: own_mac,
            issued_at,
        };
        let address = peer.descriptor.address();
        let client = self.client.clone();
        tokio::spawn(async move {
            match client.retract(&address, &request).await {
                Ok(()) => tracing::info!(%address, "remote node retracted this node"),
                Err(e) => tracing::warn!(%address, error = %e, "remote retraction failed"),
            }
        });

        Ok(peer)
    }

    /// `RetractPeer`: a deleting peer asks this node to drop its mirror.
    ///
    /// Returns `false` when there was nothing to drop.
    pub async fn retract_peer(&self, request: RetractPeerRequest) -> Result<bool, FederationError> {
        let mac = normalize_mac(&request.mac);
        if mac.is_empty() {
            return Err(FederationError::Validation("mac is required".to_string()));
        }
        if self.presence.is_self(&mac) {
            return Err(FederationError::SelfRegistration);
        }

        let removed = self
            .run_blocking(move |this, conn| {
                let Some(peer) = directory::find_peer_by_mac(conn, &mac)? else {
                    return Ok(None);
                };
                let public_key = this.keys.peer_key(&mac)?.ok_or_else(|| {
                    FederationError::InvalidSignature("no key stored for peer".to_string())
                })?;
                verify_retraction(
                    &public_key,
                    &request.mac,
                    this.presence.mac(),
                    request.issued_at,
                    &request.signature,
                    chrono::Utc::now().timestamp(),
                )?;
                this.remove_local(conn, &peer)?;
                Ok(Some(peer))
            })
            .await?;

        match removed {
            Some(peer) => {
                tracing::info!(mac = %peer.mac(), "peer retracted itself");
                let payload = serde_json::Value::String(peer.mac().to_string());
                self.notifier
                    .publish_local(PeerEvent::new(DELETE_PEER_EVT, payload.clone()));
                self.notifier
                    .publish_local(PeerEvent::new(peer_deleted_topic(peer.mac()), payload));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// `GetPeers`: one page of peers matching `filter`, never including this
    /// node's own record.
    ///
    /// Callers stream the full set in pages of at most [`PEER_BATCH_SIZE`].
    pub async fn get_peers(
        &self,
        mut filter: PeerFilter,
        options: FindOptions,
    ) -> Result<Vec<Peer>, FederationError> {
        filter.exclude_mac = Some(self.presence.mac().to_string());
        self.run_blocking(move |_, conn| Ok(directory::find_peers(conn, &filter, options)?))
            .await
    }

    /// `GetPeerApprovalState`, optionally answered by the node at `remote`.
    ///
    /// An empty `mac` means this node's own address.
    pub async fn approval_state(
        &self,
        mac: &str,
        remote: Option<&str>,
    ) -> Result<ApprovalStateResponse, FederationError> {
        let mac = match normalize_mac(mac) {
            m if m.is_empty() => self.presence.mac().to_string(),
            m => m,
        };

        if let Some(remote) = remote.filter(|r| !r.trim().is_empty()) {
            return Ok(self.client.approval_state(remote, &mac).await?);
        }

        let peer = self
            .run_blocking(move |_, conn| Self::require_peer(conn, &mac))
            .await?;
        Ok(ApprovalStateResponse {
            mac: peer.mac().to_string(),
            state: peer.state,
        })
    }

    /// `GetPeerPublicKey`, optionally answered by the node at `remote`.
    ///
    /// An empty `mac`, or this node's own, yields the local public key.
    pub async fn public_key(
        &self,
        mac: &str,
        remote: Option<&str>,
    ) -> Result<PublicKeyResponse, FederationError> {
        let mac = match normalize_mac(mac) {
            m if m.is_empty() => self.presence.mac().to_string(),
            m => m,
        };

        if let Some(remote) = remote.filter(|r| !r.trim().is_empty()) {
            return Ok(self.client.public_key(remote, &mac).await?);
        }

        let is_self = self.presence.is_self(&mac);
        let lookup_mac = mac.clone();
        let public_key = self
            .run_blocking(move |this, _| {
                if is_self {
                    return Ok(Some(this.keys.local_public_key()?));
                }
                Ok(this.keys.peer_key(&lookup_mac)?)
            })
            .await?
            .ok_or_else(|| FederationError::PeerNotFound(mac.clone()))?;

        Ok(PublicKeyResponse {
            fingerprint: fingerprint(&public_key),
            mac,
            public_key,
        })
    }

    /// Whether the peer `mac` may invoke `action` against this node.
    pub async fn peer_may_invoke(&self, mac: &str, action: &str) -> Result<bool, FederationError> {
        let mac = normalize_mac(mac);
        let action = action.to_string();
        self.run_blocking(move |_, conn| Ok(authz::peer_may_invoke(conn, &mac, &action)?))
            .await
    }

    /// Rebroadcasts an event pushed by a peer to local subscribers.
    pub fn ingest_remote_event(&self, event: PeerEvent) -> Result<(), FederationError> {
        if event.topic.trim().is_empty() {
            return Err(FederationError::Validation("topic is required".to_string()));
        }
        tracing::debug!(topic = %event.topic, "received remote event");
        self.notifier.publish_local(event);
        Ok(())
    }
}
