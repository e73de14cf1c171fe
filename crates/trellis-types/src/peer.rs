//! Peer descriptor and stored peer record.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ActionSet, ApprovalState, Protocol, DEFAULT_PORT_HTTP, DEFAULT_PORT_HTTPS};

/// Normalizes a hardware address so that `AA:BB` and ` aa:bb ` name the same node.
pub fn normalize_mac(mac: &str) -> String {
    mac.trim().to_ascii_lowercase()
}

/// Derives the stable peer identifier from a hardware address.
///
/// The identifier is a name-based UUID over the normalized address, so it is
/// stable across restarts and never supplied by the caller.
pub fn peer_id(mac: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, normalize_mac(mac).as_bytes()).to_string()
}

/// Whether `name` may appear as a hostname or domain in name resolution.
///
/// Only ASCII letters, digits, `.` and `-` are allowed. Empty is allowed.
pub fn is_valid_host_name(name: &str) -> bool {
    name.len() <= 253
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
}

fn default_port_http() -> u16 {
    DEFAULT_PORT_HTTP
}

fn default_port_https() -> u16 {
    DEFAULT_PORT_HTTPS
}

/// Self-description of a node as exchanged on the wire.
///
/// `mac` is empty when an operator asks this node to join a remote one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_port_http")]
    pub port_http: u16,
    #[serde(default = "default_port_https")]
    pub port_https: u16,
    #[serde(default)]
    pub local_ip_address: String,
    #[serde(default)]
    pub external_ip_address: String,
    #[serde(default)]
    pub mac: String,
}

impl Default for PeerDescriptor {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            domain: String::new(),
            protocol: Protocol::default(),
            port_http: DEFAULT_PORT_HTTP,
            port_https: DEFAULT_PORT_HTTPS,
            local_ip_address: String::new(),
            external_ip_address: String::new(),
            mac: String::new(),
        }
    }
}

impl PeerDescriptor {
    /// Host name as it appears in name resolution: `hostname[.domain]`.
    pub fn qualified_name(&self) -> String {
        if self.domain.is_empty() || self.domain == "localhost" {
            self.hostname.clone()
        } else if self.hostname.is_empty() {
            self.domain.clone()
        } else {
            format!("{}.{}", self.hostname, self.domain)
        }
    }

    /// Port matching the descriptor's protocol. Zero means the default.
    pub fn port(&self) -> u16 {
        match self.protocol {
            Protocol::Https if self.port_https == 0 => DEFAULT_PORT_HTTPS,
            Protocol::Https => self.port_https,
            Protocol::Http if self.port_http == 0 => DEFAULT_PORT_HTTP,
            Protocol::Http => self.port_http,
        }
    }

    /// Checks the fields that end up in hosts-file lines and outbound URLs.
    ///
    /// Names must pass [`is_valid_host_name`]; addresses, when present, must
    /// parse as IP addresses.
    pub fn check_network_fields(&self) -> Result<(), String> {
        for (field, value) in [("hostname", &self.hostname), ("domain", &self.domain)] {
            if !is_valid_host_name(value) {
                return Err(format!("{field} {value:?} is not a valid host name"));
            }
        }
        for (field, value) in [
            ("local_ip_address", &self.local_ip_address),
            ("external_ip_address", &self.external_ip_address),
        ] {
            if !value.is_empty() && value.parse::<IpAddr>().is_err() {
                return Err(format!("{field} {value:?} is not an ip address"));
            }
        }
        Ok(())
    }

    /// Base URL where the node's RPC surface is reachable.
    pub fn address(&self) -> String {
        let host = if self.domain.is_empty() {
            &self.hostname
        } else {
            &self.domain
        };
        format!("{}://{}:{}", self.protocol, host, self.port())
    }

    /// Whether both sides sit behind the same externally visible address.
    pub fn shares_network_with(&self, other: &PeerDescriptor) -> bool {
        !self.external_ip_address.is_empty()
            && self.external_ip_address == other.external_ip_address
    }
}

/// A remote node this node has exchanged trust material with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Derived from `mac`; primary key of the record.
    pub id: String,
    #[serde(flatten)]
    pub descriptor: PeerDescriptor,
    pub state: ApprovalState,
    #[serde(default)]
    pub actions: ActionSet,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Peer {
    /// Builds a new, not yet persisted record for a descriptor.
    pub fn new(descriptor: PeerDescriptor, state: ApprovalState) -> Self {
        let mut descriptor = descriptor;
        descriptor.mac = normalize_mac(&descriptor.mac);
        Self {
            id: peer_id(&descriptor.mac),
            descriptor,
            state,
            actions: ActionSet::default(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    pub fn mac(&self) -> &str {
        &self.descriptor.mac
    }
}
