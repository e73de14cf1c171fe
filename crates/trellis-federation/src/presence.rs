//! Local node identity: how this node describes itself to peers.

use serde::Deserialize;
use trellis_types::{
    normalize_mac, PeerDescriptor, Protocol, DEFAULT_PORT_HTTP, DEFAULT_PORT_HTTPS,
};

fn default_domain() -> String {
    "localhost".to_string()
}

fn default_port_http() -> u16 {
    DEFAULT_PORT_HTTP
}

fn default_port_https() -> u16 {
    DEFAULT_PORT_HTTPS
}

/// `[node]` configuration section.
///
/// Unset hostname and local address are discovered from the host.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NodeSettings {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_port_http")]
    pub port_http: u16,
    #[serde(default = "default_port_https")]
    pub port_https: u16,
    #[serde(default)]
    pub local_ip_address: Option<String>,
    #[serde(default)]
    pub external_ip_address: Option<String>,
    /// Stable hardware address identifying this node. Required.
    #[serde(default)]
    pub hardware_address: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            hostname: None,
            domain: default_domain(),
            protocol: Protocol::default(),
            port_http: DEFAULT_PORT_HTTP,
            port_https: DEFAULT_PORT_HTTPS,
            local_ip_address: None,
            external_ip_address: None,
            hardware_address: String::new(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// This node's own descriptor.
///
/// Only the settings are kept. Every [`LocalPresence::describe`] resolves
/// them again, so discovered fields follow host changes (a DHCP lease, a
/// rename) without a restart.
#[derive(Debug, Clone)]
pub struct LocalPresence {
    settings: NodeSettings,
    mac: String,
}

impl LocalPresence {
    pub fn from_settings(settings: &NodeSettings) -> Self {
        Self {
            mac: normalize_mac(&settings.hardware_address),
            settings: settings.clone(),
        }
    }

    /// Builds a presence from a fixed descriptor. Empty hostname or local
    /// address are discovered like unset settings.
    pub fn new(descriptor: PeerDescriptor) -> Self {
        Self::from_settings(&NodeSettings {
            hostname: non_empty(&descriptor.hostname),
            domain: descriptor.domain,
            protocol: descriptor.protocol,
            port_http: descriptor.port_http,
            port_https: descriptor.port_https,
            local_ip_address: non_empty(&descriptor.local_ip_address),
            external_ip_address: non_empty(&descriptor.external_ip_address),
            hardware_address: descriptor.mac,
        })
    }

    /// Resolves the current descriptor, filling gaps from the host.
    pub fn describe(&self) -> PeerDescriptor {
        let settings = &self.settings;
        let hostname = settings
            .hostname
            .as_deref()
            .and_then(non_empty)
            .unwrap_or_else(|| {
                hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or_else(|_| "localhost".to_string())
            });

        let local_ip_address = settings
            .local_ip_address
            .as_deref()
            .and_then(non_empty)
            .unwrap_or_else(|| {
                local_ip_address::local_ip()
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|_| "127.0.0.1".to_string())
            });

        let external_ip_address = settings
            .external_ip_address
            .as_deref()
            .and_then(non_empty)
            .unwrap_or_else(|| local_ip_address.clone());

        PeerDescriptor {
            hostname,
            domain: settings.domain.clone(),
            protocol: settings.protocol,
            port_http: settings.port_http,
            port_https: settings.port_https,
            local_ip_address,
            external_ip_address,
            mac: self.mac.clone(),
        }
    }

    pub fn mac(&self) -> &str {
        &self.mac
    }

    pub fn is_self(&self, mac: &str) -> bool {
        normalize_mac(mac) == self.mac
    }
}
