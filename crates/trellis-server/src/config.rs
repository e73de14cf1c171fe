//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;
use trellis_federation::{FederationSettings, NodeSettings};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// How this node describes itself to peers.
    #[serde(default)]
    pub node: NodeSettings,

    /// Key store, hosts file and remote call settings.
    #[serde(default)]
    pub federation: FederationSettings,

    /// Operator authentication.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trellis_federation=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Operator authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Bearer token required on admin routes. Empty disables them.
    #[serde(default)]
    pub admin_token: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "trellis.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting is missing or unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl Config {
    /// Checks settings the node can not start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.hardware_address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "node.hardware_address must be set".to_string(),
            ));
        }
        if self.federation.remote_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "federation.remote_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TRELLIS_HOST` overrides `server.host`
/// - `TRELLIS_PORT` overrides `server.port`
/// - `TRELLIS_DB_PATH` overrides `database.path`
/// - `TRELLIS_LOG_LEVEL` overrides `logging.level`
/// - `TRELLIS_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `TRELLIS_HARDWARE_ADDRESS` overrides `node.hardware_address`
/// - `TRELLIS_ADMIN_TOKEN` overrides `auth.admin_token`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("TRELLIS_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("TRELLIS_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("TRELLIS_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("TRELLIS_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("TRELLIS_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(mac) = std::env::var("TRELLIS_HARDWARE_ADDRESS") {
        config.node.hardware_address = mac;
    }
    if let Ok(token) = std::env::var("TRELLIS_ADMIN_TOKEN") {
        config.auth.admin_token = token;
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_federation::RejectedReregistration;
    use trellis_types::Protocol;

    #[test]
    fn parses_full_file() {
        let config: Config = toml::from_str(
            r#"
            [server]
            host = "0.0.0.0"
            port = 8080

            [database]
            path = "/var/lib/trellis/trellis.db"

            [node]
            hostname = "alpha"
            domain = "example.com"
            protocol = "https"
            hardware_address = "AA:BB:CC:DD:EE:FF"

            [federation]
            keys_dir = "/var/lib/trellis/keys"
            rejected_reregistration = "deny"

            [auth]
            admin_token = "secret"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert_eq!(config.node.protocol, Protocol::Https);
        assert_eq!(config.node.port_https, 443);
        assert_eq!(
            config.federation.rejected_reregistration,
            RejectedReregistration::Deny
        );
        assert_eq!(config.federation.remote_timeout_secs, 5);
        assert_eq!(config.auth.admin_token, "secret");
        config.validate().unwrap();
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.node.domain, "localhost");
    }

    #[test]
    fn hardware_address_is_required() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
