//! Configuration types

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use tunnelpass_keystore::{default_credentials_path, default_key_path, expand_path};

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Settings for running a relay node
    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub client: ClientSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.clone());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.clone());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Overlay `TUNNELPASS_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay variables from `lookup`. Empty values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("TUNNELPASS_RELAYS") {
            self.discovery.relays = split_list(&v);
        }
        if let Some(v) = get("TUNNELPASS_POOL") {
            self.discovery.pool = Some(v);
        }
        if let Some(v) = get("TUNNELPASS_PROBE_INTERVAL_SECS") {
            match v.parse() {
                Ok(secs) => self.discovery.probe_interval_secs = secs,
                Err(_) => warn!("Ignoring TUNNELPASS_PROBE_INTERVAL_SECS={:?}", v),
            }
        }

        if let Some(v) = get("TUNNELPASS_NODE_LISTEN_ADDR") {
            self.node.listen_addr = v;
        }
        if let Some(v) = get("TUNNELPASS_NODE_ALLOWED_ISSUERS") {
            self.node.allowed_issuers = split_list(&v);
        }
        if let Some(v) = get("TUNNELPASS_NODE_ADDRESS_POOL") {
            self.node.address_pool = v;
        }
        if let Some(v) = get("TUNNELPASS_NODE_INTERFACE") {
            self.node.interface = v;
        }
        if let Some(v) = get("TUNNELPASS_NODE_APPLY") {
            self.node.apply_peers = v == "1";
        }
        if let Some(v) = get("TUNNELPASS_NODE_ENDPOINT") {
            self.node.public_host = Some(v);
        }

        if let Some(v) = get("TUNNELPASS_CLIENT_ISSUER") {
            self.client.issuer = Some(v);
        }
        if let Some(v) = get("TUNNELPASS_CLIENT_BACKEND") {
            self.client.backend = v.to_ascii_lowercase();
        }
        if let Some(v) = get("TUNNELPASS_CLIENT_REGION") {
            self.client.region = v;
        }
        if let Some(v) = get("TUNNELPASS_CREDENTIALS_PATH") {
            self.client.credentials_path = Some(v);
        }
    }
}

/// Comma-separated list, trimmed, empty entries dropped
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Discovery settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Relay endpoints for the gossip transport
    #[serde(default)]
    pub relays: Vec<String>,

    /// Pool scope for announcements (issuer identity)
    #[serde(default)]
    pub pool: Option<String>,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_probe_interval() -> u64 {
    30
}

fn default_probe_timeout() -> u64 {
    3
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            relays: Vec::new(),
            pool: None,
            probe_interval_secs: default_probe_interval(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

/// Node settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Session API listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Issuer keys whose credentials are accepted; empty accepts any issuer
    #[serde(default)]
    pub allowed_issuers: Vec<String>,

    /// Server address with prefix; clients get the following addresses
    #[serde(default = "default_address_pool")]
    pub address_pool: String,

    /// WireGuard interface name
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Run `wg set` for each new peer (Linux only)
    #[serde(default)]
    pub apply_peers: bool,

    /// Public host clients dial for the tunnel itself
    #[serde(default)]
    pub public_host: Option<String>,

    /// Tunnel backends this node serves
    #[serde(default = "default_backends")]
    pub backends: Vec<String>,

    #[serde(default = "default_wireguard_port")]
    pub wireguard_port: u16,

    /// Base64 WireGuard public key of this node
    #[serde(default)]
    pub wireguard_public_key: Option<String>,

    #[serde(default = "default_keepalive")]
    pub persistent_keepalive: u16,

    #[serde(default = "default_openvpn_port")]
    pub openvpn_port: u16,

    #[serde(default = "default_openvpn_protocol")]
    pub openvpn_protocol: String,

    #[serde(default = "default_dns")]
    pub dns: Vec<String>,

    #[serde(default = "default_allowed_ips")]
    pub allowed_ips: Vec<String>,

    /// Region advertised in announcements
    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    /// Keyfile path
    #[serde(default)]
    pub keyfile: Option<String>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_address_pool() -> String {
    "10.8.0.1/24".to_string()
}

fn default_interface() -> String {
    "wg0".to_string()
}

fn default_backends() -> Vec<String> {
    vec!["openvpn".to_string(), "wireguard".to_string()]
}

fn default_wireguard_port() -> u16 {
    51820
}

fn default_keepalive() -> u16 {
    25
}

fn default_openvpn_port() -> u16 {
    1194
}

fn default_openvpn_protocol() -> String {
    "udp".to_string()
}

fn default_dns() -> Vec<String> {
    vec!["1.1.1.1".to_string()]
}

fn default_allowed_ips() -> Vec<String> {
    vec!["0.0.0.0/0".to_string()]
}

fn default_region() -> String {
    "local".to_string()
}

fn default_announce_interval() -> u64 {
    60
}

impl NodeSettings {
    /// Node identity key file, `~/.tunnelpass/node.key` unless configured
    pub fn keyfile_path(&self) -> PathBuf {
        match &self.keyfile {
            Some(path) => expand_path(path),
            None => default_key_path("node"),
        }
    }
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            allowed_issuers: Vec::new(),
            address_pool: default_address_pool(),
            interface: default_interface(),
            apply_peers: false,
            public_host: None,
            backends: default_backends(),
            wireguard_port: default_wireguard_port(),
            wireguard_public_key: None,
            persistent_keepalive: default_keepalive(),
            openvpn_port: default_openvpn_port(),
            openvpn_protocol: default_openvpn_protocol(),
            dns: default_dns(),
            allowed_ips: default_allowed_ips(),
            region: default_region(),
            announce_interval_secs: default_announce_interval(),
            keyfile: None,
        }
    }
}

/// Client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Issuer whose credentials are used for sessions
    #[serde(default)]
    pub issuer: Option<String>,

    #[serde(default = "default_backend")]
    pub backend: String,

    /// Preferred region, or `auto`
    #[serde(default = "default_client_region")]
    pub region: String,

    /// Local credential file; defaults to `~/.tunnelpass/credentials.json`
    #[serde(default)]
    pub credentials_path: Option<String>,

    /// Session request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Keyfile path
    #[serde(default)]
    pub keyfile: Option<String>,
}

fn default_backend() -> String {
    "openvpn".to_string()
}

fn default_client_region() -> String {
    "auto".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

impl ClientSettings {
    pub fn keyfile_path(&self) -> PathBuf {
        match &self.keyfile {
            Some(path) => expand_path(path),
            None => default_key_path("client"),
        }
    }

    pub fn credentials_file(&self) -> PathBuf {
        match &self.credentials_path {
            Some(path) => expand_path(path),
            None => default_credentials_path(),
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            issuer: None,
            backend: default_backend(),
            region: default_client_region(),
            credentials_path: None,
            request_timeout_secs: default_request_timeout(),
            keyfile: None,
        }
    }
}
