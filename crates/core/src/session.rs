//! Session creation messages exchanged between a client and a node

use serde::{Deserialize, Serialize};

use crate::types::{SubscriptionCredential, DEFAULT_BACKEND};

/// Tunnel technology a session's parameters are rendered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    OpenVpn,
    WireGuard,
}

impl BackendKind {
    /// Parse a backend name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "openvpn" => Some(Self::OpenVpn),
            "wireguard" => Some(Self::WireGuard),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenVpn => "openvpn",
            Self::WireGuard => "wireguard",
        }
    }

    /// Whether the client must send per-session key material
    pub fn requires_client_key(&self) -> bool {
        matches!(self, Self::WireGuard)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters a WireGuard config renderer needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireGuardParams {
    /// `host:port` of the node's WireGuard listener
    pub endpoint: String,
    /// Address assigned to the client, with prefix (e.g. `10.8.0.2/32`)
    pub client_address: String,
    /// Base64 node public key
    pub server_public_key: String,
    pub dns: Vec<String>,
    pub allowed_ips: Vec<String>,
    pub persistent_keepalive: u16,
}

/// Parameters an OpenVPN profile renderer needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenVpnParams {
    /// `host:port` of the node's OpenVPN listener
    pub remote: String,
    /// `udp` or `tcp`
    pub protocol: String,
    pub client_address: String,
    pub dns: Vec<String>,
    pub allowed_ips: Vec<String>,
}

/// Backend-specific session parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendParams {
    OpenVpn(OpenVpnParams),
    WireGuard(WireGuardParams),
}

impl BackendParams {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::OpenVpn(_) => BackendKind::OpenVpn,
            Self::WireGuard(_) => BackendKind::WireGuard,
        }
    }

    pub fn client_address(&self) -> &str {
        match self {
            Self::OpenVpn(p) => &p.client_address,
            Self::WireGuard(p) => &p.client_address,
        }
    }
}

/// Client → node: request a session authorized by a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub credential: SubscriptionCredential,
    /// Base64 X25519 public key, present when the backend needs one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_client_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_backend: Option<String>,
}

impl SessionRequest {
    /// Requested backend name, defaulting to openvpn
    pub fn backend_name(&self) -> &str {
        match self.requested_backend.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name,
            _ => DEFAULT_BACKEND,
        }
    }
}

/// Outcome status of a session request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ok,
    Error,
}

/// Node → client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub status: SessionStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_parameters: Option<BackendParams>,
}

impl SessionResponse {
    pub fn ok(message: impl Into<String>, params: BackendParams) -> Self {
        Self {
            status: SessionStatus::Ok,
            message: message.into(),
            backend_parameters: Some(params),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Error,
            message: message.into(),
            backend_parameters: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SessionStatus::Ok
    }
}
