//! Node-side session broker

use tracing::{info, warn};
use tunnelpass_core::{
    BackendKind, BackendParams, OpenVpnParams, SessionRequest, SessionResponse, WireGuardParams,
};
use tunnelpass_credential::verify;
use tunnelpass_crypto::parse_tunnel_public_key;
use tunnelpass_settings::NodeSettings;

use crate::allocator::{AddressPool, Ipv4Cidr, PeerApplier};
use crate::{BrokerError, Result};

/// Where clients reach this node's WireGuard listener
#[derive(Debug, Clone)]
pub struct WireGuardEndpoint {
    /// `host:port`
    pub endpoint: String,
    /// Base64 node public key
    pub server_public_key: String,
    pub persistent_keepalive: u16,
}

/// Where clients reach this node's OpenVPN listener
#[derive(Debug, Clone)]
pub struct OpenVpnEndpoint {
    /// `host:port`
    pub remote: String,
    pub protocol: String,
}

#[derive(Debug, Clone, Default)]
pub struct NodeBrokerConfig {
    /// Accepted issuer keys; empty accepts any issuer
    pub allowed_issuers: Vec<String>,
    pub wireguard: Option<WireGuardEndpoint>,
    pub openvpn: Option<OpenVpnEndpoint>,
    pub dns: Vec<String>,
    pub allowed_ips: Vec<String>,
}

impl NodeBrokerConfig {
    pub fn from_settings(settings: &NodeSettings) -> Self {
        let host = settings
            .public_host
            .clone()
            .unwrap_or_else(|| "127.0.0.1".to_string());
        let serves = |name: &str| settings.backends.iter().any(|b| b.eq_ignore_ascii_case(name));

        let wireguard = if serves(BackendKind::WireGuard.as_str()) {
            match &settings.wireguard_public_key {
                Some(key) => Some(WireGuardEndpoint {
                    endpoint: format!("{}:{}", host, settings.wireguard_port),
                    server_public_key: key.clone(),
                    persistent_keepalive: settings.persistent_keepalive,
                }),
                None => {
                    warn!("WireGuard listed but no wireguard_public_key configured, not serving it");
                    None
                }
            }
        } else {
            None
        };

        let openvpn = serves(BackendKind::OpenVpn.as_str()).then(|| OpenVpnEndpoint {
            remote: format!("{}:{}", host, settings.openvpn_port),
            protocol: settings.openvpn_protocol.clone(),
        });

        Self {
            allowed_issuers: settings.allowed_issuers.clone(),
            wireguard,
            openvpn,
            dns: settings.dns.clone(),
            allowed_ips: settings.allowed_ips.clone(),
        }
    }

    pub fn issuer_allowed(&self, issuer: &str) -> bool {
        self.allowed_issuers.is_empty() || self.allowed_issuers.iter().any(|k| k == issuer)
    }

    pub fn serves(&self, backend: BackendKind) -> bool {
        match backend {
            BackendKind::WireGuard => self.wireguard.is_some(),
            BackendKind::OpenVpn => self.openvpn.is_some(),
        }
    }

    /// Backend names for announcements
    pub fn backend_names(&self) -> Vec<String> {
        [BackendKind::OpenVpn, BackendKind::WireGuard]
            .into_iter()
            .filter(|b| self.serves(*b))
            .map(|b| b.as_str().to_string())
            .collect()
    }
}

/// Verifies session requests and hands out tunnel parameters
pub struct NodeBroker {
    config: NodeBrokerConfig,
    pool: AddressPool,
}

impl NodeBroker {
    pub fn new(config: NodeBrokerConfig, pool: AddressPool) -> Self {
        Self { config, pool }
    }

    pub fn from_settings(settings: &NodeSettings) -> Result<Self> {
        let cidr = Ipv4Cidr::parse(&settings.address_pool)?;
        let applier = if settings.apply_peers {
            PeerApplier::wireguard(settings.interface.clone())
        } else {
            PeerApplier::LogOnly
        };
        Ok(Self::new(
            NodeBrokerConfig::from_settings(settings),
            AddressPool::new(cidr, applier),
        ))
    }

    pub fn config(&self) -> &NodeBrokerConfig {
        &self.config
    }

    pub fn pool(&self) -> &AddressPool {
        &self.pool
    }

    /// Handle one session request at `now`.
    ///
    /// Order: issuer allow-list, credential verification, backend, key
    /// material, allocation. Nothing is allocated for a rejected request.
    pub async fn handle(&self, request: &SessionRequest, now: i64) -> Result<SessionResponse> {
        let credential = &request.credential;
        let issuer = credential.issuer_key();

        if !self.config.issuer_allowed(issuer) {
            warn!("Rejecting token {}: issuer {} not allowed", credential.token_id(), issuer);
            return Err(BrokerError::Forbidden(issuer.to_string()));
        }

        if let Err(e) = verify(credential, now) {
            warn!("Rejecting token {}: {}", credential.token_id(), e);
            return Err(e.into());
        }

        let backend_name = request.backend_name();
        let unserved = || BrokerError::MalformedInput(format!("backend {} not served", backend_name));

        let params = match BackendKind::parse(backend_name) {
            Some(BackendKind::WireGuard) => {
                let endpoint = self.config.wireguard.as_ref().ok_or_else(unserved)?;
                self.wireguard_session(endpoint, request).await?
            }
            Some(BackendKind::OpenVpn) => {
                let endpoint = self.config.openvpn.as_ref().ok_or_else(unserved)?;
                self.openvpn_session(endpoint).await?
            }
            None => return Err(unserved()),
        };

        info!(
            "Session granted: token {} subject {} {} at {}",
            credential.token_id(),
            credential.payload.subject_key,
            params.kind(),
            params.client_address()
        );
        Ok(SessionResponse::ok("session granted", params))
    }

    async fn wireguard_session(
        &self,
        endpoint: &WireGuardEndpoint,
        request: &SessionRequest,
    ) -> Result<BackendParams> {
        let client_key = request
            .ephemeral_client_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| BrokerError::MalformedInput("wireguard requires ephemeral_client_key".to_string()))?;
        parse_tunnel_public_key(client_key)
            .map_err(|e| BrokerError::MalformedInput(e.to_string()))?;

        let address = self.pool.allocate(Some(client_key)).await?;
        Ok(BackendParams::WireGuard(WireGuardParams {
            endpoint: endpoint.endpoint.clone(),
            client_address: format!("{}/32", address),
            server_public_key: endpoint.server_public_key.clone(),
            dns: self.config.dns.clone(),
            allowed_ips: self.config.allowed_ips.clone(),
            persistent_keepalive: endpoint.persistent_keepalive,
        }))
    }

    async fn openvpn_session(&self, endpoint: &OpenVpnEndpoint) -> Result<BackendParams> {
        let address = self.pool.allocate(None).await?;
        Ok(BackendParams::OpenVpn(OpenVpnParams {
            remote: endpoint.remote.clone(),
            protocol: endpoint.protocol.clone(),
            client_address: format!("{}/{}", address, self.pool.cidr().prefix()),
            dns: self.config.dns.clone(),
            allowed_ips: self.config.allowed_ips.clone(),
        }))
    }
}
