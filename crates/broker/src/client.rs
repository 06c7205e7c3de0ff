//! Client-side session broker

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};
use tunnelpass_core::{BackendKind, BackendParams, NodeDescriptor, SessionRequest, SessionResponse, AUTO_REGION};
use tunnelpass_credential::{CredentialStore, JsonCredentialFile};
use tunnelpass_crypto::TunnelKeypair;
use tunnelpass_discovery::DiscoveryContext;
use tunnelpass_settings::ClientSettings;

use crate::{BrokerError, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The local credential file named by `settings`
pub fn credential_file(settings: &ClientSettings) -> JsonCredentialFile {
    JsonCredentialFile::new(settings.credentials_file())
}

/// A request ready to send, plus the private half of any ephemeral key
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: SessionRequest,
    pub client_keypair: Option<TunnelKeypair>,
}

/// Build a session request from the newest valid credential for `issuer`.
///
/// A fresh X25519 keypair is generated when `backend` needs client key
/// material.
pub fn prepare_request(
    store: &CredentialStore,
    issuer: &str,
    backend: BackendKind,
    now: i64,
) -> Result<PreparedRequest> {
    let credential = store
        .latest_valid(issuer, now)
        .cloned()
        .ok_or_else(|| BrokerError::NoValidCredential(issuer.to_string()))?;
    debug!(
        "Using credential {} (expires {})",
        credential.token_id(),
        credential.expires_at()
    );

    let client_keypair = backend.requires_client_key().then(TunnelKeypair::generate);
    let request = SessionRequest {
        credential,
        ephemeral_client_key: client_keypair.as_ref().map(|k| k.public_key_base64()),
        requested_backend: Some(backend.as_str().to_string()),
    };
    Ok(PreparedRequest {
        request,
        client_keypair,
    })
}

/// What a client asks for
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub issuer: String,
    pub backend: BackendKind,
    pub region: Option<String>,
    pub pool: Option<String>,
}

impl SessionParams {
    pub fn new(issuer: impl Into<String>, backend: BackendKind) -> Self {
        Self {
            issuer: issuer.into(),
            backend,
            region: None,
            pool: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    pub fn from_settings(settings: &ClientSettings, pool: Option<&str>) -> Result<Self> {
        let issuer = settings
            .issuer
            .clone()
            .ok_or_else(|| BrokerError::Config("client issuer not configured".to_string()))?;
        let backend = BackendKind::parse(&settings.backend)
            .ok_or_else(|| BrokerError::Config(format!("unknown backend {}", settings.backend)))?;

        let mut params = Self::new(issuer, backend);
        if !settings.region.is_empty() && !settings.region.eq_ignore_ascii_case(AUTO_REGION) {
            params.region = Some(settings.region.clone());
        }
        params.pool = pool.map(str::to_string);
        Ok(params)
    }
}

/// A granted session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub node: NodeDescriptor,
    pub parameters: BackendParams,
    /// Private half of the ephemeral key sent to the node (WireGuard)
    pub client_keypair: Option<TunnelKeypair>,
}

pub struct SessionClient {
    http: reqwest::Client,
    discovery: Arc<DiscoveryContext>,
    timeout: Duration,
}

impl SessionClient {
    pub fn new(discovery: Arc<DiscoveryContext>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BrokerError::Http(e.to_string()))?;
        Ok(Self {
            http,
            discovery,
            timeout,
        })
    }

    /// Client with the configured request timeout (10s when unset)
    pub fn from_settings(discovery: Arc<DiscoveryContext>, settings: &ClientSettings) -> Result<Self> {
        let timeout = match settings.request_timeout_secs {
            0 => DEFAULT_REQUEST_TIMEOUT,
            secs => Duration::from_secs(secs),
        };
        Self::new(discovery, timeout)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn discovery(&self) -> &Arc<DiscoveryContext> {
        &self.discovery
    }

    /// POST a prepared request to `node`
    pub async fn request_session(
        &self,
        node: &NodeDescriptor,
        request: &SessionRequest,
    ) -> Result<BackendParams> {
        let url = format!("{}/session/create", node.address.trim_end_matches('/'));
        debug!("POST {}", url);

        let response = self.http.post(&url).json(request).send().await?;
        let status = response.status();
        let body: SessionResponse = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(BrokerError::Rejected {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or("request failed").to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        if !status.is_success() || !body.is_ok() {
            return Err(BrokerError::Rejected {
                status: status.as_u16(),
                message: body.message,
            });
        }
        body.backend_parameters
            .ok_or_else(|| BrokerError::MalformedInput("response carries no backend parameters".to_string()))
    }

    /// Pick a credential and a node, then request a session
    pub async fn connect(
        &self,
        store: &CredentialStore,
        params: &SessionParams,
        now: i64,
    ) -> Result<SessionOutcome> {
        let prepared = prepare_request(store, &params.issuer, params.backend, now)?;

        let node = self
            .discovery
            .find_node(
                params.pool.as_deref(),
                params.region.as_deref(),
                Some(params.backend.as_str()),
            )
            .await?;
        info!("Requesting {} session from {} ({})", params.backend, node.id, node.address);

        let parameters = self.request_session(&node, &prepared.request).await?;
        if parameters.kind() != params.backend {
            return Err(BrokerError::MalformedInput(format!(
                "asked for {}, node answered {}",
                params.backend,
                parameters.kind()
            )));
        }

        info!("Session granted by {}: {}", node.id, parameters.client_address());
        Ok(SessionOutcome {
            node,
            parameters,
            client_keypair: prepared.client_keypair,
        })
    }
}
