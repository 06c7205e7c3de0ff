//! TunnelPass Session Broker
//!
//! The control-plane handshake between a client and a relay node.
//!
//! ## Client side
//!
//! 1. Pick the newest valid credential for the target issuer
//! 2. Select a node through the discovery facade
//! 3. Generate an ephemeral tunnel keypair if the backend needs one
//! 4. POST the request to the node's `/session/create`
//!
//! ## Node side
//!
//! 1. Issuer allow-list
//! 2. Credential verification
//! 3. Address allocation (serialized, applied to the tunnel as a unit)
//! 4. Backend-specific response parameters

mod allocator;
mod client;
mod node;
mod server;
mod service;

pub use allocator::{AddressPool, Ipv4Cidr, PeerApplier};
pub use client::{credential_file, prepare_request, PreparedRequest, SessionClient, SessionOutcome, SessionParams};
pub use node::{NodeBroker, NodeBrokerConfig, OpenVpnEndpoint, WireGuardEndpoint};
pub use server::{router, status_for};
pub use service::{NodeAnnouncer, NodeService};

use thiserror::Error;
use tunnelpass_core::TunnelPassError;
use tunnelpass_credential::VerifyError;
use tunnelpass_discovery::DiscoveryError;
use tunnelpass_network::NetworkError;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("malformed request: {0}")]
    MalformedInput(String),

    #[error("issuer not allowed: {0}")]
    Forbidden(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(#[from] VerifyError),

    #[error("address pool exhausted")]
    PoolExhausted,

    #[error("failed to apply peer: {0}")]
    Apply(String),

    #[error("no valid credential for issuer {0}")]
    NoValidCredential(String),

    #[error("discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("session rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("request timed out")]
    Timeout,

    #[error("node unreachable: {0}")]
    Unreachable(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for BrokerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BrokerError::Timeout
        } else if err.is_connect() {
            BrokerError::Unreachable(err.to_string())
        } else {
            BrokerError::Http(err.to_string())
        }
    }
}

impl From<BrokerError> for TunnelPassError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::InvalidCredential(e) => e.into(),
            BrokerError::Discovery(e) => e.into(),
            BrokerError::Network(e) => e.into(),
            BrokerError::Forbidden(_) => TunnelPassError::Unauthorized(err.to_string()),
            BrokerError::PoolExhausted | BrokerError::Apply(_) => {
                TunnelPassError::ResourceExhausted(err.to_string())
            }
            BrokerError::NoValidCredential(_) => TunnelPassError::NoValidCredential,
            BrokerError::Rejected { status, message } => match status {
                400 => TunnelPassError::MalformedInput(message),
                403 => TunnelPassError::Unauthorized(message),
                503 => TunnelPassError::ResourceExhausted(message),
                _ => TunnelPassError::Unreachable(message),
            },
            BrokerError::Timeout => TunnelPassError::Timeout,
            BrokerError::Unreachable(msg) | BrokerError::Http(msg) => {
                TunnelPassError::Unreachable(msg)
            }
            BrokerError::Io(e) => TunnelPassError::Unreachable(e.to_string()),
            BrokerError::MalformedInput(msg) | BrokerError::Config(msg) => {
                TunnelPassError::MalformedInput(msg)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        let forbidden: TunnelPassError = BrokerError::Forbidden("ab".into()).into();
        assert!(matches!(forbidden, TunnelPassError::Unauthorized(_)));

        let expired: TunnelPassError =
            BrokerError::InvalidCredential(VerifyError::Expired { expires_at: 1 }).into();
        assert!(matches!(expired, TunnelPassError::Unauthorized(_)));

        let exhausted: TunnelPassError = BrokerError::PoolExhausted.into();
        assert!(matches!(exhausted, TunnelPassError::ResourceExhausted(_)));

        let none: TunnelPassError = BrokerError::NoValidCredential("ab".into()).into();
        assert_eq!(none, TunnelPassError::NoValidCredential);

        let rejected: TunnelPassError = BrokerError::Rejected {
            status: 403,
            message: "invalid credential: bad signature".into(),
        }
        .into();
        assert_eq!(
            rejected,
            TunnelPassError::Unauthorized("invalid credential: bad signature".into())
        );
    }

    #[test]
    fn test_invalid_credential_message_carries_reason() {
        let err = BrokerError::InvalidCredential(VerifyError::BadSignature);
        assert_eq!(err.to_string(), "invalid credential: bad signature");
    }
}
