//! TunnelPass Credentials
//!
//! Issuance, verification and local storage of subscription credentials.
//!
//! ## Flow
//!
//! 1. A payment event reaches the [`IssuanceService`]
//! 2. The [`CredentialAuthority`] signs a time-limited payload for the payer
//! 3. The credential is delivered to the payer's identity over the transport
//! 4. The payer's [`CredentialListener`] upserts it into a [`CredentialStore`]
//!    and persists it
//! 5. A node runs [`verify`] on every session request

mod authority;
mod issuance;
mod listener;
mod persist;
mod pricing;
mod store;
mod verifier;

pub use authority::{CredentialAuthority, DEFAULT_TIER};
pub use issuance::{IssuanceOutcome, IssuanceService, PaymentEvent};
pub use listener::CredentialListener;
pub use persist::{CredentialFile, JsonCredentialFile};
pub use pricing::PricingAnnouncer;
pub use store::CredentialStore;
pub use verifier::{verify, VerifyError};

use thiserror::Error;
use tunnelpass_core::TunnelPassError;
use tunnelpass_network::NetworkError;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Invalid recipient identity: {0}")]
    InvalidRecipient(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Listener already running")]
    AlreadyRunning,
}

impl From<CredentialError> for TunnelPassError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Verify(e) => e.into(),
            CredentialError::Network(e) => e.into(),
            CredentialError::InvalidRecipient(msg) | CredentialError::Serialization(msg) => {
                TunnelPassError::MalformedInput(msg)
            }
            CredentialError::Io(e) => TunnelPassError::MalformedInput(e.to_string()),
            CredentialError::AlreadyRunning => {
                TunnelPassError::MalformedInput("listener already running".to_string())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CredentialError>;
