//! TunnelPass Network
//!
//! Publish/subscribe plumbing over signed, addressed envelopes.
//!
//! ## Messages
//!
//! - Node announcements (kind 38383): nodes advertise their session API,
//!   location and backends, scoped to a pool
//! - Credential deliveries (kind 4): an issuer hands a signed credential to
//!   a subscriber's identity
//! - Pricing (kind 30070): an issuer advertises plan prices
//!
//! The concrete relay network is behind the [`Transport`] trait;
//! [`MemoryTransport`] is the in-process implementation.

mod announcement;
mod delivery;
mod envelope;
mod pricing;
mod transport;

pub use announcement::{
    node_from_envelope, pool_matches, NodeAnnouncement, NODE_ANNOUNCEMENT_KIND,
};
pub use delivery::{
    credential_from_delivery, deliveries_filter, delivery_envelope, CREDENTIAL_DELIVERY_KIND,
    SUBSCRIPTION_TOPIC,
};
pub use envelope::{Envelope, Filter};
pub use pricing::{Pricing, PRICING_KIND, PRICING_TOPIC};
pub use transport::{MemoryTransport, MemoryTransportConfig, Subscription, Transport};

use thiserror::Error;
use tunnelpass_core::TunnelPassError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Transport unreachable: {0}")]
    Unreachable(String),

    #[error("Publish timed out")]
    Timeout,

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<NetworkError> for TunnelPassError {
    fn from(err: NetworkError) -> Self {
        match err {
            NetworkError::Unreachable(msg) => TunnelPassError::Unreachable(msg),
            NetworkError::Timeout => TunnelPassError::Timeout,
            NetworkError::InvalidEnvelope(msg) | NetworkError::Serialization(msg) => {
                TunnelPassError::MalformedInput(msg)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, NetworkError>;
