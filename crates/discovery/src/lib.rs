//! TunnelPass Discovery
//!
//! Finds a relay node for a client.
//!
//! ## Pieces
//!
//! - [`StaticSource`]: compiled-in registry
//! - [`GossipSource`]: registry fed by signed node announcements, falling
//!   back to a static registry while empty
//! - [`HealthProber`]: background reachability probing into a [`HealthTable`]
//! - [`Selector`]: backend filter, health ranking, region preference
//! - [`DiscoveryContext`]: the facade callers hold

mod context;
mod gate;
mod gossip;
mod health;
mod selector;
mod source;
mod static_source;

pub use context::{DiscoveryConfig, DiscoveryContext};
pub use gate::{GateState, StartGate};
pub use gossip::{merge_announcement, GossipEntry, GossipSource, DEFAULT_NODE_TTL};
pub use health::{
    dial_target, probe_cycle, probe_node, HealthProber, HealthTable, ProbeTargets,
    DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT,
};
pub use selector::{filter_by_backend, rank_with, resolve_region, SelectError, Selector};
pub use source::DiscoverySource;
pub use static_source::StaticSource;

use thiserror::Error;
use tunnelpass_core::TunnelPassError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("Discovery source can only be replaced before the first query")]
    SourceSealed,
}

impl From<DiscoveryError> for TunnelPassError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::Select(e) => e.into(),
            DiscoveryError::SourceSealed => TunnelPassError::MalformedInput(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
