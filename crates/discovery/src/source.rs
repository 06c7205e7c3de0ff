use async_trait::async_trait;
use tunnelpass_core::NodeDescriptor;

use crate::gossip::GossipSource;
use crate::health::ProbeTargets;
use crate::selector::{SelectError, Selector};
use crate::static_source::StaticSource;

/// The closed set of node providers
pub enum DiscoverySource {
    Static(StaticSource),
    Gossip(GossipSource),
}

impl DiscoverySource {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Static(_) => "static",
            Self::Gossip(_) => "gossip",
        }
    }

    pub async fn list_nodes(&self) -> Vec<NodeDescriptor> {
        match self {
            Self::Static(source) => source.nodes().to_vec(),
            Self::Gossip(source) => source.list_nodes().await,
        }
    }

    /// Select from this source's current nodes
    pub async fn find_node(
        &self,
        selector: &Selector,
        region: Option<&str>,
        backend: Option<&str>,
    ) -> Result<NodeDescriptor, SelectError> {
        let nodes = self.list_nodes().await;
        selector.select(&nodes, region, backend)
    }

    pub async fn shutdown(&self) {
        if let Self::Gossip(source) = self {
            source.shutdown().await;
        }
    }
}

impl From<StaticSource> for DiscoverySource {
    fn from(source: StaticSource) -> Self {
        Self::Static(source)
    }
}

impl From<GossipSource> for DiscoverySource {
    fn from(source: GossipSource) -> Self {
        Self::Gossip(source)
    }
}

#[async_trait]
impl ProbeTargets for DiscoverySource {
    async fn probe_targets(&self) -> Vec<NodeDescriptor> {
        self.list_nodes().await
    }
}
