//! Node selection
//!
//! `select` = backend filter, then a stable health ranking, then a soft
//! region preference.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use tunnelpass_core::{HealthRecord, NodeDescriptor, TunnelPassError, AUTO_REGION, DEFAULT_BACKEND};

use crate::health::HealthTable;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("no nodes support backend {0}")]
    NoBackendSupport(String),
}

impl From<SelectError> for TunnelPassError {
    fn from(err: SelectError) -> Self {
        TunnelPassError::NoCandidates(err.to_string())
    }
}

/// Enabled nodes serving `backend`, original order preserved
pub fn filter_by_backend(candidates: &[NodeDescriptor], backend: &str) -> Vec<NodeDescriptor> {
    candidates
        .iter()
        .filter(|n| n.statically_enabled && n.supports(backend))
        .cloned()
        .collect()
}

/// Sort key: never-probed first, then healthy, then unhealthy; latency
/// ascending within each class.
fn rank_key(record: Option<&HealthRecord>) -> (u8, u64) {
    match record {
        None => (0, 0),
        Some(r) if r.healthy => (1, r.latency_ms),
        Some(r) => (2, r.latency_ms),
    }
}

/// Stable health ranking against one snapshot of the table
pub fn rank_with(mut nodes: Vec<NodeDescriptor>, health: &HashMap<String, HealthRecord>) -> Vec<NodeDescriptor> {
    nodes.sort_by_key(|n| rank_key(health.get(&n.id)));
    nodes
}

/// First ranked node in `region`, else the top-ranked node.
/// Empty or `"auto"` region means no preference.
pub fn resolve_region<'a>(ranked: &'a [NodeDescriptor], region: &str) -> Option<&'a NodeDescriptor> {
    let region = region.trim();
    if region.is_empty() || region.eq_ignore_ascii_case(AUTO_REGION) {
        return ranked.first();
    }
    ranked
        .iter()
        .find(|n| n.in_region(region))
        .or_else(|| ranked.first())
}

/// Ranks and selects nodes using the shared health table
#[derive(Debug, Clone)]
pub struct Selector {
    health: Arc<HealthTable>,
}

impl Selector {
    pub fn new(health: Arc<HealthTable>) -> Self {
        Self { health }
    }

    pub fn health(&self) -> &Arc<HealthTable> {
        &self.health
    }

    pub fn rank(&self, nodes: Vec<NodeDescriptor>) -> Vec<NodeDescriptor> {
        rank_with(nodes, &self.health.snapshot())
    }

    /// Pick one node for `backend` (default openvpn), preferring `region`
    pub fn select(
        &self,
        candidates: &[NodeDescriptor],
        region: Option<&str>,
        backend: Option<&str>,
    ) -> Result<NodeDescriptor, SelectError> {
        let backend = backend
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BACKEND);

        let eligible = filter_by_backend(candidates, backend);
        if eligible.is_empty() {
            return Err(SelectError::NoBackendSupport(backend.to_string()));
        }

        let ranked = self.rank(eligible);
        let region = region.unwrap_or_default();
        let chosen = resolve_region(&ranked, region)
            .cloned()
            .ok_or_else(|| SelectError::NoBackendSupport(backend.to_string()))?;

        debug!(
            "selected {} ({}) for backend={} region={:?} among {}",
            chosen.id,
            chosen.region,
            backend,
            region,
            ranked.len()
        );
        Ok(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, region: &str) -> NodeDescriptor {
        NodeDescriptor::new(id, format!("http://{}.example:9090", id), region)
    }

    fn ids(nodes: &[NodeDescriptor]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    fn selector() -> Selector {
        Selector::new(Arc::new(HealthTable::new()))
    }

    #[test]
    fn test_rank_orders_by_health_then_latency() {
        let selector = selector();
        selector.health().commit(HealthRecord::unhealthy("A", 50, "refused"));
        selector.health().commit(HealthRecord::healthy("C", 10));
        selector.health().commit(HealthRecord::healthy("D", 30));

        let nodes = vec![node("A", "x"), node("B", "x"), node("C", "x"), node("D", "x")];
        let ranked = selector.rank(nodes.clone());
        assert_eq!(ids(&ranked), vec!["B", "C", "D", "A"]);

        let again = selector.rank(nodes);
        assert_eq!(ids(&again), ids(&ranked));
    }

    #[test]
    fn test_rank_is_stable_on_ties() {
        let selector = selector();
        selector.health().commit(HealthRecord::healthy("n2", 10));
        selector.health().commit(HealthRecord::healthy("n3", 10));
        let nodes = vec![node("n1", "x"), node("n3", "x"), node("n2", "x"), node("n4", "x")];
        assert_eq!(ids(&selector.rank(nodes)), vec!["n1", "n4", "n3", "n2"]);
    }

    #[test]
    fn test_region_resolution() {
        let selector = selector();
        let nodes = vec![node("N1", "us-east"), node("N2", "eu-west")];

        assert_eq!(selector.select(&nodes, Some("eu-west"), None).unwrap().id, "N2");
        assert_eq!(selector.select(&nodes, Some("EU-WEST "), None).unwrap().id, "N2");
        assert_eq!(selector.select(&nodes, Some(""), None).unwrap().id, "N1");
        assert_eq!(selector.select(&nodes, Some("auto"), None).unwrap().id, "N1");
        assert_eq!(selector.select(&nodes, None, None).unwrap().id, "N1");
        assert_eq!(selector.select(&nodes, Some("ap-south"), None).unwrap().id, "N1");
    }

    #[test]
    fn test_region_match_wins_over_ranking() {
        let selector = selector();
        selector.health().commit(HealthRecord::healthy("N1", 1));
        selector.health().commit(HealthRecord::unhealthy("N2", 900, "timeout"));
        let nodes = vec![node("N1", "us-east"), node("N2", "eu-west")];
        assert_eq!(selector.select(&nodes, Some("eu-west"), None).unwrap().id, "N2");
    }

    #[test]
    fn test_backend_filter() {
        let selector = selector();
        let nodes = vec![
            node("ovpn", "x"),
            node("wg", "x").with_backends(["wireguard"]),
            node("off", "x").with_backends(["wireguard"]).disabled(),
        ];

        assert_eq!(selector.select(&nodes, None, Some("WireGuard")).unwrap().id, "wg");
        assert_eq!(selector.select(&nodes, None, Some("")).unwrap().id, "ovpn");
        assert_eq!(
            selector.select(&nodes, None, Some("ikev2")),
            Err(SelectError::NoBackendSupport("ikev2".to_string()))
        );
        assert!(matches!(
            TunnelPassError::from(SelectError::NoBackendSupport("x".into())),
            TunnelPassError::NoCandidates(_)
        ));
    }

    #[test]
    fn test_disabled_nodes_never_selected() {
        let selector = selector();
        let nodes = vec![node("only", "x").disabled()];
        assert!(selector.select(&nodes, None, None).is_err());
    }
}
