//! Discovery facade
//!
//! One context per process, threaded through construction to whatever needs
//! node selection. The active source may be replaced only during startup,
//! before the first query; every query re-derives its answer from the
//! source's current table and the latest health records.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};
use tunnelpass_core::NodeDescriptor;
use tunnelpass_network::Transport;
use tunnelpass_settings::DiscoverySettings;

use crate::gossip::GossipSource;
use crate::health::{HealthProber, HealthTable, DEFAULT_PROBE_INTERVAL, DEFAULT_PROBE_TIMEOUT};
use crate::selector::Selector;
use crate::source::DiscoverySource;
use crate::static_source::StaticSource;
use crate::{DiscoveryError, Result};

/// Discovery tuning
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
}

impl DiscoveryConfig {
    /// Zero values fall back to the defaults
    pub fn from_settings(settings: &DiscoverySettings) -> Self {
        let secs_or = |secs: u64, default: Duration| {
            if secs == 0 {
                default
            } else {
                Duration::from_secs(secs)
            }
        };
        Self {
            probe_interval: secs_or(settings.probe_interval_secs, DEFAULT_PROBE_INTERVAL),
            probe_timeout: secs_or(settings.probe_timeout_secs, DEFAULT_PROBE_TIMEOUT),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_interval: DEFAULT_PROBE_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

pub struct DiscoveryContext {
    source: RwLock<Arc<DiscoverySource>>,
    sealed: AtomicBool,
    selector: Selector,
    prober: HealthProber,
}

impl Default for DiscoveryContext {
    fn default() -> Self {
        Self::new(DiscoveryConfig::default())
    }
}

impl DiscoveryContext {
    /// Context backed by the compiled-in static registry
    pub fn new(config: DiscoveryConfig) -> Self {
        Self::with_source(StaticSource::builtin().into(), config)
    }

    pub fn with_source(source: DiscoverySource, config: DiscoveryConfig) -> Self {
        let health = Arc::new(HealthTable::new());
        Self {
            source: RwLock::new(Arc::new(source)),
            sealed: AtomicBool::new(false),
            selector: Selector::new(health.clone()),
            prober: HealthProber::new(health, config.probe_interval, config.probe_timeout),
        }
    }

    /// Context for a configured process.
    ///
    /// With a relay transport, discovery follows announcements scoped to
    /// `settings.pool` and falls back to the builtin registry. `relays` names
    /// the endpoints that transport was connected to; without one the
    /// builtin registry is used alone.
    pub fn from_settings(
        settings: &DiscoverySettings,
        transport: Option<Arc<dyn Transport>>,
    ) -> Self {
        let config = DiscoveryConfig::from_settings(settings);
        match transport {
            Some(transport) => {
                if !settings.relays.is_empty() {
                    info!("Gossip discovery via {}", settings.relays.join(", "));
                }
                let gossip = GossipSource::new(transport, settings.pool.clone(), StaticSource::builtin());
                Self::with_source(gossip.into(), config)
            }
            None => {
                if !settings.relays.is_empty() {
                    warn!(
                        "{} relays configured but no transport supplied; using the builtin registry",
                        settings.relays.len()
                    );
                }
                Self::new(config)
            }
        }
    }

    /// Replace the active source. Only allowed before the first query.
    pub fn set_source(&self, source: DiscoverySource) -> Result<()> {
        let mut active = self.source.write();
        if self.sealed.load(Ordering::Acquire) {
            return Err(DiscoveryError::SourceSealed);
        }
        info!("Discovery source set to {}", source.name());
        *active = Arc::new(source);
        Ok(())
    }

    pub fn source_name(&self) -> &'static str {
        self.source.read().name()
    }

    pub fn health(&self) -> &Arc<HealthTable> {
        self.selector.health()
    }

    fn active(&self) -> Arc<DiscoverySource> {
        self.sealed.store(true, Ordering::Release);
        self.source.read().clone()
    }

    /// Select a node for `backend`, preferring `region`.
    ///
    /// `pool` is fixed when a gossip source is built; a differing value here
    /// is logged and otherwise ignored.
    pub async fn find_node(
        &self,
        pool: Option<&str>,
        region: Option<&str>,
        backend: Option<&str>,
    ) -> Result<NodeDescriptor> {
        let source = self.active();
        if let (Some(requested), DiscoverySource::Gossip(gossip)) = (pool, source.as_ref()) {
            if gossip.pool() != Some(requested) {
                debug!(
                    "find_node pool {} differs from configured pool {:?}",
                    requested,
                    gossip.pool()
                );
            }
        }
        Ok(source.find_node(&self.selector, region, backend).await?)
    }

    pub async fn list_nodes(&self) -> Vec<NodeDescriptor> {
        self.active().list_nodes().await
    }

    pub fn probe_interval(&self) -> Duration {
        self.prober.interval()
    }

    pub fn probe_timeout(&self) -> Duration {
        self.prober.timeout()
    }

    /// Start background probing of the active source. Idempotent. Must be
    /// called from within a Tokio runtime; returns false otherwise.
    pub fn start_health_probe(&self) -> bool {
        let targets = self.active();
        self.prober.start(targets)
    }

    /// Stop background tasks and wait for them
    pub async fn shutdown(&self) {
        self.prober.shutdown().await;
        let source = self.source.read().clone();
        source.shutdown().await;
        debug!("Discovery shut down");
    }
}
