//! Gossip-fed node registry
//!
//! Consumes signed node announcements from the transport into a table keyed
//! by publisher identity. The listener starts lazily on first use. While the
//! table is empty every query is answered by the fallback source. Nodes that
//! stop announcing drop out after the node TTL.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tunnelpass_core::{unix_now, NodeDescriptor};
use tunnelpass_network::{
    node_from_envelope, pool_matches, Envelope, Filter, Transport, NODE_ANNOUNCEMENT_KIND,
};

use crate::gate::{GateState, StartGate};
use crate::static_source::StaticSource;

const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Ten heartbeats at the default announcement interval
pub const DEFAULT_NODE_TTL: Duration = Duration::from_secs(600);

/// A gossip-discovered node and the timestamp of its newest announcement
#[derive(Debug, Clone, PartialEq)]
pub struct GossipEntry {
    pub node: NodeDescriptor,
    pub seen_at: i64,
}

/// Announcement-driven node table with a static fallback
pub struct GossipSource {
    transport: Arc<dyn Transport>,
    pool: Option<String>,
    fallback: StaticSource,
    node_ttl: Duration,
    nodes: Arc<RwLock<Vec<GossipEntry>>>,
    gate: StartGate,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GossipSource {
    pub fn new(transport: Arc<dyn Transport>, pool: Option<String>, fallback: StaticSource) -> Self {
        let pool = pool.map(|p| p.trim().to_string()).filter(|p| !p.is_empty());
        if pool.is_none() {
            warn!("Gossip discovery has no pool scope; accepting announcements from every pool");
        }
        Self {
            transport,
            pool,
            fallback,
            node_ttl: DEFAULT_NODE_TTL,
            nodes: Arc::new(RwLock::new(Vec::new())),
            gate: StartGate::new(),
            shutdown_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    /// How long a node stays listed after its newest announcement
    pub fn with_node_ttl(mut self, ttl: Duration) -> Self {
        self.node_ttl = ttl;
        self
    }

    pub fn pool(&self) -> Option<&str> {
        self.pool.as_deref()
    }

    pub fn fallback(&self) -> &StaticSource {
        &self.fallback
    }

    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    /// Number of gossip-discovered nodes, excluding the fallback
    pub fn table_len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Current nodes: the gossip table, or the fallback while it is empty
    pub async fn list_nodes(&self) -> Vec<NodeDescriptor> {
        self.ensure_started().await;

        let nodes = self.live_nodes(unix_now());
        if nodes.is_empty() {
            debug!("Gossip table empty; using fallback registry");
            return self.fallback.nodes().to_vec();
        }
        nodes
    }

    /// Drop nodes silent for longer than the TTL and return the rest
    fn live_nodes(&self, now: i64) -> Vec<NodeDescriptor> {
        let cutoff = now.saturating_sub(i64::try_from(self.node_ttl.as_secs()).unwrap_or(i64::MAX));
        let mut table = self.nodes.write();
        let before = table.len();
        table.retain(|entry| entry.seen_at >= cutoff);
        if table.len() < before {
            debug!("expired {} silent gossip nodes", before - table.len());
        }
        table.iter().map(|entry| entry.node.clone()).collect()
    }

    /// Start the announcement listener unless it already started
    pub async fn ensure_started(&self) {
        if !self.gate.try_begin() {
            return;
        }

        let mut filter = Filter::new().kind(NODE_ANNOUNCEMENT_KIND);
        if let Some(pool) = &self.pool {
            filter = filter.tag("pool", pool.clone());
        }

        let subscription =
            match tokio::time::timeout(SUBSCRIBE_TIMEOUT, self.transport.subscribe(filter)).await {
                Ok(Ok(subscription)) => subscription,
                Ok(Err(e)) => {
                    warn!("Gossip discovery unavailable, serving fallback: {}", e);
                    self.gate.abort();
                    return;
                }
                Err(_) => {
                    warn!("Gossip subscribe timed out, serving fallback");
                    self.gate.abort();
                    return;
                }
            };

        if self.gate.state() == GateState::Stopped {
            debug!("Gossip discovery stopped while subscribing; listener not started");
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let nodes = self.nodes.clone();
        let pool = self.pool.clone();
        let mut subscription = subscription;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = subscription.next() => match next {
                        Some(envelope) => {
                            merge_announcement(&nodes, pool.as_deref(), &envelope);
                        }
                        None => {
                            debug!("Announcement stream closed; gossip listener ended");
                            break;
                        }
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.handle.lock() = Some(handle);

        // shutdown() can land between the check above and here
        if !self.gate.mark_running() {
            self.stop_listener().await;
            return;
        }
        info!(
            "Gossip discovery started (kind={}, pool={})",
            NODE_ANNOUNCEMENT_KIND,
            self.pool.as_deref().unwrap_or("*")
        );
    }

    pub async fn shutdown(&self) {
        self.gate.stop();
        self.stop_listener().await;
    }

    async fn stop_listener(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// Verify, scope and upsert one announcement. Returns true if the table changed.
///
/// An announcement older than the one already held for its publisher is
/// ignored, so replayed history never rolls a node back.
pub fn merge_announcement(
    table: &RwLock<Vec<GossipEntry>>,
    pool: Option<&str>,
    envelope: &Envelope,
) -> bool {
    if envelope.kind != NODE_ANNOUNCEMENT_KIND {
        return false;
    }
    if let Err(e) = envelope.verify() {
        debug!("ignoring announcement {}: {}", envelope.id, e);
        return false;
    }
    if !pool_matches(envelope, pool) {
        debug!("ignoring announcement {}: outside pool scope", envelope.id);
        return false;
    }
    let node = match node_from_envelope(envelope) {
        Ok(node) => node,
        Err(e) => {
            debug!("ignoring announcement {}: {}", envelope.id, e);
            return false;
        }
    };

    let entry = GossipEntry {
        node,
        seen_at: envelope.created_at,
    };
    let mut nodes = table.write();
    match nodes.iter_mut().find(|e| e.node.id == entry.node.id) {
        Some(existing) if existing.seen_at > entry.seen_at => {
            debug!("ignoring stale announcement {}", envelope.id);
            return false;
        }
        Some(existing) => {
            debug!("updated node {}", entry.node.id);
            *existing = entry;
        }
        None => {
            nodes.push(entry);
            debug!("now tracking {} gossip nodes", nodes.len());
        }
    }
    true
}
