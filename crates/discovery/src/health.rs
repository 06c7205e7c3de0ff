//! Health table and background prober
//!
//! The prober dials every statically enabled node on a fixed interval and
//! overwrites that node's record with the result. Probes within a cycle run
//! concurrently; a slow or dead node only costs its own timeout.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use tunnelpass_core::{HealthRecord, NodeDescriptor};

use crate::gate::{GateState, StartGate};

pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Latest health record per node id
#[derive(Debug, Default)]
pub struct HealthTable {
    records: RwLock<HashMap<String, HealthRecord>>,
}

impl HealthTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node_id: &str) -> Option<HealthRecord> {
        self.records.read().get(node_id).cloned()
    }

    /// Replace the record for `record.node_id`
    pub fn commit(&self, record: HealthRecord) {
        self.records.write().insert(record.node_id.clone(), record);
    }

    /// Drop records for nodes no longer in `nodes`. Returns how many went.
    pub fn prune(&self, nodes: &[NodeDescriptor]) -> usize {
        let live: HashSet<&str> = nodes
            .iter()
            .filter(|n| n.statically_enabled)
            .map(|n| n.id.as_str())
            .collect();
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|id, _| live.contains(id.as_str()));
        before - records.len()
    }

    pub fn snapshot(&self) -> HashMap<String, HealthRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Supplies the nodes to probe at the start of each cycle
#[async_trait]
pub trait ProbeTargets: Send + Sync {
    async fn probe_targets(&self) -> Vec<NodeDescriptor>;
}

/// `host:port` a node's address resolves to, defaulting the port by scheme
pub fn dial_target(address: &str) -> Result<String, String> {
    let url = Url::parse(address.trim()).map_err(|e| format!("parse api url: {}", e))?;
    let host = url
        .host_str()
        .ok_or_else(|| format!("parse api url: no host in {}", address))?;
    let port = url
        .port_or_known_default()
        .unwrap_or(if url.scheme() == "https" { 443 } else { 80 });
    Ok(format!("{}:{}", host, port))
}

/// Dial one node and produce its new record
pub async fn probe_node(node: &NodeDescriptor, timeout: Duration) -> HealthRecord {
    let target = match dial_target(&node.address) {
        Ok(t) => t,
        Err(e) => return HealthRecord::unhealthy(&node.id, 0, e),
    };

    let started = Instant::now();
    let result = tokio::time::timeout(timeout, TcpStream::connect(target.as_str())).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let record = match result {
        Ok(Ok(_stream)) => HealthRecord::healthy(&node.id, latency_ms),
        Ok(Err(e)) => HealthRecord::unhealthy(&node.id, latency_ms, e.to_string()),
        Err(_) => HealthRecord::unhealthy(
            &node.id,
            latency_ms,
            format!("timed out after {}ms", timeout.as_millis()),
        ),
    };

    debug!(
        "probe {} ({}): healthy={} latency={}ms err={:?}",
        node.id, target, record.healthy, record.latency_ms, record.last_error
    );
    record
}

/// Probe every enabled node concurrently, committing each record as it lands.
/// Records for nodes that are no longer listed are dropped first.
pub async fn probe_cycle(nodes: &[NodeDescriptor], table: &HealthTable, timeout: Duration) {
    let pruned = table.prune(nodes);
    if pruned > 0 {
        debug!("dropped {} health records for departed nodes", pruned);
    }

    let mut probes = JoinSet::new();
    for node in nodes.iter().filter(|n| n.statically_enabled) {
        let node = node.clone();
        probes.spawn(async move { probe_node(&node, timeout).await });
    }
    while let Some(joined) = probes.join_next().await {
        if let Ok(record) = joined {
            table.commit(record);
        }
    }
}

/// Periodic background prober, started at most once
pub struct HealthProber {
    table: Arc<HealthTable>,
    interval: Duration,
    timeout: Duration,
    gate: StartGate,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthProber {
    pub fn new(table: Arc<HealthTable>, interval: Duration, timeout: Duration) -> Self {
        Self {
            table,
            interval: if interval.is_zero() { DEFAULT_PROBE_INTERVAL } else { interval },
            timeout,
            gate: StartGate::new(),
            shutdown_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub fn table(&self) -> &Arc<HealthTable> {
        &self.table
    }

    pub fn state(&self) -> GateState {
        self.gate.state()
    }

    /// Spawn the probe loop on the current Tokio runtime. Returns false if it
    /// was already started, or if called outside a runtime.
    pub fn start(&self, targets: Arc<dyn ProbeTargets>) -> bool {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Health prober not started: {}", e);
                return false;
            }
        };
        if !self.gate.try_begin() {
            return false;
        }

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let table = self.table.clone();
        let interval = self.interval;
        let timeout = self.timeout;

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                let nodes = targets.probe_targets().await;
                tokio::select! {
                    _ = probe_cycle(&nodes, &table, timeout) => {}
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Health prober stopped");
        });

        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.handle.lock() = Some(handle);

        // A concurrent shutdown() may have stopped the gate before the
        // handle was stored; stop whatever it could not see.
        if !self.gate.mark_running() {
            if let Some(tx) = self.shutdown_tx.lock().take() {
                let _ = tx.send(true);
            }
            if let Some(handle) = self.handle.lock().take() {
                handle.abort();
            }
            return false;
        }
        info!("Health prober started (interval={:?})", self.interval);
        true
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(&self) {
        self.gate.stop();
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    struct Fixed(Vec<NodeDescriptor>);

    #[async_trait]
    impl ProbeTargets for Fixed {
        async fn probe_targets(&self) -> Vec<NodeDescriptor> {
            self.0.clone()
        }
    }

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[test]
    fn test_dial_target_defaults() {
        assert_eq!(dial_target("http://localhost:9090").unwrap(), "localhost:9090");
        assert_eq!(dial_target("http://example.com").unwrap(), "example.com:80");
        assert_eq!(dial_target("https://example.com/api").unwrap(), "example.com:443");
        assert!(dial_target("not a url").is_err());
    }

    #[tokio::test]
    async fn test_probe_reachable_and_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up = format!("http://{}", listener.local_addr().unwrap());
        let down = format!("http://127.0.0.1:{}", closed_port().await);

        let table = HealthTable::new();
        let nodes = vec![
            NodeDescriptor::new("up", up, "local"),
            NodeDescriptor::new("down", down, "local"),
            NodeDescriptor::new("off", "http://127.0.0.1:1", "local").disabled(),
            NodeDescriptor::new("bad", "::::", "local"),
        ];
        probe_cycle(&nodes, &table, Duration::from_secs(1)).await;

        assert!(table.get("up").unwrap().healthy);
        let down = table.get("down").unwrap();
        assert!(!down.healthy);
        assert!(down.last_error.is_some());
        assert!(table.get("off").is_none());
        assert!(!table.get("bad").unwrap().healthy);
    }

    #[tokio::test]
    async fn test_commit_overwrites() {
        let table = HealthTable::new();
        table.commit(HealthRecord::unhealthy("n", 5, "refused"));
        table.commit(HealthRecord::healthy("n", 7));
        let record = table.get("n").unwrap();
        assert!(record.healthy);
        assert_eq!(record.latency_ms, 7);
        assert!(record.last_error.is_none());
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_shutdown_waits() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());
        let targets: Arc<dyn ProbeTargets> = Arc::new(Fixed(vec![NodeDescriptor::new("n", addr, "local")]));

        let prober = HealthProber::new(
            Arc::new(HealthTable::new()),
            Duration::from_millis(20),
            Duration::from_secs(1),
        );
        assert!(prober.start(targets.clone()));
        assert!(!prober.start(targets));
        assert_eq!(prober.state(), GateState::Running);

        for _ in 0..100 {
            if prober.table().get("n").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(prober.table().get("n").unwrap().healthy);

        prober.shutdown().await;
        assert_eq!(prober.state(), GateState::Stopped);
    }

    #[tokio::test]
    async fn test_slow_node_does_not_delay_others() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up = format!("http://{}", listener.local_addr().unwrap());
        let table = Arc::new(HealthTable::new());
        // TEST-NET-1 is never routed; the dial hangs or fails, never answers
        let nodes = vec![
            NodeDescriptor::new("dark", "http://192.0.2.1:9090", "local"),
            NodeDescriptor::new("up", up, "local"),
        ];
        let timeout = Duration::from_secs(3);

        let started = Instant::now();
        let cycle = {
            let table = table.clone();
            tokio::spawn(async move { probe_cycle(&nodes, &table, timeout).await })
        };

        while table.get("up").is_none() {
            assert!(
                started.elapsed() < Duration::from_secs(1),
                "reachable node waited on the dark one"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(table.get("up").unwrap().healthy);

        cycle.await.unwrap();
        assert!(started.elapsed() < timeout + Duration::from_secs(1));
        assert!(!table.get("dark").unwrap().healthy);
    }

    #[tokio::test]
    async fn test_cycle_prunes_departed_nodes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up = format!("http://{}", listener.local_addr().unwrap());
        let table = HealthTable::new();
        table.commit(HealthRecord::healthy("gone", 4));
        table.commit(HealthRecord::healthy("parked", 4));

        let nodes = vec![
            NodeDescriptor::new("up", up, "local"),
            NodeDescriptor::new("parked", "http://127.0.0.1:1", "local").disabled(),
        ];
        probe_cycle(&nodes, &table, Duration::from_secs(1)).await;

        assert!(table.get("up").is_some());
        assert!(table.get("gone").is_none());
        assert!(table.get("parked").is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_start_outside_runtime_is_refused() {
        let prober = HealthProber::new(
            Arc::new(HealthTable::new()),
            Duration::from_secs(30),
            Duration::from_secs(1),
        );
        let targets: Arc<dyn ProbeTargets> = Arc::new(Fixed(Vec::new()));
        assert!(!prober.start(targets));
        assert_eq!(prober.state(), GateState::NotStarted);
    }
}
