//! Publish/subscribe transport
//!
//! The relay network itself is an external collaborator. Components only
//! see [`Transport`]: publish a signed envelope, or subscribe with a
//! [`Filter`] and receive matching envelopes in arrival order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::envelope::{Envelope, Filter};
use crate::{NetworkError, Result};

/// Capability every relay transport provides
#[async_trait]
pub trait Transport: Send + Sync {
    /// Publish a signed envelope
    async fn publish(&self, envelope: Envelope) -> Result<()>;

    /// Subscribe to envelopes matching `filter`, including matching history
    async fn subscribe(&self, filter: Filter) -> Result<Subscription>;
}

/// Stream of envelopes for one subscription
pub struct Subscription {
    rx: mpsc::Receiver<Envelope>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Envelope>) -> Self {
        Self { rx }
    }

    /// Next envelope, or `None` once the transport closes the subscription
    pub async fn next(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }
}

/// In-process transport configuration
#[derive(Debug, Clone)]
pub struct MemoryTransportConfig {
    /// Envelopes retained for replay to late subscribers
    pub history_limit: usize,
    /// Per-subscription buffer
    pub channel_capacity: usize,
    /// Bound on delivering one envelope to one subscriber
    pub send_timeout: Duration,
}

impl Default for MemoryTransportConfig {
    fn default() -> Self {
        Self {
            history_limit: 256,
            channel_capacity: 256,
            send_timeout: Duration::from_secs(2),
        }
    }
}

struct Subscriber {
    filter: Filter,
    tx: mpsc::Sender<Envelope>,
}

struct Inner {
    history: VecDeque<Envelope>,
    subscribers: Vec<Subscriber>,
    online: bool,
}

/// Relay-like transport living in one process.
///
/// Behaves like a single relay: it rejects envelopes with bad signatures,
/// keeps a bounded history (replaceable kinds keep only the newest envelope
/// per author) and replays matching history on subscribe.
#[derive(Clone)]
pub struct MemoryTransport {
    config: MemoryTransportConfig,
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::with_config(MemoryTransportConfig::default())
    }

    pub fn with_config(config: MemoryTransportConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                history: VecDeque::new(),
                subscribers: Vec::new(),
                online: true,
            })),
        }
    }

    /// Toggle reachability; offline transports fail every call with
    /// `Unreachable` and close open subscriptions
    pub fn set_online(&self, online: bool) {
        let mut inner = self.inner.lock();
        inner.online = online;
        if !online {
            inner.subscribers.clear();
        }
    }

    /// Number of envelopes currently retained
    pub fn history_len(&self) -> usize {
        self.inner.lock().history.len()
    }

    fn is_replaceable(kind: u32) -> bool {
        (30_000..40_000).contains(&kind)
    }

    fn remember(&self, inner: &mut Inner, envelope: &Envelope) {
        if Self::is_replaceable(envelope.kind) {
            inner
                .history
                .retain(|e| !(e.kind == envelope.kind && e.author == envelope.author));
        }
        inner.history.push_back(envelope.clone());
        while inner.history.len() > self.config.history_limit {
            inner.history.pop_front();
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, envelope: Envelope) -> Result<()> {
        envelope.verify()?;

        let targets: Vec<mpsc::Sender<Envelope>> = {
            let mut inner = self.inner.lock();
            if !inner.online {
                return Err(NetworkError::Unreachable("memory transport offline".to_string()));
            }
            self.remember(&mut inner, &envelope);
            inner
                .subscribers
                .iter()
                .filter(|s| s.filter.matches(&envelope))
                .map(|s| s.tx.clone())
                .collect()
        };

        debug!(
            "Publishing envelope {} (kind={}) to {} subscribers",
            &envelope.id[..8],
            envelope.kind,
            targets.len()
        );

        for tx in targets {
            match tokio::time::timeout(self.config.send_timeout, tx.send(envelope.clone())).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => debug!("Dropping closed subscriber"),
                Err(_) => warn!("Subscriber too slow, skipped envelope {}", &envelope.id[..8]),
            }
        }

        self.inner.lock().subscribers.retain(|s| !s.tx.is_closed());
        Ok(())
    }

    async fn subscribe(&self, filter: Filter) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let mut inner = self.inner.lock();
        if !inner.online {
            return Err(NetworkError::Unreachable("memory transport offline".to_string()));
        }

        for envelope in inner.history.iter().filter(|e| filter.matches(e)) {
            if tx.try_send(envelope.clone()).is_err() {
                warn!("Subscription buffer full during replay");
                break;
            }
        }
        inner.subscribers.push(Subscriber { filter, tx });
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::tag;
    use tunnelpass_crypto::SigningKeypair;

    fn envelope(kp: &SigningKeypair, kind: u32, content: &str) -> Envelope {
        Envelope::sign(kp, kind, vec![tag("t", "test")], content, 1_700_000_000).unwrap()
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscriber() {
        let transport = MemoryTransport::new();
        let kp = SigningKeypair::generate();

        let mut sub = transport.subscribe(Filter::new().kind(1)).await.unwrap();
        let mut other = transport.subscribe(Filter::new().kind(2)).await.unwrap();

        transport.publish(envelope(&kp, 1, "hello")).await.unwrap();

        let got = sub.next().await.unwrap();
        assert_eq!(got.content, "hello");
        assert!(tokio::time::timeout(Duration::from_millis(50), other.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_history_replayed_to_late_subscriber() {
        let transport = MemoryTransport::new();
        let kp = SigningKeypair::generate();
        transport.publish(envelope(&kp, 1, "early")).await.unwrap();

        let mut sub = transport.subscribe(Filter::new().kind(1)).await.unwrap();
        assert_eq!(sub.next().await.unwrap().content, "early");
    }

    #[tokio::test]
    async fn test_replaceable_kind_keeps_latest_per_author() {
        let transport = MemoryTransport::new();
        let kp = SigningKeypair::generate();
        transport.publish(envelope(&kp, 38383, "v1")).await.unwrap();
        transport.publish(envelope(&kp, 38383, "v2")).await.unwrap();
        assert_eq!(transport.history_len(), 1);

        let mut sub = transport.subscribe(Filter::new().kind(38383)).await.unwrap();
        assert_eq!(sub.next().await.unwrap().content, "v2");
    }

    #[tokio::test]
    async fn test_rejects_tampered_envelope() {
        let transport = MemoryTransport::new();
        let kp = SigningKeypair::generate();
        let mut env = envelope(&kp, 1, "ok");
        env.content = "tampered".to_string();

        assert!(matches!(
            transport.publish(env).await,
            Err(NetworkError::InvalidEnvelope(_))
        ));
        assert_eq!(transport.history_len(), 0);
    }

    #[tokio::test]
    async fn test_offline_transport_is_unreachable() {
        let transport = MemoryTransport::new();
        let kp = SigningKeypair::generate();
        transport.set_online(false);

        assert!(matches!(
            transport.publish(envelope(&kp, 1, "x")).await,
            Err(NetworkError::Unreachable(_))
        ));
        assert!(matches!(
            transport.subscribe(Filter::new()).await,
            Err(NetworkError::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let transport = MemoryTransport::with_config(MemoryTransportConfig {
            history_limit: 3,
            ..Default::default()
        });
        let kp = SigningKeypair::generate();
        for i in 0..5 {
            transport.publish(envelope(&kp, 1, &format!("m{}", i))).await.unwrap();
        }
        assert_eq!(transport.history_len(), 3);
    }
}
