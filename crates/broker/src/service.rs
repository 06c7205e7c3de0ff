//! Node runtime: session API plus announcement heartbeat

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tunnelpass_core::unix_now;
use tunnelpass_crypto::SigningKeypair;
use tunnelpass_network::{NodeAnnouncement, Transport};
use tunnelpass_settings::NodeSettings;

use crate::node::NodeBroker;
use crate::server::router;
use crate::Result;

/// Publishes this node's announcement to the gossip feed
pub struct NodeAnnouncer {
    keypair: SigningKeypair,
    transport: Arc<dyn Transport>,
    announcement: NodeAnnouncement,
    pool: Option<String>,
    interval: Duration,
}

impl NodeAnnouncer {
    pub fn new(
        keypair: SigningKeypair,
        transport: Arc<dyn Transport>,
        announcement: NodeAnnouncement,
        pool: Option<String>,
    ) -> Self {
        Self {
            keypair,
            transport,
            announcement,
            pool,
            interval: Duration::from_secs(60),
        }
    }

    /// Announcement for a configured node. Without a public host the API
    /// address is filled in from the bound listener.
    pub fn from_settings(
        settings: &NodeSettings,
        broker: &NodeBroker,
        keypair: SigningKeypair,
        transport: Arc<dyn Transport>,
        pool: Option<String>,
    ) -> Self {
        let port = settings
            .listen_addr
            .parse::<SocketAddr>()
            .map(|a| a.port())
            .unwrap_or_default();
        let api_address = match (&settings.public_host, port) {
            (Some(host), port) if port != 0 => format!("http://{}:{}", host, port),
            _ => String::new(),
        };

        let mut announcement = NodeAnnouncement::new(api_address, settings.region.clone());
        announcement.backends = Some(broker.config().backend_names());
        announcement.version = Some(env!("CARGO_PKG_VERSION").to_string());

        Self::new(keypair, transport, announcement, pool)
            .with_interval(Duration::from_secs(settings.announce_interval_secs.max(1)))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn publisher_key(&self) -> String {
        self.keypair.public_key_hex()
    }

    pub fn announcement(&self) -> &NodeAnnouncement {
        &self.announcement
    }

    pub async fn announce(&self) -> Result<()> {
        let envelope = self
            .announcement
            .clone()
            .into_envelope(&self.keypair, self.pool.as_deref(), unix_now())?;
        self.transport.publish(envelope).await?;
        debug!("Announced {} as {}", self.announcement.api_address, self.publisher_key());
        Ok(())
    }
}

/// A running node. Dropping it without [`NodeService::shutdown`] leaves the
/// tasks running until the runtime stops.
pub struct NodeService {
    local_addr: SocketAddr,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl NodeService {
    /// Bind `listen_addr`, serve the session API and, when given, start the
    /// announcement heartbeat
    pub async fn start(
        broker: Arc<NodeBroker>,
        listen_addr: &str,
        announcer: Option<NodeAnnouncer>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        let mut server_rx = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            let result = axum::serve(listener, router(broker))
                .with_graceful_shutdown(async move {
                    let _ = server_rx.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = result {
                error!("Session API stopped: {}", e);
            }
        }));
        info!("Session API listening on {}", local_addr);

        if let Some(mut announcer) = announcer {
            if announcer.announcement.api_address.is_empty() {
                announcer.announcement.api_address = format!("http://{}", local_addr);
            }
            let mut rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(announcer.interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(e) = announcer.announce().await {
                                warn!("Node announcement failed: {}", e);
                            }
                        }
                        _ = rx.changed() => break,
                    }
                }
            }));
        }

        Ok(Self {
            local_addr,
            shutdown_tx,
            handles,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `http://<local addr>`
    pub fn base_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    /// Signal every task and wait for them to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Node on {} stopped", self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnelpass_network::{node_from_envelope, Filter, MemoryTransport, NODE_ANNOUNCEMENT_KIND};

    fn broker() -> Arc<NodeBroker> {
        Arc::new(NodeBroker::from_settings(&NodeSettings::default()).unwrap())
    }

    #[tokio::test]
    async fn test_service_serves_and_stops() {
        let service = NodeService::start(broker(), "127.0.0.1:0", None).await.unwrap();
        let url = format!("{}/health", service.base_url());

        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        service.shutdown().await;
        assert!(reqwest::get(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_announces_bound_address() {
        let transport = MemoryTransport::new();
        let keypair = SigningKeypair::generate();
        let node_broker = broker();
        let announcer = NodeAnnouncer::from_settings(
            &NodeSettings::default(),
            &node_broker,
            keypair.clone(),
            Arc::new(transport.clone()),
            Some("pool-a".to_string()),
        );
        assert!(announcer.announcement().api_address.is_empty());

        let mut sub = transport
            .subscribe(Filter::new().kind(NODE_ANNOUNCEMENT_KIND))
            .await
            .unwrap();
        let service = NodeService::start(node_broker, "127.0.0.1:0", Some(announcer))
            .await
            .unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(envelope.first_tag("pool"), Some("pool-a"));
        let node = node_from_envelope(&envelope).unwrap();
        assert_eq!(node.id, keypair.public_key_hex());
        assert_eq!(node.address, service.base_url());
        assert_eq!(node.region, "local");
        assert!(node.supports("openvpn"));

        service.shutdown().await;
    }

    #[test]
    fn test_public_host_announcement() {
        let settings = NodeSettings {
            public_host: Some("203.0.113.7".to_string()),
            listen_addr: "0.0.0.0:9090".to_string(),
            ..Default::default()
        };
        let node_broker = NodeBroker::from_settings(&settings).unwrap();
        let announcer = NodeAnnouncer::from_settings(
            &settings,
            &node_broker,
            SigningKeypair::generate(),
            Arc::new(MemoryTransport::new()),
            None,
        );
        assert_eq!(announcer.announcement().api_address, "http://203.0.113.7:9090");
        assert_eq!(announcer.announcement().backends, Some(vec!["openvpn".to_string()]));
    }
}
