//! Periodic pricing announcements from an issuer

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use tunnelpass_core::unix_now;
use tunnelpass_crypto::SigningKeypair;
use tunnelpass_network::{Pricing, Transport};

use crate::Result;

pub struct PricingAnnouncer {
    keypair: SigningKeypair,
    transport: Arc<dyn Transport>,
    pricing: Pricing,
    interval: Duration,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl PricingAnnouncer {
    pub fn new(keypair: SigningKeypair, transport: Arc<dyn Transport>, pricing: Pricing) -> Self {
        Self {
            keypair,
            transport,
            pricing,
            interval: Duration::from_secs(3600),
            shutdown_tx: None,
            handle: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Publish the current prices once
    pub async fn announce(&self) -> Result<()> {
        let envelope = self.pricing.to_envelope(&self.keypair, unix_now())?;
        self.transport.publish(envelope).await?;
        debug!("Announced pricing {:?}", self.pricing);
        Ok(())
    }

    /// Announce now and then on every interval until shut down
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let keypair = self.keypair.clone();
        let transport = self.transport.clone();
        let pricing = self.pricing;
        let interval = self.interval;

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let published = match pricing.to_envelope(&keypair, unix_now()) {
                            Ok(envelope) => transport.publish(envelope).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = published {
                            warn!("Pricing announcement failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        }));
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}
