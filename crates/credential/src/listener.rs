//! Client-side consumer of credential deliveries

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tunnelpass_core::{unix_now, SubscriptionCredential};
use tunnelpass_network::{credential_from_delivery, deliveries_filter, Envelope, Transport};

use crate::persist::CredentialFile;
use crate::store::CredentialStore;
use crate::verifier::{verify, VerifyError};
use crate::{CredentialError, Result};

/// Receives credentials addressed to one identity, upserts them into the
/// shared store and persists the store after each change.
pub struct CredentialListener {
    transport: Arc<dyn Transport>,
    identity: String,
    issuer: Option<String>,
    store: Arc<RwLock<CredentialStore>>,
    file: Arc<dyn CredentialFile>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl CredentialListener {
    /// Create a listener, seeding the store from `file`
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: impl Into<String>,
        file: Arc<dyn CredentialFile>,
    ) -> Result<Self> {
        let store = file.load()?;
        Ok(Self {
            transport,
            identity: identity.into(),
            issuer: None,
            store: Arc::new(RwLock::new(store)),
            file,
            shutdown_tx: None,
            handle: None,
        })
    }

    /// Only accept deliveries authored by `issuer`
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Shared handle to the store this listener writes into
    pub fn store(&self) -> Arc<RwLock<CredentialStore>> {
        self.store.clone()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Subscribe and start consuming deliveries in the background
    pub async fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Err(CredentialError::AlreadyRunning);
        }

        let filter = deliveries_filter(&self.identity, self.issuer.as_deref());
        let mut subscription = self.transport.subscribe(filter).await?;

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        self.shutdown_tx = Some(shutdown_tx);

        let identity = self.identity.clone();
        let store = self.store.clone();
        let file = self.file.clone();

        info!("Listening for credential deliveries to {}", identity);
        self.handle = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    next = subscription.next() => {
                        match next {
                            Some(envelope) => {
                                if let Some(credential) = accept(&envelope, &identity) {
                                    commit(&store, file.as_ref(), credential);
                                }
                            }
                            None => {
                                warn!("Credential delivery subscription closed");
                                break;
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Credential listener shutting down");
                        break;
                    }
                }
            }
        }));
        Ok(())
    }

    /// Signal the background task and wait for it to exit
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

fn accept(envelope: &Envelope, identity: &str) -> Option<SubscriptionCredential> {
    let credential = match credential_from_delivery(envelope) {
        Ok(c) => c,
        Err(e) => {
            warn!("Ignoring undecodable delivery {}: {}", envelope.id, e);
            return None;
        }
    };

    if credential.payload.subject_key != identity {
        warn!("Ignoring credential {} for another subject", credential.token_id());
        return None;
    }
    if credential.issuer_key() != envelope.author {
        warn!(
            "Ignoring credential {} delivered by a non-issuer",
            credential.token_id()
        );
        return None;
    }

    // Expired credentials are kept; lookups filter them out
    match verify(&credential, unix_now()) {
        Ok(()) | Err(VerifyError::Expired { .. }) => Some(credential),
        Err(e) => {
            warn!("Ignoring credential {}: {}", credential.token_id(), e);
            None
        }
    }
}

fn commit(store: &RwLock<CredentialStore>, file: &dyn CredentialFile, credential: SubscriptionCredential) {
    let token_id = credential.token_id().to_string();
    let snapshot = {
        let mut store = store.write();
        store.upsert(credential);
        store.clone()
    };

    match file.save(&snapshot) {
        Ok(()) => info!("Stored credential {}", token_id),
        Err(e) => warn!("Stored credential {} in memory but failed to persist: {}", token_id, e),
    }
}
