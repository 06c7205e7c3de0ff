//! Payment-driven issuance and delivery
//!
//! Issuance and delivery are separate steps. A credential that was issued
//! stays issued even if delivery fails; the caller resends with
//! [`IssuanceService::redeliver`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tunnelpass_core::{PlanKind, SubscriptionCredential};
use tunnelpass_crypto::parse_verifying_key;
use tunnelpass_network::{delivery_envelope, NetworkError, Transport};

use crate::authority::CredentialAuthority;
use crate::{CredentialError, Result};

const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// A settled payment: who paid, and for which plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentEvent {
    /// Hex identity the credential is issued to and delivered to
    pub recipient: String,
    /// Plan identifier; unknown identifiers are monthly
    pub plan: String,
}

impl PaymentEvent {
    pub fn new(recipient: impl Into<String>, plan: impl Into<String>) -> Self {
        Self {
            recipient: recipient.into(),
            plan: plan.into(),
        }
    }
}

/// Result of handling one payment
#[derive(Debug, Clone)]
pub struct IssuanceOutcome {
    pub credential: SubscriptionCredential,
    pub delivered: bool,
    pub delivery_error: Option<String>,
}

pub struct IssuanceService {
    authority: CredentialAuthority,
    transport: Arc<dyn Transport>,
    delivery_timeout: Duration,
}

impl IssuanceService {
    pub fn new(authority: CredentialAuthority, transport: Arc<dyn Transport>) -> Self {
        Self {
            authority,
            transport,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
        }
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    pub fn authority(&self) -> &CredentialAuthority {
        &self.authority
    }

    /// Issue a credential for a payment, then attempt delivery once
    pub async fn handle_payment(&self, event: &PaymentEvent, now: i64) -> Result<IssuanceOutcome> {
        let recipient = event.recipient.trim();
        parse_verifying_key(recipient)
            .map_err(|e| CredentialError::InvalidRecipient(e.to_string()))?;

        let plan = PlanKind::parse(&event.plan);
        let credential = self.authority.issue(recipient, plan, now)?;

        let outcome = match self.deliver(recipient, &credential, now).await {
            Ok(()) => IssuanceOutcome {
                credential,
                delivered: true,
                delivery_error: None,
            },
            Err(e) => {
                warn!(
                    "Credential {} issued but not delivered to {}: {}",
                    credential.token_id(),
                    recipient,
                    e
                );
                IssuanceOutcome {
                    credential,
                    delivered: false,
                    delivery_error: Some(e.to_string()),
                }
            }
        };
        Ok(outcome)
    }

    /// Resend an already issued credential to its subject
    pub async fn redeliver(&self, credential: &SubscriptionCredential, now: i64) -> Result<()> {
        let recipient = credential.payload.subject_key.clone();
        self.deliver(&recipient, credential, now).await
    }

    async fn deliver(
        &self,
        recipient: &str,
        credential: &SubscriptionCredential,
        now: i64,
    ) -> Result<()> {
        let envelope = delivery_envelope(self.authority.keypair(), recipient, credential, now)?;
        tokio::time::timeout(self.delivery_timeout, self.transport.publish(envelope))
            .await
            .map_err(|_| NetworkError::Timeout)??;

        info!("Delivered credential {} to {}", credential.token_id(), recipient);
        Ok(())
    }
}
