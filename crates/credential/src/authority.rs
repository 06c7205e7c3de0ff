//! Credential Authority
//!
//! Owns the issuer signing key and produces signed, time-limited
//! subscription credentials.

use tracing::info;
use tunnelpass_core::{PlanKind, SubscriptionCredential, SubscriptionPayload};
use tunnelpass_crypto::{hash, sign_hex, SigningKeypair};
use uuid::Uuid;

use crate::{CredentialError, Result};

/// Access tier granted by every issued credential
pub const DEFAULT_TIER: &str = "full";

pub struct CredentialAuthority {
    keypair: SigningKeypair,
}

impl CredentialAuthority {
    pub fn new(keypair: SigningKeypair) -> Self {
        Self { keypair }
    }

    /// Hex public key credentials are verified against
    pub fn issuer_key(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Signing identity, used to author delivery envelopes
    pub fn keypair(&self) -> &SigningKeypair {
        &self.keypair
    }

    /// Issue a credential for `subject` valid from `now` for the plan's duration
    pub fn issue(&self, subject: &str, plan: PlanKind, now: i64) -> Result<SubscriptionCredential> {
        let payload = SubscriptionPayload {
            token_id: format!("sub_{}", Uuid::new_v4().simple()),
            subject_key: subject.to_string(),
            plan_kind: plan,
            tier: DEFAULT_TIER.to_string(),
            issued_at: now,
            expires_at: now + plan.duration_secs(),
            nonce: Uuid::new_v4().to_string(),
            issuer_key: self.issuer_key(),
        };

        let bytes = payload
            .canonical_bytes()
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        let signature = sign_hex(&self.keypair, &hash(&bytes));

        info!(
            "Issued {} credential {} for {} (expires {})",
            plan.as_str(),
            payload.token_id,
            subject,
            payload.expires_at
        );

        Ok(SubscriptionCredential { payload, signature })
    }
}
