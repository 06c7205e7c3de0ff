//! Local credential store

use serde::{Deserialize, Serialize};
use tunnelpass_core::SubscriptionCredential;

/// Ordered collection of credentials keyed by token id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStore {
    #[serde(default)]
    credentials: Vec<SubscriptionCredential>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_credentials(credentials: Vec<SubscriptionCredential>) -> Self {
        let mut store = Self::new();
        for credential in credentials {
            store.upsert(credential);
        }
        store
    }

    /// Insert, or replace in place the credential with the same token id.
    /// Returns true when the token id was new.
    pub fn upsert(&mut self, credential: SubscriptionCredential) -> bool {
        match self
            .credentials
            .iter_mut()
            .find(|c| c.token_id() == credential.token_id())
        {
            Some(existing) => {
                *existing = credential;
                false
            }
            None => {
                self.credentials.push(credential);
                true
            }
        }
    }

    pub fn get(&self, token_id: &str) -> Option<&SubscriptionCredential> {
        self.credentials.iter().find(|c| c.token_id() == token_id)
    }

    /// Credential with the greatest expiry among those from `issuer` that
    /// are still unexpired at `now`
    pub fn latest_valid(&self, issuer: &str, now: i64) -> Option<&SubscriptionCredential> {
        self.credentials
            .iter()
            .filter(|c| c.issuer_key() == issuer && c.expires_at() > now)
            .max_by_key(|c| c.expires_at())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubscriptionCredential> {
        self.credentials.iter()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}
