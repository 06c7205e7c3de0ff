//! Signed envelopes and subscription filters
//!
//! Every message on the transport is an envelope authored by an Ed25519
//! identity. The envelope id is the SHA-256 of its signable fields and the
//! signature covers the id, so any field change invalidates it.

use serde::{Deserialize, Serialize};
use tunnelpass_crypto::{hash, parse_signature, parse_verifying_key, sign_hex, verify_with, SigningKeypair};

use crate::{NetworkError, Result};

/// Signed message carried by a [`Transport`](crate::Transport)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Hex SHA-256 over the signable fields
    pub id: String,
    pub kind: u32,
    /// Hex Ed25519 public key of the publisher
    pub author: String,
    /// Unix seconds
    pub created_at: i64,
    /// `[name, value, ...]` tags
    pub tags: Vec<Vec<String>>,
    pub content: String,
    /// Hex Ed25519 signature over the id bytes
    pub signature: String,
}

impl Envelope {
    /// Build and sign an envelope
    pub fn sign(
        keypair: &SigningKeypair,
        kind: u32,
        tags: Vec<Vec<String>>,
        content: impl Into<String>,
        created_at: i64,
    ) -> Result<Self> {
        let mut envelope = Self {
            id: String::new(),
            kind,
            author: keypair.public_key_hex(),
            created_at,
            tags,
            content: content.into(),
            signature: String::new(),
        };
        let digest = envelope.digest()?;
        envelope.id = hex::encode(digest);
        envelope.signature = sign_hex(keypair, &digest);
        Ok(envelope)
    }

    /// Data hashed into the id: `[author, created_at, kind, tags, content]`
    pub fn signable_data(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&(&self.author, self.created_at, self.kind, &self.tags, &self.content))
            .map_err(|e| NetworkError::Serialization(e.to_string()))
    }

    fn digest(&self) -> Result<[u8; 32]> {
        Ok(hash(&self.signable_data()?))
    }

    /// Check the id and the author's signature
    pub fn verify(&self) -> Result<()> {
        let digest = self.digest()?;
        if hex::encode(digest) != self.id {
            return Err(NetworkError::InvalidEnvelope("id does not match content".to_string()));
        }
        let key = parse_verifying_key(&self.author)
            .map_err(|e| NetworkError::InvalidEnvelope(e.to_string()))?;
        let signature = parse_signature(&self.signature)
            .map_err(|e| NetworkError::InvalidEnvelope(e.to_string()))?;
        if !verify_with(&key, &digest, &signature) {
            return Err(NetworkError::InvalidEnvelope("bad signature".to_string()));
        }
        Ok(())
    }

    /// First value of the first tag named `name`
    pub fn first_tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
    }

    /// Values of every tag named `name`, in order
    pub fn all_tags(&self, name: &str) -> Vec<&str> {
        self.tags
            .iter()
            .filter(|t| t.len() >= 2 && t[0] == name)
            .map(|t| t[1].as_str())
            .collect()
    }

    pub fn has_tag(&self, name: &str, value: &str) -> bool {
        self.all_tags(name).contains(&value)
    }
}

/// Helper for building a `[name, value]` tag
pub(crate) fn tag(name: &str, value: impl Into<String>) -> Vec<String> {
    vec![name.to_string(), value.into()]
}

/// Subscription filter. Empty constraints match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub kinds: Vec<u32>,
    pub authors: Vec<String>,
    /// Each entry requires a tag `name` whose value is one of `values`
    pub tags: Vec<(String, Vec<String>)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((name.into(), vec![value.into()]));
        self
    }

    pub fn matches(&self, envelope: &Envelope) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&envelope.kind) {
            return false;
        }
        if !self.authors.is_empty() && !self.authors.iter().any(|a| a == &envelope.author) {
            return false;
        }
        self.tags.iter().all(|(name, values)| {
            envelope
                .all_tags(name)
                .iter()
                .any(|v| values.iter().any(|want| want == v))
        })
    }
}
