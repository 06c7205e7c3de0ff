//! Addressed credential delivery messages

use tunnelpass_core::SubscriptionCredential;
use tunnelpass_crypto::SigningKeypair;

use crate::envelope::{tag, Envelope, Filter};
use crate::{NetworkError, Result};

/// Event kind for addressed credential delivery
pub const CREDENTIAL_DELIVERY_KIND: u32 = 4;

/// Topic tag carried by every credential delivery
pub const SUBSCRIPTION_TOPIC: &str = "vpn-subscription";

/// Wrap a credential in an envelope addressed to `recipient` (hex identity)
pub fn delivery_envelope(
    issuer: &SigningKeypair,
    recipient: &str,
    credential: &SubscriptionCredential,
    created_at: i64,
) -> Result<Envelope> {
    let content = credential
        .to_json()
        .map_err(|e| NetworkError::Serialization(e.to_string()))?;
    Envelope::sign(
        issuer,
        CREDENTIAL_DELIVERY_KIND,
        vec![tag("p", recipient), tag("t", SUBSCRIPTION_TOPIC)],
        content,
        created_at,
    )
}

/// Filter for deliveries addressed to `recipient`, optionally from one issuer
pub fn deliveries_filter(recipient: &str, issuer: Option<&str>) -> Filter {
    let filter = Filter::new()
        .kind(CREDENTIAL_DELIVERY_KIND)
        .tag("p", recipient)
        .tag("t", SUBSCRIPTION_TOPIC);
    match issuer {
        Some(issuer) => filter.author(issuer),
        None => filter,
    }
}

/// Extract the credential from a delivery envelope
pub fn credential_from_delivery(envelope: &Envelope) -> Result<SubscriptionCredential> {
    if envelope.kind != CREDENTIAL_DELIVERY_KIND {
        return Err(NetworkError::InvalidEnvelope(format!(
            "unexpected kind {}",
            envelope.kind
        )));
    }
    SubscriptionCredential::from_json(&envelope.content)
        .map_err(|e| NetworkError::InvalidEnvelope(format!("credential body: {}", e)))
}
