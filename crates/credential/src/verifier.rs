//! Credential Verifier
//!
//! Stateless: every call re-derives validity from the payload, signature,
//! embedded issuer key and the supplied time.

use thiserror::Error;
use tunnelpass_core::{SubscriptionCredential, TunnelPassError};
use tunnelpass_crypto::{hash, parse_signature, parse_verifying_key, verify_with};

/// Why a credential was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("payload encoding failed: {0}")]
    Encoding(String),

    #[error("malformed issuer key: {0}")]
    MalformedKey(String),

    #[error("malformed signature: {0}")]
    MalformedSignature(String),

    #[error("bad signature")]
    BadSignature,

    #[error("expired at {expires_at}")]
    Expired { expires_at: i64 },
}

impl From<VerifyError> for TunnelPassError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Encoding(_)
            | VerifyError::MalformedKey(_)
            | VerifyError::MalformedSignature(_) => TunnelPassError::MalformedInput(err.to_string()),
            VerifyError::BadSignature | VerifyError::Expired { .. } => {
                TunnelPassError::Unauthorized(err.to_string())
            }
        }
    }
}

/// Verify a credential at `now`.
///
/// Checks run in order and stop at the first failure: encode, parse key and
/// signature, check the signature, check expiry.
pub fn verify(credential: &SubscriptionCredential, now: i64) -> Result<(), VerifyError> {
    let payload = &credential.payload;

    let bytes = payload
        .canonical_bytes()
        .map_err(|e| VerifyError::Encoding(e.to_string()))?;
    let digest = hash(&bytes);

    let key = parse_verifying_key(&payload.issuer_key)
        .map_err(|e| VerifyError::MalformedKey(e.to_string()))?;
    let signature = parse_signature(&credential.signature)
        .map_err(|e| VerifyError::MalformedSignature(e.to_string()))?;

    if !verify_with(&key, &digest, &signature) {
        return Err(VerifyError::BadSignature);
    }

    if payload.expires_at <= now {
        return Err(VerifyError::Expired {
            expires_at: payload.expires_at,
        });
    }

    Ok(())
}
