use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, SigningKey, VerifyingKey, SIGNATURE_LENGTH};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("Invalid secret key: {0}")]
    InvalidSecretKey(String),
    #[error("Invalid signature encoding: {0}")]
    InvalidSignature(String),
}

/// Keypair for signing (Ed25519)
pub struct SigningKeypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Clone for SigningKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
            verifying_key: self.verifying_key,
        }
    }
}

impl std::fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl SigningKeypair {
    /// Generate a new random signing keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Get the public key as bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Lowercase hex public key, the identity string used on the wire
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Get the secret key as bytes
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Create from raw secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create from a hex-encoded 32-byte secret
    pub fn from_secret_hex(secret: &str) -> Result<Self, KeyError> {
        let bytes = decode_32(secret.trim()).map_err(KeyError::InvalidSecretKey)?;
        Ok(Self::from_secret_bytes(&bytes))
    }
}

/// Per-session tunnel keypair (X25519, WireGuard key format)
pub struct TunnelKeypair {
    pub secret: StaticSecret,
    pub public: X25519PublicKey,
}

impl Clone for TunnelKeypair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret.as_bytes())
    }
}

impl std::fmt::Debug for TunnelKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelKeypair")
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

impl TunnelKeypair {
    /// Generate a new random tunnel keypair
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from raw secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let secret = StaticSecret::from(*secret);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Base64 public key as WireGuard expects it
    pub fn public_key_base64(&self) -> String {
        STANDARD.encode(self.public.as_bytes())
    }

    /// Base64 private key as WireGuard expects it
    pub fn private_key_base64(&self) -> String {
        STANDARD.encode(self.secret.as_bytes())
    }
}

/// Validate a base64 WireGuard public key
pub fn parse_tunnel_public_key(encoded: &str) -> Result<[u8; 32], KeyError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| KeyError::InvalidPublicKey(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| KeyError::InvalidPublicKey(format!("expected 32 bytes, got {}", b.len())))
}

/// Parse a hex Ed25519 public key
pub fn parse_verifying_key(encoded: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = decode_32(encoded).map_err(KeyError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| KeyError::InvalidPublicKey(e.to_string()))
}

/// Parse a hex Ed25519 signature
pub fn parse_signature(encoded: &str) -> Result<Signature, KeyError> {
    let bytes = hex::decode(encoded).map_err(|e| KeyError::InvalidSignature(e.to_string()))?;
    let bytes: [u8; SIGNATURE_LENGTH] = bytes.try_into().map_err(|b: Vec<u8>| {
        KeyError::InvalidSignature(format!("expected {} bytes, got {}", SIGNATURE_LENGTH, b.len()))
    })?;
    Ok(Signature::from_bytes(&bytes))
}

fn decode_32(encoded: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(encoded).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}

/// Hash data using SHA-256
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_keypair() {
        let kp = SigningKeypair::generate();
        let pubkey = kp.public_key_bytes();
        let secret = kp.secret_key_bytes();

        let restored = SigningKeypair::from_secret_bytes(&secret);
        assert_eq!(restored.public_key_bytes(), pubkey);
    }

    #[test]
    fn test_signing_keypair_from_hex() {
        let kp = SigningKeypair::generate();
        let restored = SigningKeypair::from_secret_hex(&hex::encode(kp.secret_key_bytes())).unwrap();
        assert_eq!(restored.public_key_hex(), kp.public_key_hex());

        assert!(SigningKeypair::from_secret_hex("zz").is_err());
        assert!(SigningKeypair::from_secret_hex("abcd").is_err());
    }

    #[test]
    fn test_tunnel_keypair() {
        let kp = TunnelKeypair::generate();
        let restored = TunnelKeypair::from_secret_bytes(kp.secret.as_bytes());
        assert_eq!(restored.public_key_bytes(), kp.public_key_bytes());

        let parsed = parse_tunnel_public_key(&kp.public_key_base64()).unwrap();
        assert_eq!(parsed, kp.public_key_bytes());
        assert_eq!(kp.public_key_base64().len(), 44);
    }

    #[test]
    fn test_parse_tunnel_public_key_rejects_garbage() {
        assert!(parse_tunnel_public_key("not base64!").is_err());
        assert!(parse_tunnel_public_key("AAAA").is_err());
    }

    #[test]
    fn test_parse_verifying_key() {
        let kp = SigningKeypair::generate();
        let vk = parse_verifying_key(&kp.public_key_hex()).unwrap();
        assert_eq!(vk.to_bytes(), kp.public_key_bytes());

        assert!(parse_verifying_key("xyz").is_err());
        assert!(parse_verifying_key(&"ab".repeat(16)).is_err());
    }

    #[test]
    fn test_parse_signature_length() {
        assert!(parse_signature(&"00".repeat(64)).is_ok());
        assert!(parse_signature(&"00".repeat(63)).is_err());
        assert!(parse_signature("not-hex").is_err());
    }

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"tunnelpass"), hash(b"tunnelpass"));
        assert_ne!(hash(b"tunnelpass"), hash(b"tunnelpasS"));
    }
}
