use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};

use crate::keys::SigningKeypair;

/// Sign data with a signing keypair
pub fn sign_data(keypair: &SigningKeypair, data: &[u8]) -> [u8; 64] {
    let signature: Signature = keypair.signing_key.sign(data);
    signature.to_bytes()
}

/// Sign data and hex-encode the signature
pub fn sign_hex(keypair: &SigningKeypair, data: &[u8]) -> String {
    hex::encode(sign_data(keypair, data))
}

/// Verify a signature
pub fn verify_signature(pubkey: &[u8; 32], data: &[u8], signature: &[u8; 64]) -> bool {
    let verifying_key = match VerifyingKey::from_bytes(pubkey) {
        Ok(vk) => vk,
        Err(_) => return false,
    };

    let signature = Signature::from_bytes(signature);

    verify_with(&verifying_key, data, &signature)
}

/// Verify with already-parsed key material
pub fn verify_with(key: &VerifyingKey, data: &[u8], signature: &Signature) -> bool {
    key.verify(data, signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{parse_signature, parse_verifying_key};

    #[test]
    fn test_sign_and_verify() {
        let keypair = SigningKeypair::generate();
        let data = b"Hello, TunnelPass!";

        let signature = sign_data(&keypair, data);
        assert!(verify_signature(
            &keypair.public_key_bytes(),
            data,
            &signature
        ));

        // Wrong data should fail
        assert!(!verify_signature(
            &keypair.public_key_bytes(),
            b"Wrong data",
            &signature
        ));
    }

    #[test]
    fn test_wrong_pubkey_fails() {
        let keypair1 = SigningKeypair::generate();
        let keypair2 = SigningKeypair::generate();
        let data = b"Test data";

        let signature = sign_data(&keypair1, data);

        assert!(!verify_signature(
            &keypair2.public_key_bytes(),
            data,
            &signature
        ));
    }

    #[test]
    fn test_signatures_are_deterministic() {
        let keypair = SigningKeypair::generate();
        assert_eq!(sign_hex(&keypair, b"same"), sign_hex(&keypair, b"same"));
    }

    #[test]
    fn test_hex_roundtrip_verify() {
        let keypair = SigningKeypair::generate();
        let sig = sign_hex(&keypair, b"payload");

        let key = parse_verifying_key(&keypair.public_key_hex()).unwrap();
        let sig = parse_signature(&sig).unwrap();
        assert!(verify_with(&key, b"payload", &sig));
        assert!(!verify_with(&key, b"payloaD", &sig));
    }
}
