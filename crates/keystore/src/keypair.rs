use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tunnelpass_crypto::SigningKeypair;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("Failed to read key file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to write key file {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed key file {path}: {reason}")]
    Malformed { path: String, reason: String },
}

/// Load a hex-encoded Ed25519 secret from `path`, generating and saving a
/// new one if the file does not exist. A malformed file is an error.
pub fn load_or_generate_signing_keypair(path: &Path) -> Result<SigningKeypair, KeystoreError> {
    if path.exists() {
        let content = fs::read_to_string(path).map_err(|source| KeystoreError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let keypair = SigningKeypair::from_secret_hex(&content).map_err(|e| KeystoreError::Malformed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!("Loaded signing key {} from {:?}", keypair.public_key_hex(), path);
        return Ok(keypair);
    }

    let keypair = SigningKeypair::generate();
    save_signing_keypair(path, &keypair)?;
    info!("Generated signing key {} at {:?}", keypair.public_key_hex(), path);
    Ok(keypair)
}

/// Write the secret as hex, owner-readable only on unix
pub fn save_signing_keypair(path: &Path, keypair: &SigningKeypair) -> Result<(), KeystoreError> {
    let write_err = |source| KeystoreError::Write {
        path: path.display().to_string(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
    }
    fs::write(path, hex::encode(keypair.secret_key_bytes())).map_err(write_err)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(write_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_then_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("issuer.key");

        let first = load_or_generate_signing_keypair(&path).unwrap();
        assert!(path.exists());
        let second = load_or_generate_signing_keypair(&path).unwrap();
        assert_eq!(first.public_key_hex(), second.public_key_hex());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");
        load_or_generate_signing_keypair(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_malformed_file_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.key");
        fs::write(&path, "definitely not hex").unwrap();

        assert!(matches!(
            load_or_generate_signing_keypair(&path),
            Err(KeystoreError::Malformed { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "definitely not hex");
    }
}
