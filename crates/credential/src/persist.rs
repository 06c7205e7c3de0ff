//! Credential store persistence

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::store::CredentialStore;
use crate::{CredentialError, Result};

/// Load/save contract for a local credential store
pub trait CredentialFile: Send + Sync {
    /// Load the store; an absent document is an empty store
    fn load(&self) -> Result<CredentialStore>;

    /// Persist the store without risking previously committed credentials
    fn save(&self, store: &CredentialStore) -> Result<()>;
}

/// JSON document `{ "credentials": [...] }` on disk
#[derive(Debug, Clone)]
pub struct JsonCredentialFile {
    path: PathBuf,
}

impl JsonCredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credentials.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl CredentialFile for JsonCredentialFile {
    fn load(&self) -> Result<CredentialStore> {
        if !self.path.exists() {
            return Ok(CredentialStore::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let store: CredentialStore = serde_json::from_str(&content)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        debug!("Loaded {} credentials from {:?}", store.len(), self.path);
        Ok(store)
    }

    fn save(&self, store: &CredentialStore) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(store)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;

        // Write-then-rename keeps the old document intact until the new one is durable
        let tmp = self.temp_path();
        {
            let mut file = File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!("Saved {} credentials to {:?}", store.len(), self.path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunnelpass_core::{PlanKind, SubscriptionCredential, SubscriptionPayload};

    fn cred(token: &str) -> SubscriptionCredential {
        SubscriptionCredential {
            payload: SubscriptionPayload {
                token_id: token.to_string(),
                subject_key: "s".to_string(),
                plan_kind: PlanKind::Weekly,
                tier: "full".to_string(),
                issued_at: 1,
                expires_at: 2,
                nonce: "n".to_string(),
                issuer_key: "i".to_string(),
            },
            signature: "00".to_string(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonCredentialFile::new(dir.path().join("credentials.json"));
        assert!(file.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonCredentialFile::new(dir.path().join("nested").join("credentials.json"));

        let store = CredentialStore::from_credentials(vec![cred("a"), cred("b")]);
        file.save(&store).unwrap();

        let loaded = file.load().unwrap();
        assert_eq!(loaded, store);
        assert!(!file.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        fs::write(&path, "{ not json").unwrap();

        let file = JsonCredentialFile::new(&path);
        assert!(matches!(file.load(), Err(CredentialError::Serialization(_))));
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let file = JsonCredentialFile::new(dir.path().join("credentials.json"));

        file.save(&CredentialStore::from_credentials(vec![cred("a")])).unwrap();
        file.save(&CredentialStore::from_credentials(vec![cred("a"), cred("b")])).unwrap();
        assert_eq!(file.load().unwrap().len(), 2);
    }
}
