//! Last provisioned network, kept across restarts

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use wipi_proto::Credentials;

pub const STORE_FILE: &str = "selected_network.json";

/// On-disk shape of the last submitted network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredNetwork {
    pub wifi_name: String,
    #[serde(default)]
    pub wifi_password: String,
}

impl StoredNetwork {
    /// An empty password means an open network
    pub fn credentials(&self) -> Credentials {
        if self.wifi_password.is_empty() {
            Credentials::open(&self.wifi_name)
        } else {
            Credentials::secured(&self.wifi_name, &self.wifi_password)
        }
    }
}

impl From<&Credentials> for StoredNetwork {
    fn from(credentials: &Credentials) -> Self {
        Self {
            wifi_name: credentials.network_name.clone(),
            wifi_password: if credentials.security_required {
                credentials.secret.clone()
            } else {
                String::new()
            },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {}: {source}", path.display())]
    Read { path: PathBuf, source: std::io::Error },
    #[error("failed to write {}: {source}", path.display())]
    Write { path: PathBuf, source: std::io::Error },
    #[error("{} is not a valid network file: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("failed to serialize network: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Where submitted networks are remembered
pub trait NetworkStore: Send + Sync {
    fn load(&self) -> Result<Option<StoredNetwork>, StoreError>;
    fn save(&self, network: &StoredNetwork) -> Result<(), StoreError>;
}

/// JSON file store, `<home>/selected_network.json` by default
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_home(home: &Path) -> Self {
        Self::new(home.join(STORE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NetworkStore for CredentialStore {
    fn load(&self) -> Result<Option<StoredNetwork>, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        let network = serde_json::from_str(&content).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })?;
        Ok(Some(network))
    }

    fn save(&self, network: &StoredNetwork) -> Result<(), StoreError> {
        let write_err = |source| StoreError::Write {
            path: self.path.clone(),
            source,
        };
        let json = serde_json::to_string_pretty(network)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        // a crash mid-write must not leave a torn file behind
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(write_err)?;
        std::fs::rename(&tmp, &self.path).map_err(write_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_nothing_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_home(dir.path());
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_home(dir.path());
        let network = StoredNetwork::from(&Credentials::secured("Home;Net", "p@ss"));

        store.save(&network).unwrap();
        assert_eq!(store.load().unwrap(), Some(network.clone()));
        assert!(!dir.path().join("selected_network.json.tmp").exists());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["wifi_name"], "Home;Net");
        assert_eq!(raw["wifi_password"], "p@ss");
    }

    #[test]
    fn later_save_replaces_earlier() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_home(dir.path());
        store.save(&StoredNetwork::from(&Credentials::secured("One", "pw"))).unwrap();
        store.save(&StoredNetwork::from(&Credentials::open("Two"))).unwrap();

        let stored = store.load().unwrap().unwrap();
        assert_eq!(stored.wifi_name, "Two");
        assert_eq!(stored.credentials(), Credentials::open("Two"));
    }

    #[test]
    fn open_network_drops_its_secret() {
        let credentials = Credentials::new("Cafe", "ignored", false);
        let stored = StoredNetwork::from(&credentials);
        assert_eq!(stored.wifi_password, "");
        assert!(!stored.credentials().security_required);
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_home(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn creates_missing_home() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::in_home(&dir.path().join("nested").join("home"));
        store.save(&StoredNetwork::from(&Credentials::open("Lobby"))).unwrap();
        assert!(store.path().exists());
    }
}
