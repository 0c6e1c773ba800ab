//! Secure Credential Storage using OS Keychain

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use keyring::Entry;
use tracing::{debug, error};

const DEFAULT_SERVICE: &str = "geonature-sync";

/// Entry holding the JSON list of keys written through this store.
/// The OS keychain cannot enumerate entries per service.
const INDEX_KEY: &str = "__keys";

/// Keyring-based secure storage
///
/// Uses platform-specific secure storage:
/// - macOS: Keychain
/// - Windows: Credential Manager
/// - Linux: Secret Service (libsecret)
///
/// Values are base64 encoded since keyring entries only hold strings.
pub struct KeyringSecureStore {
    service_name: String,
}

impl KeyringSecureStore {
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE)
    }

    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service_name, key).map_err(Self::map_keyring_error)
    }

    fn map_keyring_error(e: keyring::Error) -> BridgeError {
        BridgeError::OperationFailed(format!("Keyring error: {}", e))
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self.entry(INDEX_KEY)?.get_password() {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| {
                BridgeError::OperationFailed(format!("Corrupted keyring index: {}", e))
            }),
            Err(keyring::Error::NoEntry) => Ok(Vec::new()),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    fn write_index(&self, keys: &[String]) -> Result<()> {
        let raw = serde_json::to_string(keys)
            .map_err(|e| BridgeError::OperationFailed(format!("Index encoding failed: {}", e)))?;
        self.entry(INDEX_KEY)?
            .set_password(&raw)
            .map_err(Self::map_keyring_error)
    }

    fn update_index(&self, key: &str, present: bool) -> Result<()> {
        let mut keys = self.read_index()?;
        let known = keys.iter().any(|k| k == key);
        match (present, known) {
            (true, false) => keys.push(key.to_string()),
            (false, true) => keys.retain(|k| k != key),
            _ => return Ok(()),
        }
        self.write_index(&keys)
    }
}

impl Default for KeyringSecureStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecureStore for KeyringSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entry(key)?
            .set_password(&STANDARD.encode(value))
            .map_err(Self::map_keyring_error)?;
        self.update_index(key, true)?;

        debug!(key = key, "Stored secret in keyring");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.entry(key)?.get_password() {
            Ok(encoded) => {
                let decoded = STANDARD.decode(&encoded).map_err(|e| {
                    error!(key = key, error = %e, "Failed to decode secret");
                    BridgeError::OperationFailed(format!("Failed to decode secret: {}", e))
                })?;
                Ok(Some(decoded))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Self::map_keyring_error(e)),
        }
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(Self::map_keyring_error(e)),
        }
        self.update_index(key, false)?;

        debug!(key = key, "Deleted secret from keyring");
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        self.read_index()
    }

    async fn clear_all(&self) -> Result<()> {
        for key in self.read_index()? {
            match self.entry(&key)?.delete_credential() {
                Ok(()) | Err(keyring::Error::NoEntry) => {}
                Err(e) => return Err(Self::map_keyring_error(e)),
            }
        }
        self.write_index(&[])
    }
}
