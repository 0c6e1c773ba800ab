//! Secure Session Storage
//!
//! Persists the authenticated GeoNature session (cookie and user) through
//! the host's [`SecureStore`] so a restart does not require a new login.
//!
//! ## Security Features
//!
//! - The cookie value is never logged or exposed in error messages
//! - Corrupted entries are erased instead of being returned
//!
//! ## Example
//!
//! ```no_run
//! use core_auth::SessionStore;
//! use std::sync::Arc;
//! # use bridge_traits::storage::SecureStore;
//! # async fn example(secure_store: Arc<dyn SecureStore>) -> core_auth::Result<()> {
//! let sessions = SessionStore::new(secure_store);
//!
//! if let Some(session) = sessions.load().await? {
//!     println!("Signed in as {}", session.user.login);
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{AuthError, Result};
use crate::types::AuthSession;
use bridge_traits::storage::SecureStore;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SESSION_KEY: &str = "geonature:session";

/// Secure storage for the single active session.
#[derive(Clone)]
pub struct SessionStore {
    secure_store: Arc<dyn SecureStore>,
}

impl SessionStore {
    pub fn new(secure_store: Arc<dyn SecureStore>) -> Self {
        debug!("Initializing SessionStore");
        Self { secure_store }
    }

    /// Stores the session, replacing any previous one.
    pub async fn save(&self, session: &AuthSession) -> Result<()> {
        let json = serde_json::to_vec(session)?;

        self.secure_store
            .set_secret(SESSION_KEY, &json)
            .await
            .map_err(|e| {
                warn!(error = %e, "Failed to store session in secure storage");
                AuthError::SecureStorageUnavailable(e.to_string())
            })?;

        info!(
            user_id = session.user.id,
            has_expiry = session.expires_at.is_some(),
            "Session stored securely"
        );
        Ok(())
    }

    /// Loads the stored session.
    ///
    /// Returns `Ok(None)` when nothing is stored. A corrupted entry is deleted
    /// and reported as [`AuthError::SessionCorrupted`].
    pub async fn load(&self) -> Result<Option<AuthSession>> {
        let data = self.secure_store.get_secret(SESSION_KEY).await.map_err(|e| {
            warn!(error = %e, "Failed to read session from secure storage");
            AuthError::SecureStorageUnavailable(e.to_string())
        })?;

        let Some(data) = data else {
            debug!("No session found in storage");
            return Ok(None);
        };

        match serde_json::from_slice::<AuthSession>(&data) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "Stored session is corrupted, erasing it");

                if let Err(delete_err) = self.secure_store.delete_secret(SESSION_KEY).await {
                    warn!(error = %delete_err, "Failed to delete corrupted session");
                }

                Err(AuthError::SessionCorrupted(e.to_string()))
            }
        }
    }

    /// Deletes the stored session. Succeeds when nothing is stored.
    pub async fn clear(&self) -> Result<()> {
        self.secure_store
            .delete_secret(SESSION_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))?;

        info!("Session deleted");
        Ok(())
    }

    pub async fn exists(&self) -> Result<bool> {
        self.secure_store
            .has_secret(SESSION_KEY)
            .await
            .map_err(|e| AuthError::SecureStorageUnavailable(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::AuthUser;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    #[derive(Clone, Default)]
    pub(crate) struct MockSecureStore {
        pub(crate) storage: Arc<Mutex<HashMap<String, Vec<u8>>>>,
        pub(crate) fail: bool,
    }

    #[async_trait::async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            if self.fail {
                return Err(BridgeError::NotAvailable("keychain locked".to_string()));
            }
            self.storage
                .lock()
                .await
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.storage.lock().await.get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.storage.lock().await.remove(key);
            Ok(())
        }

        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(self.storage.lock().await.keys().cloned().collect())
        }

        async fn clear_all(&self) -> BridgeResult<()> {
            self.storage.lock().await.clear();
            Ok(())
        }
    }

    pub(crate) fn sample_session() -> AuthSession {
        AuthSession {
            cookie: "cookie-value".to_string(),
            user: AuthUser {
                id: 3,
                login: "agent".to_string(),
                last_name: None,
                first_name: None,
                organism_id: None,
                application_id: Some(14),
            },
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_and_load_session() {
        let store = SessionStore::new(Arc::new(MockSecureStore::default()));
        let session = sample_session();

        store.save(&session).await.unwrap();

        assert!(store.exists().await.unwrap());
        assert_eq!(store.load().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_load_without_session() {
        let store = SessionStore::new(Arc::new(MockSecureStore::default()));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupted_session_is_erased() {
        let secure = MockSecureStore::default();
        secure
            .storage
            .lock()
            .await
            .insert(SESSION_KEY.to_string(), b"not json".to_vec());
        let store = SessionStore::new(Arc::new(secure.clone()));

        let result = store.load().await;

        assert!(matches!(result, Err(AuthError::SessionCorrupted(_))));
        assert!(!secure.storage.lock().await.contains_key(SESSION_KEY));
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let store = SessionStore::new(Arc::new(MockSecureStore::default()));

        store.save(&sample_session()).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert!(!store.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let store = SessionStore::new(Arc::new(MockSecureStore {
            fail: true,
            ..Default::default()
        }));

        let result = store.save(&sample_session()).await;
        assert!(matches!(result, Err(AuthError::SecureStorageUnavailable(_))));
    }
}
