//! # Core Configuration Module
//!
//! Builder-based configuration for the GeoNature sync core.
//!
//! ## Overview
//!
//! [`CoreConfig`] holds every host capability the core needs together with
//! local paths and feature flags. The builder fails fast with actionable
//! messages when a capability is missing, so a misconfigured host is caught
//! at startup rather than on the first sync.
//!
//! ## Capabilities
//!
//! | Capability | Desktop default (`desktop-shims`) |
//! |------------|-----------------------------------|
//! | `HttpClient` | `ReqwestHttpClient` |
//! | `SecureStore` | `KeyringSecureStore` |
//! | `SettingsStore` | `SqliteSettingsStore` next to the database |
//! | `WorkScheduler` | `TokioWorkScheduler` |
//! | `Clock` | `SystemClock` (always defaulted) |
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/geonature/sync.db")
//!     .app_settings_path("/data/geonature/settings.json")
//!     .enable_periodic_sync(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, SecureStore, SettingsStore, SystemClock, WorkScheduler};
use std::path::PathBuf;
use std::sync::Arc;

const MAX_EVENT_BUFFER_SIZE: usize = 10_000;

/// Core configuration. Use [`CoreConfig::builder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database holding synchronized reference data
    pub database_path: PathBuf,

    /// JSON document with server URLs and sync settings, if loaded from disk
    pub app_settings_path: Option<PathBuf>,

    pub http_client: Arc<dyn HttpClient>,

    /// Session cookie persistence
    pub secure_store: Arc<dyn SecureStore>,

    /// Freshness records and last sync date
    pub settings_store: Arc<dyn SettingsStore>,

    pub work_scheduler: Arc<dyn WorkScheduler>,

    pub clock: Arc<dyn Clock>,

    /// Per-subscriber backlog of the event bus
    pub event_buffer_size: usize,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("app_settings_path", &self.app_settings_path)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("work_scheduler", &"WorkScheduler { ... }")
            .field("event_buffer_size", &self.event_buffer_size)
            .field("features", &self.features)
            .finish()
    }
}

/// Optional behaviour toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Schedule periodic data sync using the configured periodicity
    pub enable_periodic_sync: bool,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates paths and sizing.
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if let Some(path) = &self.app_settings_path {
            if path.as_os_str().is_empty() {
                return Err(Error::Config(
                    "App settings path cannot be empty when provided".to_string(),
                ));
            }
        }

        if self.event_buffer_size == 0 || self.event_buffer_size > MAX_EVENT_BUFFER_SIZE {
            return Err(Error::Config(format!(
                "Event buffer size must be between 1 and {}",
                MAX_EVENT_BUFFER_SIZE
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Capability defaults
// ============================================================================

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, purpose: &str, mobile_hint: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature to use the default implementation. \
             Mobile: inject {}.",
            capability, purpose, mobile_hint
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "talking to GeoNature and TaxHub",
        "the platform HTTP stack (URLSession/OkHttp)",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Ok(Arc::new(bridge_desktop::KeyringSecureStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(capability_missing(
        "SecureStore",
        "session persistence",
        "platform-native secure storage (Keychain/Keystore)",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_work_scheduler() -> Result<Arc<dyn WorkScheduler>> {
    Ok(Arc::new(bridge_desktop::TokioWorkScheduler::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_work_scheduler() -> Result<Arc<dyn WorkScheduler>> {
    Err(capability_missing(
        "WorkScheduler",
        "background data synchronization",
        "a WorkManager/BGTaskScheduler adapter",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_settings_store(database_path: &std::path::Path) -> Result<Arc<dyn SettingsStore>> {
    use bridge_desktop::SqliteSettingsStore;
    use std::thread;
    use tokio::runtime::{Builder, Handle};

    let path = database_path
        .parent()
        .map(|parent| parent.join("settings.db"))
        .unwrap_or_else(|| PathBuf::from("settings.db"));

    let init_store = |path: PathBuf| -> Result<SqliteSettingsStore> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                Error::Internal(format!(
                    "Failed to create Tokio runtime for default settings store: {}",
                    e
                ))
            })?;

        runtime
            .block_on(SqliteSettingsStore::new(path))
            .map_err(|e| {
                Error::Internal(format!("Failed to initialize default SettingsStore: {}", e))
            })
    };

    // block_on cannot run inside an existing runtime; use a helper thread then.
    let store = match Handle::try_current() {
        Ok(_) => thread::spawn(move || init_store(path))
            .join()
            .map_err(|_| {
                Error::Internal(
                    "Worker thread panicked while creating default SettingsStore".to_string(),
                )
            })??,
        Err(_) => init_store(path)?,
    };

    Ok(Arc::new(store))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_settings_store(
    _database_path: &std::path::Path,
) -> Result<Arc<dyn SettingsStore>> {
    Err(capability_missing(
        "SettingsStore",
        "freshness records",
        "platform-native settings (UserDefaults/DataStore)",
    ))
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    app_settings_path: Option<PathBuf>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    work_scheduler: Option<Arc<dyn WorkScheduler>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn app_settings_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.app_settings_path = Some(path.into());
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn work_scheduler(mut self, scheduler: Arc<dyn WorkScheduler>) -> Self {
        self.work_scheduler = Some(scheduler);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn enable_periodic_sync(mut self, enabled: bool) -> Self {
        self.features.enable_periodic_sync = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds and validates the configuration.
    ///
    /// Missing capabilities fall back to desktop defaults when the
    /// `desktop-shims` feature is enabled, and fail with
    /// [`Error::CapabilityMissing`] otherwise.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let settings_store = match self.settings_store {
            Some(store) => store,
            None => provide_default_settings_store(&database_path)?,
        };

        let work_scheduler = match self.work_scheduler {
            Some(scheduler) => scheduler,
            None => provide_default_work_scheduler()?,
        };

        let config = CoreConfig {
            database_path,
            app_settings_path: self.app_settings_path,
            http_client,
            secure_store,
            settings_store,
            work_scheduler,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
            features: self.features,
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::background::{
        EnqueueOutcome, ExistingWorkPolicy, PeriodicWorkJob, WorkInfo, WorkJob,
    };
    use bridge_traits::http::{HttpRequest, HttpResponse};
    use bridge_traits::BridgeError;
    use futures::stream::{self, BoxStream, StreamExt};
    use std::time::Duration;

    type BridgeResult<T> = std::result::Result<T, BridgeError>;

    struct NoopHttp;

    #[async_trait]
    impl HttpClient for NoopHttp {
        async fn execute(&self, _request: HttpRequest) -> BridgeResult<HttpResponse> {
            Ok(HttpResponse::new(200, "[]"))
        }
    }

    struct NoopSecureStore;

    #[async_trait]
    impl SecureStore for NoopSecureStore {
        async fn set_secret(&self, _key: &str, _value: &[u8]) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_secret(&self, _key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(None)
        }
        async fn delete_secret(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn clear_all(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NoopSettingsStore;

    #[async_trait]
    impl SettingsStore for NoopSettingsStore {
        async fn set_string(&self, _key: &str, _value: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_string(&self, _key: &str) -> BridgeResult<Option<String>> {
            Ok(None)
        }
        async fn set_bool(&self, _key: &str, _value: bool) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_bool(&self, _key: &str) -> BridgeResult<Option<bool>> {
            Ok(None)
        }
        async fn set_i64(&self, _key: &str, _value: i64) -> BridgeResult<()> {
            Ok(())
        }
        async fn get_i64(&self, _key: &str) -> BridgeResult<Option<i64>> {
            Ok(None)
        }
        async fn delete(&self, _key: &str) -> BridgeResult<()> {
            Ok(())
        }
        async fn has_key(&self, _key: &str) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn list_keys(&self) -> BridgeResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn clear_all(&self) -> BridgeResult<()> {
            Ok(())
        }
    }

    struct NoopScheduler;

    #[async_trait]
    impl WorkScheduler for NoopScheduler {
        async fn enqueue_unique_work(
            &self,
            _name: &str,
            _policy: ExistingWorkPolicy,
            _job: WorkJob,
        ) -> BridgeResult<EnqueueOutcome> {
            Ok(EnqueueOutcome::Enqueued)
        }
        async fn enqueue_unique_periodic_work(
            &self,
            _name: &str,
            _interval: Duration,
            _policy: ExistingWorkPolicy,
            _job: PeriodicWorkJob,
        ) -> BridgeResult<EnqueueOutcome> {
            Ok(EnqueueOutcome::Enqueued)
        }
        async fn cancel_unique_work(&self, _name: &str) -> BridgeResult<bool> {
            Ok(false)
        }
        async fn work_info(&self, _name: &str) -> BridgeResult<Option<WorkInfo>> {
            Ok(None)
        }
        fn observe_work(&self, _name: &str) -> BoxStream<'static, WorkInfo> {
            stream::empty().boxed()
        }
    }

    fn injected_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .database_path("/tmp/geonature/sync.db")
            .http_client(Arc::new(NoopHttp))
            .secure_store(Arc::new(NoopSecureStore))
            .settings_store(Arc::new(NoopSettingsStore))
            .work_scheduler(Arc::new(NoopScheduler))
    }

    #[test]
    fn test_builder_requires_database_path() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(NoopHttp))
            .build();

        match result {
            Err(Error::Config(message)) => assert!(message.contains("database_path")),
            other => panic!("expected config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_builder_with_injected_capabilities() {
        let config = injected_builder()
            .app_settings_path("/tmp/geonature/settings.json")
            .enable_periodic_sync(true)
            .build()
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/geonature/sync.db"));
        assert!(config.features.enable_periodic_sync);
        assert_eq!(config.event_buffer_size, crate::events::DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_invalid_event_buffer_size() {
        let result = injected_builder().event_buffer_size(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_settings_path_rejected() {
        let result = injected_builder().app_settings_path("").build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_missing_capability_fails_fast() {
        let result = CoreConfig::builder()
            .database_path("/tmp/geonature/sync.db")
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "HttpClient")
            }
            other => panic!("expected missing capability, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_debug_hides_capabilities() {
        let config = injected_builder().build().unwrap();
        let rendered = format!("{:?}", config);

        assert!(rendered.contains("HttpClient { ... }"));
        assert!(rendered.contains("sync.db"));
    }
}
