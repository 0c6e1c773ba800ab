//! # GeoNature Sync Service
//!
//! Composition root for host applications. [`GeoNatureSync`] takes a
//! [`CoreConfig`] carrying the host bridges, opens the local database and
//! wires authentication and the data sync engine on top of it.
//!
//! Desktop apps enable the `desktop-shims` feature so missing bridges fall
//! back to the `bridge-desktop` implementations; mobile hosts inject their
//! own.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::GeoNatureSync;
//! use bridge_traits::ExistingWorkPolicy;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/data/geonature.db")
//!     .app_settings_path("/data/settings.json")
//!     .build()?;
//!
//! let core = GeoNatureSync::new(config).await?;
//! core.login("agent", "secret").await?;
//!
//! let mut events = core.subscribe_events();
//! core.start_sync(ExistingWorkPolicy::Keep).await?;
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.description());
//! }
//! ```

pub mod error;

pub use error::{CoreError, Result};

use bridge_traits::background::{EnqueueOutcome, ExistingWorkPolicy, WorkInfo};
use chrono::{DateTime, Utc};
use core_auth::{AuthLogin, AuthManager, AuthSession};
use core_data::db::{create_pool, DatabaseConfig};
use core_runtime::config::CoreConfig;
use core_runtime::events::{EventBus, EventStream};
use core_sync::{
    AppSettingsLoader, DataSyncManager, DataSyncSettings, DataSyncSettingsPatch, DataSyncWorker,
    FreshnessStore, SyncGateways, SyncStatus,
};
use futures::stream::BoxStream;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
pub struct GeoNatureSync {
    pool: SqlitePool,
    event_bus: EventBus,
    auth: Arc<AuthManager>,
    sync: DataSyncManager,
    settings: RwLock<DataSyncSettings>,
    periodic_sync: bool,
}

impl GeoNatureSync {
    /// Loads the app settings from `config.app_settings_path` and starts the core.
    ///
    /// # Errors
    ///
    /// - `CoreError::InitializationFailed` when no app settings path is configured
    /// - `CoreError::Sync` when the settings file is missing or malformed
    pub async fn new(config: CoreConfig) -> Result<Self> {
        let path = config.app_settings_path.clone().ok_or_else(|| {
            CoreError::InitializationFailed(
                "App settings path is required. Use .app_settings_path() or GeoNatureSync::with_settings()."
                    .to_string(),
            )
        })?;
        let settings = AppSettingsLoader::load(&path).await?;
        Self::with_settings(config, settings).await
    }

    /// Starts the core with settings supplied by the host.
    #[instrument(skip_all, fields(database = %config.database_path.display()))]
    pub async fn with_settings(config: CoreConfig, settings: DataSyncSettings) -> Result<Self> {
        config.validate()?;
        settings.validate()?;

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let event_bus = EventBus::new(config.event_buffer_size);

        let auth = Arc::new(
            AuthManager::new(
                &settings.geonature_server_url,
                config.http_client.clone(),
                config.secure_store.clone(),
                event_bus.clone(),
            )
            .with_clock(config.clock.clone()),
        );

        let freshness = FreshnessStore::new(config.settings_store.clone(), config.clock.clone());
        let worker = DataSyncWorker::new(
            config.http_client.clone(),
            SyncGateways::sqlite(pool.clone()),
            freshness,
            event_bus.clone(),
        )
        .with_auth(auth.clone());
        let sync = DataSyncManager::new(Arc::new(worker), config.work_scheduler.clone());

        let core = Self {
            pool,
            event_bus,
            auth,
            sync,
            settings: RwLock::new(settings),
            periodic_sync: config.features.enable_periodic_sync,
        };

        if core.periodic_sync {
            core.schedule_periodic_sync(ExistingWorkPolicy::Keep).await?;
        }

        info!(periodic_sync = core.periodic_sync, "GeoNature sync core ready");
        Ok(core)
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    /// Logs in against the configured GeoNature instance.
    pub async fn login(
        &self,
        login: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<AuthSession> {
        let application_id = self.settings.read().await.application_id;
        let session = self
            .auth
            .login(AuthLogin::new(login, password, application_id))
            .await?;
        Ok(session)
    }

    pub async fn logout(&self) -> Result<()> {
        self.auth.logout().await?;
        Ok(())
    }

    pub async fn current_session(&self) -> Result<Option<AuthSession>> {
        Ok(self.auth.current_session().await?)
    }

    // ========================================================================
    // Data sync
    // ========================================================================

    /// Enqueues a data sync with the current settings.
    pub async fn start_sync(&self, policy: ExistingWorkPolicy) -> Result<EnqueueOutcome> {
        let settings = self.settings.read().await.clone();
        Ok(self.sync.start_sync(settings, policy).await?)
    }

    pub async fn cancel_sync(&self) -> Result<bool> {
        Ok(self.sync.cancel_sync().await?)
    }

    /// Schedules the periodic data sync when the settings define a periodicity.
    ///
    /// Returns `None` when no periodicity is configured.
    pub async fn schedule_periodic_sync(
        &self,
        policy: ExistingWorkPolicy,
    ) -> Result<Option<EnqueueOutcome>> {
        let settings = self.settings.read().await.clone();
        if settings.data_sync_periodicity.is_none() {
            info!("No data sync periodicity configured, periodic sync not scheduled");
            return Ok(None);
        }
        Ok(Some(self.sync.schedule_periodic_sync(settings, policy).await?))
    }

    pub async fn cancel_periodic_sync(&self) -> Result<bool> {
        Ok(self.sync.cancel_periodic_sync().await?)
    }

    /// Work state changes of the one-shot data sync.
    pub fn observe_sync(&self) -> BoxStream<'static, WorkInfo> {
        self.sync.observe()
    }

    pub async fn sync_info(&self) -> Result<Option<WorkInfo>> {
        Ok(self.sync.work_info().await?)
    }

    /// Raw per-sub-sync statuses of running syncs.
    pub fn subscribe_statuses(&self) -> broadcast::Receiver<SyncStatus> {
        self.sync.subscribe_statuses()
    }

    pub async fn last_synchronized_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.sync.last_synchronized_at().await?)
    }

    // ========================================================================
    // Settings and events
    // ========================================================================

    pub async fn settings(&self) -> DataSyncSettings {
        self.settings.read().await.clone()
    }

    /// Applies `patch` over the current settings.
    ///
    /// A new GeoNature URL signs out the current session, which the previous
    /// server issued. The periodic schedule is replaced when periodic sync is
    /// enabled, so a new periodicity takes effect immediately.
    pub async fn update_settings(&self, patch: DataSyncSettingsPatch) -> Result<DataSyncSettings> {
        let updated = {
            let mut settings = self.settings.write().await;
            let merged = settings.clone().merge(patch);
            merged.validate()?;
            *settings = merged.clone();
            merged
        };

        self.auth
            .change_server(&updated.geonature_server_url)
            .await?;

        if self.periodic_sync {
            self.schedule_periodic_sync(ExistingWorkPolicy::Replace)
                .await?;
        }
        Ok(updated)
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.event_bus.subscribe())
    }

    /// Pool of the local database, for hosts reading the synchronized data.
    pub fn database(&self) -> &SqlitePool {
        &self.pool
    }
}
