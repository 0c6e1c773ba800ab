//! # Data Sync Worker
//!
//! Executes one complete data sync run: builds the remote client and the
//! sub-syncs from the settings, runs them through the [`SyncOrchestrator`],
//! and relays the outcome.
//!
//! ## Event flow
//!
//! ```text
//! Started → Progress* / TaskFinished (per sub-sync) → Completed | Failed | Cancelled
//! ```
//!
//! Every status is also published on a broadcast channel for hosts that want
//! the raw stream. A run failing with HTTP 401 expires the current session.

use crate::error::{Result, SyncError};
use crate::freshness::{FreshnessStore, DATA_SYNC_ENTITY};
use crate::orchestrator::{SyncOrchestrator, SyncReport, TaskContext};
use crate::remote::GeoNatureClient;
use crate::reporter::ServerStatus;
use crate::settings::DataSyncSettings;
use crate::status::{StatusSink, SyncState, SyncStatus};
use crate::tasks::{default_tasks, SyncGateways};
use bridge_traits::http::HttpClient;
use core_auth::AuthManager;
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Forwards statuses to the event bus and the raw status channel.
struct EventSink {
    job_id: String,
    event_bus: EventBus,
    statuses: broadcast::Sender<SyncStatus>,
}

impl StatusSink for EventSink {
    fn publish(&self, status: &SyncStatus) {
        let event = if status.is_terminal() {
            SyncEvent::TaskFinished {
                job_id: self.job_id.clone(),
                task: status.task.clone(),
                state: status.state.as_str().to_string(),
                items_processed: status.items_processed,
                message: status.message.clone(),
            }
        } else {
            SyncEvent::Progress {
                job_id: self.job_id.clone(),
                task: status.task.clone(),
                items_processed: status.items_processed,
                message: status.message.clone(),
            }
        };

        self.event_bus.emit(CoreEvent::Sync(event)).ok();
        self.statuses.send(status.clone()).ok();
    }
}

pub struct DataSyncWorker {
    http: Arc<dyn HttpClient>,
    gateways: SyncGateways,
    freshness: FreshnessStore,
    event_bus: EventBus,
    statuses: broadcast::Sender<SyncStatus>,
    auth: Option<Arc<AuthManager>>,
    /// Held for the duration of a run
    run_lock: Mutex<()>,
}

impl DataSyncWorker {
    pub fn new(
        http: Arc<dyn HttpClient>,
        gateways: SyncGateways,
        freshness: FreshnessStore,
        event_bus: EventBus,
    ) -> Self {
        let (statuses, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            http,
            gateways,
            freshness,
            event_bus,
            statuses,
            auth: None,
            run_lock: Mutex::new(()),
        }
    }

    /// Authenticates remote calls and expires the session on HTTP 401.
    pub fn with_auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn subscribe_statuses(&self) -> broadcast::Receiver<SyncStatus> {
        self.statuses.subscribe()
    }

    pub fn freshness(&self) -> &FreshnessStore {
        &self.freshness
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Runs every sub-sync once.
    ///
    /// Fails with `AlreadyRunning` while another run holds the worker.
    /// Sub-sync failures are part of the returned report; `Err` is reserved
    /// for runs that could not start or could not record their outcome.
    #[instrument(skip(self, settings, cancel), fields(geonature = %settings.geonature_server_url))]
    pub async fn run(
        &self,
        settings: &DataSyncSettings,
        cancel: CancellationToken,
    ) -> Result<SyncReport> {
        let _guard = self.run_lock.try_lock().map_err(|_| {
            warn!("Data sync rejected, another run is in progress");
            SyncError::AlreadyRunning("data sync".to_string())
        })?;
        self.run_locked(settings, cancel).await
    }

    /// Like [`run`](Self::run), but waits for a run in progress to release
    /// the worker first. Used when a new sync replaces a cancelled one.
    #[instrument(skip(self, settings, cancel), fields(geonature = %settings.geonature_server_url))]
    pub async fn run_after_current(
        &self,
        settings: &DataSyncSettings,
        cancel: CancellationToken,
    ) -> Result<SyncReport> {
        let _guard = tokio::select! {
            guard = self.run_lock.lock() => guard,
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        };
        self.run_locked(settings, cancel).await
    }

    async fn run_locked(
        &self,
        settings: &DataSyncSettings,
        cancel: CancellationToken,
    ) -> Result<SyncReport> {
        settings.validate()?;

        let job_id = Uuid::new_v4().to_string();
        let client = self.client(settings);
        let sink = Arc::new(EventSink {
            job_id: job_id.clone(),
            event_bus: self.event_bus.clone(),
            statuses: self.statuses.clone(),
        });

        let mut orchestrator = SyncOrchestrator::new(sink);
        for task in default_tasks(&client, settings, &self.gateways, &self.freshness) {
            orchestrator.push_task(task);
        }

        info!(job_id = %job_id, "Starting data sync");
        self.event_bus
            .emit(CoreEvent::Sync(SyncEvent::Started {
                job_id: job_id.clone(),
                tasks: orchestrator.task_names(),
            }))
            .ok();

        let report = orchestrator
            .run(&TaskContext::new(settings.page_size, cancel))
            .await;

        self.finish(&job_id, &report).await?;
        Ok(report)
    }

    fn client(&self, settings: &DataSyncSettings) -> GeoNatureClient {
        let client = GeoNatureClient::new(
            self.http.clone(),
            &settings.geonature_server_url,
            &settings.taxhub_server_url,
        );
        match &self.auth {
            Some(auth) => client.with_auth(auth.clone()),
            None => client,
        }
    }

    async fn finish(&self, job_id: &str, report: &SyncReport) -> Result<()> {
        let event = match report.state {
            SyncState::Succeeded => {
                self.freshness.mark_synced(DATA_SYNC_ENTITY).await?;
                info!(job_id, items = report.items_processed, "Data sync completed");
                SyncEvent::Completed {
                    job_id: job_id.to_string(),
                    items_processed: report.items_processed,
                    duration_secs: report.duration.as_secs(),
                }
            }
            SyncState::Cancelled => {
                info!(job_id, "Data sync cancelled");
                SyncEvent::Cancelled {
                    job_id: job_id.to_string(),
                    items_processed: report.items_processed,
                }
            }
            SyncState::Failed | SyncState::Running => {
                let message = report
                    .failure_message()
                    .or_else(|| report.last_message.clone())
                    .unwrap_or_else(|| "Data sync failed".to_string());
                error!(job_id, server_status = %report.server_status, message = %message, "Data sync failed");

                if report.server_status.requires_login() {
                    self.expire_session(&message).await;
                }

                SyncEvent::Failed {
                    job_id: job_id.to_string(),
                    message,
                    server_status: report.server_status.as_str().to_string(),
                    recoverable: !matches!(
                        report.server_status,
                        ServerStatus::Unauthorized | ServerStatus::Forbidden
                    ),
                }
            }
        };

        self.event_bus.emit(CoreEvent::Sync(event)).ok();
        Ok(())
    }

    async fn expire_session(&self, reason: &str) {
        let Some(auth) = &self.auth else {
            return;
        };
        if let Err(e) = auth.handle_unauthorized(reason).await {
            warn!(error = %e, "Failed to clear rejected session");
        }
    }
}
