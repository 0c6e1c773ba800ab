//! # Data Sync Manager
//!
//! Schedules [`DataSyncWorker`] runs as unique background work.
//!
//! One-shot runs use the work name [`DATA_SYNC_WORK`]; the periodic schedule
//! lives under [`PERIODIC_DATA_SYNC_WORK`]. Whatever the scheduler does with a
//! second request, the worker itself never runs twice at once.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bridge_traits::ExistingWorkPolicy;
//!
//! manager.start_sync(settings, ExistingWorkPolicy::Keep).await?;
//!
//! let mut work = manager.observe();
//! while let Some(info) = work.next().await {
//!     println!("{}: {}", info.name, info.state);
//! }
//! ```

use crate::error::{Result, SyncError};
use crate::freshness::DATA_SYNC_ENTITY;
use crate::settings::DataSyncSettings;
use crate::status::{SyncState, SyncStatus};
use crate::worker::DataSyncWorker;
use bridge_traits::background::{
    EnqueueOutcome, ExistingWorkPolicy, PeriodicWorkJob, WorkFuture, WorkInfo, WorkJob,
    WorkScheduler,
};
use bridge_traits::error::BridgeError;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

pub const DATA_SYNC_WORK: &str = "geonature:data_sync";
pub const PERIODIC_DATA_SYNC_WORK: &str = "geonature:data_sync:periodic";

pub struct DataSyncManager {
    worker: Arc<DataSyncWorker>,
    scheduler: Arc<dyn WorkScheduler>,
}

impl DataSyncManager {
    pub fn new(worker: Arc<DataSyncWorker>, scheduler: Arc<dyn WorkScheduler>) -> Self {
        Self { worker, scheduler }
    }

    /// Enqueues a one-shot data sync under the unique work name.
    #[instrument(skip(self, settings))]
    pub async fn start_sync(
        &self,
        settings: DataSyncSettings,
        policy: ExistingWorkPolicy,
    ) -> Result<EnqueueOutcome> {
        settings.validate()?;

        let worker = self.worker.clone();
        let wait_for_current = policy == ExistingWorkPolicy::Replace;
        let job: WorkJob = Box::new(move |cancel| {
            run_job(worker, Arc::new(settings), cancel, wait_for_current)
        });

        let outcome = self
            .scheduler
            .enqueue_unique_work(DATA_SYNC_WORK, policy, job)
            .await
            .map_err(scheduler_error)?;

        info!(outcome = ?outcome, "Data sync requested");
        Ok(outcome)
    }

    /// Repeats the data sync every `data_sync_periodicity`.
    #[instrument(skip(self, settings))]
    pub async fn schedule_periodic_sync(
        &self,
        settings: DataSyncSettings,
        policy: ExistingWorkPolicy,
    ) -> Result<EnqueueOutcome> {
        settings.validate()?;
        let interval = settings.data_sync_periodicity.ok_or_else(|| {
            SyncError::InvalidSettings("data_sync_periodicity is not set".to_string())
        })?;

        let worker = self.worker.clone();
        let settings = Arc::new(settings);
        let job: PeriodicWorkJob =
            Arc::new(move |cancel| run_job(worker.clone(), settings.clone(), cancel, false));

        let outcome = self
            .scheduler
            .enqueue_unique_periodic_work(PERIODIC_DATA_SYNC_WORK, interval, policy, job)
            .await
            .map_err(scheduler_error)?;

        info!(interval_secs = interval.as_secs(), outcome = ?outcome, "Periodic data sync scheduled");
        Ok(outcome)
    }

    /// Returns `false` when no sync was enqueued or running.
    pub async fn cancel_sync(&self) -> Result<bool> {
        self.scheduler
            .cancel_unique_work(DATA_SYNC_WORK)
            .await
            .map_err(scheduler_error)
    }

    pub async fn cancel_periodic_sync(&self) -> Result<bool> {
        self.scheduler
            .cancel_unique_work(PERIODIC_DATA_SYNC_WORK)
            .await
            .map_err(scheduler_error)
    }

    /// State changes of the one-shot data sync work.
    pub fn observe(&self) -> BoxStream<'static, WorkInfo> {
        self.scheduler.observe_work(DATA_SYNC_WORK)
    }

    pub async fn work_info(&self) -> Result<Option<WorkInfo>> {
        self.scheduler
            .work_info(DATA_SYNC_WORK)
            .await
            .map_err(scheduler_error)
    }

    pub fn subscribe_statuses(&self) -> broadcast::Receiver<SyncStatus> {
        self.worker.subscribe_statuses()
    }

    /// Time of the last data sync that completed without failure.
    pub async fn last_synchronized_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .worker
            .freshness()
            .get(DATA_SYNC_ENTITY)
            .await?
            .last_synced_at)
    }
}

fn scheduler_error(error: BridgeError) -> SyncError {
    SyncError::Scheduler(error.to_string())
}

/// A run whose report is not `Succeeded` fails the work.
///
/// A replacing job waits for the cancelled run it replaces to wind down.
fn run_job(
    worker: Arc<DataSyncWorker>,
    settings: Arc<DataSyncSettings>,
    cancel: CancellationToken,
    wait_for_current: bool,
) -> WorkFuture {
    Box::pin(async move {
        let outcome = if wait_for_current {
            worker.run_after_current(&settings, cancel).await
        } else {
            worker.run(&settings, cancel).await
        };
        let report = outcome.map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

        match report.state {
            SyncState::Succeeded => Ok(()),
            _ => Err(BridgeError::OperationFailed(
                report
                    .failure_message()
                    .unwrap_or_else(|| format!("data sync {}", report.state)),
            )),
        }
    })
}
