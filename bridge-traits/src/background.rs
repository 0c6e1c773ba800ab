//! Unique Background Work Scheduling
//!
//! Abstracts the host scheduler (WorkManager, BGTaskScheduler, a Tokio pool
//! on desktop) behind named, unique work. At most one job per name is
//! enqueued or running at any time; what happens on a second request is an
//! explicit [`ExistingWorkPolicy`] chosen by the caller.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};

/// Future produced by a work job
pub type WorkFuture = BoxFuture<'static, Result<()>>;

/// One-shot job. The token is cancelled when the work is cancelled or replaced.
pub type WorkJob = Box<dyn FnOnce(CancellationToken) -> WorkFuture + Send>;

/// Job invoked once per period.
pub type PeriodicWorkJob = Arc<dyn Fn(CancellationToken) -> WorkFuture + Send + Sync>;

/// What to do when work with the same name already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistingWorkPolicy {
    /// Leave the existing work alone and drop the new request
    Keep,
    /// Cancel the existing work and enqueue the new one
    Replace,
}

/// Result of an enqueue request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// No work with this name was active; the job is enqueued
    Enqueued,
    /// Existing work was cancelled and the job enqueued in its place
    Replaced,
    /// Existing work was kept; the job was not enqueued
    KeptExisting,
}

/// Work lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkState {
    Enqueued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkState::Enqueued => "enqueued",
            WorkState::Running => "running",
            WorkState::Succeeded => "succeeded",
            WorkState::Failed => "failed",
            WorkState::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again for the same run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkState::Succeeded | WorkState::Failed | WorkState::Cancelled
        )
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkState {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "enqueued" => Ok(WorkState::Enqueued),
            "running" => Ok(WorkState::Running),
            "succeeded" => Ok(WorkState::Succeeded),
            "failed" => Ok(WorkState::Failed),
            "cancelled" => Ok(WorkState::Cancelled),
            other => Err(BridgeError::OperationFailed(format!(
                "Unknown work state: {}",
                other
            ))),
        }
    }
}

/// Snapshot of a named unique work
#[derive(Debug, Clone, PartialEq)]
pub struct WorkInfo {
    pub name: String,
    pub state: WorkState,
    /// Number of runs started so far (periodic work increments per period)
    pub run_count: u32,
    /// Failure message of the last run, if it failed
    pub message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Unique work scheduler
///
/// # Example
///
/// ```ignore
/// use bridge_traits::background::{ExistingWorkPolicy, WorkScheduler};
///
/// async fn request_sync(scheduler: &dyn WorkScheduler) -> Result<()> {
///     scheduler
///         .enqueue_unique_work(
///             "geonature:data_sync",
///             ExistingWorkPolicy::Keep,
///             Box::new(|cancel| Box::pin(async move { run_sync(cancel).await })),
///         )
///         .await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait WorkScheduler: Send + Sync {
    /// Enqueue a one-shot job under a unique name
    async fn enqueue_unique_work(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        job: WorkJob,
    ) -> Result<EnqueueOutcome>;

    /// Enqueue a job repeated every `interval` under a unique name.
    ///
    /// The first run starts after one full interval.
    async fn enqueue_unique_periodic_work(
        &self,
        name: &str,
        interval: Duration,
        policy: ExistingWorkPolicy,
        job: PeriodicWorkJob,
    ) -> Result<EnqueueOutcome>;

    /// Cancel the named work. Returns `false` when nothing was active.
    async fn cancel_unique_work(&self, name: &str) -> Result<bool>;

    /// Latest known state of the named work
    async fn work_info(&self, name: &str) -> Result<Option<WorkInfo>>;

    /// Stream of state changes for the named work.
    ///
    /// The stream starts with the current state when one is known and stays
    /// open across successive runs under the same name.
    fn observe_work(&self, name: &str) -> BoxStream<'static, WorkInfo>;
}
