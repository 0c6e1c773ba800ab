//! # Sync Orchestrator
//!
//! Runs an ordered list of named sub-syncs one after the other and relays
//! every status they produce.
//!
//! - A failed sub-sync does not stop the sub-syncs after it. The aggregate
//!   state becomes `Failed`.
//! - A sub-sync that declares a dependency on a sub-sync that did not succeed
//!   is not run and is reported `Failed` with a skip message.
//! - Cancellation is checked between sub-syncs (and between pages inside the
//!   fetcher). Sub-syncs not started yet are reported `Cancelled`.

use crate::error::{Result, SyncError};
use crate::fetcher::PaginatedFetcher;
use crate::reporter::{ServerStatus, StatusReporter};
use crate::status::{FanoutSink, StatusEmitter, StatusSink, SyncState, SyncStatus};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Shared inputs of every sub-sync in one run.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub cancel: CancellationToken,
    pub page_size: u32,
}

impl TaskContext {
    pub fn new(page_size: u32, cancel: CancellationToken) -> Self {
        Self { cancel, page_size }
    }

    pub fn fetcher(&self) -> Result<PaginatedFetcher> {
        PaginatedFetcher::new(self.page_size, self.cancel.clone())
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// One named sub-sync.
#[async_trait]
pub trait SyncTask: Send + Sync {
    fn name(&self) -> &str;

    /// Sub-syncs that must have succeeded earlier in the same run.
    fn depends_on(&self) -> &[&'static str] {
        &[]
    }

    /// Runs the sub-sync, reporting progress through `emitter`.
    ///
    /// The returned message, if any, is attached to the `Succeeded` status.
    async fn run(&self, ctx: &TaskContext, emitter: &mut StatusEmitter) -> Result<Option<String>>;
}

/// Aggregate of one orchestrated run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub state: SyncState,
    /// Terminal status of every sub-sync, in run order
    pub outcomes: Vec<SyncStatus>,
    pub items_processed: u64,
    pub last_message: Option<String>,
    pub server_status: ServerStatus,
    pub duration: Duration,
}

impl SyncReport {
    pub fn outcome(&self, task: &str) -> Option<&SyncStatus> {
        self.outcomes.iter().find(|status| status.task == task)
    }

    pub fn is_success(&self) -> bool {
        self.state == SyncState::Succeeded
    }

    /// Message of the last failed sub-sync.
    pub fn failure_message(&self) -> Option<String> {
        self.outcomes
            .iter()
            .rev()
            .find(|status| status.state == SyncState::Failed)
            .and_then(|status| status.message.clone())
    }
}

pub struct SyncOrchestrator {
    tasks: Vec<Box<dyn SyncTask>>,
    sink: Arc<dyn StatusSink>,
}

impl SyncOrchestrator {
    pub fn new(sink: Arc<dyn StatusSink>) -> Self {
        Self {
            tasks: Vec::new(),
            sink,
        }
    }

    pub fn with_task(mut self, task: impl SyncTask + 'static) -> Self {
        self.tasks.push(Box::new(task));
        self
    }

    pub fn push_task(&mut self, task: Box<dyn SyncTask>) {
        self.tasks.push(task);
    }

    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|task| task.name().to_string()).collect()
    }

    #[instrument(skip_all, fields(tasks = self.tasks.len()))]
    pub async fn run(&self, ctx: &TaskContext) -> SyncReport {
        let started = Instant::now();
        let reporter = Arc::new(StatusReporter::new());
        let sink: Arc<dyn StatusSink> =
            Arc::new(FanoutSink(vec![self.sink.clone(), reporter.clone()]));

        let mut not_succeeded: HashSet<String> = HashSet::new();
        let mut outcomes = Vec::with_capacity(self.tasks.len());

        for task in &self.tasks {
            let mut emitter = StatusEmitter::new(task.name(), sink.clone());

            let status = if ctx.cancel.is_cancelled() {
                emitter.finish(Err(SyncError::Cancelled))
            } else if let Some(dependency) = task
                .depends_on()
                .iter()
                .find(|dependency| not_succeeded.contains(**dependency))
            {
                warn!(task = task.name(), dependency, "Skipping sub-sync");
                emitter.finish(Err(SyncError::DependencyFailed {
                    dependency: dependency.to_string(),
                }))
            } else {
                info!(task = task.name(), "Starting sub-sync");
                let outcome = task.run(ctx, &mut emitter).await;
                if let Err(error) = &outcome {
                    if !error.is_cancelled() {
                        warn!(task = task.name(), error = %error, "Sub-sync failed");
                    }
                }
                emitter.finish(outcome)
            };

            if status.state != SyncState::Succeeded {
                not_succeeded.insert(status.task.clone());
            }
            outcomes.push(status);
        }

        let state = aggregate_state(&outcomes);
        let items_processed = outcomes.iter().map(|status| status.items_processed).sum();

        info!(
            state = %state,
            items_processed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sync run finished"
        );

        SyncReport {
            state,
            outcomes,
            items_processed,
            last_message: reporter.last_message(),
            server_status: reporter.server_status(),
            duration: started.elapsed(),
        }
    }
}

fn aggregate_state(outcomes: &[SyncStatus]) -> SyncState {
    if outcomes.iter().any(|s| s.state == SyncState::Cancelled) {
        SyncState::Cancelled
    } else if outcomes.iter().any(|s| s.state == SyncState::Failed) {
        SyncState::Failed
    } else {
        SyncState::Succeeded
    }
}
