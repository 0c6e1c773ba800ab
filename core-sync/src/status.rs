//! # Sync Status Stream
//!
//! Every sub-sync reports through a [`StatusEmitter`]: zero or more `Running`
//! statuses followed by exactly one terminal status. The emitter is consumed
//! by [`StatusEmitter::finish`], so a second terminal status cannot be
//! produced for the same run.
//!
//! ```text
//! Running(2) → Running(4) → Running(5) → Succeeded(5)
//! Running(1000) → Failed(1000, ServerFailure)
//! ```

use crate::error::{ErrorKind, Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// State of a sub-sync or of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl SyncState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Running => "running",
            SyncState::Succeeded => "succeeded",
            SyncState::Failed => "failed",
            SyncState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(SyncState::Running),
            "succeeded" => Ok(SyncState::Succeeded),
            "failed" => Ok(SyncState::Failed),
            "cancelled" => Ok(SyncState::Cancelled),
            other => Err(SyncError::parse("sync state", other)),
        }
    }
}

/// One status value of a sub-sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub task: String,
    pub state: SyncState,
    /// Items persisted so far by this sub-sync
    pub items_processed: u64,
    pub message: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl SyncStatus {
    pub fn running(task: impl Into<String>, items_processed: u64) -> Self {
        Self {
            task: task.into(),
            state: SyncState::Running,
            items_processed,
            message: None,
            error_kind: None,
        }
    }

    pub fn succeeded(task: impl Into<String>, items_processed: u64) -> Self {
        Self {
            state: SyncState::Succeeded,
            ..Self::running(task, items_processed)
        }
    }

    pub fn failed(task: impl Into<String>, items_processed: u64, error: &SyncError) -> Self {
        Self {
            state: SyncState::Failed,
            message: Some(error.to_string()),
            error_kind: Some(error.kind()),
            ..Self::running(task, items_processed)
        }
    }

    pub fn cancelled(task: impl Into<String>, items_processed: u64) -> Self {
        Self {
            state: SyncState::Cancelled,
            error_kind: Some(ErrorKind::Cancelled),
            ..Self::running(task, items_processed)
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Consumer of the status stream.
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: &SyncStatus);
}

impl StatusSink for mpsc::UnboundedSender<SyncStatus> {
    fn publish(&self, status: &SyncStatus) {
        // A dropped receiver only means nobody is listening anymore
        self.send(status.clone()).ok();
    }
}

impl StatusSink for broadcast::Sender<SyncStatus> {
    fn publish(&self, status: &SyncStatus) {
        self.send(status.clone()).ok();
    }
}

/// Sink that keeps every status in memory.
#[derive(Default)]
pub struct RecordingSink {
    statuses: Mutex<Vec<SyncStatus>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statuses(&self) -> Vec<SyncStatus> {
        self.statuses
            .lock()
            .map(|statuses| statuses.clone())
            .unwrap_or_default()
    }

    /// Statuses of one sub-sync, in emission order.
    pub fn statuses_for(&self, task: &str) -> Vec<SyncStatus> {
        self.statuses()
            .into_iter()
            .filter(|status| status.task == task)
            .collect()
    }
}

impl StatusSink for RecordingSink {
    fn publish(&self, status: &SyncStatus) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.push(status.clone());
        }
    }
}

/// Fans one status out to several sinks.
pub struct FanoutSink(pub Vec<Arc<dyn StatusSink>>);

impl StatusSink for FanoutSink {
    fn publish(&self, status: &SyncStatus) {
        for sink in &self.0 {
            sink.publish(status);
        }
    }
}

// ============================================================================
// Emitter
// ============================================================================

/// Status writer owned by one sub-sync run.
pub struct StatusEmitter {
    task: String,
    items_processed: u64,
    sink: Arc<dyn StatusSink>,
}

impl StatusEmitter {
    pub fn new(task: impl Into<String>, sink: Arc<dyn StatusSink>) -> Self {
        Self {
            task: task.into(),
            items_processed: 0,
            sink,
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn items_processed(&self) -> u64 {
        self.items_processed
    }

    /// Adds `items` to the running total and emits `Running`.
    pub fn progress(&mut self, items: u64) {
        self.items_processed += items;
        let status = SyncStatus::running(&self.task, self.items_processed);
        debug!(task = %self.task, items = self.items_processed, "Sync progress");
        self.sink.publish(&status);
    }

    /// Emits `Running` with a message, without changing the total.
    pub fn note(&mut self, message: impl Into<String>) {
        let status = SyncStatus::running(&self.task, self.items_processed).with_message(message);
        self.sink.publish(&status);
    }

    /// Emits the terminal status for `outcome` and returns it.
    ///
    /// `Ok(message)` becomes `Succeeded`, [`SyncError::Cancelled`] becomes
    /// `Cancelled` and any other error becomes `Failed`.
    pub fn finish(self, outcome: Result<Option<String>>) -> SyncStatus {
        let status = match outcome {
            Ok(message) => {
                let status = SyncStatus::succeeded(&self.task, self.items_processed);
                match message {
                    Some(message) => status.with_message(message),
                    None => status,
                }
            }
            Err(SyncError::Cancelled) => SyncStatus::cancelled(&self.task, self.items_processed),
            Err(error) => SyncStatus::failed(&self.task, self.items_processed, &error),
        };

        self.sink.publish(&status);
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerErrorKind;

    #[test]
    fn test_state_round_trip() {
        for state in [
            SyncState::Running,
            SyncState::Succeeded,
            SyncState::Failed,
            SyncState::Cancelled,
        ] {
            assert_eq!(state.as_str().parse::<SyncState>().unwrap(), state);
        }
        assert!("paused".parse::<SyncState>().is_err());
        assert!(!SyncState::Running.is_terminal());
    }

    #[test]
    fn test_emitter_accumulates_and_finishes_once() {
        let sink = Arc::new(RecordingSink::new());
        let mut emitter = StatusEmitter::new("taxa", sink.clone());

        emitter.progress(2);
        emitter.progress(2);
        emitter.progress(1);
        let terminal = emitter.finish(Ok(None));

        let statuses = sink.statuses();
        let counts: Vec<u64> = statuses.iter().map(|s| s.items_processed).collect();
        assert_eq!(counts, vec![2, 4, 5, 5]);
        assert_eq!(terminal.state, SyncState::Succeeded);
        assert_eq!(statuses.iter().filter(|s| s.is_terminal()).count(), 1);
        assert!(statuses.last().unwrap().is_terminal());
    }

    #[test]
    fn test_failure_carries_error_kind() {
        let sink = Arc::new(RecordingSink::new());
        let mut emitter = StatusEmitter::new("taxa", sink.clone());
        emitter.progress(3);

        let terminal = emitter.finish(Err(SyncError::Server {
            status: 500,
            url: "https://th/api/taxref/".to_string(),
        }));

        assert_eq!(terminal.state, SyncState::Failed);
        assert_eq!(terminal.items_processed, 3);
        assert_eq!(
            terminal.error_kind,
            Some(ErrorKind::ServerFailure(ServerErrorKind::InternalServerError))
        );
        assert!(terminal.message.unwrap().contains("500"));
    }

    #[test]
    fn test_cancellation_is_not_failure() {
        let sink = Arc::new(RecordingSink::new());
        let terminal = StatusEmitter::new("observers", sink).finish(Err(SyncError::Cancelled));

        assert_eq!(terminal.state, SyncState::Cancelled);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = Arc::new(RecordingSink::new());
        let second = Arc::new(RecordingSink::new());
        let fanout = FanoutSink(vec![first.clone(), second.clone()]);

        fanout.publish(&SyncStatus::running("datasets", 1));

        assert_eq!(first.statuses().len(), 1);
        assert_eq!(second.statuses_for("datasets").len(), 1);
    }
}
