//! Presentation layer over the raw status stream.

use crate::error::{ErrorKind, ServerErrorKind};
use crate::status::{StatusSink, SyncState, SyncStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// Server-side classification of the last failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    #[default]
    Ok,
    Unauthorized,
    Forbidden,
    InternalServerError,
}

impl ServerStatus {
    /// Non-HTTP failures and unclassified HTTP statuses map to `Ok`.
    pub fn from_error_kind(kind: Option<ErrorKind>) -> Self {
        match kind {
            Some(ErrorKind::ServerFailure(ServerErrorKind::Unauthorized)) => {
                ServerStatus::Unauthorized
            }
            Some(ErrorKind::ServerFailure(ServerErrorKind::Forbidden)) => ServerStatus::Forbidden,
            Some(ErrorKind::ServerFailure(ServerErrorKind::InternalServerError)) => {
                ServerStatus::InternalServerError
            }
            _ => ServerStatus::Ok,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Ok => "ok",
            ServerStatus::Unauthorized => "unauthorized",
            ServerStatus::Forbidden => "forbidden",
            ServerStatus::InternalServerError => "internal_server_error",
        }
    }

    pub fn requires_login(&self) -> bool {
        matches!(self, ServerStatus::Unauthorized)
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status with its display text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub task: String,
    pub state: SyncState,
    pub items_processed: u64,
    pub text: String,
    pub server_status: ServerStatus,
}

#[derive(Default)]
struct ReporterState {
    last_failure: Option<ErrorKind>,
    last_message: Option<String>,
    reports: Vec<StatusReport>,
}

/// Keeps the last meaningful message and the server status of the last
/// failure seen on the stream.
#[derive(Default)]
pub struct StatusReporter {
    state: Mutex<ReporterState>,
}

impl StatusReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self, status: &SyncStatus) -> StatusReport {
        let text = describe(status);
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        // A skip repeats an earlier failure and must not hide its cause.
        if status.state == SyncState::Failed && status.error_kind != Some(ErrorKind::Skipped) {
            state.last_failure = status.error_kind;
        }
        if status.message.is_some() || status.is_terminal() {
            state.last_message = Some(text.clone());
        }

        let report = StatusReport {
            task: status.task.clone(),
            state: status.state,
            items_processed: status.items_processed,
            text,
            server_status: ServerStatus::from_error_kind(state.last_failure),
        };
        state.reports.push(report.clone());
        report
    }

    pub fn server_status(&self) -> ServerStatus {
        self.state
            .lock()
            .map(|state| ServerStatus::from_error_kind(state.last_failure))
            .unwrap_or_default()
    }

    pub fn last_message(&self) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.last_message.clone())
    }

    pub fn last_failure(&self) -> Option<ErrorKind> {
        self.state.lock().ok().and_then(|state| state.last_failure)
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.state
            .lock()
            .map(|state| state.reports.clone())
            .unwrap_or_default()
    }
}

impl StatusSink for StatusReporter {
    fn publish(&self, status: &SyncStatus) {
        self.report(status);
    }
}

fn describe(status: &SyncStatus) -> String {
    let count = status.items_processed;
    match (status.state, status.message.as_deref()) {
        (SyncState::Running, Some(message)) => format!("{}: {}", status.task, message),
        (SyncState::Running, None) => format!("{}: {} items received", status.task, count),
        (SyncState::Succeeded, Some(message)) => format!("{}: {}", status.task, message),
        (SyncState::Succeeded, None) => {
            format!("{}: {} items synchronized", status.task, count)
        }
        (SyncState::Failed, message) => {
            let kind = status
                .error_kind
                .map(|kind| kind.to_string())
                .unwrap_or_else(|| "failure".to_string());
            match message {
                Some(message) => format!(
                    "{}: {} after {} items: {}",
                    status.task, kind, count, message
                ),
                None => format!("{}: {} after {} items", status.task, kind, count),
            }
        }
        (SyncState::Cancelled, _) => {
            format!("{}: cancelled after {} items", status.task, count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;

    #[test]
    fn test_server_status_mapping() {
        assert_eq!(ServerStatus::from_error_kind(None), ServerStatus::Ok);
        assert_eq!(
            ServerStatus::from_error_kind(Some(ErrorKind::NetworkFailure)),
            ServerStatus::Ok
        );
        assert_eq!(
            ServerStatus::from_error_kind(Some(ErrorKind::ServerFailure(
                ServerErrorKind::Unauthorized
            ))),
            ServerStatus::Unauthorized
        );
        assert_eq!(
            ServerStatus::from_error_kind(Some(ErrorKind::ServerFailure(
                ServerErrorKind::Other(418)
            ))),
            ServerStatus::Ok
        );
        assert!(ServerStatus::Unauthorized.requires_login());
    }

    #[test]
    fn test_reporter_tracks_last_failure() {
        let reporter = StatusReporter::new();

        let running = reporter.report(&SyncStatus::running("observers", 12));
        assert_eq!(running.text, "observers: 12 items received");
        assert_eq!(running.server_status, ServerStatus::Ok);

        let failure = SyncError::Server {
            status: 403,
            url: "https://gn/api/users/menu/1".to_string(),
        };
        let failed = reporter.report(&SyncStatus::failed("observers", 12, &failure));
        assert_eq!(failed.server_status, ServerStatus::Forbidden);
        assert!(failed.text.starts_with("observers: server failure"));

        reporter.report(&SyncStatus::succeeded("datasets", 3));

        // A later success does not clear the failure classification
        assert_eq!(reporter.server_status(), ServerStatus::Forbidden);
        assert_eq!(
            reporter.last_message().as_deref(),
            Some("datasets: 3 items synchronized")
        );
        assert_eq!(reporter.reports().len(), 3);
    }

    #[test]
    fn test_skipped_dependent_keeps_cause() {
        let reporter = StatusReporter::new();
        let unauthorized = SyncError::Server {
            status: 401,
            url: "https://th/api/taxref/".to_string(),
        };
        reporter.report(&SyncStatus::failed("taxa", 0, &unauthorized));
        let skipped = reporter.report(&SyncStatus::failed(
            "taxa_area",
            0,
            &SyncError::DependencyFailed {
                dependency: "taxa".to_string(),
            },
        ));

        assert_eq!(skipped.server_status, ServerStatus::Unauthorized);
        assert!(skipped.text.contains("Skipped: taxa did not succeed"));
        assert_eq!(
            reporter.last_failure(),
            Some(ErrorKind::ServerFailure(ServerErrorKind::Unauthorized))
        );
    }

    #[test]
    fn test_messages_take_precedence() {
        let reporter = StatusReporter::new();
        let report = reporter
            .report(&SyncStatus::succeeded("taxa", 0).with_message("taxa are up to date"));

        assert_eq!(report.text, "taxa: taxa are up to date");
    }
}
