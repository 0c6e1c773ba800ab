use bridge_traits::error::BridgeError;
use core_data::DataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network failure: {0}")]
    Network(String),

    #[error("Server returned HTTP {status} for {url}")]
    Server { status: u16, url: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Unable to parse {context}: {message}")]
    Parse { context: String, message: String },

    #[error("Local storage failure: {0}")]
    LocalStorage(#[from] DataError),

    #[error("Settings store failure: {0}")]
    SettingsStore(#[from] BridgeError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Sync already in progress: {0}")]
    AlreadyRunning(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Skipped: {dependency} did not succeed")]
    DependencyFailed { dependency: String },

    #[error("Sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub(crate) fn parse(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Classification used in statuses and reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network(_) => ErrorKind::NetworkFailure,
            SyncError::Server { status, .. } => {
                ErrorKind::ServerFailure(ServerErrorKind::from_status(*status))
            }
            SyncError::NotFound(_) => ErrorKind::NotFoundFailure,
            SyncError::Parse { .. } | SyncError::InvalidSettings(_) => ErrorKind::ParseFailure,
            SyncError::LocalStorage(_) | SyncError::SettingsStore(_) => {
                ErrorKind::LocalStorageFailure
            }
            SyncError::AlreadyRunning(_) | SyncError::Scheduler(_) => ErrorKind::Internal,
            SyncError::DependencyFailed { .. } => ErrorKind::Skipped,
            SyncError::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}

/// HTTP failure classes reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum ServerErrorKind {
    Unauthorized,
    Forbidden,
    InternalServerError,
    Other(u16),
}

impl ServerErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ServerErrorKind::Unauthorized,
            403 => ServerErrorKind::Forbidden,
            500..=599 => ServerErrorKind::InternalServerError,
            other => ServerErrorKind::Other(other),
        }
    }
}

/// Failure taxonomy carried by a failed [`SyncStatus`](crate::status::SyncStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "server", rename_all = "snake_case")]
pub enum ErrorKind {
    NetworkFailure,
    ServerFailure(ServerErrorKind),
    NotFoundFailure,
    ParseFailure,
    LocalStorageFailure,
    Cancelled,
    /// Not run because a dependency did not succeed.
    Skipped,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::NetworkFailure => write!(f, "network failure"),
            ErrorKind::ServerFailure(ServerErrorKind::Other(status)) => {
                write!(f, "server failure (HTTP {})", status)
            }
            ErrorKind::ServerFailure(kind) => write!(f, "server failure ({:?})", kind),
            ErrorKind::NotFoundFailure => write!(f, "not found"),
            ErrorKind::ParseFailure => write!(f, "parse failure"),
            ErrorKind::LocalStorageFailure => write!(f, "local storage failure"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::Skipped => write!(f, "skipped"),
            ErrorKind::Internal => write!(f, "internal error"),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
