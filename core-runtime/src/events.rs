//! # Event Bus System
//!
//! Typed events published over `tokio::sync::broadcast` so hosts and core
//! modules can react to authentication and synchronization changes without
//! depending on each other.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     emit      ┌───────────┐
//! │ Auth Module ├──────────────>│           │     subscribe    ┌────────────┐
//! └─────────────┘               │ EventBus  ├─────────────────>│ Host UI    │
//! ┌─────────────┐     emit      │ (broadcast│                  └────────────┘
//! │ Sync Module ├──────────────>│  channel) │
//! └─────────────┘               └───────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{AuthEvent, CoreEvent, EventBus};
//!
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Auth(AuthEvent::SignedOut {
//!         login: "observer".to_string(),
//!     }))
//!     .ok();
//! ```
//!
//! `emit` fails when nobody is subscribed; publishers ignore that with `.ok()`.
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving newer ones.
//! - **`RecvError::Closed`**: every sender is gone; treat it as shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// A full sync emits one progress event per page per sub-sync, so bursts stay small.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Auth(AuthEvent),
    Sync(SyncEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Auth(e) => e.description(),
            CoreEvent::Sync(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Auth(AuthEvent::AuthError { .. }) => EventSeverity::Error,
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Auth(AuthEvent::SessionExpired { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::TaskFinished { state, .. }) if state == "failed" => {
                EventSeverity::Warning
            }
            CoreEvent::Auth(AuthEvent::SignedIn { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Authentication Events
// ============================================================================

/// Events related to the GeoNature session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum AuthEvent {
    /// A login request was sent.
    SigningIn { login: String },
    /// The server accepted the credentials and a session is stored.
    SignedIn {
        login: String,
        /// `id_role` of the authenticated user.
        user_id: i64,
        /// Session expiry (Unix epoch seconds), when the server provided one.
        expires_at: Option<i64>,
    },
    /// The session was removed locally.
    SignedOut { login: String },
    /// The server rejected the stored session; the host should ask for credentials.
    SessionExpired { reason: String },
    /// Authentication error occurred.
    AuthError {
        message: String,
        /// Whether retrying with the same credentials may succeed.
        recoverable: bool,
    },
}

impl AuthEvent {
    fn description(&self) -> &str {
        match self {
            AuthEvent::SigningIn { .. } => "Authentication in progress",
            AuthEvent::SignedIn { .. } => "User signed in successfully",
            AuthEvent::SignedOut { .. } => "User signed out",
            AuthEvent::SessionExpired { .. } => "Session expired",
            AuthEvent::AuthError { .. } => "Authentication error",
        }
    }
}

// ============================================================================
// Sync Events
// ============================================================================

/// Events related to a data synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A run started with the given ordered sub-syncs.
    Started { job_id: String, tasks: Vec<String> },
    /// Running status of one sub-sync.
    Progress {
        job_id: String,
        task: String,
        /// Items persisted so far by this sub-sync.
        items_processed: u64,
        message: Option<String>,
    },
    /// Terminal status of one sub-sync.
    TaskFinished {
        job_id: String,
        task: String,
        /// `succeeded`, `failed` or `cancelled`
        state: String,
        items_processed: u64,
        message: Option<String>,
    },
    /// Every sub-sync succeeded.
    Completed {
        job_id: String,
        items_processed: u64,
        duration_secs: u64,
    },
    /// At least one sub-sync failed.
    Failed {
        job_id: String,
        message: String,
        /// Classification of the last HTTP failure (`ok` for non-HTTP failures).
        server_status: String,
        recoverable: bool,
    },
    /// The run was cancelled between pages or sub-syncs.
    Cancelled { job_id: String, items_processed: u64 },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::TaskFinished { .. } => "Sync step finished",
            SyncEvent::Completed { .. } => "Sync completed successfully",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central broadcast channel for [`CoreEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus; `capacity` is the per-subscriber backlog
    /// before `RecvError::Lagged` is reported.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event; returns the number of subscribers reached.
    ///
    /// Errors only when there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A `broadcast::Receiver` with an optional filter.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let sync_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Sync(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` are returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(Ok(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
