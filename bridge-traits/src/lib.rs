//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the GeoNature sync core and
//! platform-specific implementations. Each trait represents a capability the
//! core requires but that is implemented differently per platform.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP operations with cookies, retry, TLS
//!
//! ### Security & Storage
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences storage
//!
//! ### Scheduling
//! - [`WorkScheduler`](background::WorkScheduler) - Named unique work with explicit
//!   existing-work policy, cancellation and state observation
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate |
//! |----------|---------------------|
//! | Desktop  | `bridge-desktop`    |
//! | Android  | host-injected       |
//! | iOS      | host-injected       |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert platform errors into it and keep the context in the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so they can be shared as
//! `Arc<dyn Trait>` across async tasks.

pub mod background;
pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use background::{
    EnqueueOutcome, ExistingWorkPolicy, PeriodicWorkJob, WorkFuture, WorkInfo, WorkJob,
    WorkScheduler, WorkState,
};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::{SecureStore, SettingsStore};
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
