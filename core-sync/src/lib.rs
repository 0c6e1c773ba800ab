//! # Data Sync Module
//!
//! Downloads GeoNature and TaxHub reference data into the local database.
//!
//! ## Overview
//!
//! A data sync run is an ordered list of named sub-syncs (observers,
//! datasets, taxonomy, nomenclature, additional fields, taxa, taxa areas).
//! Each sub-sync reports a stream of statuses ending in exactly one terminal
//! state; paginated ones write every page as soon as it arrives.
//!
//! ## Components
//!
//! - **Cursor** (`cursor`): 1-indexed page position and fetched pages
//! - **Fetcher** (`fetcher`): sequential page-by-page download and persistence
//! - **Freshness** (`freshness`): full / incremental / skip decision for taxa
//! - **Orchestrator** (`orchestrator`): runs sub-syncs in order, no fail-fast
//! - **Reporter** (`reporter`): presentation text and server status
//! - **Remote** (`remote`): GeoNature / TaxHub endpoints
//! - **Tasks** (`tasks`): the sub-syncs themselves
//! - **Settings** (`settings`): data sync settings from the app settings JSON
//! - **Worker / Manager** (`worker`, `manager`): one run, and its scheduling as unique work

pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod freshness;
pub mod manager;
pub mod orchestrator;
pub mod remote;
pub mod reporter;
pub mod settings;
pub mod status;
pub mod tasks;
pub mod worker;

pub use cursor::{RemotePage, SyncCursor, DEFAULT_PAGE_SIZE};
pub use error::{ErrorKind, Result, ServerErrorKind, SyncError};
pub use fetcher::{PageSource, PaginatedFetcher};
pub use freshness::{FreshnessDecision, FreshnessGate, FreshnessRecord, FreshnessStore};
pub use manager::{DataSyncManager, DATA_SYNC_WORK, PERIODIC_DATA_SYNC_WORK};
pub use orchestrator::{SyncOrchestrator, SyncReport, SyncTask, TaskContext};
pub use remote::GeoNatureClient;
pub use reporter::{ServerStatus, StatusReport, StatusReporter};
pub use settings::{AppSettingsLoader, DataSyncSettings, DataSyncSettingsPatch};
pub use status::{RecordingSink, StatusEmitter, StatusSink, SyncState, SyncStatus};
pub use tasks::SyncGateways;
pub use worker::DataSyncWorker;
