//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `SecureStore` using the `keyring` crate
//! - `SettingsStore` using a SQLite-backed key-value table
//! - `WorkScheduler` using Tokio tasks
//!
//! ## Feature Flags
//!
//! - `secure-store`: Enable OS keychain integration (default)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioWorkScheduler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = Arc::new(ReqwestHttpClient::new());
//!     let scheduler = Arc::new(TokioWorkScheduler::new());
//!
//!     // Hand both to CoreConfig::builder()
//! }
//! ```

mod background;
mod http;
mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use background::TokioWorkScheduler;
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
