//! # Authentication Module
//!
//! GeoNature login and session management.
//!
//! ## Overview
//!
//! GeoNature authenticates with a `token` cookie issued by
//! `POST /api/auth/login`. This crate performs the login, keeps the session in
//! the host's secure store and tells the rest of the core when it expires.
//!
//! ## Features
//!
//! - Credential login with invalid-credential detection
//! - Session persistence via platform-specific secure stores
//! - Expiry tracking and `SessionExpired` events
//! - Cookie header for authenticated sync requests

pub mod error;
pub mod manager;
pub mod session_store;
pub mod types;

pub use error::{AuthError, Result};
pub use manager::AuthManager;
pub use session_store::SessionStore;
pub use types::{AuthLogin, AuthSession, AuthUser};
