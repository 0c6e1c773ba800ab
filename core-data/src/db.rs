//! # Database Connection Pool Module
//!
//! SQLite connection pooling for the local reference-data store.
//!
//! ## Features
//!
//! - **WAL Mode**: readers are not blocked while a sync writes a page
//! - **Foreign Keys**: enforced, nomenclature values cascade with their type
//! - **Automatic Migrations**: embedded with `sqlx::migrate!` and run on open
//! - **Health Check**: one `SELECT 1` before the pool is handed out
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_data::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("/data/geonature/sync.db")).await?;
//! ```
//!
//! Tests use [`create_test_pool`], an in-memory database with migrations applied.

use crate::{DataError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Database configuration for the SQLite connection pool
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:` URL of the database file, or `sqlite::memory:`
    pub database_url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub max_lifetime: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub statement_cache_capacity: usize,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();

        Self {
            database_url: format!("sqlite:{}", path.display()),
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: Some(Duration::from_secs(1800)),
            idle_timeout: Some(Duration::from_secs(600)),
            statement_cache_capacity: 100,
        }
    }

    /// In-memory database.
    ///
    /// Each SQLite connection to `:memory:` owns a distinct database, so the
    /// pool is pinned to a single connection that never expires.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            min_connections: 1,
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            max_lifetime: None,
            idle_timeout: None,
            statement_cache_capacity: 100,
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.statement_cache_capacity = capacity;
        self
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Opens the pool, applies migrations and checks the connection.
pub async fn create_pool(config: DatabaseConfig) -> Result<SqlitePool> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Creating database connection pool"
    );

    let connect_options = SqliteConnectOptions::from_str(&config.database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .create_if_missing(true)
        .statement_cache_capacity(config.statement_cache_capacity);

    let pool = SqlitePoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(config.max_lifetime)
        .idle_timeout(config.idle_timeout)
        .connect_with(connect_options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to create connection pool");
            DataError::Database(e)
        })?;

    run_migrations(&pool).await?;
    health_check(&pool).await?;

    info!(connections = pool.size(), "Database ready");
    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<SqlitePool> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    debug!("Running database migrations");

    sqlx::migrate!("./migrations").run(pool).await.map_err(|e| {
        warn!(error = %e, "Migration failed");
        DataError::Migration(e.to_string())
    })?;

    Ok(())
}

async fn health_check(pool: &SqlitePool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| {
        warn!(error = %e, "Database health check failed");
        DataError::Database(e)
    })?;

    Ok(())
}
