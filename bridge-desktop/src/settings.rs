//! Settings Storage using SQLite

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SettingsStore,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Row,
};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, error};

const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        value_type TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

/// SQLite-backed settings store
///
/// Each value is stored with its type tag; reading with a different typed
/// accessor is reported as a type mismatch instead of being coerced.
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Open (or create) a settings store at the given database path
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                BridgeError::OperationFailed(format!(
                    "Failed to create settings directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path_str))
            .map_err(|e| BridgeError::OperationFailed(format!("Invalid settings path: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to connect to DB: {}", e)))?;

        let store = Self::with_pool(pool).await?;
        debug!(path = ?db_path, "Initialized settings store");
        Ok(store)
    }

    /// Create an in-memory settings store (for testing)
    pub async fn in_memory() -> Result<Self> {
        // A single connection keeps every query on the same in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to connect to DB: {}", e)))?;

        Self::with_pool(pool).await
    }

    /// Use an existing pool; the `settings` table is created when missing
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(CREATE_TABLE)
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to create table: {}", e)))?;

        Ok(Self { pool })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    async fn set_value(&self, key: &str, value: &str, value_type: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, value_type, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                value_type = excluded.value_type,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(value_type)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("Failed to set setting: {}", e)))?;

        debug!(key = key, value_type = value_type, "Stored setting");
        Ok(())
    }

    async fn get_value(&self, key: &str, expected_type: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value, value_type FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to get setting: {}", e)))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value: String = row.get(0);
        let value_type: String = row.get(1);

        if value_type != expected_type {
            error!(
                key = key,
                expected = expected_type,
                actual = %value_type,
                "Type mismatch"
            );
            return Err(BridgeError::OperationFailed(format!(
                "Type mismatch for '{}': expected {}, got {}",
                key, expected_type, value_type
            )));
        }

        Ok(Some(value))
    }

    async fn get_parsed<T>(&self, key: &str, expected_type: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get_value(key, expected_type).await? {
            Some(raw) => raw.parse().map(Some).map_err(|e: T::Err| {
                BridgeError::OperationFailed(format!("Parse error for '{}': {}", key, e))
            }),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.set_value(key, value, "string").await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.get_value(key, "string").await
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_value(key, &value.to_string(), "bool").await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        self.get_parsed(key, "bool").await
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set_value(key, &value.to_string(), "i64").await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.get_parsed(key, "i64").await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to delete setting: {}", e))
            })?;

        debug!(key = key, "Deleted setting");
        Ok(())
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to check key: {}", e)))?;

        Ok(row.is_some())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT key FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to list keys: {}", e)))?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM settings")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                BridgeError::OperationFailed(format!("Failed to clear settings: {}", e))
            })?;

        debug!("Cleared all settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_string_operations() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("sync.last_run", "2024-01-01").await.unwrap();
        assert_eq!(
            store.get_string("sync.last_run").await.unwrap(),
            Some("2024-01-01".to_string())
        );

        store.delete("sync.last_run").await.unwrap();
        assert_eq!(store.get_string("sync.last_run").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_operations() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_bool("sync.periodic", true).await.unwrap();
        assert_eq!(store.get_bool("sync.periodic").await.unwrap(), Some(true));

        store.set_i64("sync.freshness.taxa", 1_700_000_000_000).await.unwrap();
        assert_eq!(
            store.get_i64("sync.freshness.taxa").await.unwrap(),
            Some(1_700_000_000_000)
        );
    }

    #[tokio::test]
    async fn test_type_mismatch_is_an_error() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("key", "value").await.unwrap();
        assert!(store.get_i64("key").await.is_err());
    }

    #[tokio::test]
    async fn test_list_keys_and_clear() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("key2", "value2").await.unwrap();
        store.set_string("key1", "value1").await.unwrap();

        assert_eq!(store.list_keys().await.unwrap(), vec!["key1", "key2"]);
        assert!(store.has_key("key1").await.unwrap());

        store.clear_all().await.unwrap();
        assert!(store.list_keys().await.unwrap().is_empty());
    }
}
