//! Dataset repository

use crate::error::{DataError, Result};
use crate::gateway::PersistenceGateway;
use crate::models::Dataset;
use crate::repositories::{clear_tables, count_rows, delete_rows};
use async_trait::async_trait;
use sqlx::{query, query_as, SqliteConnection, SqlitePool};

const TABLES: [&str; 1] = ["datasets"];

pub struct SqliteDatasetRepository {
    pool: SqlitePool,
}

impl SqliteDatasetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Datasets usable from the given module code, sorted by name.
    pub async fn find_by_module(&self, module: &str) -> Result<Vec<Dataset>> {
        let datasets = query_as::<_, Dataset>(
            "SELECT * FROM datasets WHERE module = ? COLLATE NOCASE ORDER BY name COLLATE NOCASE",
        )
        .bind(module)
        .fetch_all(&self.pool)
        .await?;

        Ok(datasets)
    }
}

#[async_trait]
impl PersistenceGateway<Dataset> for SqliteDatasetRepository {
    async fn insert_all(&self, items: &[Dataset]) -> Result<u64> {
        check_all(items)?;
        let mut tx = self.pool.begin().await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn replace_all(&self, items: &[Dataset]) -> Result<u64> {
        check_all(items)?;
        let mut tx = self.pool.begin().await?;
        clear_tables(&mut *tx, &TABLES).await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn delete_all(&self) -> Result<u64> {
        delete_rows(&self.pool, &TABLES).await
    }

    async fn count(&self) -> Result<i64> {
        count_rows(&self.pool, "datasets").await
    }
}

fn check_all(items: &[Dataset]) -> Result<()> {
    for dataset in items {
        dataset
            .validate()
            .map_err(|message| DataError::invalid("Dataset", message))?;
    }
    Ok(())
}

async fn write_rows(conn: &mut SqliteConnection, items: &[Dataset]) -> Result<()> {
    for dataset in items {
        query(
            r#"
            INSERT OR REPLACE INTO datasets (
                id, module, name, description, active, created_at, taxa_list_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(dataset.id)
        .bind(&dataset.module)
        .bind(&dataset.name)
        .bind(&dataset.description)
        .bind(dataset.active)
        .bind(&dataset.created_at)
        .bind(dataset.taxa_list_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
