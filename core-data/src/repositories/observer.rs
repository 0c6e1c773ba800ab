//! Observer repository

use crate::error::Result;
use crate::gateway::PersistenceGateway;
use crate::models::InputObserver;
use crate::repositories::{clear_tables, count_rows, delete_rows};
use async_trait::async_trait;
use sqlx::{query, query_as, SqliteConnection, SqlitePool};

const TABLES: [&str; 1] = ["observers"];

pub struct SqliteObserverRepository {
    pool: SqlitePool,
}

impl SqliteObserverRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// All observers sorted by last name then first name.
    pub async fn find_all(&self) -> Result<Vec<InputObserver>> {
        let observers = query_as::<_, InputObserver>(
            "SELECT * FROM observers ORDER BY lastname COLLATE NOCASE, firstname COLLATE NOCASE",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(observers)
    }

    pub async fn find_by_ids(&self, ids: &[i64]) -> Result<Vec<InputObserver>> {
        let mut observers = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(observer) = query_as::<_, InputObserver>("SELECT * FROM observers WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            {
                observers.push(observer);
            }
        }
        Ok(observers)
    }
}

#[async_trait]
impl PersistenceGateway<InputObserver> for SqliteObserverRepository {
    async fn insert_all(&self, items: &[InputObserver]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn replace_all(&self, items: &[InputObserver]) -> Result<u64> {
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
        count_rows(&self.pool, "observers").await
    }
}

async fn write_rows(conn: &mut SqliteConnection, items: &[InputObserver]) -> Result<()> {
    for observer in items {
        query("INSERT OR REPLACE INTO observers (id, lastname, firstname) VALUES (?, ?, ?)")
            .bind(observer.id)
            .bind(&observer.lastname)
            .bind(&observer.firstname)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}
