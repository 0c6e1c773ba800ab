//! Taxa per area repository

use crate::error::Result;
use crate::gateway::PersistenceGateway;
use crate::models::TaxonArea;
use crate::repositories::{clear_tables, count_rows, delete_rows};
use async_trait::async_trait;
use sqlx::{query, query_as, SqliteConnection, SqlitePool};

const TABLES: [&str; 1] = ["taxa_area"];

pub struct SqliteTaxonAreaRepository {
    pool: SqlitePool,
}

impl SqliteTaxonAreaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_taxon(&self, taxon_id: i64) -> Result<Vec<TaxonArea>> {
        let areas = query_as::<_, TaxonArea>(
            "SELECT * FROM taxa_area WHERE taxon_id = ? ORDER BY area_id",
        )
        .bind(taxon_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(areas)
    }

    pub async fn find_by_area(&self, area_id: i64) -> Result<Vec<TaxonArea>> {
        let areas = query_as::<_, TaxonArea>(
            "SELECT * FROM taxa_area WHERE area_id = ? ORDER BY number_of_observers DESC",
        )
        .bind(area_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(areas)
    }
}

#[async_trait]
impl PersistenceGateway<TaxonArea> for SqliteTaxonAreaRepository {
    async fn insert_all(&self, items: &[TaxonArea]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn replace_all(&self, items: &[TaxonArea]) -> Result<u64> {
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
        count_rows(&self.pool, "taxa_area").await
    }
}

async fn write_rows(conn: &mut SqliteConnection, items: &[TaxonArea]) -> Result<()> {
    for area in items {
        query(
            r#"
            INSERT OR REPLACE INTO taxa_area (
                taxon_id, area_id, color, number_of_observers, last_updated_at
            )
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(area.taxon_id)
        .bind(area.area_id)
        .bind(&area.color)
        .bind(area.number_of_observers)
        .bind(&area.last_updated_at)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}
