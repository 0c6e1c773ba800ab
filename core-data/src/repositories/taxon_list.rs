//! Taxa list membership repository

use crate::error::Result;
use crate::gateway::PersistenceGateway;
use crate::models::TaxonListEntry;
use crate::repositories::{clear_tables, count_rows, delete_rows};
use async_trait::async_trait;
use sqlx::{query, query_as, SqliteConnection, SqlitePool};

const TABLES: [&str; 1] = ["taxa_list"];

pub struct SqliteTaxonListRepository {
    pool: SqlitePool,
}

impl SqliteTaxonListRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_taxon(&self, taxon_id: i64) -> Result<Vec<TaxonListEntry>> {
        let entries = query_as::<_, TaxonListEntry>(
            "SELECT * FROM taxa_list WHERE taxon_id = ? ORDER BY list_id",
        )
        .bind(taxon_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }
}

#[async_trait]
impl PersistenceGateway<TaxonListEntry> for SqliteTaxonListRepository {
    async fn insert_all(&self, items: &[TaxonListEntry]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn replace_all(&self, items: &[TaxonListEntry]) -> Result<u64> {
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
        count_rows(&self.pool, "taxa_list").await
    }
}

async fn write_rows(conn: &mut SqliteConnection, items: &[TaxonListEntry]) -> Result<()> {
    for entry in items {
        query("INSERT OR IGNORE INTO taxa_list (taxon_id, list_id) VALUES (?, ?)")
            .bind(entry.taxon_id)
            .bind(entry.list_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_membership_is_idempotent() {
        let repo = SqliteTaxonListRepository::new(create_test_pool().await.unwrap());
        let entry = TaxonListEntry {
            taxon_id: 60612,
            list_id: 100,
        };

        repo.insert_all(&[entry, entry]).await.unwrap();
        repo.insert_all(&[TaxonListEntry {
            taxon_id: 60612,
            list_id: 200,
        }])
        .await
        .unwrap();

        assert_eq!(repo.count().await.unwrap(), 2);
        assert_eq!(repo.find_by_taxon(60612).await.unwrap()[0], entry);
    }
}
