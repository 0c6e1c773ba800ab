//! Taxonomy repository

use crate::error::Result;
use crate::gateway::PersistenceGateway;
use crate::models::Taxonomy;
use crate::repositories::{clear_tables, count_rows, delete_rows};
use async_trait::async_trait;
use sqlx::{query, query_as, SqliteConnection, SqlitePool};

const TABLES: [&str; 1] = ["taxonomy"];

pub struct SqliteTaxonomyRepository {
    pool: SqlitePool,
}

impl SqliteTaxonomyRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_all(&self) -> Result<Vec<Taxonomy>> {
        let ranks = query_as::<_, Taxonomy>(
            "SELECT * FROM taxonomy ORDER BY kingdom COLLATE NOCASE, taxon_group COLLATE NOCASE",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ranks)
    }
}

#[async_trait]
impl PersistenceGateway<Taxonomy> for SqliteTaxonomyRepository {
    async fn insert_all(&self, items: &[Taxonomy]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn replace_all(&self, items: &[Taxonomy]) -> Result<u64> {
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
        count_rows(&self.pool, "taxonomy").await
    }
}

async fn write_rows(conn: &mut SqliteConnection, items: &[Taxonomy]) -> Result<()> {
    for rank in items {
        query("INSERT OR REPLACE INTO taxonomy (kingdom, taxon_group) VALUES (?, ?)")
            .bind(&rank.kingdom)
            .bind(&rank.group)
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
    async fn test_taxonomy_is_deduplicated() {
        let repo = SqliteTaxonomyRepository::new(create_test_pool().await.unwrap());

        repo.insert_all(&[
            Taxonomy::new("Plantae", "Monocotylédones"),
            Taxonomy::new("Animalia", "Oiseaux"),
            Taxonomy::new("Animalia", "Oiseaux"),
        ])
        .await
        .unwrap();

        let all = repo.find_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], Taxonomy::new("Animalia", "Oiseaux"));
    }
}
