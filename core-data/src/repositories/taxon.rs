//! Taxon repository

use crate::error::{DataError, Result};
use crate::gateway::PersistenceGateway;
use crate::models::Taxon;
use crate::repositories::{clear_tables, count_rows, delete_rows};
use async_trait::async_trait;
use sqlx::{query, query_as, SqliteConnection, SqlitePool};

const TABLES: [&str; 1] = ["taxa"];

pub struct SqliteTaxonRepository {
    pool: SqlitePool,
}

impl SqliteTaxonRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<Taxon>> {
        let taxon = query_as::<_, Taxon>("SELECT * FROM taxa WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(taxon)
    }

    /// Taxa belonging to a TaxHub list, sorted by name.
    pub async fn find_by_list(&self, list_id: i64) -> Result<Vec<Taxon>> {
        let taxa = query_as::<_, Taxon>(
            r#"
            SELECT t.* FROM taxa t
            INNER JOIN taxa_list l ON l.taxon_id = t.id
            WHERE l.list_id = ?
            ORDER BY t.name COLLATE NOCASE
            "#,
        )
        .bind(list_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(taxa)
    }

    /// Case-insensitive search on scientific and common names.
    pub async fn search(&self, text: &str, limit: i64) -> Result<Vec<Taxon>> {
        let pattern = format!("%{}%", text.trim());
        let taxa = query_as::<_, Taxon>(
            r#"
            SELECT * FROM taxa
            WHERE name LIKE ?1 OR name_common LIKE ?1
            ORDER BY name COLLATE NOCASE
            LIMIT ?2
            "#,
        )
        .bind(pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(taxa)
    }
}

#[async_trait]
impl PersistenceGateway<Taxon> for SqliteTaxonRepository {
    async fn insert_all(&self, items: &[Taxon]) -> Result<u64> {
        check_all(items)?;
        let mut tx = self.pool.begin().await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn replace_all(&self, items: &[Taxon]) -> Result<u64> {
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
        count_rows(&self.pool, "taxa").await
    }
}

fn check_all(items: &[Taxon]) -> Result<()> {
    for taxon in items {
        taxon
            .validate()
            .map_err(|message| DataError::invalid("Taxon", message))?;
    }
    Ok(())
}

async fn write_rows(conn: &mut SqliteConnection, items: &[Taxon]) -> Result<()> {
    for taxon in items {
        query(
            r#"
            INSERT OR REPLACE INTO taxa (
                id, name, name_common, description, rank, kingdom, taxon_group
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(taxon.id)
        .bind(&taxon.name)
        .bind(&taxon.name_common)
        .bind(&taxon.description)
        .bind(&taxon.rank)
        .bind(&taxon.kingdom)
        .bind(&taxon.group)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::models::TaxonListEntry;
    use crate::repositories::SqliteTaxonListRepository;

    pub(crate) fn taxon(id: i64, name: &str, common: Option<&str>) -> Taxon {
        Taxon {
            id,
            name: name.to_string(),
            name_common: common.map(str::to_string),
            description: None,
            rank: Some("ES".to_string()),
            kingdom: "Animalia".to_string(),
            group: "Mammifères".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_taxon() {
        let repo = SqliteTaxonRepository::new(create_test_pool().await.unwrap());

        repo.insert_all(&[taxon(60612, "Lynx lynx", Some("Lynx boréal"))])
            .await
            .unwrap();

        let found = repo.find_by_id(60612).await.unwrap().unwrap();
        assert_eq!(found.name_common.as_deref(), Some("Lynx boréal"));
        assert!(repo.find_by_id(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_by_list() {
        let pool = create_test_pool().await.unwrap();
        let taxa = SqliteTaxonRepository::new(pool.clone());
        let lists = SqliteTaxonListRepository::new(pool);

        taxa.insert_all(&[
            taxon(1, "Vulpes vulpes", Some("Renard roux")),
            taxon(2, "Lynx lynx", None),
            taxon(3, "Meles meles", Some("Blaireau")),
        ])
        .await
        .unwrap();
        lists
            .insert_all(&[
                TaxonListEntry { taxon_id: 1, list_id: 100 },
                TaxonListEntry { taxon_id: 2, list_id: 100 },
                TaxonListEntry { taxon_id: 3, list_id: 200 },
            ])
            .await
            .unwrap();

        let in_list: Vec<i64> = taxa
            .find_by_list(100)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(in_list, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_search_matches_common_name() {
        let repo = SqliteTaxonRepository::new(create_test_pool().await.unwrap());
        repo.insert_all(&[
            taxon(1, "Vulpes vulpes", Some("Renard roux")),
            taxon(2, "Lynx lynx", None),
        ])
        .await
        .unwrap();

        let found = repo.search("renard", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
    }

    #[tokio::test]
    async fn test_invalid_taxon_rejected() {
        let repo = SqliteTaxonRepository::new(create_test_pool().await.unwrap());

        let result = repo.insert_all(&[taxon(1, "", None)]).await;

        assert!(matches!(result, Err(DataError::InvalidInput { .. })));
    }
}
