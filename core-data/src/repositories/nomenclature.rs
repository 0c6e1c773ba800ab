//! Nomenclature repository
//!
//! A [`NomenclatureType`] is stored across three tables: the type, its values
//! and the taxonomy ranks each value applies to. All three are written and
//! removed together.

use crate::error::{DataError, Result};
use crate::gateway::PersistenceGateway;
use crate::models::{Nomenclature, NomenclatureType, Taxonomy};
use crate::repositories::{clear_tables, count_rows, delete_rows};
use async_trait::async_trait;
use sqlx::{query, query_as, SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct TypeRow {
    id: i64,
    mnemonic: String,
    label: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ValueRow {
    id: i64,
    code: String,
    hierarchy: String,
    type_id: i64,
    label: Option<String>,
}

const TABLES: [&str; 3] = ["nomenclature_taxonomy", "nomenclatures", "nomenclature_types"];

pub struct SqliteNomenclatureRepository {
    pool: SqlitePool,
}

impl SqliteNomenclatureRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Loads a type with all its values.
    pub async fn find_by_mnemonic(&self, mnemonic: &str) -> Result<Option<NomenclatureType>> {
        let Some(row) = query_as::<_, TypeRow>("SELECT * FROM nomenclature_types WHERE mnemonic = ?")
            .bind(mnemonic)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let values = query_as::<_, ValueRow>(
            "SELECT * FROM nomenclatures WHERE type_id = ? ORDER BY hierarchy",
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await?;

        let mut loaded = Vec::with_capacity(values.len());
        for value in values {
            let taxonomy = query_as::<_, Taxonomy>(
                "SELECT kingdom, taxon_group FROM nomenclature_taxonomy WHERE nomenclature_id = ?",
            )
            .bind(value.id)
            .fetch_all(&self.pool)
            .await?;

            loaded.push(Nomenclature {
                id: value.id,
                code: value.code,
                hierarchy: value.hierarchy,
                type_id: value.type_id,
                label: value.label,
                taxonomy,
            });
        }

        Ok(Some(NomenclatureType {
            id: row.id,
            mnemonic: row.mnemonic,
            label: row.label,
            values: loaded,
        }))
    }

    /// Values of a type applicable to the given taxonomy rank.
    ///
    /// A value without taxonomy applies to every rank; a value restricted to
    /// a kingdom with the group `"all"` applies to every group of it.
    pub async fn find_for_taxonomy(
        &self,
        mnemonic: &str,
        taxonomy: &Taxonomy,
    ) -> Result<Vec<Nomenclature>> {
        let Some(kind) = self.find_by_mnemonic(mnemonic).await? else {
            return Ok(Vec::new());
        };

        Ok(kind
            .values
            .into_iter()
            .filter(|value| {
                value.taxonomy.is_empty()
                    || value.taxonomy.iter().any(|rank| {
                        rank.kingdom.eq_ignore_ascii_case("all")
                            || (rank.kingdom.eq_ignore_ascii_case(&taxonomy.kingdom)
                                && (rank.group.eq_ignore_ascii_case("all")
                                    || rank.group.eq_ignore_ascii_case(&taxonomy.group)))
                    })
            })
            .collect())
    }
}

#[async_trait]
impl PersistenceGateway<NomenclatureType> for SqliteNomenclatureRepository {
    async fn insert_all(&self, items: &[NomenclatureType]) -> Result<u64> {
        check_all(items)?;
        let mut tx = self.pool.begin().await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn replace_all(&self, items: &[NomenclatureType]) -> Result<u64> {
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
        count_rows(&self.pool, "nomenclature_types").await
    }
}

fn check_all(items: &[NomenclatureType]) -> Result<()> {
    for kind in items {
        kind.validate()
            .map_err(|message| DataError::invalid("NomenclatureType", message))?;
    }
    Ok(())
}

async fn write_rows(conn: &mut SqliteConnection, items: &[NomenclatureType]) -> Result<()> {
    for kind in items {
        query("INSERT OR REPLACE INTO nomenclature_types (id, mnemonic, label) VALUES (?, ?, ?)")
            .bind(kind.id)
            .bind(&kind.mnemonic)
            .bind(&kind.label)
            .execute(&mut *conn)
            .await?;

        for value in &kind.values {
            query(
                r#"
                INSERT OR REPLACE INTO nomenclatures (id, code, hierarchy, type_id, label)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(value.id)
            .bind(&value.code)
            .bind(&value.hierarchy)
            .bind(value.type_id)
            .bind(&value.label)
            .execute(&mut *conn)
            .await?;

            for rank in &value.taxonomy {
                query(
                    r#"
                    INSERT OR IGNORE INTO nomenclature_taxonomy (nomenclature_id, kingdom, taxon_group)
                    VALUES (?, ?, ?)
                    "#,
                )
                .bind(value.id)
                .bind(&rank.kingdom)
                .bind(&rank.group)
                .execute(&mut *conn)
                .await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn value(id: i64, code: &str, taxonomy: Vec<Taxonomy>) -> Nomenclature {
        Nomenclature {
            id,
            code: code.to_string(),
            hierarchy: format!("007.{:03}", id),
            type_id: 7,
            label: Some(format!("Value {}", code)),
            taxonomy,
        }
    }

    fn biological_state() -> NomenclatureType {
        NomenclatureType {
            id: 7,
            mnemonic: "ETA_BIO".to_string(),
            label: Some("Etat biologique".to_string()),
            values: vec![
                value(1, "1", Vec::new()),
                value(2, "2", vec![Taxonomy::new("Animalia", "all")]),
                value(3, "3", vec![Taxonomy::new("Plantae", "Mousses")]),
            ],
        }
    }

    #[tokio::test]
    async fn test_type_round_trip_with_taxonomy() {
        let repo = SqliteNomenclatureRepository::new(create_test_pool().await.unwrap());

        repo.insert_all(&[biological_state()]).await.unwrap();

        let loaded = repo.find_by_mnemonic("ETA_BIO").await.unwrap().unwrap();
        assert_eq!(loaded, biological_state());
        assert!(repo.find_by_mnemonic("STATUT_OBS").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_values_filtered_by_taxonomy() {
        let repo = SqliteNomenclatureRepository::new(create_test_pool().await.unwrap());
        repo.insert_all(&[biological_state()]).await.unwrap();

        let codes: Vec<String> = repo
            .find_for_taxonomy("ETA_BIO", &Taxonomy::new("Animalia", "Oiseaux"))
            .await
            .unwrap()
            .into_iter()
            .map(|value| value.code)
            .collect();

        assert_eq!(codes, vec!["1", "2"]);
    }

    #[tokio::test]
    async fn test_delete_all_removes_every_table() {
        let pool = create_test_pool().await.unwrap();
        let repo = SqliteNomenclatureRepository::new(pool.clone());
        repo.insert_all(&[biological_state()]).await.unwrap();

        assert_eq!(repo.delete_all().await.unwrap(), 1);

        let (values,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nomenclature_taxonomy")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(values, 0);
        assert!(repo.is_empty().await.unwrap());
    }
}
