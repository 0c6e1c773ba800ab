//! Additional field repository

use crate::error::Result;
use crate::gateway::PersistenceGateway;
use crate::models::AdditionalField;
use crate::repositories::{clear_tables, count_rows, delete_rows};
use async_trait::async_trait;
use sqlx::{query, query_as, SqliteConnection, SqlitePool};

#[derive(sqlx::FromRow)]
struct FieldRow {
    id: i64,
    name: String,
    label: String,
    widget: String,
    required: bool,
    modules: String,
    dataset_ids: String,
    field_values: Option<String>,
}

impl FieldRow {
    fn into_field(self) -> Result<AdditionalField> {
        Ok(AdditionalField {
            id: self.id,
            name: self.name,
            label: self.label,
            widget: self.widget,
            required: self.required,
            modules: serde_json::from_str(&self.modules)?,
            dataset_ids: serde_json::from_str(&self.dataset_ids)?,
            values: self
                .field_values
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
        })
    }
}

const TABLES: [&str; 1] = ["additional_fields"];

pub struct SqliteAdditionalFieldRepository {
    pool: SqlitePool,
}

impl SqliteAdditionalFieldRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_all(&self) -> Result<Vec<AdditionalField>> {
        query_as::<_, FieldRow>("SELECT * FROM additional_fields ORDER BY id")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(FieldRow::into_field)
            .collect()
    }

    /// Fields shown in a module, optionally restricted to a dataset.
    ///
    /// A field without datasets applies to every dataset of its modules.
    pub async fn find_by_module(
        &self,
        module: &str,
        dataset_id: Option<i64>,
    ) -> Result<Vec<AdditionalField>> {
        Ok(self
            .find_all()
            .await?
            .into_iter()
            .filter(|field| field.modules.iter().any(|m| m.eq_ignore_ascii_case(module)))
            .filter(|field| match dataset_id {
                Some(id) => field.dataset_ids.is_empty() || field.dataset_ids.contains(&id),
                None => true,
            })
            .collect())
    }
}

#[async_trait]
impl PersistenceGateway<AdditionalField> for SqliteAdditionalFieldRepository {
    async fn insert_all(&self, items: &[AdditionalField]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        write_rows(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(items.len() as u64)
    }

    async fn replace_all(&self, items: &[AdditionalField]) -> Result<u64> {
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
        count_rows(&self.pool, "additional_fields").await
    }
}

async fn write_rows(conn: &mut SqliteConnection, items: &[AdditionalField]) -> Result<()> {
    for field in items {
        let values = field.values.as_ref().map(serde_json::to_string).transpose()?;

        query(
            r#"
            INSERT OR REPLACE INTO additional_fields (
                id, name, label, widget, required, modules, dataset_ids, field_values
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(field.id)
        .bind(&field.name)
        .bind(&field.label)
        .bind(&field.widget)
        .bind(field.required)
        .bind(serde_json::to_string(&field.modules)?)
        .bind(serde_json::to_string(&field.dataset_ids)?)
        .bind(values)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use serde_json::json;

    fn field(id: i64, modules: &[&str], datasets: &[i64]) -> AdditionalField {
        AdditionalField {
            id,
            name: format!("field_{}", id),
            label: format!("Field {}", id),
            widget: "select".to_string(),
            required: id % 2 == 0,
            modules: modules.iter().map(|m| m.to_string()).collect(),
            dataset_ids: datasets.to_vec(),
            values: Some(json!(["a", "b"])),
        }
    }

    #[tokio::test]
    async fn test_fields_round_trip_json_columns() {
        let repo = SqliteAdditionalFieldRepository::new(create_test_pool().await.unwrap());

        repo.insert_all(&[field(1, &["OCCTAX"], &[4, 5])]).await.unwrap();

        assert_eq!(repo.find_all().await.unwrap(), vec![field(1, &["OCCTAX"], &[4, 5])]);
    }

    #[tokio::test]
    async fn test_fields_by_module_and_dataset() {
        let repo = SqliteAdditionalFieldRepository::new(create_test_pool().await.unwrap());
        repo.insert_all(&[
            field(1, &["OCCTAX"], &[]),
            field(2, &["OCCTAX"], &[5]),
            field(3, &["OCCHAB"], &[]),
        ])
        .await
        .unwrap();

        let ids = |fields: Vec<AdditionalField>| fields.into_iter().map(|f| f.id).collect::<Vec<_>>();

        assert_eq!(ids(repo.find_by_module("occtax", Some(4)).await.unwrap()), vec![1]);
        assert_eq!(ids(repo.find_by_module("OCCTAX", Some(5)).await.unwrap()), vec![1, 2]);
        assert_eq!(ids(repo.find_by_module("OCCTAX", None).await.unwrap()), vec![1, 2]);
    }
}
