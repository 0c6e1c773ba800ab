//! # Repository Implementations
//!
//! One SQLite-backed [`PersistenceGateway`](crate::gateway::PersistenceGateway)
//! per entity kind, plus the read queries hosts need to use the synchronized
//! data.
//!
//! ## Available Repositories
//!
//! - `SqliteObserverRepository` - observers from the users list
//! - `SqliteDatasetRepository` - datasets per module
//! - `SqliteTaxonomyRepository` - kingdom/group ranking
//! - `SqliteTaxonRepository` - TaxRef taxa
//! - `SqliteTaxonListRepository` - taxa list membership
//! - `SqliteTaxonAreaRepository` - taxa observed per area
//! - `SqliteNomenclatureRepository` - nomenclature types and values
//! - `SqliteAdditionalFieldRepository` - additional form fields

use crate::error::Result;
use sqlx::{SqliteConnection, SqlitePool};

pub mod additional_field;
pub mod dataset;
pub mod nomenclature;
pub mod observer;
pub mod taxon;
pub mod taxon_area;
pub mod taxon_list;
pub mod taxonomy;

pub use additional_field::SqliteAdditionalFieldRepository;
pub use dataset::SqliteDatasetRepository;
pub use nomenclature::SqliteNomenclatureRepository;
pub use observer::SqliteObserverRepository;
pub use taxon::SqliteTaxonRepository;
pub use taxon_area::SqliteTaxonAreaRepository;
pub use taxon_list::SqliteTaxonListRepository;
pub use taxonomy::SqliteTaxonomyRepository;

/// Row count of a table owned by a repository.
pub(crate) async fn count_rows(pool: &SqlitePool, table: &'static str) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Empties the given tables in one transaction, returning the rows removed
/// from the last one. Child tables come first.
pub(crate) async fn delete_rows(pool: &SqlitePool, tables: &[&'static str]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let removed = clear_tables(&mut *tx, tables).await?;
    tx.commit().await?;
    Ok(removed)
}

/// Empties the given tables on an open connection or transaction.
pub(crate) async fn clear_tables(
    conn: &mut SqliteConnection,
    tables: &[&'static str],
) -> Result<u64> {
    let mut removed = 0;
    for table in tables {
        removed = sqlx::query(&format!("DELETE FROM {}", table))
            .execute(&mut *conn)
            .await?
            .rows_affected();
    }
    Ok(removed)
}
