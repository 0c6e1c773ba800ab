//! Persistence gateway used by the sync engine.
//!
//! The sync engine never talks SQL: it replaces or appends whole batches of
//! entities through this trait. Each call runs in one local transaction, so a
//! batch is either fully written or not written at all.

use crate::error::Result;
use async_trait::async_trait;

/// Batch storage for one entity kind.
#[async_trait]
pub trait PersistenceGateway<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Writes every item, replacing rows with the same key. Returns the number written.
    async fn insert_all(&self, items: &[T]) -> Result<u64>;

    /// Swaps the whole table for `items` in one transaction. A rejected
    /// batch leaves the previous rows in place. Returns the number written.
    async fn replace_all(&self, items: &[T]) -> Result<u64>;

    /// Removes every row of this entity kind. Returns the number removed.
    async fn delete_all(&self) -> Result<u64>;

    async fn count(&self) -> Result<i64>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.count().await? == 0)
    }
}
