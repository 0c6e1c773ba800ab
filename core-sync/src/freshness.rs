//! # Freshness Gate
//!
//! Decides whether the taxa reference data needs a full download by comparing
//! the local sync time with the remote referential's `updated_at`.
//!
//! | local data | local ts | remote ts | decision |
//! |------------|----------|-----------|----------|
//! | none       | any      | any       | FullSync |
//! | present    | missing  | any       | FullSync |
//! | present    | any      | missing   | FullSync |
//! | present    | t        | > t       | FullSync |
//! | present    | t        | < t       | IncrementalSync |
//! | present    | t        | = t       | Skip |
//!
//! The timestamps are persisted per entity kind in the host
//! [`SettingsStore`]; only the owner of a successful full sync records them.

use crate::error::Result;
use bridge_traits::storage::SettingsStore;
use bridge_traits::time::Clock;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tracing::{debug, info};

/// Entity kind of the taxa referential.
pub const TAXA_ENTITY: &str = "taxa";
/// Entity kind recording the last complete data sync.
pub const DATA_SYNC_ENTITY: &str = "data_sync";

const KEY_PREFIX: &str = "sync.freshness.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessDecision {
    FullSync,
    /// Refresh list membership only
    IncrementalSync,
    Skip,
}

impl FreshnessDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            FreshnessDecision::FullSync => "full",
            FreshnessDecision::IncrementalSync => "incremental",
            FreshnessDecision::Skip => "skip",
        }
    }
}

pub struct FreshnessGate;

impl FreshnessGate {
    pub fn decide(
        local: Option<DateTime<Utc>>,
        remote: Option<DateTime<Utc>>,
        has_local_data: bool,
    ) -> FreshnessDecision {
        if !has_local_data {
            return FreshnessDecision::FullSync;
        }

        match (local, remote) {
            (Some(local), Some(remote)) if remote > local => FreshnessDecision::FullSync,
            (Some(local), Some(remote)) if remote < local => FreshnessDecision::IncrementalSync,
            (Some(_), Some(_)) => FreshnessDecision::Skip,
            _ => FreshnessDecision::FullSync,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessRecord {
    pub entity_kind: String,
    pub last_synced_at: Option<DateTime<Utc>>,
}

/// Persisted [`FreshnessRecord`]s.
#[derive(Clone)]
pub struct FreshnessStore {
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
}

impl FreshnessStore {
    pub fn new(settings: Arc<dyn SettingsStore>, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    fn key(entity_kind: &str) -> String {
        format!("{}{}", KEY_PREFIX, entity_kind)
    }

    pub async fn get(&self, entity_kind: &str) -> Result<FreshnessRecord> {
        let millis = self.settings.get_i64(&Self::key(entity_kind)).await?;

        Ok(FreshnessRecord {
            entity_kind: entity_kind.to_string(),
            last_synced_at: millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }

    /// Records `now` as the last successful sync of `entity_kind`.
    pub async fn mark_synced(&self, entity_kind: &str) -> Result<FreshnessRecord> {
        let now = self.clock.now();
        self.settings
            .set_i64(&Self::key(entity_kind), now.timestamp_millis())
            .await?;

        info!(entity_kind, synced_at = %now, "Freshness recorded");
        Ok(FreshnessRecord {
            entity_kind: entity_kind.to_string(),
            last_synced_at: Some(now),
        })
    }

    pub async fn reset(&self, entity_kind: &str) -> Result<()> {
        debug!(entity_kind, "Resetting freshness");
        self.settings.delete(&Self::key(entity_kind)).await?;
        Ok(())
    }
}
