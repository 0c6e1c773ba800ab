//! # Sub-syncs
//!
//! The named units a data sync run is made of, in their default order:
//!
//! | name | source | paging | local write |
//! |------|--------|--------|-------------|
//! | `observers` | users list | none | replace |
//! | `datasets` | meta datasets | none | replace |
//! | `taxonomy` | TaxRef kingdoms and groups | none | replace |
//! | `nomenclature` | nomenclature types | none | replace |
//! | `additional_fields` | OCCTAX additional fields | none | replace |
//! | `taxa` | TaxRef taxa and list membership | page / offset | gated by freshness |
//! | `taxa_area` | taxa colors per area | offset | replace, after `taxa` |

use crate::cursor::SyncCursor;
use crate::error::Result;
use crate::freshness::{FreshnessDecision, FreshnessGate, FreshnessStore, TAXA_ENTITY};
use crate::orchestrator::{SyncTask, TaskContext};
use crate::remote::{GeoNatureClient, RawTaxon, RawTaxonArea, RawTaxonListItem};
use crate::settings::DataSyncSettings;
use crate::status::StatusEmitter;
use async_trait::async_trait;
use core_data::models::{
    AdditionalField, Dataset, InputObserver, NomenclatureType, Taxon, TaxonArea,
    TaxonListEntry, Taxonomy,
};
use core_data::repositories::{
    SqliteAdditionalFieldRepository, SqliteDatasetRepository, SqliteNomenclatureRepository,
    SqliteObserverRepository, SqliteTaxonAreaRepository, SqliteTaxonListRepository,
    SqliteTaxonRepository, SqliteTaxonomyRepository,
};
use core_data::PersistenceGateway;
use futures::future::BoxFuture;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const OBSERVERS_TASK: &str = "observers";
pub const DATASETS_TASK: &str = "datasets";
pub const TAXONOMY_TASK: &str = "taxonomy";
pub const NOMENCLATURE_TASK: &str = "nomenclature";
pub const ADDITIONAL_FIELDS_TASK: &str = "additional_fields";
pub const TAXA_TASK: &str = "taxa";
pub const TAXA_AREA_TASK: &str = "taxa_area";

/// One persistence gateway per synchronized entity kind.
#[derive(Clone)]
pub struct SyncGateways {
    pub observers: Arc<dyn PersistenceGateway<InputObserver>>,
    pub datasets: Arc<dyn PersistenceGateway<Dataset>>,
    pub taxonomy: Arc<dyn PersistenceGateway<Taxonomy>>,
    pub nomenclature: Arc<dyn PersistenceGateway<NomenclatureType>>,
    pub additional_fields: Arc<dyn PersistenceGateway<AdditionalField>>,
    pub taxa: Arc<dyn PersistenceGateway<Taxon>>,
    pub taxa_list: Arc<dyn PersistenceGateway<TaxonListEntry>>,
    pub taxa_area: Arc<dyn PersistenceGateway<TaxonArea>>,
}

impl SyncGateways {
    /// SQLite repositories sharing one pool.
    pub fn sqlite(pool: SqlitePool) -> Self {
        Self {
            observers: Arc::new(SqliteObserverRepository::new(pool.clone())),
            datasets: Arc::new(SqliteDatasetRepository::new(pool.clone())),
            taxonomy: Arc::new(SqliteTaxonomyRepository::new(pool.clone())),
            nomenclature: Arc::new(SqliteNomenclatureRepository::new(pool.clone())),
            additional_fields: Arc::new(SqliteAdditionalFieldRepository::new(pool.clone())),
            taxa: Arc::new(SqliteTaxonRepository::new(pool.clone())),
            taxa_list: Arc::new(SqliteTaxonListRepository::new(pool.clone())),
            taxa_area: Arc::new(SqliteTaxonAreaRepository::new(pool)),
        }
    }
}

/// Sub-syncs of a full data sync, in run order.
pub fn default_tasks(
    client: &GeoNatureClient,
    settings: &DataSyncSettings,
    gateways: &SyncGateways,
    freshness: &FreshnessStore,
) -> Vec<Box<dyn SyncTask>> {
    let users_list_id = settings.users_list_id;
    let mut tasks: Vec<Box<dyn SyncTask>> = Vec::with_capacity(7);

    tasks.push(Box::new(ReplaceAllTask::new(
        OBSERVERS_TASK,
        fetch_with(client, move |client| async move {
            client.observers(users_list_id).await
        }),
        gateways.observers.clone(),
    )));
    tasks.push(Box::new(ReplaceAllTask::new(
        DATASETS_TASK,
        fetch_with(client, |client| async move { client.datasets().await }),
        gateways.datasets.clone(),
    )));
    tasks.push(Box::new(ReplaceAllTask::new(
        TAXONOMY_TASK,
        fetch_with(client, |client| async move { client.taxonomy().await }),
        gateways.taxonomy.clone(),
    )));
    tasks.push(Box::new(ReplaceAllTask::new(
        NOMENCLATURE_TASK,
        fetch_with(client, |client| async move {
            client.nomenclature_types().await
        }),
        gateways.nomenclature.clone(),
    )));
    tasks.push(Box::new(ReplaceAllTask::new(
        ADDITIONAL_FIELDS_TASK,
        fetch_with(client, |client| async move {
            client.additional_fields().await
        }),
        gateways.additional_fields.clone(),
    )));
    tasks.push(Box::new(TaxaTask::new(
        client.clone(),
        settings.taxa_list_ids.clone(),
        freshness.clone(),
        gateways.taxa.clone(),
        gateways.taxa_list.clone(),
    )));
    tasks.push(Box::new(TaxaAreaTask::new(
        client.clone(),
        settings.code_area_type.clone(),
        gateways.taxa_area.clone(),
    )));

    tasks
}

// ============================================================================
// Replace-all sub-sync
// ============================================================================

type FetchAll<L> = Box<dyn Fn() -> BoxFuture<'static, Result<Vec<L>>> + Send + Sync>;

fn fetch_with<L, F, Fut>(client: &GeoNatureClient, fetch: F) -> FetchAll<L>
where
    F: Fn(GeoNatureClient) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Vec<L>>> + Send + 'static,
{
    let client = client.clone();
    Box::new(move || Box::pin(fetch(client.clone())))
}

/// Unpaged sub-sync replacing a whole table with one remote document.
pub struct ReplaceAllTask<L> {
    name: &'static str,
    fetch: FetchAll<L>,
    gateway: Arc<dyn PersistenceGateway<L>>,
}

impl<L> ReplaceAllTask<L>
where
    L: Send + Sync + 'static,
{
    pub fn new(
        name: &'static str,
        fetch: FetchAll<L>,
        gateway: Arc<dyn PersistenceGateway<L>>,
    ) -> Self {
        Self {
            name,
            fetch,
            gateway,
        }
    }
}

#[async_trait]
impl<L> SyncTask for ReplaceAllTask<L>
where
    L: Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self, ctx: &TaskContext, emitter: &mut StatusEmitter) -> Result<Option<String>> {
        ctx.check_cancelled()?;

        let items = (self.fetch)().await?;
        let written = self.gateway.replace_all(&items).await?;

        debug!(task = self.name, written, "Table replaced");
        emitter.progress(written);
        Ok(None)
    }
}

// ============================================================================
// Taxa
// ============================================================================

/// Freshness-gated TaxRef taxa and list membership.
pub struct TaxaTask {
    client: GeoNatureClient,
    list_ids: Vec<i64>,
    freshness: FreshnessStore,
    taxa: Arc<dyn PersistenceGateway<Taxon>>,
    taxa_list: Arc<dyn PersistenceGateway<TaxonListEntry>>,
}

impl TaxaTask {
    pub fn new(
        client: GeoNatureClient,
        list_ids: Vec<i64>,
        freshness: FreshnessStore,
        taxa: Arc<dyn PersistenceGateway<Taxon>>,
        taxa_list: Arc<dyn PersistenceGateway<TaxonListEntry>>,
    ) -> Self {
        Self {
            client,
            list_ids,
            freshness,
            taxa,
            taxa_list,
        }
    }

    async fn decide(&self) -> Result<FreshnessDecision> {
        // An unknown remote version forces a full download
        let remote = match self.client.taxref_version().await {
            Ok(version) => {
                debug!(
                    referential = %version.referential_name,
                    version = %version.version,
                    "TaxRef version"
                );
                version.updated_at
            }
            Err(e) => {
                warn!(error = %e, "TaxRef version unavailable");
                None
            }
        };

        let local = self.freshness.get(TAXA_ENTITY).await?.last_synced_at;
        let has_local_data = !self.taxa.is_empty().await?;

        Ok(FreshnessGate::decide(local, remote, has_local_data))
    }

    async fn download_taxa(&self, ctx: &TaskContext, emitter: &mut StatusEmitter) -> Result<u64> {
        self.taxa.delete_all().await?;

        let client = &self.client;
        let list_ids = self.list_ids.as_slice();
        let source = |cursor: SyncCursor| client.taxa_page(cursor, list_ids);

        ctx.fetcher()?
            .run(&source, RawTaxon::into_taxon, self.taxa.as_ref(), emitter)
            .await
    }

    async fn refresh_membership(
        &self,
        ctx: &TaskContext,
        emitter: &mut StatusEmitter,
    ) -> Result<u64> {
        self.taxa_list.delete_all().await?;

        let fetcher = ctx.fetcher()?;
        let client = &self.client;
        let mut total = 0;

        for &list_id in &self.list_ids {
            let source = move |cursor: SyncCursor| client.taxa_list_page(list_id, cursor);
            total += fetcher
                .run(
                    &source,
                    move |item: RawTaxonListItem| Some(item.into_entry(list_id)),
                    self.taxa_list.as_ref(),
                    emitter,
                )
                .await?;
        }

        Ok(total)
    }
}

#[async_trait]
impl SyncTask for TaxaTask {
    fn name(&self) -> &str {
        TAXA_TASK
    }

    async fn run(&self, ctx: &TaskContext, emitter: &mut StatusEmitter) -> Result<Option<String>> {
        ctx.check_cancelled()?;

        let decision = self.decide().await?;
        info!(decision = decision.as_str(), "Taxa freshness decided");

        match decision {
            FreshnessDecision::Skip => Ok(Some("Taxa are up to date".to_string())),
            FreshnessDecision::IncrementalSync => {
                let entries = self.refresh_membership(ctx, emitter).await?;
                Ok(Some(format!("{} taxa list entries refreshed", entries)))
            }
            FreshnessDecision::FullSync => {
                let taxa = self.download_taxa(ctx, emitter).await?;
                self.refresh_membership(ctx, emitter).await?;
                self.freshness.mark_synced(TAXA_ENTITY).await?;
                info!(taxa, "Taxa downloaded");
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Taxa areas
// ============================================================================

/// Taxa observed per area of the configured area type.
pub struct TaxaAreaTask {
    client: GeoNatureClient,
    code_area_type: Option<String>,
    gateway: Arc<dyn PersistenceGateway<TaxonArea>>,
}

impl TaxaAreaTask {
    pub fn new(
        client: GeoNatureClient,
        code_area_type: Option<String>,
        gateway: Arc<dyn PersistenceGateway<TaxonArea>>,
    ) -> Self {
        Self {
            client,
            code_area_type,
            gateway,
        }
    }
}

#[async_trait]
impl SyncTask for TaxaAreaTask {
    fn name(&self) -> &str {
        TAXA_AREA_TASK
    }

    fn depends_on(&self) -> &[&'static str] {
        &[TAXA_TASK]
    }

    async fn run(&self, ctx: &TaskContext, emitter: &mut StatusEmitter) -> Result<Option<String>> {
        let Some(code_area_type) = self.code_area_type.as_deref() else {
            return Ok(Some("No area type configured".to_string()));
        };
        ctx.check_cancelled()?;

        self.gateway.delete_all().await?;

        let client = &self.client;
        let source = |cursor: SyncCursor| client.taxa_area_page(code_area_type, cursor);
        ctx.fetcher()?
            .run(
                &source,
                |raw: RawTaxonArea| Some(raw.into_area()),
                self.gateway.as_ref(),
                emitter,
            )
            .await?;

        Ok(None)
    }
}
