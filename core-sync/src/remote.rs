//! # GeoNature / TaxHub Client
//!
//! Typed access to the remote endpoints read by the sub-syncs. Responses are
//! decoded as whole documents with `serde_json`; unknown keys are ignored.
//!
//! ## Failure classification
//!
//! | cause | error |
//! |-------|-------|
//! | transport failure | [`SyncError::Network`] |
//! | HTTP 404 | [`SyncError::NotFound`] |
//! | other non-2xx | [`SyncError::Server`] |
//! | undecodable body | [`SyncError::Parse`] |

use crate::cursor::SyncCursor;
use crate::error::{Result, SyncError};
use bridge_traits::http::{HttpClient, HttpRequest, HttpResponse};
use chrono::{DateTime, NaiveDateTime, Utc};
use core_auth::AuthManager;
use core_data::models::{
    AdditionalField, Dataset, InputObserver, Nomenclature, NomenclatureType, Taxon,
    TaxonArea, TaxonListEntry, Taxonomy,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Kingdom or group used when TaxRef leaves one empty.
pub const ANY_TAXONOMY: &str = "Any";

const ADDITIONAL_FIELDS_MODULE: &str = "OCCTAX";

/// Client for one GeoNature server and its TaxHub instance.
#[derive(Clone)]
pub struct GeoNatureClient {
    http: Arc<dyn HttpClient>,
    geonature_url: String,
    taxhub_url: String,
    auth: Option<Arc<AuthManager>>,
}

impl GeoNatureClient {
    pub fn new(
        http: Arc<dyn HttpClient>,
        geonature_url: impl Into<String>,
        taxhub_url: impl Into<String>,
    ) -> Self {
        Self {
            http,
            geonature_url: trim_base(geonature_url.into()),
            taxhub_url: trim_base(taxhub_url.into()),
            auth: None,
        }
    }

    /// Attaches the session cookie of `auth` to every request.
    pub fn with_auth(mut self, auth: Arc<AuthManager>) -> Self {
        self.auth = Some(auth);
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
        let mut request = HttpRequest::get(&url).header("Accept", "application/json");

        if let Some(auth) = &self.auth {
            match auth.session_cookie().await {
                Ok(cookie) => request = request.header("Cookie", cookie),
                Err(e) => debug!(error = %e, "Requesting without session cookie"),
            }
        }

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| SyncError::Network(e.to_string()))?;

        decode(&url, &response)
    }

    // ========================================================================
    // Unpaged resources
    // ========================================================================

    pub async fn observers(&self, users_list_id: i64) -> Result<Vec<InputObserver>> {
        let url = format!("{}/api/users/menu/{}", self.geonature_url, users_list_id);
        let raw: Vec<RawObserver> = self.get_json(url).await?;
        Ok(raw.into_iter().map(RawObserver::into_observer).collect())
    }

    pub async fn datasets(&self) -> Result<Vec<Dataset>> {
        let url = format!("{}/api/meta/datasets?fields=modules", self.geonature_url);
        let raw: ListEnvelope<RawDataset> = self.get_json(url).await?;
        Ok(raw
            .into_items()
            .into_iter()
            .flat_map(RawDataset::into_datasets)
            .collect())
    }

    pub async fn taxonomy(&self) -> Result<Vec<Taxonomy>> {
        let url = format!("{}/api/taxref/regnewithgroupe2", self.taxhub_url);
        let raw: BTreeMap<String, Vec<Option<String>>> = self.get_json(url).await?;

        let mut taxonomy = Vec::new();
        for (kingdom, groups) in raw {
            if kingdom.trim().is_empty() {
                continue;
            }
            taxonomy.push(Taxonomy::new(&kingdom, ANY_TAXONOMY));
            for group in groups.into_iter().flatten() {
                if !group.trim().is_empty() {
                    taxonomy.push(Taxonomy::new(&kingdom, group));
                }
            }
        }
        Ok(taxonomy)
    }

    pub async fn nomenclature_types(&self) -> Result<Vec<NomenclatureType>> {
        let url = format!(
            "{}/api/nomenclatures/nomenclatures/taxonomy",
            self.geonature_url
        );
        let raw: Vec<RawNomenclatureType> = self.get_json(url).await?;
        Ok(raw.into_iter().map(RawNomenclatureType::into_type).collect())
    }

    pub async fn additional_fields(&self) -> Result<Vec<AdditionalField>> {
        let url = format!(
            "{}/api/gn_commons/additional_fields?module_code={}",
            self.geonature_url, ADDITIONAL_FIELDS_MODULE
        );
        let raw: Vec<RawAdditionalField> = self.get_json(url).await?;
        Ok(raw
            .into_iter()
            .map(RawAdditionalField::into_field)
            .collect())
    }

    pub async fn taxref_version(&self) -> Result<TaxrefVersion> {
        let url = format!("{}/api/taxref/version", self.taxhub_url);
        let raw: RawTaxrefVersion = self.get_json(url).await?;
        Ok(raw.into_version())
    }

    // ========================================================================
    // Paged resources
    // ========================================================================

    /// Taxa page, addressed by page number.
    pub async fn taxa_page(&self, cursor: SyncCursor, list_ids: &[i64]) -> Result<Vec<RawTaxon>> {
        let mut url = format!(
            "{}/api/taxref/?limit={}&page={}",
            self.taxhub_url,
            cursor.page_size(),
            cursor.page_number()
        );
        if !list_ids.is_empty() {
            let ids: Vec<String> = list_ids.iter().map(i64::to_string).collect();
            url.push_str(&format!("&id_liste={}", ids.join(",")));
        }

        let raw: ListEnvelope<RawTaxon> = self.get_json(url).await?;
        Ok(raw.into_items())
    }

    /// Membership page of one taxa list, addressed by offset.
    pub async fn taxa_list_page(
        &self,
        list_id: i64,
        cursor: SyncCursor,
    ) -> Result<Vec<RawTaxonListItem>> {
        let url = format!(
            "{}/api/taxref/allnamebylist/{}?limit={}&offset={}",
            self.taxhub_url,
            list_id,
            cursor.page_size(),
            cursor.offset()
        );
        self.get_json(url).await
    }

    /// Taxa observed per area, addressed by offset.
    pub async fn taxa_area_page(
        &self,
        code_area_type: &str,
        cursor: SyncCursor,
    ) -> Result<Vec<RawTaxonArea>> {
        let url = format!(
            "{}/api/synthese/color_taxon?code_area_type={}&limit={}&offset={}",
            self.geonature_url,
            code_area_type,
            cursor.page_size(),
            cursor.offset()
        );
        self.get_json(url).await
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn decode<T: DeserializeOwned>(url: &str, response: &HttpResponse) -> Result<T> {
    match response.status {
        404 => return Err(SyncError::NotFound(url.to_string())),
        status if !response.is_success() => {
            warn!(status, url, "Remote request failed");
            return Err(SyncError::Server {
                status,
                url: url.to_string(),
            });
        }
        _ => {}
    }

    serde_json::from_slice(&response.body).map_err(|e| SyncError::parse(url, e))
}

/// Remote timestamps come with or without an offset.
fn parse_remote_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%a, %d %b %Y %H:%M:%S GMT"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Wire types
// ============================================================================

/// Lists served either as a bare array or wrapped in an object.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ListEnvelope<T> {
    Items { items: Vec<T> },
    Data { data: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListEnvelope<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            ListEnvelope::Items { items } => items,
            ListEnvelope::Data { data } => data,
            ListEnvelope::Bare(items) => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawObserver {
    id_role: i64,
    nom_role: Option<String>,
    prenom_role: Option<String>,
}

impl RawObserver {
    fn into_observer(self) -> InputObserver {
        InputObserver::new(self.id_role, self.nom_role, self.prenom_role)
    }
}

#[derive(Debug, Deserialize)]
struct RawModule {
    module_code: String,
}

#[derive(Debug, Deserialize)]
struct RawDataset {
    id_dataset: i64,
    dataset_name: String,
    dataset_desc: Option<String>,
    #[serde(default = "default_true")]
    active: bool,
    meta_create_date: Option<String>,
    #[serde(default)]
    modules: Vec<RawModule>,
    id_taxa_list: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl RawDataset {
    /// One local dataset per module the dataset is attached to.
    fn into_datasets(self) -> Vec<Dataset> {
        self.modules
            .iter()
            .map(|module| Dataset {
                id: self.id_dataset,
                module: module.module_code.to_lowercase(),
                name: self.dataset_name.clone(),
                description: self.dataset_desc.clone(),
                active: self.active,
                created_at: self.meta_create_date.clone(),
                taxa_list_id: self.id_taxa_list,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct RawTaxref {
    regne: Option<String>,
    group2_inpn: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawNomenclature {
    id_nomenclature: i64,
    cd_nomenclature: String,
    #[serde(default)]
    hierarchy: String,
    label_default: Option<String>,
    #[serde(default)]
    taxref: Vec<RawTaxref>,
}

#[derive(Debug, Deserialize)]
struct RawNomenclatureType {
    id_type: i64,
    mnemonique: String,
    label_default: Option<String>,
    #[serde(default)]
    values: Vec<RawNomenclature>,
}

impl RawNomenclatureType {
    fn into_type(self) -> NomenclatureType {
        let type_id = self.id_type;
        NomenclatureType {
            id: type_id,
            mnemonic: self.mnemonique,
            label: self.label_default,
            values: self
                .values
                .into_iter()
                .map(|value| Nomenclature {
                    id: value.id_nomenclature,
                    code: value.cd_nomenclature,
                    hierarchy: value.hierarchy,
                    type_id,
                    label: value.label_default,
                    taxonomy: value
                        .taxref
                        .into_iter()
                        .map(|taxref| {
                            Taxonomy::new(
                                or_any(taxref.regne),
                                or_any(taxref.group2_inpn),
                            )
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawWidget {
    widget_name: String,
}

#[derive(Debug, Deserialize)]
struct RawFieldDataset {
    id_dataset: i64,
}

#[derive(Debug, Deserialize)]
struct RawAdditionalField {
    id_field: i64,
    field_name: String,
    field_label: String,
    type_widget: RawWidget,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    modules: Vec<RawModule>,
    #[serde(default)]
    datasets: Vec<RawFieldDataset>,
    field_values: Option<serde_json::Value>,
}

impl RawAdditionalField {
    fn into_field(self) -> AdditionalField {
        AdditionalField {
            id: self.id_field,
            name: self.field_name,
            label: self.field_label,
            widget: self.type_widget.widget_name,
            required: self.required,
            modules: self
                .modules
                .into_iter()
                .map(|module| module.module_code.to_lowercase())
                .collect(),
            dataset_ids: self.datasets.into_iter().map(|d| d.id_dataset).collect(),
            values: self.field_values.filter(|values| !values.is_null()),
        }
    }
}

/// Version of the TaxRef referential served by TaxHub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxrefVersion {
    pub referential_name: String,
    pub version: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RawTaxrefVersion {
    referential_name: String,
    version: serde_json::Value,
    updated_at: Option<String>,
}

impl RawTaxrefVersion {
    fn into_version(self) -> TaxrefVersion {
        let updated_at = self.updated_at.as_deref().and_then(|raw| {
            let parsed = parse_remote_datetime(raw);
            if parsed.is_none() {
                warn!(updated_at = raw, "Unparseable TaxRef update date");
            }
            parsed
        });

        TaxrefVersion {
            referential_name: self.referential_name,
            version: match self.version {
                serde_json::Value::String(version) => version,
                other => other.to_string(),
            },
            updated_at,
        }
    }
}

/// Taxon as listed by TaxHub.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTaxon {
    pub cd_nom: i64,
    pub lb_nom: Option<String>,
    pub nom_vern: Option<String>,
    pub nom_valide: Option<String>,
    pub id_rang: Option<String>,
    pub regne: Option<String>,
    pub group2_inpn: Option<String>,
}

impl RawTaxon {
    /// `None` when the taxon has no scientific name.
    pub fn into_taxon(self) -> Option<Taxon> {
        let name = self.lb_nom.filter(|name| !name.trim().is_empty())?;
        Some(Taxon {
            id: self.cd_nom,
            name,
            name_common: self.nom_vern.filter(|name| !name.trim().is_empty()),
            description: self.nom_valide,
            rank: self.id_rang,
            kingdom: or_any(self.regne),
            group: or_any(self.group2_inpn),
        })
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawTaxonListItem {
    pub cd_nom: i64,
}

impl RawTaxonListItem {
    pub fn into_entry(self, list_id: i64) -> TaxonListEntry {
        TaxonListEntry {
            taxon_id: self.cd_nom,
            list_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawTaxonArea {
    pub cd_nom: i64,
    pub id_area: i64,
    pub color: Option<String>,
    #[serde(default)]
    pub nb_obs: i64,
    pub last_date: Option<String>,
}

impl RawTaxonArea {
    pub fn into_area(self) -> TaxonArea {
        TaxonArea {
            taxon_id: self.cd_nom,
            area_id: self.id_area,
            color: self.color,
            number_of_observers: self.nb_obs,
            last_updated_at: self.last_date,
        }
    }
}

fn or_any(value: Option<String>) -> String {
    value
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| ANY_TAXONOMY.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::{BridgeError, Result as BridgeResult};
    use mockall::mock;
    use mockall::predicate::function;

    mock! {
        Http {}

        #[async_trait]
        impl HttpClient for Http {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    fn client_returning(url_part: &'static str, status: u16, body: &'static str) -> GeoNatureClient {
        let mut http = MockHttp::new();
        http.expect_execute()
            .with(function(move |req: &HttpRequest| req.url.contains(url_part)))
            .returning(move |_| Ok(HttpResponse::new(status, body)));
        GeoNatureClient::new(Arc::new(http), "https://gn.example.org/", "https://th.example.org")
    }

    #[tokio::test]
    async fn test_observers_decoded() {
        let client = client_returning(
            "/api/users/menu/1",
            200,
            r#"[{"id_role": 4, "nom_role": "Doe", "prenom_role": "Jane", "extra": true}]"#,
        );

        let observers = client.observers(1).await.unwrap();
        assert_eq!(observers.len(), 1);
        assert_eq!(observers[0].id, 4);
        assert_eq!(observers[0].lastname.as_deref(), Some("Doe"));
    }

    #[tokio::test]
    async fn test_datasets_split_per_module() {
        let client = client_returning(
            "/api/meta/datasets",
            200,
            r#"{"data": [{"id_dataset": 1, "dataset_name": "Contact", "active": true,
                "modules": [{"module_code": "OCCTAX"}, {"module_code": "OCCHAB"}]}]}"#,
        );

        let datasets = client.datasets().await.unwrap();
        let modules: Vec<&str> = datasets.iter().map(|d| d.module.as_str()).collect();
        assert_eq!(modules, vec!["occtax", "occhab"]);
    }

    #[tokio::test]
    async fn test_taxonomy_adds_any_group() {
        let client = client_returning(
            "/api/taxref/regnewithgroupe2",
            200,
            r#"{"Animalia": ["Oiseaux", "Reptiles"], "Plantae": [null, ""]}"#,
        );

        let taxonomy = client.taxonomy().await.unwrap();
        assert_eq!(taxonomy.len(), 4);
        assert!(taxonomy.contains(&Taxonomy::new("Animalia", ANY_TAXONOMY)));
        assert!(taxonomy.contains(&Taxonomy::new("Plantae", ANY_TAXONOMY)));
    }

    #[tokio::test]
    async fn test_taxa_page_query_and_envelope() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .with(function(|req: &HttpRequest| {
                req.url == "https://th.example.org/api/taxref/?limit=2&page=3&id_liste=100,101"
            }))
            .returning(|_| {
                Ok(HttpResponse::new(
                    200,
                    r#"{"items": [{"cd_nom": 1, "lb_nom": "Bufo bufo", "regne": "Animalia"},
                                  {"cd_nom": 2, "lb_nom": ""}]}"#,
                ))
            });
        let client = GeoNatureClient::new(Arc::new(http), "https://gn.example.org", "https://th.example.org");

        let mut cursor = SyncCursor::new(2).unwrap();
        cursor.advance();
        cursor.advance();
        let raw = client.taxa_page(cursor, &[100, 101]).await.unwrap();
        let taxa: Vec<Taxon> = raw.into_iter().filter_map(RawTaxon::into_taxon).collect();

        assert_eq!(taxa.len(), 1);
        assert_eq!(taxa[0].kingdom, "Animalia");
        assert_eq!(taxa[0].group, ANY_TAXONOMY);
    }

    #[tokio::test]
    async fn test_offset_paging() {
        let mut http = MockHttp::new();
        http.expect_execute()
            .with(function(|req: &HttpRequest| {
                req.url.ends_with("/api/taxref/allnamebylist/7?limit=50&offset=50")
            }))
            .returning(|_| Ok(HttpResponse::new(200, r#"[{"cd_nom": 12}]"#)));
        let client = GeoNatureClient::new(Arc::new(http), "https://gn", "https://th");

        let mut cursor = SyncCursor::new(50).unwrap();
        cursor.advance();
        let items = client.taxa_list_page(7, cursor).await.unwrap();

        assert_eq!(items[0].into_entry(7).taxon_id, 12);
    }

    #[tokio::test]
    async fn test_version_timestamp_parsed() {
        let client = client_returning(
            "/api/taxref/version",
            200,
            r#"{"referential_name": "TaxRef", "version": 16, "updated_at": "2023-06-01 10:00:00"}"#,
        );

        let version = client.taxref_version().await.unwrap();
        assert_eq!(version.version, "16");
        assert!(version.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_error_classification() {
        let not_found = client_returning("/api/taxref/version", 404, "");
        assert!(matches!(
            not_found.taxref_version().await,
            Err(SyncError::NotFound(_))
        ));

        let server = client_returning("/api/taxref/version", 503, "");
        assert!(matches!(
            server.taxref_version().await,
            Err(SyncError::Server { status: 503, .. })
        ));

        let garbage = client_returning("/api/taxref/version", 200, "<html>");
        assert!(matches!(
            garbage.taxref_version().await,
            Err(SyncError::Parse { .. })
        ));

        let mut http = MockHttp::new();
        http.expect_execute()
            .returning(|_| Err(BridgeError::OperationFailed("dns".to_string())));
        let offline = GeoNatureClient::new(Arc::new(http), "https://gn", "https://th");
        assert!(matches!(
            offline.observers(1).await,
            Err(SyncError::Network(_))
        ));
    }
}
