//! # Data Sync Settings
//!
//! Settings of a data sync run, read from the host's app settings JSON.
//!
//! Keys may sit at the document root or inside a `"sync"` section; the
//! section wins when both define a key. Unknown keys are ignored.
//!
//! ```json
//! {
//!   "sync": {
//!     "geonature_url": "https://demo.geonature.fr/geonature",
//!     "taxhub_url": "https://demo.geonature.fr/taxhub",
//!     "gn_application_id": 3,
//!     "observers_list_id": 1,
//!     "taxa_list_id": [100, 101],
//!     "code_area_type": "M10",
//!     "page_size": 1000,
//!     "data_sync_periodicity": "30m",
//!     "essential_data_sync_periodicity": "20m"
//!   }
//! }
//! ```

use crate::cursor::DEFAULT_PAGE_SIZE;
use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Shortest accepted periodicity.
pub const MIN_PERIODICITY: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSyncSettings {
    pub geonature_server_url: String,
    pub taxhub_server_url: String,
    pub application_id: i64,
    pub users_list_id: i64,
    pub taxa_list_ids: Vec<i64>,
    pub code_area_type: Option<String>,
    pub page_size: u32,
    pub data_sync_periodicity: Option<Duration>,
    pub essential_data_sync_periodicity: Option<Duration>,
}

impl DataSyncSettings {
    pub fn new(
        geonature_server_url: impl Into<String>,
        taxhub_server_url: impl Into<String>,
        application_id: i64,
        users_list_id: i64,
    ) -> Self {
        Self {
            geonature_server_url: geonature_server_url.into(),
            taxhub_server_url: taxhub_server_url.into(),
            application_id,
            users_list_id,
            taxa_list_ids: Vec::new(),
            code_area_type: None,
            page_size: DEFAULT_PAGE_SIZE,
            data_sync_periodicity: None,
            essential_data_sync_periodicity: None,
        }
    }

    pub fn with_taxa_list_ids(mut self, ids: Vec<i64>) -> Self {
        self.taxa_list_ids = ids;
        self
    }

    pub fn with_code_area_type(mut self, code: impl Into<String>) -> Self {
        self.code_area_type = Some(code.into());
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_periodicity(mut self, data: Duration, essential: Option<Duration>) -> Self {
        self.data_sync_periodicity = Some(data);
        self.essential_data_sync_periodicity = essential;
        self
    }

    /// Fails fast on settings a run cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.geonature_server_url.trim().is_empty() {
            return Err(SyncError::InvalidSettings(
                "geonature_url must not be blank".to_string(),
            ));
        }
        if self.taxhub_server_url.trim().is_empty() {
            return Err(SyncError::InvalidSettings(
                "taxhub_url must not be blank".to_string(),
            ));
        }
        if self.page_size == 0 {
            return Err(SyncError::InvalidSettings(
                "page_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Applies every key `patch` sets.
    pub fn merge(mut self, patch: DataSyncSettingsPatch) -> Self {
        if let Some(url) = non_blank(patch.geonature_url) {
            self.geonature_server_url = url;
        }
        if let Some(url) = non_blank(patch.taxhub_url) {
            self.taxhub_server_url = url;
        }
        if let Some(id) = patch.gn_application_id {
            self.application_id = id;
        }
        if let Some(id) = patch.observers_list_id {
            self.users_list_id = id;
        }
        if let Some(ids) = patch.taxa_list_id {
            self.taxa_list_ids = ids.into_vec();
        }
        if let Some(code) = non_blank(patch.code_area_type) {
            self.code_area_type = Some(code);
        }
        if let Some(page_size) = patch.page_size {
            self.page_size = page_size;
        }

        let data = patch
            .data_sync_periodicity
            .as_deref()
            .and_then(|raw| checked_periodicity("data_sync_periodicity", raw))
            .or(self.data_sync_periodicity);
        let essential = patch
            .essential_data_sync_periodicity
            .as_deref()
            .and_then(|raw| checked_periodicity("essential_data_sync_periodicity", raw))
            .or(self.essential_data_sync_periodicity);
        let (data, essential) = reconcile_periodicities(data, essential);
        self.data_sync_periodicity = data;
        self.essential_data_sync_periodicity = essential;

        self
    }
}

/// Settings keys as they appear in the JSON document. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DataSyncSettingsPatch {
    #[serde(alias = "geonature_server_url")]
    pub geonature_url: Option<String>,
    #[serde(alias = "taxhub_server_url")]
    pub taxhub_url: Option<String>,
    #[serde(alias = "application_id")]
    pub gn_application_id: Option<i64>,
    #[serde(alias = "users_list_id")]
    pub observers_list_id: Option<i64>,
    #[serde(alias = "taxa_list_ids")]
    pub taxa_list_id: Option<ListIds>,
    pub code_area_type: Option<String>,
    pub page_size: Option<u32>,
    pub data_sync_periodicity: Option<String>,
    pub essential_data_sync_periodicity: Option<String>,
}

impl DataSyncSettingsPatch {
    /// Keys set in `other` take precedence.
    pub fn merge(self, other: DataSyncSettingsPatch) -> Self {
        Self {
            geonature_url: other.geonature_url.or(self.geonature_url),
            taxhub_url: other.taxhub_url.or(self.taxhub_url),
            gn_application_id: other.gn_application_id.or(self.gn_application_id),
            observers_list_id: other.observers_list_id.or(self.observers_list_id),
            taxa_list_id: other.taxa_list_id.or(self.taxa_list_id),
            code_area_type: other.code_area_type.or(self.code_area_type),
            page_size: other.page_size.or(self.page_size),
            data_sync_periodicity: other.data_sync_periodicity.or(self.data_sync_periodicity),
            essential_data_sync_periodicity: other
                .essential_data_sync_periodicity
                .or(self.essential_data_sync_periodicity),
        }
    }

    /// Builds full settings, requiring the server URLs and identifiers.
    pub fn build(self) -> Result<DataSyncSettings> {
        let geonature_url = non_blank(self.geonature_url.clone())
            .ok_or_else(|| missing("geonature_url"))?;
        let taxhub_url =
            non_blank(self.taxhub_url.clone()).ok_or_else(|| missing("taxhub_url"))?;
        let application_id = self
            .gn_application_id
            .ok_or_else(|| missing("gn_application_id"))?;
        let users_list_id = self
            .observers_list_id
            .ok_or_else(|| missing("observers_list_id"))?;

        let settings =
            DataSyncSettings::new(geonature_url, taxhub_url, application_id, users_list_id)
                .merge(self);
        settings.validate()?;
        Ok(settings)
    }
}

/// A single list id or several.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ListIds {
    One(i64),
    Many(Vec<i64>),
}

impl ListIds {
    pub fn into_vec(self) -> Vec<i64> {
        match self {
            ListIds::One(id) => vec![id],
            ListIds::Many(ids) => ids,
        }
    }
}

fn missing(key: &str) -> SyncError {
    SyncError::InvalidSettings(format!("missing required setting '{}'", key))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Parses durations such as `15m`, `1h30m` or `1d`.
pub fn parse_periodicity(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let mut total = 0u64;
    let mut digits = String::new();
    for c in raw.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit = match c.to_ascii_lowercase() {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            _ => return None,
        };
        let value: u64 = digits.parse().ok()?;
        total = total.checked_add(value.checked_mul(unit)?)?;
        digits.clear();
    }

    // Trailing digits without a unit
    if !digits.is_empty() {
        return None;
    }

    Some(Duration::from_secs(total))
}

fn checked_periodicity(key: &str, raw: &str) -> Option<Duration> {
    match parse_periodicity(raw) {
        Some(duration) if duration >= MIN_PERIODICITY => Some(duration),
        Some(_) => {
            warn!(key, value = raw, "Periodicity below 15 minutes, ignored");
            None
        }
        None => {
            warn!(key, value = raw, "Invalid periodicity, ignored");
            None
        }
    }
}

fn reconcile_periodicities(
    data: Option<Duration>,
    essential: Option<Duration>,
) -> (Option<Duration>, Option<Duration>) {
    match (data, essential) {
        (Some(data), Some(essential)) => (Some(data), Some(essential.min(data))),
        (Some(data), None) => (Some(data), Some(data)),
        (None, Some(essential)) => (Some(essential), Some(essential)),
        (None, None) => (None, None),
    }
}

// ============================================================================
// Loader
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct SettingsDocument {
    #[serde(flatten)]
    root: DataSyncSettingsPatch,
    #[serde(default)]
    sync: Option<DataSyncSettingsPatch>,
}

/// Reads [`DataSyncSettings`] from the app settings JSON file.
pub struct AppSettingsLoader;

impl AppSettingsLoader {
    pub async fn load(path: impl AsRef<Path>) -> Result<DataSyncSettings> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading app settings");

        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(SyncError::parse(path.display().to_string(), e)),
        };

        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<DataSyncSettings> {
        let document: SettingsDocument =
            serde_json::from_str(raw).map_err(|e| SyncError::parse("app settings", e))?;

        let patch = match document.sync {
            Some(section) => document.root.merge(section),
            None => document.root,
        };
        patch.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "geonature_url": "https://gn.example.org",
        "taxhub_url": "https://th.example.org",
        "gn_application_id": 3,
        "observers_list_id": 1
    }"#;

    #[test]
    fn test_minimal_document() {
        let settings = AppSettingsLoader::from_json(MINIMAL).unwrap();

        assert_eq!(settings.geonature_server_url, "https://gn.example.org");
        assert_eq!(settings.page_size, DEFAULT_PAGE_SIZE);
        assert!(settings.taxa_list_ids.is_empty());
        assert!(settings.data_sync_periodicity.is_none());
    }

    #[test]
    fn test_sync_section_overrides_root() {
        let settings = AppSettingsLoader::from_json(
            r#"{
                "geonature_url": "https://root.example.org",
                "taxhub_url": "https://th.example.org",
                "gn_application_id": 3,
                "observers_list_id": 1,
                "theme": "dark",
                "sync": {
                    "geonature_url": "https://section.example.org",
                    "taxa_list_id": 100,
                    "page_size": 250
                }
            }"#,
        )
        .unwrap();

        assert_eq!(settings.geonature_server_url, "https://section.example.org");
        assert_eq!(settings.taxa_list_ids, vec![100]);
        assert_eq!(settings.page_size, 250);
    }

    #[test]
    fn test_missing_required_key() {
        let result = AppSettingsLoader::from_json(r#"{"taxhub_url": "https://th"}"#);
        assert!(matches!(result, Err(SyncError::InvalidSettings(_))));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            AppSettingsLoader::from_json("{ not json"),
            Err(SyncError::Parse { .. })
        ));
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let result = AppSettingsLoader::from_json(
            r#"{"geonature_url": "a", "taxhub_url": "b", "gn_application_id": 1,
                "observers_list_id": 1, "page_size": 0}"#,
        );
        assert!(matches!(result, Err(SyncError::InvalidSettings(_))));
    }

    #[test]
    fn test_parse_periodicity() {
        assert_eq!(parse_periodicity("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_periodicity("1h30m"), Some(Duration::from_secs(5400)));
        assert_eq!(parse_periodicity("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_periodicity("90"), None);
        assert_eq!(parse_periodicity("1w"), None);
        assert_eq!(parse_periodicity(""), None);
    }

    #[test]
    fn test_periodicity_rules() {
        let base = DataSyncSettings::new("gn", "th", 1, 1);

        let too_short = base.clone().merge(DataSyncSettingsPatch {
            data_sync_periodicity: Some("5m".to_string()),
            ..Default::default()
        });
        assert_eq!(too_short.data_sync_periodicity, None);

        let single = base.clone().merge(DataSyncSettingsPatch {
            essential_data_sync_periodicity: Some("20m".to_string()),
            ..Default::default()
        });
        assert_eq!(single.data_sync_periodicity, Some(Duration::from_secs(1200)));
        assert_eq!(
            single.essential_data_sync_periodicity,
            Some(Duration::from_secs(1200))
        );

        let clamped = base.merge(DataSyncSettingsPatch {
            data_sync_periodicity: Some("30m".to_string()),
            essential_data_sync_periodicity: Some("2h".to_string()),
            ..Default::default()
        });
        assert_eq!(
            clamped.essential_data_sync_periodicity,
            Some(Duration::from_secs(1800))
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = AppSettingsLoader::load("/nonexistent/geonature/settings.json").await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let settings = AppSettingsLoader::load(file.path()).await.unwrap();
        assert_eq!(settings.application_id, 3);
    }
}
