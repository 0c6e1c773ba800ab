//! Domain models for locally persisted reference data
//!
//! These are the local shapes of what GeoNature and TaxHub serve. Remote
//! payloads are converted into them by the sync engine before persistence.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// =============================================================================
// Observers and datasets
// =============================================================================

/// A person who can be selected as observer when recording data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct InputObserver {
    /// `id_role` on the server
    pub id: i64,
    pub lastname: Option<String>,
    pub firstname: Option<String>,
}

impl InputObserver {
    pub fn new(id: i64, lastname: Option<String>, firstname: Option<String>) -> Self {
        Self {
            id,
            lastname,
            firstname,
        }
    }
}

/// A dataset available to one module.
///
/// The server lists each dataset once with every module using it; locally
/// there is one row per `(id, module)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Dataset {
    pub id: i64,
    pub module: String,
    pub name: String,
    pub description: Option<String>,
    pub active: bool,
    /// ISO-8601 creation date as sent by the server
    pub created_at: Option<String>,
    pub taxa_list_id: Option<i64>,
}

impl Dataset {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!("Dataset {} has no name", self.id));
        }
        if self.module.trim().is_empty() {
            return Err(format!("Dataset {} has no module", self.id));
        }
        Ok(())
    }
}

// =============================================================================
// Taxonomy and taxa
// =============================================================================

/// A `(kingdom, group)` pair of the taxonomic ranking.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct Taxonomy {
    pub kingdom: String,
    #[sqlx(rename = "taxon_group")]
    pub group: String,
}

impl Taxonomy {
    pub fn new(kingdom: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            kingdom: kingdom.into(),
            group: group.into(),
        }
    }
}

/// A taxon from the TaxRef referential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Taxon {
    /// `cd_nom`
    pub id: i64,
    pub name: String,
    pub name_common: Option<String>,
    pub description: Option<String>,
    pub rank: Option<String>,
    pub kingdom: String,
    #[sqlx(rename = "taxon_group")]
    pub group: String,
}

impl Taxon {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err(format!("Taxon {} has no name", self.id));
        }
        if self.id <= 0 {
            return Err(format!("Taxon id {} must be positive", self.id));
        }
        Ok(())
    }

    pub fn taxonomy(&self) -> Taxonomy {
        Taxonomy::new(self.kingdom.clone(), self.group.clone())
    }
}

/// Membership of a taxon in a TaxHub list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct TaxonListEntry {
    pub taxon_id: i64,
    pub list_id: i64,
}

/// Observation summary of a taxon inside a geographic area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TaxonArea {
    pub taxon_id: i64,
    pub area_id: i64,
    /// Display color computed by the server from the last observation date
    pub color: Option<String>,
    pub number_of_observers: i64,
    pub last_updated_at: Option<String>,
}

// =============================================================================
// Nomenclature
// =============================================================================

/// A nomenclature type together with its values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NomenclatureType {
    pub id: i64,
    pub mnemonic: String,
    pub label: Option<String>,
    pub values: Vec<Nomenclature>,
}

/// One value of a nomenclature type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nomenclature {
    pub id: i64,
    pub code: String,
    pub hierarchy: String,
    pub type_id: i64,
    pub label: Option<String>,
    /// Taxonomy ranks this value applies to; empty means all
    pub taxonomy: Vec<Taxonomy>,
}

impl NomenclatureType {
    pub fn validate(&self) -> Result<(), String> {
        if self.mnemonic.trim().is_empty() {
            return Err(format!("Nomenclature type {} has no mnemonic", self.id));
        }
        if let Some(value) = self.values.iter().find(|value| value.type_id != self.id) {
            return Err(format!(
                "Nomenclature {} belongs to type {}, not {}",
                value.id, value.type_id, self.id
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Additional fields
// =============================================================================

/// A form field defined by the server administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalField {
    pub id: i64,
    pub name: String,
    pub label: String,
    /// Widget name, e.g. `select`, `text`, `nomenclature`
    pub widget: String,
    pub required: bool,
    /// Module codes the field is shown in
    pub modules: Vec<String>,
    pub dataset_ids: Vec<i64>,
    /// Raw widget values, kept as sent by the server
    pub values: Option<serde_json::Value>,
}
