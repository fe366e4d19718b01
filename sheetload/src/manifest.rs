//! Source manifest: the named CSV locations ingested on every run

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// One named source to ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Logical source name, also the target table name once lowercased
    pub name: String,

    /// Fetchable location (http(s) URL, file:// URL or filesystem path)
    pub location: String,
}

impl ManifestEntry {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
        }
    }

    /// Table name inside the dataset
    pub fn table_name(&self) -> String {
        self.name.to_lowercase()
    }
}

/// Manifest validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Manifest entry {index} has an empty name")]
    EmptyName { index: usize },

    #[error("Manifest entry '{name}' has an empty location")]
    EmptyLocation { name: String },

    #[error("Manifest entries '{first}' and '{second}' both load into table '{table}'")]
    TableCollision { first: String, second: String, table: String },
}

/// Ordered list of sources
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    /// Check that every entry is usable and targets a distinct table
    ///
    /// Table names are compared after lowercasing, so `Orders` and `ORDERS`
    /// collide.
    pub fn validate(&self) -> Result<(), ManifestError> {
        debug!(count = self.entries.len(), "Manifest::validate: called");
        let mut tables: HashMap<String, &str> = HashMap::new();

        for (index, entry) in self.entries.iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(ManifestError::EmptyName { index });
            }
            if entry.location.trim().is_empty() {
                return Err(ManifestError::EmptyLocation {
                    name: entry.name.clone(),
                });
            }

            let table = entry.table_name();
            if let Some(first) = tables.get(&table) {
                debug!(%table, "Manifest::validate: collision");
                return Err(ManifestError::TableCollision {
                    first: first.to_string(),
                    second: entry.name.clone(),
                    table,
                });
            }
            tables.insert(table, entry.name.as_str());
        }

        Ok(())
    }

    /// Manifest of the Carttrend spreadsheets
    pub fn carttrend() -> Self {
        const SHEETS: &[(&str, &str)] = &[
            ("Carttrend_Clients", "1PkZuSLHn0eZQLjhBx8qdZ_bh_wzgMbenrYyMGYrxBic"),
            ("Carttrend_Campaigns", "1_WxFdSWGGCNreMgSWf9nfuP-Ye_RnCX1Xs5ubnjGp9s"),
            ("Carttrend_Commandes", "1QVXmhf9b2OSpUVb7uBOQOClk19ldleNYQcloKCrHlgA"),
            ("Carttrend_Details_Commandes", "1kN4O2D-LIvbLSTse2RsguJMPwdMWKtVY6dEl_4hcyqw"),
            ("Carttrend_Entrepots_Machine", "1s9R6eJPlC0Vwz_OPRTZ43XXfknBAXktn"),
            ("Carttrend_Entrepots", "1FSP2Gv31H1lnpLh6nmaNFcKlCE11OlbA"),
            ("Carttrend_Posts", "1N81drG9zhp9VBZh3LqPoQ01cMvXol1kX43hqhQtAZ44"),
            ("Carttrend_Produits", "1I4KHaFSEMMJ2E7OEO-v1KWbYfOGUBGiC8XCUVvFHs2I"),
            ("Carttrend_Promotions", "1p2O-Zgmhcmfov1BkLb7Rx9k2iwg65kFcgVyYwb4CYs4"),
            ("Carttrend_Satisfaction", "1G7rST778z_zcewJX9CuURwIqTSKfWCU_i6ZJ9P8edzM"),
        ];

        Self::new(
            SHEETS
                .iter()
                .map(|(name, sheet_id)| ManifestEntry::new(*name, sheet_export_url(sheet_id)))
                .collect(),
        )
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = &'a ManifestEntry;
    type IntoIter = std::slice::Iter<'a, ManifestEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// CSV export URL for a Google Sheets document
pub fn sheet_export_url(sheet_id: &str) -> String {
    format!("https://docs.google.com/spreadsheets/d/{}/export?format=csv", sheet_id)
}
