//! Warehouse sink
//!
//! The [`Warehouse`] trait is the only surface the ingest code sees. It is
//! implemented by [`BigQueryClient`] for real runs and by [`MemoryWarehouse`]
//! for dry runs and tests.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod auth;
mod bigquery;
mod error;
mod memory;
#[cfg(test)]
mod test_server;

pub use auth::{ServiceAccountKey, TokenProvider};
pub use bigquery::BigQueryClient;
pub use error::WarehouseError;
pub use memory::{MemoryWarehouse, StoredTable};

/// `<project>.<dataset>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetRef {
    pub project: String,
    pub dataset: String,
}

impl DatasetRef {
    pub fn new(project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            dataset: dataset.into(),
        }
    }

    /// Reference to a table inside this dataset
    pub fn table(&self, table: impl Into<String>) -> TableRef {
        TableRef {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: table.into(),
        }
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.project, self.dataset)
    }
}

/// `<project>.<dataset>.<table>`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn dataset_ref(&self) -> DatasetRef {
        DatasetRef::new(self.project.clone(), self.dataset.clone())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

/// What a load job does with existing table contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteDisposition {
    /// Replace all rows
    #[default]
    WriteTruncate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceFormat {
    #[default]
    Csv,
}

/// Column type sent in a load schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    String,
}

/// One column of a load schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: String,
}

impl SchemaField {
    pub fn nullable(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            mode: "NULLABLE".to_string(),
        }
    }
}

/// Load job settings
///
/// Column names always come from `schema`; the header row of the payload is
/// skipped, never interpreted by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJobConfig {
    pub write_disposition: WriteDisposition,
    pub source_format: SourceFormat,
    pub schema: Vec<SchemaField>,
    pub skip_leading_rows: u32,
}

impl LoadJobConfig {
    /// Replace-all CSV load with one header row and an explicit schema
    pub fn replace_csv(schema: Vec<SchemaField>) -> Self {
        Self {
            write_disposition: WriteDisposition::WriteTruncate,
            source_format: SourceFormat::Csv,
            schema,
            skip_leading_rows: 1,
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Dataset metadata returned by the sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetInfo {
    pub dataset: DatasetRef,
    pub location: Option<String>,
}

/// Completed load job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub job_id: String,
    /// Rows written, when the sink reports it
    pub output_rows: Option<u64>,
}

/// Warehouse operations used by the ingest stage
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Fetch dataset metadata; [`WarehouseError::NotFound`] if absent
    async fn get_dataset(&self, dataset: &DatasetRef) -> Result<DatasetInfo, WarehouseError>;

    async fn create_dataset(&self, dataset: &DatasetRef) -> Result<DatasetInfo, WarehouseError>;

    /// Submit a CSV load job and block until the sink reports it done
    async fn load_csv(
        &self,
        table: &TableRef,
        data: Vec<u8>,
        config: &LoadJobConfig,
    ) -> Result<LoadOutcome, WarehouseError>;
}
