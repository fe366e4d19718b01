//! In-memory warehouse for dry runs and tests

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    DatasetInfo, DatasetRef, LoadJobConfig, LoadOutcome, SchemaField, TableRef, Warehouse, WarehouseError,
    WriteDisposition,
};

/// Contents of a table held by [`MemoryWarehouse`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTable {
    pub schema: Vec<SchemaField>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    datasets: HashSet<DatasetRef>,
    tables: BTreeMap<String, StoredTable>,
    failing_tables: HashSet<String>,
    deny_access: bool,
    get_dataset_calls: usize,
    create_dataset_calls: usize,
    jobs: u64,
}

/// Warehouse that keeps datasets and tables in process memory
#[derive(Debug, Default)]
pub struct MemoryWarehouse {
    state: Mutex<MemoryState>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing dataset
    pub fn with_dataset(mut self, dataset: DatasetRef) -> Self {
        self.state.get_mut().datasets.insert(dataset);
        self
    }

    /// Make every load into `table` (bare table name) fail
    pub fn fail_loads_for(mut self, table: impl Into<String>) -> Self {
        self.state.get_mut().failing_tables.insert(table.into());
        self
    }

    /// Reject all dataset calls with a permission error
    pub fn deny_access(mut self) -> Self {
        self.state.get_mut().deny_access = true;
        self
    }

    pub async fn has_dataset(&self, dataset: &DatasetRef) -> bool {
        self.state.lock().await.datasets.contains(dataset)
    }

    pub async fn table(&self, table: &TableRef) -> Option<StoredTable> {
        self.state.lock().await.tables.get(&table.to_string()).cloned()
    }

    /// Fully qualified names of all stored tables, sorted
    pub async fn table_names(&self) -> Vec<String> {
        self.state.lock().await.tables.keys().cloned().collect()
    }

    pub async fn get_dataset_calls(&self) -> usize {
        self.state.lock().await.get_dataset_calls
    }

    pub async fn create_dataset_calls(&self) -> usize {
        self.state.lock().await.create_dataset_calls
    }
}

fn access_denied(dataset: &DatasetRef) -> WarehouseError {
    WarehouseError::ApiError {
        status: 403,
        message: format!("Access Denied: Dataset {}", dataset),
    }
}

/// Skip the leading rows and keep the data rows
///
/// Column names come from the load schema, never from the payload.
fn parse_rows(data: &[u8], config: &LoadJobConfig) -> Result<StoredTable, String> {
    if config.schema.is_empty() {
        return Err("Load job has no schema".to_string());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(data);
    let mut rows = Vec::new();
    for (i, record) in reader.records().enumerate() {
        let record = record.map_err(|e| e.to_string())?;
        if i < config.skip_leading_rows as usize {
            continue;
        }
        if record.len() != config.schema.len() {
            return Err(format!(
                "Row {} has {} values, schema has {} columns",
                i + 1,
                record.len(),
                config.schema.len()
            ));
        }
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(StoredTable {
        schema: config.schema.clone(),
        columns: config.column_names().into_iter().map(str::to_string).collect(),
        rows,
    })
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn get_dataset(&self, dataset: &DatasetRef) -> Result<DatasetInfo, WarehouseError> {
        debug!(%dataset, "MemoryWarehouse::get_dataset: called");
        let mut state = self.state.lock().await;
        state.get_dataset_calls += 1;
        if state.deny_access {
            return Err(access_denied(dataset));
        }
        if state.datasets.contains(dataset) {
            Ok(DatasetInfo {
                dataset: dataset.clone(),
                location: None,
            })
        } else {
            Err(WarehouseError::NotFound(format!("Dataset {}", dataset)))
        }
    }

    async fn create_dataset(&self, dataset: &DatasetRef) -> Result<DatasetInfo, WarehouseError> {
        debug!(%dataset, "MemoryWarehouse::create_dataset: called");
        let mut state = self.state.lock().await;
        state.create_dataset_calls += 1;
        if state.deny_access {
            return Err(access_denied(dataset));
        }
        if !state.datasets.insert(dataset.clone()) {
            return Err(WarehouseError::ApiError {
                status: 409,
                message: format!("Already Exists: Dataset {}", dataset),
            });
        }
        Ok(DatasetInfo {
            dataset: dataset.clone(),
            location: None,
        })
    }

    async fn load_csv(
        &self,
        table: &TableRef,
        data: Vec<u8>,
        config: &LoadJobConfig,
    ) -> Result<LoadOutcome, WarehouseError> {
        debug!(%table, bytes = data.len(), "MemoryWarehouse::load_csv: called");
        let mut state = self.state.lock().await;
        state.jobs += 1;
        let job_id = format!("memory_job_{}", state.jobs);

        if !state.datasets.contains(&table.dataset_ref()) {
            return Err(WarehouseError::NotFound(format!("Dataset {}", table.dataset_ref())));
        }
        if state.failing_tables.contains(&table.table) {
            return Err(WarehouseError::JobFailed {
                job_id,
                message: format!("Simulated failure loading {}", table),
            });
        }

        let incoming = parse_rows(&data, config).map_err(|message| WarehouseError::JobFailed {
            job_id: job_id.clone(),
            message,
        })?;
        let loaded = incoming.rows.len() as u64;

        match config.write_disposition {
            WriteDisposition::WriteTruncate => {
                state.tables.insert(table.to_string(), incoming);
            }
        }

        Ok(LoadOutcome {
            job_id,
            output_rows: Some(loaded),
        })
    }
}
